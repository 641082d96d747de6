pub mod batch;
pub mod dosed_material;
pub mod material;
pub mod production_order;
pub mod recipe;
pub mod recipe_material;
pub mod scale_reading;

pub use batch::Entity as Batch;
pub use dosed_material::Entity as DosedMaterial;
pub use material::Entity as Material;
pub use production_order::Entity as ProductionOrder;
pub use recipe::Entity as Recipe;
pub use recipe_material::Entity as RecipeMaterial;
pub use scale_reading::Entity as ScaleReading;
