//! Tests for recipe-material authoring, the active-recipe view and the
//! dosed/rejected listings.

mod common;

use chrono::NaiveDate;
use common::TestCtx;

use microdose_api::{
    errors::ServiceError,
    events::Event,
    services::dosing::DoseStatus,
    services::production_orders::CreateOrderRequest,
    services::recipes::{CreateRecipeRequest, UpsertRecipeMaterialRequest},
};

fn order_request(order_number: &str, recipe_id: i32, batch_size: f64) -> CreateOrderRequest {
    CreateOrderRequest {
        order_number: order_number.to_string(),
        recipe_id,
        batch_size,
        scheduled_date: NaiveDate::from_ymd_opt(2025, 6, 11).unwrap(),
        created_by: "operator-1".to_string(),
        notes: None,
        barcode_id: None,
    }
}

#[tokio::test]
async fn upsert_creates_then_updates_and_notifies() {
    let ctx = TestCtx::new().await;
    // Seeds the material master row alongside the recipe step.
    let (recipe_id, material_ids) = ctx.seed_recipe("UPS", &[(10.0, 500.0)]).await;

    let mut observer = ctx.bus.subscribe();

    // Updating the existing (recipe, material) pair announces an update.
    let saved = ctx
        .services
        .recipes
        .upsert_material(UpsertRecipeMaterialRequest {
            recipe_id,
            material_id: material_ids[0],
            sequence: 1,
            set_point: 12.5,
            margin: Some(300.0),
            actual: None,
            status: None,
            bucket_id: Some(7),
        })
        .await
        .expect("upsert existing");
    assert_eq!(saved.set_point, 12.5);
    assert_eq!(saved.margin, Some(300.0));
    assert_eq!(saved.status, DoseStatus::Pending.as_str());

    match observer.recv().await.expect("update event") {
        Event::RecipeMaterialUpdated {
            recipe_id: rid,
            material_id,
            set_point,
            bucket_id,
            ..
        } => {
            assert_eq!(rid, recipe_id);
            assert_eq!(material_id, material_ids[0]);
            assert_eq!(set_point, 12.5);
            assert_eq!(bucket_id, Some(7));
        }
        other => panic!("expected recipe_material_updated, got {other:?}"),
    }

    let err = ctx
        .services
        .recipes
        .upsert_material(UpsertRecipeMaterialRequest {
            recipe_id: recipe_id + 999,
            material_id: material_ids[0],
            sequence: 1,
            set_point: 1.0,
            margin: None,
            actual: None,
            status: None,
            bucket_id: None,
        })
        .await
        .expect_err("unknown recipe");
    assert!(matches!(err, ServiceError::NotFound(_)));

    let err = ctx
        .services
        .recipes
        .upsert_material(UpsertRecipeMaterialRequest {
            recipe_id,
            material_id: material_ids[0],
            sequence: 1,
            set_point: 1.0,
            margin: None,
            actual: None,
            status: Some("weighed".to_string()),
            bucket_id: None,
        })
        .await
        .expect_err("unknown status");
    assert!(matches!(err, ServiceError::InvalidStatus(_)));
}

#[tokio::test]
async fn create_recipe_conflicts_on_duplicate_code() {
    let ctx = TestCtx::new().await;

    ctx.services
        .recipes
        .create_recipe(CreateRecipeRequest {
            name: "Premix A".to_string(),
            code: "PMX-A".to_string(),
            description: None,
            barcode_id: None,
        })
        .await
        .expect("create recipe");

    let err = ctx
        .services
        .recipes
        .create_recipe(CreateRecipeRequest {
            name: "Premix A again".to_string(),
            code: "PMX-A".to_string(),
            description: None,
            barcode_id: None,
        })
        .await
        .expect_err("duplicate code");
    assert!(matches!(err, ServiceError::Conflict(_)));
}

#[tokio::test]
async fn active_view_lists_pending_materials_of_the_verified_recipe() {
    let ctx = TestCtx::new().await;
    let (recipe_id, material_ids) = ctx
        .seed_recipe("ACT", &[(10.0, 500.0), (5.0, 200.0)])
        .await;

    // No verified order yet.
    assert!(ctx
        .services
        .dosing
        .active_materials()
        .await
        .expect("active view")
        .is_none());

    let order = ctx
        .services
        .orders
        .create_order(order_request("PO-ACT", recipe_id, 2.0))
        .await
        .expect("create order");
    ctx.services
        .orders
        .verify_order(order.order_id)
        .await
        .expect("verify order");

    let view = ctx
        .services
        .dosing
        .active_materials()
        .await
        .expect("active view")
        .expect("verified order present");
    assert_eq!(view.recipe_id, recipe_id);
    assert_eq!(view.materials.len(), 2);
    assert_eq!(view.materials[0].material_id, material_ids[0]);
    assert_eq!(view.materials[0].set_point, 20.0);
    assert_eq!(view.materials[1].set_point, 10.0);

    // After dosing the first material only one pending step remains.
    ctx.scale.push_weight(19.6);
    ctx.services.dosing.evaluate().await.expect("evaluate");
    let view = ctx
        .services
        .dosing
        .active_materials()
        .await
        .expect("active view")
        .expect("verified order present");
    assert_eq!(view.materials.len(), 1);
    assert_eq!(view.materials[0].material_id, material_ids[1]);
}

#[tokio::test]
async fn dosed_listing_returns_dosed_and_rejected_with_names() {
    let ctx = TestCtx::new().await;
    let (recipe_id, material_ids) = ctx
        .seed_recipe("HIST", &[(10.0, 500.0), (5.0, 200.0)])
        .await;
    let order = ctx
        .services
        .orders
        .create_order(order_request("PO-HIST", recipe_id, 1.0))
        .await
        .expect("create order");
    ctx.services
        .orders
        .verify_order(order.order_id)
        .await
        .expect("verify order");

    // Dose the first step, bypass the rest.
    ctx.scale.push_weight(9.9);
    ctx.services.dosing.evaluate().await.expect("evaluate");
    ctx.services
        .dosing
        .bypass_pending(recipe_id)
        .await
        .expect("bypass");

    let page = ctx
        .services
        .recipes
        .dosed_materials(1, 20, None)
        .await
        .expect("dosed listing");
    assert_eq!(page.total, 2);
    assert_eq!(page.materials[0].material_id, material_ids[0]);
    assert_eq!(page.materials[0].status, DoseStatus::Dosed.as_str());
    assert_eq!(page.materials[0].recipe_name, "recipe HIST");
    assert_eq!(page.materials[1].status, DoseStatus::Rejected.as_str());

    // Barcode filter narrows to one material.
    let page = ctx
        .services
        .recipes
        .dosed_materials(1, 20, Some("HIST-BC-2".to_string()))
        .await
        .expect("filtered listing");
    assert_eq!(page.total, 1);
    assert_eq!(page.materials[0].material_id, material_ids[1]);

    let err = ctx
        .services
        .recipes
        .materials_for_recipe(recipe_id + 999)
        .await
        .expect_err("unknown recipe");
    assert!(matches!(err, ServiceError::NotFound(_)));
}
