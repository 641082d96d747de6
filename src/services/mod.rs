pub mod batches;
pub mod dosing;
pub mod production_orders;
pub mod recipes;
pub mod scale_log;
