//! End-to-end tests for the dosing sequencer state machine:
//! in-order dosing, tolerance boundaries, batch reset, bypass, and the
//! no-op outcomes that must leave the database untouched.

mod common;

use chrono::NaiveDate;
use common::TestCtx;
use sea_orm::EntityTrait;

use microdose_api::{
    entities::dosed_material,
    errors::ServiceError,
    events::Event,
    services::dosing::{DoseOutcome, DoseStatus},
    services::production_orders::CreateOrderRequest,
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
async fn full_batch_cycle_doses_in_order_and_resets() {
    let ctx = TestCtx::new().await;
    let (recipe_id, material_ids) = ctx
        .seed_recipe("CYCLE", &[(10.0, 500.0), (5.0, 200.0)])
        .await;

    let order = ctx
        .services
        .orders
        .create_order(order_request("PO-CYCLE", recipe_id, 2.0))
        .await
        .expect("create order");
    // Creation-time scaling: 10 kg and 5 kg become 20 kg and 10 kg.
    let materials = ctx.materials(recipe_id).await;
    assert_eq!(materials[0].set_point, 20.0);
    assert_eq!(materials[1].set_point, 10.0);
    assert_eq!(order.dosing, Some(15.0));

    ctx.services
        .orders
        .verify_order(order.order_id)
        .await
        .expect("verify order");

    // First evaluation: 19.6 kg >= 20 - 0.5, doses the first material.
    ctx.scale.push_weight(19.6);
    let outcome = ctx.services.dosing.evaluate().await.expect("evaluate");
    match outcome {
        DoseOutcome::Dosed {
            material_id,
            actual,
            margin,
            reset_done,
            total_remaining,
            ..
        } => {
            assert_eq!(material_id, material_ids[0]);
            assert_eq!(actual, 19.6);
            assert_eq!(margin, -400.0);
            assert!(!reset_done);
            assert_eq!(total_remaining, 1);
        }
        other => panic!("expected dosed outcome, got {other:?}"),
    }

    let materials = ctx.materials(recipe_id).await;
    assert_eq!(materials[0].status, DoseStatus::Dosed.as_str());
    assert_eq!(materials[0].actual, Some(19.6));
    assert_eq!(materials[1].status, DoseStatus::Pending.as_str());

    // The audit record is committed together with the status flip.
    let records = dosed_material::Entity::find()
        .all(&*ctx.db)
        .await
        .expect("dosed records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].material_id, material_ids[0]);
    assert_eq!(records[0].set_point, 20.0);
    assert_eq!(records[0].batch_size, 2.0);

    // Second evaluation: 9.9 kg >= 10 - 0.2 doses the last material and
    // triggers the batch reset.
    ctx.scale.push_weight(9.9);
    let outcome = ctx.services.dosing.evaluate().await.expect("evaluate");
    match outcome {
        DoseOutcome::Dosed {
            material_id,
            margin,
            reset_done,
            total_remaining,
            ..
        } => {
            assert_eq!(material_id, material_ids[1]);
            assert_eq!(margin, -100.0);
            assert!(reset_done);
            assert_eq!(total_remaining, 0);
        }
        other => panic!("expected dosed outcome, got {other:?}"),
    }

    // Round-trip: setpoints return to their pre-order values, statuses and
    // measurements are cleared.
    let materials = ctx.materials(recipe_id).await;
    assert_eq!(materials[0].set_point, 10.0);
    assert_eq!(materials[1].set_point, 5.0);
    for m in &materials {
        assert_eq!(m.status, DoseStatus::Pending.as_str());
        assert_eq!(m.actual, None);
        assert_eq!(m.margin, None);
    }

    // Both audit rows survive the reset.
    let records = dosed_material::Entity::find()
        .all(&*ctx.db)
        .await
        .expect("dosed records");
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn underweight_is_a_no_op() {
    let ctx = TestCtx::new().await;
    let (recipe_id, material_ids) = ctx
        .seed_recipe("UNDER", &[(10.0, 500.0), (5.0, 200.0)])
        .await;
    let order = ctx
        .services
        .orders
        .create_order(order_request("PO-UNDER", recipe_id, 2.0))
        .await
        .expect("create order");
    ctx.services
        .orders
        .verify_order(order.order_id)
        .await
        .expect("verify order");

    let before = ctx.materials(recipe_id).await;

    // 18 kg < 19.5 kg lower limit.
    ctx.scale.push_weight(18.0);
    let outcome = ctx.services.dosing.evaluate().await.expect("evaluate");
    match outcome {
        DoseOutcome::Underweight {
            material_id,
            set_point,
            actual,
            margin_g,
            ..
        } => {
            assert_eq!(material_id, material_ids[0]);
            assert_eq!(set_point, 20.0);
            assert_eq!(actual, 18.0);
            assert_eq!(margin_g, 500.0);
        }
        other => panic!("expected underweight outcome, got {other:?}"),
    }

    // Repeated no-op evaluations mutate nothing.
    ctx.scale.push_weight(18.0);
    ctx.services.dosing.evaluate().await.expect("evaluate");
    assert_eq!(ctx.materials(recipe_id).await, before);
    assert!(dosed_material::Entity::find()
        .all(&*ctx.db)
        .await
        .expect("dosed records")
        .is_empty());
}

#[tokio::test]
async fn boundary_weight_doses_inclusively() {
    let ctx = TestCtx::new().await;
    let (recipe_id, material_ids) = ctx.seed_recipe("EDGE", &[(10.0, 500.0)]).await;
    let order = ctx
        .services
        .orders
        .create_order(order_request("PO-EDGE", recipe_id, 2.0))
        .await
        .expect("create order");
    ctx.services
        .orders
        .verify_order(order.order_id)
        .await
        .expect("verify order");

    // Exactly the lower limit: 20 - 0.5 = 19.5.
    ctx.scale.push_weight(19.5);
    let outcome = ctx.services.dosing.evaluate().await.expect("evaluate");
    match outcome {
        DoseOutcome::Dosed {
            material_id, margin, ..
        } => {
            assert_eq!(material_id, material_ids[0]);
            assert_eq!(margin, -500.0);
        }
        other => panic!("expected dosed outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn waits_for_previous_material() {
    let ctx = TestCtx::new().await;
    let (recipe_id, material_ids) = ctx
        .seed_recipe("ORDER", &[(10.0, 500.0), (5.0, 200.0)])
        .await;
    let order = ctx
        .services
        .orders
        .create_order(order_request("PO-ORDER", recipe_id, 1.0))
        .await
        .expect("create order");
    ctx.services
        .orders
        .verify_order(order.order_id)
        .await
        .expect("verify order");

    // First step knocked out of `pending` without being dosed: the second
    // step must not be dosed either.
    let materials = ctx.materials(recipe_id).await;
    ctx.force_status(materials[0].recipe_material_id, DoseStatus::Rejected)
        .await;

    ctx.scale.push_weight(100.0);
    let outcome = ctx.services.dosing.evaluate().await.expect("evaluate");
    match outcome {
        DoseOutcome::WaitingForPrevious { material_id } => {
            assert_eq!(material_id, material_ids[1]);
        }
        other => panic!("expected waiting-for-previous outcome, got {other:?}"),
    }
    assert_eq!(
        ctx.materials(recipe_id).await[1].status,
        DoseStatus::Pending.as_str()
    );
}

#[tokio::test]
async fn reports_no_active_order_without_verified_order() {
    let ctx = TestCtx::new().await;
    let (recipe_id, _) = ctx.seed_recipe("IDLE", &[(10.0, 500.0)]).await;

    // No orders at all.
    let outcome = ctx.services.dosing.evaluate().await.expect("evaluate");
    assert!(matches!(outcome, DoseOutcome::NoActiveOrder));

    // A planned order does not arm the sequencer either.
    ctx.services
        .orders
        .create_order(order_request("PO-IDLE", recipe_id, 1.0))
        .await
        .expect("create order");
    let outcome = ctx.services.dosing.evaluate().await.expect("evaluate");
    assert!(matches!(outcome, DoseOutcome::NoActiveOrder));
}

#[tokio::test]
async fn scale_failure_aborts_without_mutation() {
    let ctx = TestCtx::new().await;
    let (recipe_id, _) = ctx.seed_recipe("FAIL", &[(10.0, 500.0)]).await;
    let order = ctx
        .services
        .orders
        .create_order(order_request("PO-FAIL", recipe_id, 1.0))
        .await
        .expect("create order");
    ctx.services
        .orders
        .verify_order(order.order_id)
        .await
        .expect("verify order");

    let before = ctx.materials(recipe_id).await;

    ctx.scale.push_failure("device unreachable");
    let err = ctx
        .services
        .dosing
        .evaluate()
        .await
        .expect_err("scale failure should abort");
    assert!(matches!(err, ServiceError::DeviceError(_)));
    assert_eq!(ctx.materials(recipe_id).await, before);
}

#[tokio::test]
async fn bypass_rejects_all_pending_then_no_pending() {
    let ctx = TestCtx::new().await;
    let (recipe_id, _) = ctx
        .seed_recipe("SKIP", &[(10.0, 500.0), (5.0, 200.0)])
        .await;
    let order = ctx
        .services
        .orders
        .create_order(order_request("PO-SKIP", recipe_id, 1.0))
        .await
        .expect("create order");
    ctx.services
        .orders
        .verify_order(order.order_id)
        .await
        .expect("verify order");

    let bypassed = ctx
        .services
        .dosing
        .bypass_pending(recipe_id)
        .await
        .expect("bypass");
    assert_eq!(bypassed.len(), 2);
    for m in ctx.materials(recipe_id).await {
        assert_eq!(m.status, DoseStatus::Rejected.as_str());
    }

    // Nothing pending is left; evaluation is a no-op.
    ctx.scale.push_weight(100.0);
    let outcome = ctx.services.dosing.evaluate().await.expect("evaluate");
    assert!(matches!(outcome, DoseOutcome::NoPending));

    // A second bypass finds nothing.
    let bypassed = ctx
        .services
        .dosing
        .bypass_pending(recipe_id)
        .await
        .expect("bypass");
    assert!(bypassed.is_empty());
}

#[tokio::test]
async fn concurrent_evaluations_never_double_dose() {
    let ctx = TestCtx::new().await;
    // The second step's threshold (30 - 0.1) is far above the scripted
    // weight, so exactly one dose can happen.
    let (recipe_id, material_ids) = ctx
        .seed_recipe("RACE", &[(10.0, 500.0), (15.0, 100.0)])
        .await;
    let order = ctx
        .services
        .orders
        .create_order(order_request("PO-RACE", recipe_id, 2.0))
        .await
        .expect("create order");
    ctx.services
        .orders
        .verify_order(order.order_id)
        .await
        .expect("verify order");

    for _ in 0..8 {
        ctx.scale.push_weight(19.6);
    }

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let dosing = ctx.services.dosing.clone();
        tasks.push(tokio::spawn(async move { dosing.evaluate().await }));
    }

    let mut dosed = 0;
    for task in tasks {
        let outcome = task.await.expect("join").expect("evaluate");
        if matches!(outcome, DoseOutcome::Dosed { .. }) {
            dosed += 1;
        }
    }
    assert_eq!(dosed, 1, "exactly one evaluation may dose the first material");

    let records = dosed_material::Entity::find()
        .all(&*ctx.db)
        .await
        .expect("dosed records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].material_id, material_ids[0]);
    let materials = ctx.materials(recipe_id).await;
    assert_eq!(materials[0].status, DoseStatus::Dosed.as_str());
    assert_eq!(materials[1].status, DoseStatus::Pending.as_str());
}

#[tokio::test]
async fn events_follow_the_committed_dose() {
    let ctx = TestCtx::new().await;
    let (recipe_id, material_ids) = ctx.seed_recipe("EVT", &[(10.0, 500.0)]).await;
    let order = ctx
        .services
        .orders
        .create_order(order_request("PO-EVT", recipe_id, 1.0))
        .await
        .expect("create order");
    let mut observer = ctx.bus.subscribe();
    ctx.services
        .orders
        .verify_order(order.order_id)
        .await
        .expect("verify order");

    // Skip past the verify-time announcements; `active_recipe_materials` is
    // the last of them.
    loop {
        match observer.recv().await.expect("verify events") {
            Event::ActiveRecipeMaterials { .. } => break,
            _ => continue,
        }
    }

    ctx.scale.push_weight(9.9);
    let outcome = ctx.services.dosing.evaluate().await.expect("evaluate");
    assert!(matches!(outcome, DoseOutcome::Dosed { reset_done: true, .. }));

    // Single-material recipe: the dose completes the batch, so observers see
    // the reset first and the material update after it.
    match observer.recv().await.expect("reset event") {
        Event::RecipeReset { recipe_id: id, .. } => assert_eq!(id, recipe_id),
        other => panic!("expected recipe_reset, got {other:?}"),
    }
    match observer.recv().await.expect("material event") {
        Event::MaterialUpdated {
            material_id,
            status,
            deviation,
            ..
        } => {
            assert_eq!(material_id, material_ids[0]);
            assert_eq!(status, DoseStatus::Dosed.as_str());
            assert_eq!(deviation, -100.0);
        }
        other => panic!("expected material_updated, got {other:?}"),
    }
}
