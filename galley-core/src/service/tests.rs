use std::sync::Arc;

use galley_sdk::objects::CreateOrderRequest;

use super::*;
use crate::entities::Actor;
use crate::entities::payment::{PaymentMethod, PaymentState};
use crate::entities::TenantId;
use crate::error::InvalidTransition;
use crate::testing::{self, Harness, create_request, dec, line};

fn cash() -> StartPayment {
    StartPayment {
        method: PaymentMethod::Cash,
        source_token: None,
        device_id: None,
        idempotency_key: None,
    }
}

#[tokio::test]
async fn test_create_order_prices_from_catalog() {
    let h = Harness::new();
    let mut request = create_request(vec![
        line("burger", 2, &["cheese"]),
        line("fries", 1, &[]),
    ]);
    request.tip = Some(dec("3.00"));

    let order = h.service.create_order(&h.identity, request).await.unwrap();
    assert_eq!(order.status, OrderStatus::New);
    assert_eq!(order.version, 1);
    assert_eq!(order.items[0].name, "Burger");
    assert_eq!(order.items[0].add_ons[0].price, dec("1.25"));
    assert_eq!(order.subtotal, dec("31.50"));
    assert_eq!(order.tax, dec("2.52"));
    assert_eq!(order.total, dec("37.02"));

    let stored = h.service.get_order(&h.identity, order.id).await.unwrap();
    assert_eq!(stored, order);
}

#[tokio::test]
async fn test_client_totals_are_ignored() {
    let h = Harness::new();
    let request: CreateOrderRequest = serde_json::from_value(serde_json::json!({
        "items": [{ "menu_item_id": "soda", "quantity": 2 }],
        "subtotal": "0.01",
        "tax": "0",
        "total": "0.01"
    }))
    .unwrap();

    let order = h.service.create_order(&h.identity, request).await.unwrap();
    assert_eq!(order.subtotal, dec("4.50"));
    assert_eq!(order.tax, dec("0.36"));
    assert_eq!(order.total, dec("4.86"));
}

#[tokio::test]
async fn test_create_order_rejects_bad_requests() {
    let h = Harness::new();
    let cases = [
        create_request(vec![]),
        create_request(vec![line("burger", 0, &[])]),
        create_request(vec![line("burger", 1000, &[])]),
        create_request(vec![line("lobster", 1, &[])]),
        create_request(vec![line("special", 1, &[])]),
        create_request(vec![line("fries", 1, &["cheese"])]),
        create_request((0..101).map(|_| line("soda", 1, &[])).collect()),
        CreateOrderRequest {
            tip: Some(dec("-1")),
            ..create_request(vec![line("soda", 1, &[])])
        },
        CreateOrderRequest {
            tip: Some(Decimal::MAX),
            ..create_request(vec![line("soda", 1, &[])])
        },
        CreateOrderRequest {
            tip: Some(dec("100000.01")),
            ..create_request(vec![line("soda", 1, &[])])
        },
        CreateOrderRequest {
            fire_at: Some(OffsetDateTime::now_utc().unix_timestamp() - 60),
            ..create_request(vec![line("soda", 1, &[])])
        },
    ];
    for request in cases {
        let err = h
            .service
            .create_order(&h.identity, request.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)), "{request:?}: {err}");
    }
    assert_eq!(h.broadcaster.latest_sequence(h.tenant_id), 0);
}

#[tokio::test]
async fn test_unknown_tenant_is_rejected() {
    let h = Harness::new();
    let stranger = testing::identity(TenantId::generate());
    let err = h
        .service
        .create_order(&stranger, create_request(vec![line("soda", 1, &[])]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Auth(AuthError::UnknownTenant(id)) if id == stranger.tenant_id
    ));
}

#[tokio::test]
async fn test_orders_of_other_tenants_are_not_found() {
    let h = Harness::new();
    let other = TenantId::generate();
    let mut directory: Vec<_> = h.tenants.current().iter().cloned().collect();
    directory.push(crate::config::TenantConfig::new(
        other,
        "Dockside".to_string(),
        b"other".to_vec(),
        dec("0.05"),
    ));
    h.tenants.replace(directory.into_iter().collect());
    let order = h.order().await;

    let intruder = testing::identity(other);
    let err = h.service.get_order(&intruder, order.id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(ResourceKind::Order)));
    let err = h
        .service
        .update_status(&intruder, order.id, OrderStatus::Pending, order.version)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(ResourceKind::Order)));
}

#[tokio::test]
async fn test_full_lifecycle_then_terminal() {
    let h = Harness::new();
    let order = h.order().await;
    let path = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Preparing,
        OrderStatus::Ready,
        OrderStatus::PickedUp,
        OrderStatus::Completed,
    ];
    let mut version = order.version;
    for status in path {
        let next = h
            .service
            .update_status(&h.identity, order.id, status, version)
            .await
            .unwrap();
        assert_eq!(next.status, status);
        assert_eq!(next.version, version + 1);
        version = next.version;
    }
    let done = h.service.get_order(&h.identity, order.id).await.unwrap();
    assert_eq!(done.audit_log.len(), 6);
    assert!(done.audit_log.iter().all(|e| e.actor.as_str() == "staff-1"));

    let err = h
        .service
        .update_status(&h.identity, order.id, OrderStatus::Pending, version)
        .await
        .unwrap_err();
    match err {
        EngineError::InvalidTransition(InvalidTransition {
            current,
            valid_next,
            ..
        }) => {
            assert_eq!(current, OrderStatus::Completed);
            assert!(valid_next.is_empty());
        }
        other => panic!("expected invalid transition, got {other:?}"),
    }
    // created + six status changes
    assert_eq!(h.broadcaster.latest_sequence(h.tenant_id), 7);
}

#[tokio::test]
async fn test_cancel_ready_but_not_completed() {
    let h = Harness::new();
    let order = h.order().await;
    let mut version = order.version;
    for status in [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Preparing,
        OrderStatus::Ready,
    ] {
        version = h
            .service
            .update_status(&h.identity, order.id, status, version)
            .await
            .unwrap()
            .version;
    }
    let cancelled = h
        .service
        .cancel_order(&h.identity, order.id, version)
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);

    let other = h.order().await;
    let mut version = other.version;
    for status in [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Preparing,
        OrderStatus::Ready,
        OrderStatus::Completed,
    ] {
        version = h
            .service
            .update_status(&h.identity, other.id, status, version)
            .await
            .unwrap()
            .version;
    }
    let err = h
        .service
        .cancel_order(&h.identity, other.id, version)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition(ref e) if e.current == OrderStatus::Completed
    ));
    let stored = h.service.get_order(&h.identity, other.id).await.unwrap();
    assert_eq!(stored.version, version);
}

#[tokio::test]
async fn test_concurrent_updates_one_wins() {
    let h = Harness::new();
    let order = h.order().await;
    let (a, b) = tokio::join!(
        h.service
            .update_status(&h.identity, order.id, OrderStatus::Pending, order.version),
        h.service
            .cancel_order(&h.identity, order.id, order.version),
    );
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(EngineError::Conflict { current: 2, .. })))
    );
}

#[tokio::test]
async fn test_cancel_order_cancels_open_payment() {
    let h = Harness::new();
    let order = h.order().await;
    let attempt = h
        .service
        .start_payment(&h.identity, order.id, cash())
        .await
        .unwrap();
    assert_eq!(attempt.state, PaymentState::AwaitingCash);

    h.service
        .cancel_order(&h.identity, order.id, order.version)
        .await
        .unwrap();
    let payment = h.service.get_payment(&h.identity, attempt.id).await.unwrap();
    assert_eq!(payment.state, PaymentState::Cancelled);

    let err = h
        .service
        .start_payment(&h.identity, order.id, cash())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_update_tip_recomputes_totals() {
    let h = Harness::new();
    let order = h.order().await;
    assert_eq!(order.total, dec("27.00"));

    let tipped = h
        .service
        .update_tip(&h.identity, order.id, dec("4.50"), order.version)
        .await
        .unwrap();
    assert_eq!(tipped.tip, dec("4.50"));
    assert_eq!(tipped.total, dec("31.50"));
    assert_eq!(tipped.version, order.version + 1);

    let err = h
        .service
        .update_tip(&h.identity, order.id, dec("1.00"), order.version)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict { current, .. } if current == tipped.version));
}

#[tokio::test]
async fn test_update_tip_rejects_oversized_tip() {
    let h = Harness::new();
    let order = h.order().await;

    for tip in [Decimal::MAX, dec("100000.01")] {
        let err = h
            .service
            .update_tip(&h.identity, order.id, tip, order.version)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)), "{tip}: {err}");
    }
    let stored = h.service.get_order(&h.identity, order.id).await.unwrap();
    assert_eq!(stored.version, order.version);
    assert_eq!(stored.total, dec("27.00"));

    let generous = h
        .service
        .update_tip(&h.identity, order.id, dec("100000.00"), order.version)
        .await
        .unwrap();
    assert_eq!(generous.total, dec("100027.00"));
}

#[tokio::test]
async fn test_update_tip_blocked_while_paying() {
    let h = Harness::new();
    let order = h.order().await;
    let attempt = h
        .service
        .start_payment(&h.identity, order.id, cash())
        .await
        .unwrap();

    let err = h
        .service
        .update_tip(&h.identity, order.id, dec("2.00"), order.version)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::PaymentInProgress { payment_id: Some(id) } if id == attempt.id
    ));
}

#[tokio::test]
async fn test_scheduler_actor_is_recorded() {
    let h = Harness::new();
    let order = h.order().await;
    let machine = OrderStateMachine::new(Arc::clone(&h.store) as Arc<dyn OrderStore>);
    let moved = machine
        .transition(
            h.tenant_id,
            order.id,
            OrderStatus::Pending,
            &Actor::scheduler(),
            order.version,
        )
        .await
        .unwrap();
    assert_eq!(moved.order.audit_log[0].actor, Actor::scheduler());
}
