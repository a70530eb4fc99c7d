//! Webhook reconciliation integration tests.

mod common;

use billing_service::models::{
    BillingCycle, CreatePayment, PaymentStatus, PlanType, ScheduleStatus, SubscriptionStatus,
};
use billing_service::services::gateway::{GatewayPaymentStatus, PaymentStatusInfo};
use billing_service::services::{BillingStore, ReconcileOutcome, ReconcilePolicy};
use chrono::Utc;
use common::{date, TestHarness};
use service_core::error::AppError;
use uuid::Uuid;

fn notification(transaction_id: &str, merchant_ref: &str, status: &str) -> String {
    format!(
        r#"{{"imp_uid":"{}","merchant_uid":"{}","status":"{}"}}"#,
        transaction_id, merchant_ref, status
    )
}

async fn pending_payment(
    h: &TestHarness,
    tenant: Uuid,
    merchant_ref: &str,
    transaction_id: &str,
    schedule_id: Option<Uuid>,
) {
    h.store
        .insert_payment(&CreatePayment {
            tenant_id: tenant,
            merchant_ref: merchant_ref.to_string(),
            transaction_id: Some(transaction_id.to_string()),
            amount: 29_900,
            status: PaymentStatus::Pending,
            schedule_id,
            failure_reason: None,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn webhook_applies_refetched_status() {
    let h = TestHarness::new();
    pending_payment(&h, h.tenant, "ord_1", "imp_1", None).await;

    let paid_at = Utc::now();
    h.gateway.set_payment_status(
        "imp_1",
        PaymentStatusInfo {
            status: GatewayPaymentStatus::Paid,
            paid_at: Some(paid_at),
            failure_reason: None,
        },
    );

    let outcome = h
        .reconciler
        .process_notification(&notification("imp_1", "ord_1", "paid"), None)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Applied(PaymentStatus::Paid));

    let payment = h
        .store
        .payment_by_merchant_ref("ord_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status_enum(), PaymentStatus::Paid);
    assert_eq!(payment.paid_utc, Some(paid_at));
    assert_eq!(payment.transaction_id.as_deref(), Some("imp_1"));
}

#[tokio::test]
async fn webhook_payload_status_is_not_trusted() {
    let h = TestHarness::new();
    pending_payment(&h, h.tenant, "ord_2", "imp_2", None).await;

    // The payload claims "paid"; the gateway's authoritative record says
    // the charge failed. The gateway wins.
    h.gateway.set_payment_status(
        "imp_2",
        PaymentStatusInfo {
            status: GatewayPaymentStatus::Failed,
            paid_at: None,
            failure_reason: Some("insufficient funds".to_string()),
        },
    );

    let outcome = h
        .reconciler
        .process_notification(&notification("imp_2", "ord_2", "paid"), None)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Applied(PaymentStatus::Failed));

    let payment = h
        .store
        .payment_by_merchant_ref("ord_2")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status_enum(), PaymentStatus::Failed);
    assert_eq!(
        payment.failure_reason.as_deref(),
        Some("insufficient funds")
    );
}

#[tokio::test]
async fn duplicate_webhook_is_a_noop() {
    let h = TestHarness::new();
    pending_payment(&h, h.tenant, "ord_3", "imp_3", None).await;

    h.gateway.set_payment_status(
        "imp_3",
        PaymentStatusInfo {
            status: GatewayPaymentStatus::Paid,
            paid_at: Some(Utc::now()),
            failure_reason: None,
        },
    );

    let body = notification("imp_3", "ord_3", "paid");
    let first = h.reconciler.process_notification(&body, None).await.unwrap();
    let second = h.reconciler.process_notification(&body, None).await.unwrap();

    assert_eq!(first, ReconcileOutcome::Applied(PaymentStatus::Paid));
    assert_eq!(second, ReconcileOutcome::AlreadyTerminal);
}

#[tokio::test]
async fn missing_reference_is_dropped() {
    let h = TestHarness::new();

    let outcome = h
        .reconciler
        .process_notification("{}", None)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::MissingReference);
}

#[tokio::test]
async fn unknown_reference_is_dropped() {
    let h = TestHarness::new();
    h.gateway.set_payment_status(
        "imp_ghost",
        PaymentStatusInfo {
            status: GatewayPaymentStatus::Paid,
            paid_at: Some(Utc::now()),
            failure_reason: None,
        },
    );

    let outcome = h
        .reconciler
        .process_notification(&notification("imp_ghost", "ord_ghost", "paid"), None)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::UnknownReference);
}

#[tokio::test]
async fn invalid_signature_is_rejected_when_verifying() {
    let h = TestHarness::with_policy(ReconcilePolicy {
        verify_signatures: true,
        failure_threshold: 3,
        failure_window_days: 30,
    });
    h.gateway.set_accept_signatures(false);

    let body = notification("imp_4", "ord_4", "paid");
    let missing = h.reconciler.process_notification(&body, None).await;
    assert!(matches!(missing, Err(AppError::Unauthorized(_))));

    let invalid = h
        .reconciler
        .process_notification(&body, Some("bad-signature"))
        .await;
    assert!(matches!(invalid, Err(AppError::Unauthorized(_))));
}

#[tokio::test]
async fn third_failure_in_window_suspends_subscription() {
    let h = TestHarness::new();
    h.issue_card().await;

    let started = h
        .lifecycle
        .start(h.tenant, PlanType::Pro, BillingCycle::Monthly, date(2026, 1, 1))
        .await
        .unwrap();

    // Two failed renewals already on record this month.
    for n in 0..2 {
        h.store
            .insert_payment(&CreatePayment {
                tenant_id: h.tenant,
                merchant_ref: format!("ord_failed_{}", n),
                transaction_id: Some(format!("imp_failed_{}", n)),
                amount: 29_900,
                status: PaymentStatus::Failed,
                schedule_id: Some(started.schedule.schedule_id),
                failure_reason: Some("card declined".to_string()),
            })
            .await
            .unwrap();
    }

    // The third failure arrives by webhook.
    pending_payment(
        &h,
        h.tenant,
        "ord_failed_2",
        "imp_failed_2",
        Some(started.schedule.schedule_id),
    )
    .await;
    h.gateway.set_payment_status(
        "imp_failed_2",
        PaymentStatusInfo {
            status: GatewayPaymentStatus::Failed,
            paid_at: None,
            failure_reason: Some("card declined".to_string()),
        },
    );

    let outcome = h
        .reconciler
        .process_notification(&notification("imp_failed_2", "ord_failed_2", "failed"), None)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Applied(PaymentStatus::Failed));

    let sub = h
        .store
        .latest_subscription(h.tenant)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sub.status_enum(), SubscriptionStatus::PastDue);

    let schedule = h
        .store
        .schedule_for_subscription(started.subscription.subscription_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(schedule.status_enum(), ScheduleStatus::Suspended);
}

#[tokio::test]
async fn two_failures_do_not_suspend() {
    let h = TestHarness::new();
    h.issue_card().await;

    let started = h
        .lifecycle
        .start(h.tenant, PlanType::Pro, BillingCycle::Monthly, date(2026, 1, 1))
        .await
        .unwrap();

    h.store
        .insert_payment(&CreatePayment {
            tenant_id: h.tenant,
            merchant_ref: "ord_f0".to_string(),
            transaction_id: Some("imp_f0".to_string()),
            amount: 29_900,
            status: PaymentStatus::Failed,
            schedule_id: Some(started.schedule.schedule_id),
            failure_reason: Some("card declined".to_string()),
        })
        .await
        .unwrap();

    pending_payment(&h, h.tenant, "ord_f1", "imp_f1", Some(started.schedule.schedule_id)).await;
    h.gateway.set_payment_status(
        "imp_f1",
        PaymentStatusInfo {
            status: GatewayPaymentStatus::Failed,
            paid_at: None,
            failure_reason: Some("card declined".to_string()),
        },
    );

    h.reconciler
        .process_notification(&notification("imp_f1", "ord_f1", "failed"), None)
        .await
        .unwrap();

    let sub = h
        .store
        .latest_subscription(h.tenant)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sub.status_enum(), SubscriptionStatus::Active);
}

#[tokio::test]
async fn duplicate_failure_webhook_does_not_double_count() {
    let h = TestHarness::new();
    h.issue_card().await;

    let started = h
        .lifecycle
        .start(h.tenant, PlanType::Pro, BillingCycle::Monthly, date(2026, 1, 1))
        .await
        .unwrap();

    // One failure on record; the incoming webhook is the second. A
    // redelivered copy of it must not act as a third.
    h.store
        .insert_payment(&CreatePayment {
            tenant_id: h.tenant,
            merchant_ref: "ord_d0".to_string(),
            transaction_id: Some("imp_d0".to_string()),
            amount: 29_900,
            status: PaymentStatus::Failed,
            schedule_id: Some(started.schedule.schedule_id),
            failure_reason: Some("card declined".to_string()),
        })
        .await
        .unwrap();

    pending_payment(&h, h.tenant, "ord_d1", "imp_d1", Some(started.schedule.schedule_id)).await;
    h.gateway.set_payment_status(
        "imp_d1",
        PaymentStatusInfo {
            status: GatewayPaymentStatus::Failed,
            paid_at: None,
            failure_reason: Some("card declined".to_string()),
        },
    );

    let body = notification("imp_d1", "ord_d1", "failed");
    h.reconciler.process_notification(&body, None).await.unwrap();
    let replay = h.reconciler.process_notification(&body, None).await.unwrap();
    assert_eq!(replay, ReconcileOutcome::AlreadyTerminal);

    let sub = h
        .store
        .latest_subscription(h.tenant)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sub.status_enum(), SubscriptionStatus::Active);
}

#[tokio::test]
async fn paid_webhook_reactivates_past_due_subscription() {
    let h = TestHarness::new();
    h.issue_card().await;

    let started = h
        .lifecycle
        .start(h.tenant, PlanType::Pro, BillingCycle::Monthly, date(2026, 1, 1))
        .await
        .unwrap();
    h.store
        .suspend_subscription(started.subscription.subscription_id)
        .await
        .unwrap();

    pending_payment(
        &h,
        h.tenant,
        "ord_retry",
        "imp_retry",
        Some(started.schedule.schedule_id),
    )
    .await;
    let paid_at = date(2026, 2, 5).and_hms_opt(9, 30, 0).unwrap().and_utc();
    h.gateway.set_payment_status(
        "imp_retry",
        PaymentStatusInfo {
            status: GatewayPaymentStatus::Paid,
            paid_at: Some(paid_at),
            failure_reason: None,
        },
    );

    let outcome = h
        .reconciler
        .process_notification(&notification("imp_retry", "ord_retry", "paid"), None)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Applied(PaymentStatus::Paid));

    let sub = h
        .store
        .latest_subscription(h.tenant)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sub.status_enum(), SubscriptionStatus::Active);
    assert_eq!(sub.next_billing_date, date(2026, 3, 5));

    let schedule = h
        .store
        .schedule_for_subscription(started.subscription.subscription_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(schedule.status_enum(), ScheduleStatus::Scheduled);
    assert_eq!(schedule.last_charge_date, Some(date(2026, 2, 5)));
}

#[tokio::test]
async fn cancellation_is_recorded_without_touching_the_subscription() {
    let h = TestHarness::new();
    h.issue_card().await;

    h.lifecycle
        .start(h.tenant, PlanType::Pro, BillingCycle::Monthly, date(2026, 1, 1))
        .await
        .unwrap();

    pending_payment(&h, h.tenant, "ord_cxl", "imp_cxl", None).await;
    h.gateway.set_payment_status(
        "imp_cxl",
        PaymentStatusInfo {
            status: GatewayPaymentStatus::Cancelled,
            paid_at: None,
            failure_reason: None,
        },
    );

    let outcome = h
        .reconciler
        .process_notification(&notification("imp_cxl", "ord_cxl", "cancelled"), None)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Applied(PaymentStatus::Canceled));

    // Audit only: the subscription is left for manual follow-up.
    let sub = h
        .store
        .latest_subscription(h.tenant)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sub.status_enum(), SubscriptionStatus::Active);
}

#[tokio::test]
async fn retry_recovers_a_lost_webhook() {
    let h = TestHarness::new();
    pending_payment(&h, h.tenant, "ord_lost", "imp_lost", None).await;

    h.gateway.set_payment_status(
        "imp_lost",
        PaymentStatusInfo {
            status: GatewayPaymentStatus::Paid,
            paid_at: Some(Utc::now()),
            failure_reason: None,
        },
    );

    let outcome = h.reconciler.retry("imp_lost").await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Applied(PaymentStatus::Paid));

    let payment = h
        .store
        .payment_by_merchant_ref("ord_lost")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status_enum(), PaymentStatus::Paid);
}

#[tokio::test]
async fn retry_of_unknown_transaction_is_not_found() {
    let h = TestHarness::new();
    let result = h.reconciler.retry("imp_nope").await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}
