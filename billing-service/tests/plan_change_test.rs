//! Plan change and proration integration tests.

mod common;

use billing_service::models::{BillingCycle, PaymentStatus, PlanType};
use billing_service::services::gateway::{ChargeOutcome, GatewayPaymentStatus};
use billing_service::services::BillingStore;
use common::{date, TestHarness};
use service_core::error::AppError;

#[tokio::test]
async fn upgrade_charges_prorated_difference() {
    let h = TestHarness::new();
    h.issue_card().await;

    // January cycle: 31 days, ending Feb 1.
    h.lifecycle
        .start(h.tenant, PlanType::Starter, BillingCycle::Monthly, date(2026, 1, 1))
        .await
        .unwrap();

    // 15 days remain; floor(15 * (29900 - 9900) / 31) = 9677.
    let change = h
        .lifecycle
        .change_plan(h.tenant, PlanType::Pro, date(2026, 1, 17))
        .await
        .unwrap();

    assert_eq!(change.prorated_amount, 9_677);
    let payment = change.payment.expect("upgrade should charge immediately");
    assert_eq!(payment.amount, 9_677);
    assert_eq!(payment.status_enum(), PaymentStatus::Paid);

    assert_eq!(change.subscription.plan, "pro");
    assert_eq!(change.subscription.comment_limit, 100_000);

    let schedule = h
        .store
        .schedule_for_subscription(change.subscription.subscription_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(schedule.plan, "pro");
    assert_eq!(schedule.amount, 29_900);
    // The billing anchor does not move on plan changes.
    assert_eq!(schedule.next_charge_date, date(2026, 2, 1));
}

#[tokio::test]
async fn downgrade_changes_plan_without_charge_or_refund() {
    let h = TestHarness::new();
    h.issue_card().await;

    h.lifecycle
        .start(h.tenant, PlanType::Business, BillingCycle::Monthly, date(2026, 1, 1))
        .await
        .unwrap();

    let change = h
        .lifecycle
        .change_plan(h.tenant, PlanType::Starter, date(2026, 1, 17))
        .await
        .unwrap();

    assert!(change.prorated_amount <= 0);
    assert!(change.payment.is_none());
    assert_eq!(change.subscription.plan, "starter");

    // Only the initial charge ever hit the gateway.
    assert_eq!(h.gateway.charge_count(), 1);

    let schedule = h
        .store
        .schedule_for_subscription(change.subscription.subscription_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(schedule.amount, 9_900);
}

#[tokio::test]
async fn change_plan_requires_active_subscription() {
    let h = TestHarness::new();
    h.issue_card().await;

    let result = h
        .lifecycle
        .change_plan(h.tenant, PlanType::Pro, date(2026, 1, 1))
        .await;

    assert!(matches!(result, Err(AppError::FailedPrecondition(_))));
}

#[tokio::test]
async fn change_to_same_plan_is_rejected() {
    let h = TestHarness::new();
    h.issue_card().await;

    h.lifecycle
        .start(h.tenant, PlanType::Pro, BillingCycle::Monthly, date(2026, 1, 1))
        .await
        .unwrap();

    let result = h
        .lifecycle
        .change_plan(h.tenant, PlanType::Pro, date(2026, 1, 10))
        .await;

    assert!(matches!(result, Err(AppError::FailedPrecondition(_))));
}

#[tokio::test]
async fn failed_proration_charge_keeps_plan_change() {
    let h = TestHarness::new();
    h.issue_card().await;

    h.lifecycle
        .start(h.tenant, PlanType::Starter, BillingCycle::Monthly, date(2026, 1, 1))
        .await
        .unwrap();

    h.gateway.push_charge_result(Ok(ChargeOutcome {
        transaction_id: "tx-proration-declined".to_string(),
        status: GatewayPaymentStatus::Failed,
    }));

    let change = h
        .lifecycle
        .change_plan(h.tenant, PlanType::Pro, date(2026, 1, 17))
        .await
        .unwrap();

    // The plan change sticks; the failed charge is left for the
    // reconciler and suspension policy to deal with.
    assert_eq!(change.subscription.plan, "pro");
    let payment = change.payment.expect("failed charge is still recorded");
    assert_eq!(payment.status_enum(), PaymentStatus::Failed);
}

#[tokio::test]
async fn yearly_cycle_prorates_over_the_full_year() {
    let h = TestHarness::new();
    h.issue_card().await;

    h.lifecycle
        .start(h.tenant, PlanType::Starter, BillingCycle::Yearly, date(2026, 1, 1))
        .await
        .unwrap();

    // Exactly half the year remains on Jul 2 (365-day year: 183 of 365
    // days remain; floor(183 * 200000 / 365) = 100273).
    let change = h
        .lifecycle
        .change_plan(h.tenant, PlanType::Pro, date(2026, 7, 2))
        .await
        .unwrap();

    assert_eq!(change.prorated_amount, 100_273);
}
