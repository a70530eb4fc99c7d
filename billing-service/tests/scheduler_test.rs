//! Billing sweep integration tests.

mod common;

use billing_service::models::{
    BillingCycle, ListPaymentsFilter, PaymentStatus, PlanType, ScheduleStatus, SubscriptionStatus,
};
use billing_service::services::gateway::GatewayError;
use billing_service::services::BillingStore;
use common::{date, TestHarness};

#[tokio::test]
async fn due_schedule_advances_anchored_to_prior_date() {
    let h = TestHarness::new();
    h.issue_card().await;

    let started = h
        .lifecycle
        .start(h.tenant, PlanType::Pro, BillingCycle::Monthly, date(2026, 1, 1))
        .await
        .unwrap();
    assert_eq!(started.schedule.next_charge_date, date(2026, 2, 1));

    // The sweep runs two weeks late; the next charge date still lands
    // exactly one month after the scheduled date, not after "now".
    let report = h.scheduler.run_due_charges(date(2026, 2, 15)).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.succeeded, 1);

    let schedule = h
        .store
        .schedule_for_subscription(started.subscription.subscription_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(schedule.next_charge_date, date(2026, 3, 1));
    assert_eq!(schedule.last_charge_date, Some(date(2026, 2, 15)));

    // The renewal payment is tagged with the schedule.
    let payments = h
        .store
        .list_payments(h.tenant, &ListPaymentsFilter::default())
        .await
        .unwrap();
    let renewal = payments
        .iter()
        .find(|p| p.schedule_id == Some(schedule.schedule_id))
        .expect("renewal payment recorded");
    assert_eq!(renewal.status_enum(), PaymentStatus::Paid);
    assert_eq!(renewal.amount, 29_900);
}

#[tokio::test]
async fn schedules_not_yet_due_are_untouched() {
    let h = TestHarness::new();
    h.issue_card().await;

    h.lifecycle
        .start(h.tenant, PlanType::Pro, BillingCycle::Monthly, date(2026, 1, 1))
        .await
        .unwrap();

    let report = h.scheduler.run_due_charges(date(2026, 1, 20)).await.unwrap();
    assert_eq!(report.processed, 0);
    assert_eq!(h.gateway.charge_count(), 1); // only the initial charge
}

#[tokio::test]
async fn rerunning_the_sweep_is_safe() {
    let h = TestHarness::new();
    h.issue_card().await;

    h.lifecycle
        .start(h.tenant, PlanType::Pro, BillingCycle::Monthly, date(2026, 1, 1))
        .await
        .unwrap();

    h.scheduler.run_due_charges(date(2026, 2, 3)).await.unwrap();
    let second = h.scheduler.run_due_charges(date(2026, 2, 3)).await.unwrap();

    // The advanced date falls out of the due filter, so nothing repeats.
    assert_eq!(second.processed, 0);
    assert_eq!(h.gateway.charge_count(), 2);
}

#[tokio::test]
async fn missing_credential_skips_schedule_without_advancing() {
    let h = TestHarness::new();
    h.issue_card().await;

    let started = h
        .lifecycle
        .start(h.tenant, PlanType::Pro, BillingCycle::Monthly, date(2026, 1, 1))
        .await
        .unwrap();

    assert!(h.credentials.delete(h.tenant).await.unwrap());

    let report = h.scheduler.run_due_charges(date(2026, 2, 2)).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.succeeded, 0);

    // No charge happened and the schedule stays due for the next sweep.
    assert_eq!(h.gateway.charge_count(), 1);
    let schedule = h
        .store
        .schedule_for_subscription(started.subscription.subscription_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(schedule.next_charge_date, date(2026, 2, 1));
}

#[tokio::test]
async fn one_tenants_failure_does_not_stop_the_batch() {
    let a = TestHarness::new();
    // Two tenants share one harness store/gateway.
    let tenant_b = uuid::Uuid::new_v4();
    a.issue_card().await;
    a.credentials
        .issue(tenant_b, &common::test_card())
        .await
        .unwrap();

    a.lifecycle
        .start(a.tenant, PlanType::Pro, BillingCycle::Monthly, date(2026, 1, 1))
        .await
        .unwrap();
    a.lifecycle
        .start(tenant_b, PlanType::Starter, BillingCycle::Monthly, date(2026, 1, 1))
        .await
        .unwrap();

    // One of the two renewal charges blows up at the transport level.
    a.gateway
        .push_charge_result(Err(GatewayError::Network("connection reset".to_string())));

    let report = a.scheduler.run_due_charges(date(2026, 2, 1)).await.unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);

    // Both schedules advanced regardless of outcome.
    for tenant in [a.tenant, tenant_b] {
        let sub = a.store.active_subscription(tenant).await.unwrap().unwrap();
        let schedule = a
            .store
            .schedule_for_subscription(sub.subscription_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(schedule.next_charge_date, date(2026, 3, 1));
    }
}

#[tokio::test]
async fn past_due_subscription_expires_after_grace() {
    let h = TestHarness::new();
    h.issue_card().await;

    let started = h
        .lifecycle
        .start(h.tenant, PlanType::Pro, BillingCycle::Monthly, date(2026, 1, 1))
        .await
        .unwrap();

    // Suspended by failure policy; renewal owed since Feb 1.
    h.store
        .suspend_subscription(started.subscription.subscription_id)
        .await
        .unwrap();

    // Inside the grace window nothing expires.
    let report = h.scheduler.run_due_charges(date(2026, 2, 10)).await.unwrap();
    assert_eq!(report.expired, 0);

    // Past the 14-day grace window the subscription expires for good.
    let report = h.scheduler.run_due_charges(date(2026, 2, 20)).await.unwrap();
    assert_eq!(report.expired, 1);

    let sub = h
        .store
        .latest_subscription(h.tenant)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sub.status_enum(), SubscriptionStatus::Expired);

    let schedule = h
        .store
        .schedule_for_subscription(started.subscription.subscription_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(schedule.status_enum(), ScheduleStatus::Completed);
}
