//! Domain models for billing-service.

pub mod credential;
pub mod payment;
pub mod plan;
pub mod schedule;
pub mod subscription;

pub use credential::{BillingCredential, CreateCredential, CredentialStatus};
pub use payment::{CreatePayment, FinalizePayment, ListPaymentsFilter, Payment, PaymentStatus};
pub use plan::{BillingCycle, PlanType};
pub use schedule::{BillingSchedule, CreateSchedule, ScheduleStatus};
pub use subscription::{CreateSubscription, Subscription, SubscriptionStatus};
