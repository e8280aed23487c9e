use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PaymentError;

/// Most recent payment found for a correspondent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Provider status (`approved`, `pending`, `in_process`, `rejected`, …).
    pub status: String,
    pub amount: f64,
    pub description: String,
}

/// Subscription currently on file for a correspondent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub plan: String,
    /// Provider status (`authorized`, `pending`, `cancelled`, …).
    pub status: String,
}

/// What the macro engine needs from a payment backend.
///
/// `payer_ref` is the correspondent address (phone number or platform id);
/// it is used as the external reference of created checkouts.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create a one-off checkout and return its link.
    async fn create_preference(
        &self,
        amount: f64,
        description: &str,
        payer_ref: &str,
    ) -> Result<String, PaymentError>;

    /// Latest payment made under `payer_ref`, if any.
    async fn find_latest_payment(&self, payer_ref: &str) -> Result<Option<PaymentRecord>, PaymentError>;

    /// Subscription matching `payer_ref`, if any.
    async fn find_subscription(&self, payer_ref: &str)
        -> Result<Option<SubscriptionRecord>, PaymentError>;

    /// Checkout link for a named subscription plan.
    fn plan_link(&self, plan: &str) -> Option<String>;
}
