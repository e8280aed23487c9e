use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lola_core::config::MercadoPagoConfig;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{PaymentError, Result};
use crate::provider::{PaymentProvider, PaymentRecord, SubscriptionRecord};
use crate::store::{Subscriber, SubscriberStore};
use crate::webhook::{Notification, Topic};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Plan name stored when a preapproval matches no configured plan.
const UNKNOWN_PLAN: &str = "desconocido";

/// Which subscription an admin cancel request refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelTarget {
    Preapproval(String),
    /// Resolved to a preapproval id through the subscriber table.
    Email(String),
}

/// MercadoPago REST client: checkout preferences, payment search and
/// subscription bookkeeping.
pub struct MercadoPagoClient {
    client: reqwest::Client,
    config: MercadoPagoConfig,
    store: Arc<SubscriberStore>,
}

impl MercadoPagoClient {
    pub fn new(config: MercadoPagoConfig, store: Arc<SubscriberStore>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            store,
        }
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.config.webhook_secret.as_deref().filter(|s| !s.is_empty())
    }

    pub fn store(&self) -> &SubscriberStore {
        &self.store
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path)
    }

    async fn read<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %text, "MercadoPago API error");
            return Err(PaymentError::Api {
                status: status.as_u16(),
                message: text,
            });
        }
        resp.json()
            .await
            .map_err(|e| PaymentError::Parse(e.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.config.access_token)
            .query(query)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        Self::read(resp).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        let resp = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.config.access_token)
            .json(body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        Self::read(resp).await
    }

    async fn put<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        let resp = self
            .client
            .put(self.url(path))
            .bearer_auth(&self.config.access_token)
            .json(body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        Self::read(resp).await
    }

    /// Checkout link of every configured plan, by plan name.
    pub fn plans(&self) -> BTreeMap<String, Option<String>> {
        self.config
            .plans
            .iter()
            .map(|(name, plan)| {
                let link = plan.init_point.clone().filter(|l| !l.is_empty());
                (name.clone(), link)
            })
            .collect()
    }

    /// Cancel a preapproval at the provider, then mark it cancelled in the
    /// subscriber table. Returns the preapproval id.
    pub async fn cancel_subscription(&self, target: &CancelTarget) -> Result<String> {
        let mp_id = match target {
            CancelTarget::Preapproval(id) => id.clone(),
            CancelTarget::Email(email) => self
                .store
                .find_by_email(email)?
                .map(|s| s.mp_id)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| PaymentError::UnknownSubscriber(email.clone()))?,
        };

        let _: Value = self
            .put(&format!("/preapproval/{mp_id}"), &json!({"status": "cancelled"}))
            .await?;
        let changed = self
            .store
            .set_status(&mp_id, "cancelled", &chrono::Utc::now().to_rfc3339())?;
        info!(preapproval = %mp_id, rows = changed, "subscription cancelled");
        Ok(mp_id)
    }

    /// Name of the configured plan whose provider id is `plan_id`.
    pub fn plan_name_for(&self, plan_id: &str) -> String {
        self.config
            .plans
            .iter()
            .find(|(_, plan)| !plan_id.is_empty() && plan.id.as_deref() == Some(plan_id))
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| UNKNOWN_PLAN.to_string())
    }

    /// Act on a verified notification: payments are fetched and logged,
    /// preapprovals are fetched and upserted into the subscriber table.
    pub async fn handle_notification(&self, notification: &Notification) -> Result<()> {
        match notification.topic() {
            Topic::Payment => {
                let pay: PaymentDetail = self
                    .get(&format!("/v1/payments/{}", notification.data_id), &[])
                    .await?;
                info!(
                    payment_id = %notification.data_id,
                    status = %pay.status,
                    amount = pay.transaction_amount,
                    reference = %pay.external_reference.as_deref().unwrap_or_default(),
                    "payment notification"
                );
            }
            Topic::Subscription => {
                let sub: Preapproval = self
                    .get(&format!("/preapproval/{}", notification.data_id), &[])
                    .await?;
                let record = Subscriber {
                    email: sub.payer_email.unwrap_or_default(),
                    plan: self.plan_name_for(sub.preapproval_plan_id.as_deref().unwrap_or_default()),
                    status: sub.status,
                    mp_id: notification.data_id.clone(),
                    phone: sub.payer_phone.and_then(|p| p.number).unwrap_or_default(),
                    updated_at: chrono::Utc::now().to_rfc3339(),
                };
                if record.email.is_empty() {
                    warn!(preapproval = %notification.data_id, "preapproval without payer email, not stored");
                    return Ok(());
                }
                self.store.upsert(&record)?;
                info!(email = %record.email, plan = %record.plan, status = %record.status, "subscriber updated");
            }
        }
        Ok(())
    }
}

/// Checkout preference body. Back and notification URLs are only set when
/// the public origin is known.
fn preference_body(
    amount: f64,
    description: &str,
    payer_ref: &str,
    currency: &str,
    public_base_url: Option<&str>,
) -> Value {
    let mut body = json!({
        "items": [{
            "title": description,
            "quantity": 1,
            "unit_price": amount,
            "currency_id": currency,
        }],
        "external_reference": payer_ref,
    });
    if let Some(base) = public_base_url.map(|b| b.trim_end_matches('/')) {
        body["back_urls"] = json!({
            "success": format!("{base}/pago-ok"),
            "failure": format!("{base}/pago-error"),
            "pending": format!("{base}/pago-pendiente"),
        });
        body["notification_url"] = json!(format!("{base}/mp-webhook"));
        body["auto_return"] = json!("approved");
    }
    body
}

#[async_trait]
impl PaymentProvider for MercadoPagoClient {
    async fn create_preference(&self, amount: f64, description: &str, payer_ref: &str) -> Result<String> {
        let body = preference_body(
            amount,
            description,
            payer_ref,
            &self.config.currency,
            self.config.public_base_url.as_deref(),
        );
        let pref: Preference = self.post("/checkout/preferences", &body).await?;
        let link = pref.init_point.filter(|l| !l.is_empty()).ok_or(PaymentError::NoLink)?;
        info!(amount, description, payer = %payer_ref, "checkout preference created");
        Ok(link)
    }

    async fn find_latest_payment(&self, payer_ref: &str) -> Result<Option<PaymentRecord>> {
        let page: SearchPage = self
            .get(
                "/v1/payments/search",
                &[
                    ("external_reference", payer_ref),
                    ("sort", "date_created"),
                    ("criteria", "desc"),
                    ("limit", "1"),
                ],
            )
            .await?;
        let record = page.results.into_iter().next().map(|p| PaymentRecord {
            status: p.status,
            amount: p.transaction_amount,
            description: p.description.unwrap_or_default(),
        });
        debug!(payer = %payer_ref, found = record.is_some(), "payment search");
        Ok(record)
    }

    async fn find_subscription(&self, payer_ref: &str) -> Result<Option<SubscriptionRecord>> {
        Ok(self.store.find_by_phone(payer_ref)?.map(|s| SubscriptionRecord {
            plan: if s.plan.is_empty() { UNKNOWN_PLAN.to_string() } else { s.plan },
            status: s.status,
        }))
    }

    fn plan_link(&self, plan: &str) -> Option<String> {
        self.config
            .plans
            .get(&plan.trim().to_lowercase())
            .and_then(|p| p.init_point.clone())
            .filter(|l| !l.is_empty())
    }
}

// API response types (private, deserialization only)

#[derive(Deserialize)]
struct Preference {
    init_point: Option<String>,
}

#[derive(Deserialize)]
struct SearchPage {
    #[serde(default)]
    results: Vec<PaymentDetail>,
}

#[derive(Deserialize)]
struct PaymentDetail {
    #[serde(default)]
    status: String,
    #[serde(default)]
    transaction_amount: f64,
    description: Option<String>,
    external_reference: Option<String>,
}

#[derive(Deserialize)]
struct Preapproval {
    payer_email: Option<String>,
    #[serde(default)]
    status: String,
    preapproval_plan_id: Option<String>,
    payer_phone: Option<PayerPhone>,
}

#[derive(Deserialize)]
struct PayerPhone {
    number: Option<String>,
}
