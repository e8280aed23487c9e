pub mod db;
pub mod error;
pub mod mercadopago;
pub mod provider;
pub mod store;
pub mod webhook;

pub use error::PaymentError;
pub use mercadopago::{CancelTarget, MercadoPagoClient};
pub use provider::{PaymentProvider, PaymentRecord, SubscriptionRecord};
pub use store::{Subscriber, SubscriberStore};
pub use webhook::{verify_signature, Notification, Topic};
