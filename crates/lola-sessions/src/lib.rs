pub mod store;
pub mod types;

pub use store::HistoryStore;
pub use types::{SessionKey, DEMO_CONTEXT, SALES_CONTEXT};
