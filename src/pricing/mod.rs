//! Quote pricing: money, pure calculators, request/response types and the
//! orchestrating engine.

pub mod calculators;
pub mod money;
pub mod requests;
pub mod responses;
pub mod routes;
pub mod services;

// Re-export commonly used items
pub use calculators::round_money;
pub use money::Money;
pub use requests::{ExtraRequest, QuoteRequest, UsageType};
pub use responses::{LineItem, LineItemKind, Quote, QuoteState};
pub use routes::router;
pub use services::{EngineStats, QuoteEngine, QuoteError, QuoteSettings};
