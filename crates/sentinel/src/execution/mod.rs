pub mod guard;
pub mod paper;

pub use guard::{OrderReservation, TradeGuard};
pub use paper::PaperExchange;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::errors::SentinelError;
use crate::types::{AccountStatus, Fill, OrderRequest, Position};

/// Order execution venue.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn account_status(&self) -> Result<AccountStatus, SentinelError>;

    async fn positions(&self) -> Result<Vec<Position>, SentinelError>;

    /// Submit a market order; `reference_price` is the latest observed price.
    async fn submit_order(
        &self,
        order: &OrderRequest,
        reference_price: Decimal,
    ) -> Result<Fill, SentinelError>;
}
