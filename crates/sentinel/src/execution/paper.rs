//! In-memory paper exchange: simulated cash account with net spot positions.
//!
//! Fills happen immediately at the reference price adjusted by a fixed
//! slippage (buys pay more, sells receive less). Sells are limited to the
//! held quantity.

use std::collections::BTreeMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::Exchange;
use crate::config::PaperConfig;
use crate::errors::SentinelError;
use crate::types::{AccountStatus, Fill, OrderRequest, OrderSide, Position};

const CAPABILITY: &str = "execute_trade";

#[derive(Debug, Clone)]
struct Holding {
    quantity: Decimal,
    avg_price: Decimal,
    last_price: Decimal,
}

#[derive(Debug)]
struct PaperBook {
    cash: Decimal,
    realized_pnl: Decimal,
    holdings: BTreeMap<String, Holding>,
    fills: Vec<Fill>,
}

pub struct PaperExchange {
    quote_asset: String,
    slippage_bps: u32,
    book: RwLock<PaperBook>,
}

impl PaperExchange {
    pub fn new(config: &PaperConfig) -> Self {
        Self {
            quote_asset: config.quote_asset.clone(),
            slippage_bps: config.slippage_bps,
            book: RwLock::new(PaperBook {
                cash: config.starting_cash,
                realized_pnl: Decimal::ZERO,
                holdings: BTreeMap::new(),
                fills: Vec::new(),
            }),
        }
    }

    /// Every fill so far, oldest first.
    pub async fn fills(&self) -> Vec<Fill> {
        self.book.read().await.fills.clone()
    }

    fn execution_price(&self, side: OrderSide, reference: Decimal) -> Option<Decimal> {
        let slip = Decimal::from(self.slippage_bps) / dec!(10_000);
        match side {
            OrderSide::Buy => reference.checked_mul(Decimal::ONE + slip),
            OrderSide::Sell => reference.checked_mul(Decimal::ONE - slip),
        }
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn account_status(&self) -> Result<AccountStatus, SentinelError> {
        let book = self.book.read().await;
        let marked: Decimal = book
            .holdings
            .values()
            .map(|h| h.quantity * h.last_price)
            .sum();
        Ok(AccountStatus {
            mode: "paper".into(),
            quote_asset: self.quote_asset.clone(),
            cash: book.cash,
            equity: book.cash + marked,
            realized_pnl: book.realized_pnl,
            open_positions: book.holdings.len(),
            fills: book.fills.len(),
        })
    }

    async fn positions(&self) -> Result<Vec<Position>, SentinelError> {
        let book = self.book.read().await;
        Ok(book
            .holdings
            .iter()
            .map(|(symbol, h)| Position {
                symbol: symbol.clone(),
                quantity: h.quantity,
                avg_entry_price: h.avg_price,
                last_price: h.last_price,
                unrealized_pnl: (h.last_price - h.avg_price) * h.quantity,
            })
            .collect())
    }

    async fn submit_order(
        &self,
        order: &OrderRequest,
        reference_price: Decimal,
    ) -> Result<Fill, SentinelError> {
        if order.quantity <= Decimal::ZERO {
            return Err(SentinelError::execution(CAPABILITY, "quantity must be positive"));
        }
        if reference_price <= Decimal::ZERO {
            return Err(SentinelError::execution(CAPABILITY, "no valid reference price"));
        }

        let (price, notional) = self
            .execution_price(order.side, reference_price)
            .and_then(|price| Some((price, price.checked_mul(order.quantity)?)))
            .ok_or_else(|| SentinelError::execution(CAPABILITY, "order notional out of range"))?;
        let mut book = self.book.write().await;

        match order.side {
            OrderSide::Buy => {
                if notional > book.cash {
                    return Err(SentinelError::execution(
                        CAPABILITY,
                        format!("insufficient cash: need {notional}, have {}", book.cash),
                    ));
                }
                book.cash -= notional;
                let holding = book.holdings.entry(order.symbol.clone()).or_insert(Holding {
                    quantity: Decimal::ZERO,
                    avg_price: Decimal::ZERO,
                    last_price: price,
                });
                let new_qty = holding.quantity + order.quantity;
                holding.avg_price =
                    (holding.avg_price * holding.quantity + price * order.quantity) / new_qty;
                holding.quantity = new_qty;
                holding.last_price = price;
            }
            OrderSide::Sell => {
                let held = book
                    .holdings
                    .get(&order.symbol)
                    .map(|h| h.quantity)
                    .unwrap_or(Decimal::ZERO);
                if order.quantity > held {
                    return Err(SentinelError::execution(
                        CAPABILITY,
                        format!("cannot sell {} {}: holding {held}", order.quantity, order.symbol),
                    ));
                }
                let avg = book
                    .holdings
                    .get(&order.symbol)
                    .map(|h| h.avg_price)
                    .unwrap_or(Decimal::ZERO);
                book.cash = book
                    .cash
                    .checked_add(notional)
                    .ok_or_else(|| SentinelError::execution(CAPABILITY, "cash balance out of range"))?;
                book.realized_pnl += (price - avg) * order.quantity;
                if order.quantity == held {
                    book.holdings.remove(&order.symbol);
                } else if let Some(h) = book.holdings.get_mut(&order.symbol) {
                    h.quantity -= order.quantity;
                    h.last_price = price;
                }
            }
        }

        let fill = Fill {
            order_id: Uuid::new_v4().to_string(),
            client_order_id: order.client_order_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            price,
            notional,
            filled_at: chrono::Utc::now().timestamp(),
        };
        book.fills.push(fill.clone());

        info!(
            symbol = %fill.symbol,
            side = %fill.side,
            quantity = %fill.quantity,
            price = %fill.price,
            cash = %book.cash,
            "paper order filled"
        );
        Ok(fill)
    }
}
