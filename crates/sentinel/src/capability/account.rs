//! Account inspection and paper trade execution.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::schema::{decimal_arg, str_arg};
use super::{Capability, CapabilityDeps};
use crate::errors::SentinelError;
use crate::types::{
    CapabilityDescriptor, FieldSpec, FieldType, IdempotenceClass, InvocationContext, OrderRequest,
    OrderSide, Schema,
};

const SIDES: &[&str] = &["buy", "sell"];

pub struct GetAccountStatus {
    deps: CapabilityDeps,
    descriptor: CapabilityDescriptor,
}

impl GetAccountStatus {
    pub fn new(deps: CapabilityDeps) -> Self {
        Self {
            deps,
            descriptor: CapabilityDescriptor {
                name: "get_account_status",
                description: "Cash, equity, realized PnL and trade guard state of the paper account.",
                input: Schema::empty(),
                output: json!({"account": "account status", "guard": "trade guard status"}),
                idempotence: IdempotenceClass::SafeToRetry,
            },
        }
    }
}

#[async_trait]
impl Capability for GetAccountStatus {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _args: Value, _ctx: &InvocationContext) -> Result<Value, SentinelError> {
        let account = self.deps.exchange.account_status().await?;
        Ok(json!({
            "account": account,
            "guard": self.deps.guard.status(),
        }))
    }
}

pub struct GetCurrentPositions {
    deps: CapabilityDeps,
    descriptor: CapabilityDescriptor,
}

impl GetCurrentPositions {
    pub fn new(deps: CapabilityDeps) -> Self {
        Self {
            deps,
            descriptor: CapabilityDescriptor {
                name: "get_current_positions",
                description: "Open positions, optionally for a single symbol.",
                input: Schema::new(vec![FieldSpec::optional(
                    "symbol",
                    FieldType::String,
                    "Only this symbol",
                )]),
                output: json!({"positions": "array of {symbol, quantity, avg_entry_price, last_price, unrealized_pnl}"}),
                idempotence: IdempotenceClass::SafeToRetry,
            },
        }
    }
}

#[async_trait]
impl Capability for GetCurrentPositions {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: Value, _ctx: &InvocationContext) -> Result<Value, SentinelError> {
        let mut positions = self.deps.exchange.positions().await?;
        if let Some(symbol) = str_arg(&args, "symbol") {
            positions.retain(|p| p.symbol.eq_ignore_ascii_case(symbol));
        }
        Ok(json!({ "positions": positions }))
    }
}

/// Market order on the paper exchange at the latest gateway price.
///
/// The invocation's idempotency key becomes the client order id. Every order
/// reserves a slot with the trade guard first; the slot is kept only if the
/// order fills.
pub struct ExecuteTrade {
    deps: CapabilityDeps,
    descriptor: CapabilityDescriptor,
}

impl ExecuteTrade {
    pub fn new(deps: CapabilityDeps) -> Self {
        Self {
            deps,
            descriptor: CapabilityDescriptor {
                name: "execute_trade",
                description: "Submit a market order. Side-effecting: each idempotency key fills at most once.",
                input: Schema::new(vec![
                    FieldSpec::required("symbol", FieldType::String, "Exchange symbol, e.g. BTCUSDT"),
                    FieldSpec::required("side", FieldType::String, "buy or sell").one_of(SIDES),
                    FieldSpec::required("quantity", FieldType::Number, "Base asset quantity"),
                    FieldSpec::optional("reason", FieldType::String, "Why the trade is made; included in the notification"),
                ]),
                output: json!({"fill": "{order_id, client_order_id, symbol, side, quantity, price, notional, filled_at}"}),
                idempotence: IdempotenceClass::AtMostOnce,
            },
        }
    }
}

#[async_trait]
impl Capability for ExecuteTrade {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: Value, ctx: &InvocationContext) -> Result<Value, SentinelError> {
        let name = self.descriptor.name;
        let symbol = str_arg(&args, "symbol").unwrap_or_default();
        let side = str_arg(&args, "side")
            .and_then(OrderSide::parse)
            .ok_or_else(|| SentinelError::invalid_arguments(name, "side must be buy or sell"))?;
        let quantity = decimal_arg(&args, "quantity")
            .filter(|q| q.is_sign_positive() && !q.is_zero())
            .ok_or_else(|| SentinelError::invalid_arguments(name, "quantity must be positive"))?;
        let client_order_id = ctx
            .idempotency_key
            .clone()
            .ok_or_else(|| SentinelError::invalid_arguments(name, "an idempotency key is required"))?;

        let instrument = self.deps.instrument(symbol);
        let price = self
            .deps
            .gateway
            .latest_price(&instrument, &self.deps.signals.interval, ctx.deadline)
            .await?;

        let notional = price
            .checked_mul(quantity)
            .ok_or_else(|| SentinelError::invalid_arguments(name, "quantity is too large"))?;
        let reservation = self.deps.guard.check_order(notional)?;

        let order = OrderRequest {
            symbol: instrument.symbol.clone(),
            side,
            quantity,
            client_order_id,
        };
        let fill = self.deps.exchange.submit_order(&order, price).await?;
        reservation.commit();

        info!(
            symbol = %fill.symbol,
            side = %fill.side,
            quantity = %fill.quantity,
            price = %fill.price,
            client_order_id = %fill.client_order_id,
            "trade executed"
        );

        let mut note = format!(
            "{} {} {} @ {} (notional {})",
            fill.side, fill.quantity, fill.symbol, fill.price, fill.notional
        );
        if let Some(reason) = str_arg(&args, "reason") {
            note.push_str(&format!("\nReason: {reason}"));
        }
        if let Err(e) = self.deps.notifier.notify(&note).await {
            warn!(error = %e, "trade notification failed");
        }

        Ok(json!({ "fill": fill }))
    }
}
