pub mod capability;
pub mod decision;
pub mod execution;
pub mod indicator;
pub mod market_data;
pub mod trigger;

pub use capability::{
    CapabilityDescriptor, FieldSpec, FieldType, IdempotenceClass, InvocationContext, Schema,
};
pub use decision::{
    DecisionPhase, DecisionRequest, DecisionResult, DecisionStatus, Origin, Outcome, Proposal,
    ProposalRecord, RequestPayload,
};
pub use execution::{AccountStatus, Fill, OrderRequest, OrderSide, Position};
pub use indicator::{IndicatorReadings, IndicatorValue, MacdValue, MarketSnapshot, MovingAverageKind};
pub use market_data::{FetchRange, Instrument, InstrumentClass, PricePoint, Ticker24h};
pub use trigger::{ConditionKind, TriggerCondition, TriggerEvent, TriggerRule};
