pub mod capability;
pub mod channel;
pub mod config;
pub mod constants;
pub mod core;
pub mod errors;
pub mod execution;
pub mod logging;
pub mod market;
pub mod oracle;
pub mod store;
pub mod types;
