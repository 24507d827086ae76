pub mod decision;
pub mod health;
pub mod indicators;
pub mod router;
pub mod scheduler;
pub mod trigger_detector;

pub use decision::DecisionCore;
pub use health::HealthStats;
pub use router::RequestRouter;
pub use scheduler::{HeartbeatScheduler, TickOutcome};
pub use trigger_detector::TriggerDetector;
