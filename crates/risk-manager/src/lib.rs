pub mod adaptive;
pub mod circuit_breaker;
pub mod events;
pub mod exit_monitor;
pub mod models;

pub use adaptive::{AdaptiveLevel, AdaptiveManager, AdaptiveState};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerState};
pub use events::{EventBus, TradeClosedEvent, TradeEventHandler};
pub use exit_monitor::ExitMonitor;
pub use models::*;
