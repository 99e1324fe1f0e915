pub mod executor;
pub mod ports;
pub mod stages;
pub mod strategies;
pub mod types;

pub use executor::PipelineExecutor;
pub use ports::{AdvisoryProvider, DeliveryChannel, NoopAdvisory, SignalRepository};
pub use types::*;
