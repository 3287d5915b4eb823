pub mod aggregator;
#[cfg(feature = "app")]
pub(crate) mod commands;
pub mod events;
pub mod state;

pub use aggregator::StepAggregator;
pub use events::{AggregatorEvent, StepSnapshot};
pub use state::{AggregatorState, ConnectionState};
