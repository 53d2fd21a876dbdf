pub mod mutation;
pub mod stability;
pub mod waiter;

pub use mutation::{MutationFilter, MutationWatcher};
pub use stability::{MergeReport, StabilityAggregator, StabilityPhase};
pub use waiter::{ContainerWaiter, PollOptions, PollOutcome, PollTimeout, Probe};
