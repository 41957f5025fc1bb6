pub mod discovery;
pub mod notified;
pub mod targets;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use discovery::{Candidate, CandidateSource, EventDiscovery, PollingDiscovery};
pub use notified::{NotifiedSet, Recorded};
pub use targets::{Blacklist, TargetGroups};
pub use worker::{Notifier, Outcome};
