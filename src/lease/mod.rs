// Cross-process mutual exclusion over a namespace.

pub mod holder;
#[allow(clippy::module_inception)]
pub mod lease;
pub mod manager;
pub mod renewal;

pub use holder::LeaseHolder;
pub use lease::{Lease, LeaseStatus, DEFAULT_LEASE_DURATION};
pub use manager::LeaseManager;
pub use renewal::{LeaseKey, LeaseRenewalService};
