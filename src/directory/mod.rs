//! Host, stream and subscription directory
//!
//! Three fixed-capacity tables, cross-referenced by slot index. An index is
//! only a hint: every lookup re-checks the target slot's active flag, so a
//! stale index simply fails to resolve.

pub mod hosts;
pub mod matching;
pub mod streams;
pub mod subscriptions;

pub use hosts::{HostDirectory, HostIdentity, HostRecord, HOST_PLACEHOLDER};
pub use streams::{StreamDirectory, StreamRecord, StreamStats};
pub use subscriptions::{Subscription, SubscriptionSpec, SubscriptionTable};
