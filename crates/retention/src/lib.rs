//! Retention sweeps for iris-sync
//!
//! The [`RetentionSweeper`] periodically deletes documents older than the
//! configured number of days from every replicated collection, first on the
//! source side and then on the target side. The timestamp field of each
//! collection is taken from its expiry index ([`RetentionPolicy::resolve`]).

mod policy;
mod sweeper;

pub use policy::RetentionPolicy;
pub use sweeper::{RetentionSide, RetentionSweeper, SweepReport, SweptCollection, SweeperOptions};
