//! MongoDB stores for iris-sync
//!
//! [`MongoStore`] implements the target, retention and collection admin seams
//! from `replication-core` over a [`mongodb::Database`].

mod connect;
mod store;

pub use connect::mongo_connect;
pub use store::{index_model, MongoStore};
