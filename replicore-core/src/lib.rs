//! Replicore: conflict detection and resolution core of a multi-master
//! replicated document store.

pub mod config;
pub mod core_replication;
pub mod logging;
pub mod metrics;
pub mod test_utils;

pub use config::{Config, ConfigError};
pub use core_replication::{
    ChangeVector, ConflictError, IncomingReplicationProcessor, ReplicationError, ReplicationResult,
    ResolutionPolicy, VersionedItem,
};
pub use logging::{init_logging, LogLevel};
