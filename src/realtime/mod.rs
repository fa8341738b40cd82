//! Real-time change delivery and subscription management.

mod change;
mod subscription;

pub use change::{ChangeEvent, ChangeKind, ChangeStream, DocumentChange, Snapshot};
pub use subscription::{
    ConnectionState, ListenerId, ReconnectConfig, SnapshotCallback, SubscriptionManager,
};
