//! Bin routing for the cachet relay.
//!
//! A 64-bit channel space is partitioned into *bins* by a mask: a channel
//! belongs to the bin `channel_id & mask`. Bins store admitted messages for
//! a bounded retention window and fan every new message out to their
//! subscribers. The partitioning can be resharded at runtime (expanding
//! adds a bin bit, contracting removes one and merges colliding bins)
//! while publishes and subscriptions continue.

pub mod bin;
pub mod manager;
pub mod message;
pub mod subscriber;

pub use manager::{BinManager, CleanupTask, DEFAULT_CLEANUP_INTERVAL};
pub use message::Message;
pub use subscriber::{DeliveryError, SubscriberHandle, DEFAULT_QUEUE_DEPTH};
