//! A single bin: retained messages plus live subscribers.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::debug;

use crate::message::Message;
use crate::subscriber::SubscriberHandle;

/// One equivalence class of channel IDs under the current mask.
///
/// Messages are kept in admission order (non-decreasing timestamps), which
/// lets retention cleanup drop an expired prefix instead of scanning. The
/// message list and the subscriber map carry independent locks so publishes
/// and subscriptions on the same bin do not contend.
pub(crate) struct Bin {
    messages: RwLock<VecDeque<Message>>,
    subscribers: RwLock<HashMap<String, SubscriberHandle>>,
}

impl Bin {
    pub(crate) fn new() -> Self {
        Self {
            messages: RwLock::new(VecDeque::new()),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) async fn append(&self, msg: Message) {
        self.messages.write().await.push_back(msg);
    }

    /// Messages with timestamps newer than `cutoff`, oldest first.
    pub(crate) async fn recent(&self, cutoff: DateTime<Utc>) -> Vec<Message> {
        self.messages
            .read()
            .await
            .iter()
            .filter(|msg| msg.timestamp > cutoff)
            .cloned()
            .collect()
    }

    /// Drop the prefix of messages at or before `cutoff`; returns how many
    /// were removed.
    pub(crate) async fn drop_expired(&self, cutoff: DateTime<Utc>) -> usize {
        let mut messages = self.messages.write().await;
        let mut dropped = 0;
        while messages.front().is_some_and(|msg| msg.timestamp <= cutoff) {
            messages.pop_front();
            dropped += 1;
        }
        dropped
    }

    pub(crate) async fn insert_subscriber(&self, client_id: &str, handle: SubscriberHandle) {
        self.subscribers.write().await.insert(client_id.to_string(), handle);
    }

    pub(crate) async fn remove_subscriber(&self, client_id: &str) -> bool {
        self.subscribers.write().await.remove(client_id).is_some()
    }

    pub(crate) async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub(crate) async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }

    /// Deliver `msg` to every current subscriber concurrently.
    ///
    /// The subscriber map is snapshotted under the read lock and released
    /// before any send. Subscribers whose delivery fails are removed; the
    /// failure never reaches the publisher.
    pub(crate) async fn broadcast(&self, msg: &Message) {
        let targets: Vec<(String, SubscriberHandle)> = {
            let subscribers = self.subscribers.read().await;
            subscribers
                .iter()
                .map(|(id, handle)| (id.clone(), handle.clone()))
                .collect()
        };
        if targets.is_empty() {
            return;
        }

        let sends = targets.into_iter().map(|(id, handle)| {
            let msg = msg.clone();
            async move { (id, handle.send(msg).await) }
        });

        let mut failed = Vec::new();
        for (id, result) in join_all(sends).await {
            if let Err(err) = result {
                debug!(client_id = %id, error = %err, "Removing subscriber after failed delivery");
                failed.push(id);
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in &failed {
                subscribers.remove(id);
            }
        }
    }

    /// Take everything from `other` into this bin.
    ///
    /// Messages are combined in timestamp order (stable, so same-instant
    /// messages keep their per-bin order); subscriber entries from `other`
    /// win on client-ID collision. Only called during contraction, under the
    /// manager's exclusive table lock.
    pub(crate) async fn absorb(&self, other: &Bin) {
        {
            let mut ours = self.messages.write().await;
            let mut theirs = other.messages.write().await;
            let mut merged: Vec<Message> = ours.drain(..).chain(theirs.drain(..)).collect();
            merged.sort_by_key(|msg| msg.timestamp);
            *ours = merged.into();
        }
        {
            let mut ours = self.subscribers.write().await;
            let mut theirs = other.subscribers.write().await;
            ours.extend(theirs.drain());
        }
    }
}
