//! Bin table, masking, resharding, and retention.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::bin::Bin;
use crate::message::Message;
use crate::subscriber::SubscriberHandle;

/// Default cadence of the retention cleanup task.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

struct BinTable {
    bins: HashMap<u64, Arc<Bin>>,
    mask: u64,
}

/// Routes messages into bins and fans them out to subscribers.
///
/// The mask and the bin map live under one lock: lookups take it shared,
/// lazy bin creation and resharding take it exclusive. A publish holds the
/// shared lock through append and fan-out, so `expand`/`contract` cannot
/// interleave with an in-flight publish.
pub struct BinManager {
    table: RwLock<BinTable>,
    retention: Duration,
    retention_window: chrono::Duration,
}

impl BinManager {
    pub fn new(initial_mask: u64, retention: Duration) -> Self {
        Self {
            table: RwLock::new(BinTable { bins: HashMap::new(), mask: initial_mask }),
            retention,
            retention_window: chrono::Duration::from_std(retention)
                .unwrap_or(chrono::Duration::MAX),
        }
    }

    /// The bin a channel currently maps to.
    pub async fn bin_id_for(&self, channel_id: u64) -> u64 {
        channel_id & self.table.read().await.mask
    }

    pub async fn current_mask(&self) -> u64 {
        self.table.read().await.mask
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn retention_hours(&self) -> f64 {
        self.retention.as_secs_f64() / 3600.0
    }

    /// Admit a message: stamp it, append it to its bin, fan it out.
    ///
    /// `msg.bin_id` is expected to already be masked (clients mask channel
    /// IDs against the advertised mask). The bin is created lazily.
    pub async fn publish(&self, mut msg: Message) {
        msg.timestamp = Utc::now();
        loop {
            {
                let table = self.table.read().await;
                if let Some(bin) = table.bins.get(&msg.bin_id) {
                    bin.append(msg.clone()).await;
                    bin.broadcast(&msg).await;
                    return;
                }
            }
            // Lost the lookup race or the bin does not exist yet: create it
            // under the exclusive lock, then retry the shared path.
            let mut table = self.table.write().await;
            table.bins.entry(msg.bin_id).or_insert_with(|| Arc::new(Bin::new()));
        }
    }

    /// Register `client_id` as a subscriber of `bin_id`, creating the bin if
    /// needed. Re-subscribing replaces the previous handle.
    pub async fn subscribe(&self, bin_id: u64, client_id: &str, handle: SubscriberHandle) {
        loop {
            {
                let table = self.table.read().await;
                if let Some(bin) = table.bins.get(&bin_id) {
                    bin.insert_subscriber(client_id, handle).await;
                    return;
                }
            }
            let mut table = self.table.write().await;
            table.bins.entry(bin_id).or_insert_with(|| Arc::new(Bin::new()));
        }
    }

    /// Remove a subscriber; absent bins and absent subscribers are no-ops.
    pub async fn unsubscribe(&self, bin_id: u64, client_id: &str) {
        let bin = {
            let table = self.table.read().await;
            table.bins.get(&bin_id).cloned()
        };
        if let Some(bin) = bin {
            bin.remove_subscriber(client_id).await;
        }
    }

    /// Messages in `bin_id` still inside the retention window, oldest first.
    /// A bin that exists with no messages (lazy creation via subscribe)
    /// yields an empty list, as does an unknown bin.
    pub async fn recent(&self, bin_id: u64) -> Vec<Message> {
        let cutoff = Utc::now() - self.retention_window;
        let table = self.table.read().await;
        match table.bins.get(&bin_id) {
            Some(bin) => bin.recent(cutoff).await,
            None => Vec::new(),
        }
    }

    /// Current number of subscribers of `bin_id`.
    pub async fn subscriber_count(&self, bin_id: u64) -> usize {
        let table = self.table.read().await;
        match table.bins.get(&bin_id) {
            Some(bin) => bin.subscriber_count().await,
            None => 0,
        }
    }

    /// Grow the partitioning by one bit.
    ///
    /// The new bit is the highest unset bit: the bin-bit region extends
    /// downward, so every existing bin ID still satisfies
    /// `id & new_mask == id` and no bin moves. No-op once the mask is all
    /// ones.
    pub async fn expand(&self) {
        let mut table = self.table.write().await;
        if table.mask == u64::MAX {
            return;
        }
        let new_bit = 1u64 << (63 - (!table.mask).leading_zeros());
        table.mask |= new_bit;
        debug!(mask = %format_args!("{:#018X}", table.mask), "Bin mask expanded");
    }

    /// Shrink the partitioning by one bit.
    ///
    /// Clears the lowest set bit and rebuilds the table under the new mask;
    /// bins whose IDs collide are merged (messages in timestamp order,
    /// subscriber maps unioned). No-op when one or zero bits remain.
    pub async fn contract(&self) {
        let mut table = self.table.write().await;
        if table.mask.count_ones() <= 1 {
            return;
        }
        let lowest_bit = table.mask & table.mask.wrapping_neg();
        let new_mask = table.mask & !lowest_bit;

        let old_bins = std::mem::take(&mut table.bins);
        for (id, bin) in old_bins {
            match table.bins.entry(id & new_mask) {
                Entry::Vacant(entry) => {
                    entry.insert(bin);
                }
                Entry::Occupied(entry) => {
                    entry.get().absorb(&bin).await;
                }
            }
        }

        table.mask = new_mask;
        debug!(mask = %format_args!("{:#018X}", new_mask), "Bin mask contracted");
    }

    /// Drop every message older than the retention window. Returns how many
    /// were removed. Runs over a snapshot of bin handles, outside the table
    /// lock.
    pub async fn purge_expired(&self) -> usize {
        let cutoff = Utc::now() - self.retention_window;
        let bins: Vec<Arc<Bin>> = {
            let table = self.table.read().await;
            table.bins.values().cloned().collect()
        };

        let mut dropped = 0;
        for bin in bins {
            dropped += bin.drop_expired(cutoff).await;
        }
        dropped
    }

    /// Start the periodic cleanup task.
    pub fn spawn_cleanup(self: &Arc<Self>, every: Duration) -> CleanupTask {
        let manager = Arc::clone(self);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let dropped = manager.purge_expired().await;
                        if dropped > 0 {
                            debug!(dropped, "Expired messages removed");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        CleanupTask { shutdown: shutdown_tx, handle }
    }
}

/// Handle to the background cleanup task.
pub struct CleanupTask {
    shutdown: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl CleanupTask {
    /// Signal the ticker to exit and wait for it.
    pub async fn stop(self) {
        let _ = self.shutdown.send(()).await;
        let _ = self.handle.await;
    }
}
