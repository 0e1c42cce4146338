//! Integration boundary: a closed, strongly typed event surface plus an
//! in-memory reference bus, using the same synchronous lock-protected
//! style as the rest of this core's shared state.

use crate::fork::{ForkInfo, ForkState};
use crate::utxo::UtxoOp;
use chain_types::Hash256;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    ForkDetected,
    ForkProcessing,
    ForkCompleted,
    TransactionStatus,
    UtxoStateChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Received,
    Validated,
    Executed,
    Confirmed,
    Failed,
    Finalized,
}

#[derive(Debug, Clone)]
pub enum EventPayload {
    ForkDetected(ForkInfo),
    ForkProcessing { state: ForkState },
    ForkCompleted {
        success: bool,
        chain_switched: bool,
        error: Option<String>,
    },
    TransactionStatus { tx_id: Hash256, status: TxStatus },
    UtxoStateChanged {
        utxo_hash: Hash256,
        operation: UtxoOp,
        tx_hash: Hash256,
        block_height: u64,
        timestamp: i64,
    },
}

type Handler = Box<dyn Fn(&EventPayload) + Send + Sync>;

pub trait EventBus: Send + Sync {
    fn publish(&self, topic: EventTopic, payload: EventPayload);
    fn subscribe(&self, topic: EventTopic, handler: Handler);
}

#[derive(Default)]
pub struct InMemoryEventBus {
    handlers: Mutex<HashMap<EventTopic, Vec<Handler>>>,
}

impl InMemoryEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(&self, topic: EventTopic, payload: EventPayload) {
        let guard = self.handlers.lock().expect("event bus mutex poisoned");
        if let Some(handlers) = guard.get(&topic) {
            for handler in handlers {
                handler(&payload);
            }
        }
    }

    fn subscribe(&self, topic: EventTopic, handler: Handler) {
        let mut guard = self.handlers.lock().expect("event bus mutex poisoned");
        guard.entry(topic).or_default().push(handler);
    }
}

/// Fork-sync assistance the fork engine may lean on; network/P2P/gossip
/// itself is out of scope, so this exists only to make that dependency
/// expressible without pulling in a transport crate.
pub trait NetworkRouter: Send + Sync {
    fn request_kbucket_sync(&self, from_height: u64) -> Result<(), String>;
    fn request_range_paginated(&self, start_height: u64, end_height: u64) -> Result<(), String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn subscribers_only_receive_their_topic() {
        let bus = InMemoryEventBus::new();
        let fork_hits = Arc::new(AtomicUsize::new(0));
        let tx_hits = Arc::new(AtomicUsize::new(0));

        let fork_hits_clone = fork_hits.clone();
        bus.subscribe(
            EventTopic::ForkCompleted,
            Box::new(move |_| {
                fork_hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let tx_hits_clone = tx_hits.clone();
        bus.subscribe(
            EventTopic::TransactionStatus,
            Box::new(move |_| {
                tx_hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        bus.publish(
            EventTopic::ForkCompleted,
            EventPayload::ForkCompleted {
                success: true,
                chain_switched: true,
                error: None,
            },
        );

        assert_eq!(fork_hits.load(Ordering::SeqCst), 1);
        assert_eq!(tx_hits.load(Ordering::SeqCst), 0);
    }
}
