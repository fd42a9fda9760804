// Copyright 2026 Palate Contributors
// SPDX-License-Identifier: Apache-2.0

//! Typed harvest events on a broadcast channel.
//!
//! The dispatcher and listing collector emit [`HarvestEvent`]s which flow
//! through a `tokio::sync::broadcast` channel to any subscriber (progress
//! bar, log sink). When no subscriber exists, events are silently dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Every event the harvester emits. Serialized to JSON for machine consumers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HarvestEvent {
    /// A listing page was scanned for restaurant cards.
    ListingPageScanned {
        page: u32,
        cards: usize,
        new_urls: usize,
    },
    /// A batch of detail fetches has been dispatched.
    BatchStarted {
        batch: usize,
        total_batches: usize,
        size: usize,
    },
    /// One detail URL finished processing.
    UrlProcessed {
        index: usize,
        url: String,
        ok: bool,
    },
    /// A batch completed (all of its tasks finished).
    BatchCompleted {
        batch: usize,
        succeeded: usize,
        failed: usize,
        duration_ms: u64,
    },
    /// The whole run finished.
    HarvestComplete {
        attempted: usize,
        succeeded: usize,
        failed: usize,
        elapsed_ms: u64,
        interrupted: bool,
    },
    /// A non-fatal warning occurred.
    Warning { message: String },
}

/// Sender half of the harvest event bus.
pub type EventSender = broadcast::Sender<HarvestEvent>;

/// Receiver half of the harvest event bus.
pub type EventReceiver = broadcast::Receiver<HarvestEvent>;

/// Create a new event channel with a bounded buffer.
///
/// 256 buffered events covers a full batch plus periodic counters; slow
/// subscribers lag rather than block the dispatcher.
pub fn channel() -> (EventSender, EventReceiver) {
    broadcast::channel(256)
}

/// Emit an event, silently ignoring send errors (no receivers listening).
pub fn emit(tx: &Option<EventSender>, event: HarvestEvent) {
    if let Some(sender) = tx {
        let _ = sender.send(event);
    }
}
