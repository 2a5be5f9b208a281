// SPDX-License-Identifier: MPL-2.0
//! Diagnostics module for recording playback anomalies.
//!
//! The tick path never fails loudly: size mismatches, lag skips, underruns
//! and extraction failures are logged through the `log` facade and recorded
//! in a memory-bounded ring buffer the host can inspect or export.
//!
//! # Architecture
//!
//! - [`CircularBuffer`]: Generic ring buffer with configurable capacity
//! - [`PlaybackDiagnostic`]: The anomalies that can be recorded
//! - [`DiagnosticsLog`]: Cloneable, thread-safe handle over the buffer

mod buffer;
mod events;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;

pub use buffer::{BufferCapacity, CircularBuffer};
pub use events::{DiagnosticRecord, PlaybackDiagnostic, StreamSlot};

use crate::error::Result;

/// Shared handle for recording and reading playback diagnostics.
#[derive(Debug, Clone)]
pub struct DiagnosticsLog {
    inner: Arc<Mutex<CircularBuffer<DiagnosticRecord>>>,
    started_at: Instant,
}

#[derive(Serialize)]
struct DiagnosticsExport<'a> {
    evicted: u64,
    events: Vec<&'a DiagnosticRecord>,
}

impl DiagnosticsLog {
    #[must_use]
    pub fn new(capacity: BufferCapacity) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CircularBuffer::new(capacity))),
            started_at: Instant::now(),
        }
    }

    pub fn record(&self, event: PlaybackDiagnostic) {
        #[allow(clippy::cast_possible_truncation)]
        let at_ms = self.started_at.elapsed().as_millis() as u64;
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(DiagnosticRecord { at_ms, event });
    }

    /// Returns a copy of the retained events, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PlaybackDiagnostic> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|record| record.event.clone())
            .collect()
    }

    /// Counts retained events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&PlaybackDiagnostic) -> bool) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|record| predicate(&record.event))
            .count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Serializes the retained events as a TOML document.
    ///
    /// # Errors
    ///
    /// Returns a config error if serialization fails.
    pub fn export_toml(&self) -> Result<String> {
        let buffer = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let export = DiagnosticsExport {
            evicted: buffer.evicted(),
            events: buffer.iter().collect(),
        };
        Ok(toml::to_string_pretty(&export)?)
    }
}

impl Default for DiagnosticsLog {
    fn default() -> Self {
        Self::new(BufferCapacity::default())
    }
}
