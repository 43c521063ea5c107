// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Groove Layer - Event Ingest
//
// Producers append through cloneable handles (an mpsc sender, no lock held
// on the producer side). The owning layer drains everything received at a
// window boundary and enforces stream ordering there.

use std::sync::mpsc::{self, Receiver, Sender};

use crate::types::PerformanceEvent;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Contract violations by the external ingestion layer. The affected window
/// is discarded, never partially processed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequencingError {
    #[error("event at {t_onset_ms} ms arrived after an event at {previous_ms} ms")]
    OutOfOrder { t_onset_ms: u64, previous_ms: u64 },

    #[error("event at {t_onset_ms} ms belongs to a window already closed at {window_start_ms} ms")]
    LateEvent { t_onset_ms: u64, window_start_ms: u64 },

    #[error("window boundary {boundary_ms} ms already crossed (last closed {last_closed_ms} ms)")]
    BoundaryRepeated { boundary_ms: u64, last_closed_ms: u64 },

    #[error("window boundary {boundary_ms} ms precedes the window end {window_end_ms} ms")]
    PrematureBoundary { boundary_ms: u64, window_end_ms: u64 },
}

// ---------------------------------------------------------------------------
// IngestHandle
// ---------------------------------------------------------------------------

/// Producer side. Cheap to clone and safe to move to another thread.
#[derive(Debug, Clone)]
pub struct IngestHandle {
    tx: Sender<PerformanceEvent>,
}

impl IngestHandle {
    /// Append an event. Returns `false` once the session has been dropped.
    pub fn push(&self, event: PerformanceEvent) -> bool {
        self.tx.send(event.sanitized()).is_ok()
    }
}

// ---------------------------------------------------------------------------
// EventIngest
// ---------------------------------------------------------------------------

/// Consumer side, owned by exactly one session.
#[derive(Debug)]
pub struct EventIngest {
    tx: Sender<PerformanceEvent>,
    rx: Receiver<PerformanceEvent>,
    /// Events already received that belong to a later window.
    carried: Vec<PerformanceEvent>,
    last_onset_ms: Option<u64>,
}

impl Default for EventIngest {
    fn default() -> Self {
        Self::new()
    }
}

impl EventIngest {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx, carried: Vec::new(), last_onset_ms: None }
    }

    pub fn handle(&self) -> IngestHandle {
        IngestHandle { tx: self.tx.clone() }
    }

    pub fn push(&self, event: PerformanceEvent) {
        // The receiver lives in `self`, so the send cannot fail.
        let _ = self.tx.send(event.sanitized());
    }

    /// Drain every event received so far and return those in
    /// `[window_start_ms, window_end_ms)`. Later events are carried over.
    ///
    /// On a sequencing fault the in-window events are dropped and the error
    /// returned; carried events for later windows are kept.
    pub fn drain_window(
        &mut self,
        window_start_ms: u64,
        window_end_ms: u64,
    ) -> Result<Vec<PerformanceEvent>, SequencingError> {
        let mut fault = None;
        let mut pending = std::mem::take(&mut self.carried);

        while let Ok(event) = self.rx.try_recv() {
            if let Some(previous_ms) = self.last_onset_ms {
                if event.t_onset_ms < previous_ms {
                    fault.get_or_insert(SequencingError::OutOfOrder {
                        t_onset_ms: event.t_onset_ms,
                        previous_ms,
                    });
                    continue;
                }
            }
            self.last_onset_ms = Some(event.t_onset_ms);
            pending.push(event);
        }

        let mut in_window = Vec::with_capacity(pending.len());
        for event in pending {
            if event.t_onset_ms < window_start_ms {
                fault.get_or_insert(SequencingError::LateEvent {
                    t_onset_ms: event.t_onset_ms,
                    window_start_ms,
                });
            } else if event.t_onset_ms < window_end_ms {
                in_window.push(event);
            } else {
                self.carried.push(event);
            }
        }

        match fault {
            Some(err) => Err(err),
            None => Ok(in_window),
        }
    }

    /// Drop everything received so far. Used at session teardown.
    pub fn clear(&mut self) {
        while self.rx.try_recv().is_ok() {}
        self.carried.clear();
    }

    pub fn reset(&mut self) {
        self.clear();
        self.last_onset_ms = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventType;

    fn ev(t: u64) -> PerformanceEvent {
        PerformanceEvent::new(t, EventType::NoteOnset, 0.8, 0.9)
    }

    #[test]
    fn drains_only_events_inside_window() {
        let mut ingest = EventIngest::new();
        for t in [0, 500, 14_999, 15_000, 15_500] {
            ingest.push(ev(t));
        }
        let first = ingest.drain_window(0, 15_000).unwrap();
        assert_eq!(first.len(), 3);

        let second = ingest.drain_window(15_000, 30_000).unwrap();
        let times: Vec<u64> = second.iter().map(|e| e.t_onset_ms).collect();
        assert_eq!(times, vec![15_000, 15_500]);
    }

    #[test]
    fn equal_timestamps_are_allowed() {
        let mut ingest = EventIngest::new();
        ingest.push(ev(100));
        ingest.push(ev(100));
        assert_eq!(ingest.drain_window(0, 15_000).unwrap().len(), 2);
    }

    #[test]
    fn out_of_order_event_discards_window() {
        let mut ingest = EventIngest::new();
        ingest.push(ev(1_000));
        ingest.push(ev(900));
        ingest.push(ev(16_000));
        let err = ingest.drain_window(0, 15_000).unwrap_err();
        assert_eq!(err, SequencingError::OutOfOrder { t_onset_ms: 900, previous_ms: 1_000 });

        // The future event survives for the next window.
        let next = ingest.drain_window(15_000, 30_000).unwrap();
        assert_eq!(next.len(), 1);
    }

    #[test]
    fn event_for_closed_window_is_late() {
        let mut ingest = EventIngest::new();
        ingest.push(ev(100));
        ingest.drain_window(0, 15_000).unwrap();
        // Monotonic but behind the current window start.
        ingest.push(ev(200));
        let err = ingest.drain_window(15_000, 30_000).unwrap_err();
        assert!(matches!(err, SequencingError::LateEvent { t_onset_ms: 200, .. }));
    }

    #[test]
    fn handles_push_from_other_threads() {
        let mut ingest = EventIngest::new();
        let handle = ingest.handle();
        let worker = std::thread::spawn(move || {
            for i in 0..20u64 {
                assert!(handle.push(ev(i * 750)));
            }
        });
        worker.join().expect("test: producer thread panicked");
        assert_eq!(ingest.drain_window(0, 15_000).unwrap().len(), 20);
    }

    #[test]
    fn pushed_values_are_sanitized() {
        let mut ingest = EventIngest::new();
        ingest.push(PerformanceEvent::new(5, EventType::StrumOnset, -1.0, 3.0));
        let events = ingest.drain_window(0, 15_000).unwrap();
        assert_eq!(events[0].strength, 0.0);
        assert_eq!(events[0].confidence, 1.0);
    }
}
