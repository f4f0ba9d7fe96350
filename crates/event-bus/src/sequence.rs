//! # Sequence Generator
//!
//! Stamps every event with its per-trace sequence number.
//!
//! Lookup and advance happen under one lock, so two batches for the same trace
//! submitted from different tasks always observe increasing, gapless ranges.

use std::collections::{HashMap, VecDeque};

use event_types::Event;
use parking_lot::Mutex;

/// Number of distinct trace IDs whose counters are retained.
pub const MAX_TRACKED_TRACES: usize = 4;

/// First sequence handed out for a trace.
pub const FIRST_SEQUENCE: u64 = 1;

/// Per-trace sequence counters, bounded to the most recent traces.
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    state: Mutex<SequenceState>,
}

#[derive(Debug, Default)]
struct SequenceState {
    next: HashMap<String, u64>,
    /// Insertion order of `next`, oldest first.
    order: VecDeque<String>,
}

impl SequenceState {
    fn next_for(&mut self, trace_id: &str) -> u64 {
        if let Some(next) = self.next.get(trace_id) {
            return *next;
        }
        if self.order.len() >= MAX_TRACKED_TRACES {
            if let Some(evicted) = self.order.pop_front() {
                self.next.remove(&evicted);
            }
        }
        self.order.push_back(trace_id.to_owned());
        self.next.insert(trace_id.to_owned(), FIRST_SEQUENCE);
        FIRST_SEQUENCE
    }
}

impl SequenceGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign sequences in place.
    ///
    /// All events must share the first event's trace ID. Each event takes the
    /// running counter, which then advances by the event's composite count.
    pub fn assign(&self, events: &mut [Event]) {
        let Some(first) = events.first() else {
            return;
        };
        let trace_id = first.trace_id().to_owned();

        let mut state = self.state.lock();
        let mut next = state.next_for(&trace_id);
        for event in events.iter_mut() {
            event.set_sequence(next);
            next += event.composite_count();
        }
        state.next.insert(trace_id, next);
    }

    /// Number of traces currently tracked.
    #[must_use]
    pub fn tracked_traces(&self) -> usize {
        self.state.lock().order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_types::{EventPayload, LedgerMovement, Party, TraceContext};

    fn party(trace: &str) -> Event {
        Event::new(&TraceContext::new(trace), EventPayload::Party(Party::default()))
    }

    fn movements(trace: &str, n: usize) -> Event {
        Event::new(
            &TraceContext::new(trace),
            EventPayload::LedgerMovements(vec![LedgerMovement::default(); n]),
        )
    }

    #[test]
    fn test_sequences_start_at_one_and_increase() {
        let generator = SequenceGenerator::new();
        let mut batch = vec![party("h1"), party("h1"), party("h1")];
        generator.assign(&mut batch);

        let seqs: Vec<u64> = batch.iter().map(Event::sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn test_counters_are_per_trace() {
        let generator = SequenceGenerator::new();
        let mut first = vec![party("h1"), party("h1")];
        let mut second = vec![party("h2"), party("h2")];
        generator.assign(&mut first);
        generator.assign(&mut second);

        assert_eq!(first[0].sequence(), 1);
        assert_eq!(first[1].sequence(), 2);
        assert_eq!(second[0].sequence(), 1);
        assert_eq!(second[1].sequence(), 2);
    }

    #[test]
    fn test_composite_events_reserve_a_range() {
        let generator = SequenceGenerator::new();
        let mut batch = vec![party("h1"), movements("h1", 3), party("h1")];
        generator.assign(&mut batch);

        assert_eq!(batch[0].sequence(), 1);
        assert_eq!(batch[1].sequence(), 2);
        assert_eq!(batch[2].sequence(), 5);

        let mut next = vec![party("h1")];
        generator.assign(&mut next);
        assert_eq!(next[0].sequence(), 6);
    }

    #[test]
    fn test_oldest_trace_is_evicted() {
        let generator = SequenceGenerator::new();
        for trace in ["t1", "t2", "t3", "t4"] {
            let mut batch = vec![party(trace), party(trace)];
            generator.assign(&mut batch);
        }
        assert_eq!(generator.tracked_traces(), MAX_TRACKED_TRACES);

        let mut batch = vec![party("t5")];
        generator.assign(&mut batch);
        assert_eq!(generator.tracked_traces(), MAX_TRACKED_TRACES);

        // t1 was forgotten, so it starts again from the first sequence.
        let mut batch = vec![party("t1")];
        generator.assign(&mut batch);
        assert_eq!(batch[0].sequence(), FIRST_SEQUENCE);

        // t4 is still tracked.
        let mut batch = vec![party("t4")];
        generator.assign(&mut batch);
        assert_eq!(batch[0].sequence(), 3);
    }

    #[test]
    fn test_empty_batch_is_ignored() {
        let generator = SequenceGenerator::new();
        generator.assign(&mut []);
        assert_eq!(generator.tracked_traces(), 0);
    }

    #[test]
    fn test_concurrent_batches_never_overlap() {
        use std::sync::Arc;

        let generator = Arc::new(SequenceGenerator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    for _ in 0..50 {
                        let mut batch = vec![party("h1"), party("h1")];
                        generator.assign(&mut batch);
                        seen.extend(batch.iter().map(Event::sequence));
                    }
                    seen
                })
            })
            .collect();

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        let expected: Vec<u64> = (1..=800).collect();
        assert_eq!(all, expected);
    }
}
