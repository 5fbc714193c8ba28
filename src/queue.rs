//! Bounded multi-producer/multi-consumer queue of records
//!
//! The queue keeps one FIFO lane per input side (forward, and reverse if paired). Each lane
//! is filled by its own producer and is bounded, so a producer blocks when its lane is full.
//!
//! Consumers either pop single records from any lane ([`RecordQueue::try_pop`],
//! [`RecordQueue::pop`]) or whole fragments, one record from every lane at once
//! ([`RecordQueue::pop_fragment`]). Because every lane is FIFO and mates are read in the same
//! order from both inputs, a fragment always holds the two mates of a pair.
//!
//! A consumer terminates only when no producer is left and the queue is empty. A consumer
//! that finds the queue empty while producers are still active waits for a notification
//! and then re-checks both conditions.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::{error::FeedError, record::Record, Result};

/// Default number of records buffered per lane
pub const DEFAULT_CAPACITY: usize = 4096;

#[derive(Debug)]
struct QueueState {
    /// One FIFO per input side
    lanes: Vec<VecDeque<Record>>,
    /// Lanes whose producer has finished
    closed: Vec<bool>,
    /// Number of active producers
    producers: usize,
    /// Set when processing was abandoned; pushes are dropped and pops return nothing
    aborted: bool,
}
impl QueueState {
    fn is_empty(&self) -> bool {
        self.lanes.iter().all(VecDeque::is_empty)
    }

    fn has_fragment(&self) -> bool {
        self.lanes.iter().all(|lane| !lane.is_empty())
    }

    fn take_fragment(&mut self) -> Vec<Record> {
        self.lanes
            .iter_mut()
            .filter_map(VecDeque::pop_front)
            .collect()
    }
}

/// Bounded queue of records with one lane per input side
#[derive(Debug)]
pub struct RecordQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    /// Maximum number of records per lane
    capacity: usize,
}
impl RecordQueue {
    /// Creates a queue with `num_lanes` lanes, each fed by one producer
    ///
    /// # Panics
    ///
    /// Panics if `num_lanes` or `capacity` is zero.
    #[must_use]
    pub fn new(num_lanes: usize, capacity: usize) -> Self {
        assert!(num_lanes > 0, "queue needs at least one lane");
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            state: Mutex::new(QueueState {
                lanes: (0..num_lanes)
                    .map(|_| VecDeque::with_capacity(capacity))
                    .collect(),
                closed: vec![false; num_lanes],
                producers: num_lanes,
                aborted: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    pub fn num_lanes(&self) -> usize {
        self.state.lock().lanes.len()
    }

    /// Pushes a record into the lane of its input file, blocking while that lane is full
    ///
    /// Returns `false` if the queue was aborted, in which case the record is dropped.
    pub fn push(&self, record: Record) -> bool {
        let mut state = self.state.lock();
        let lane = record.readfile_idx().min(state.lanes.len() - 1);
        while !state.aborted && state.lanes[lane].len() >= self.capacity {
            self.not_full.wait(&mut state);
        }
        if state.aborted {
            return false;
        }
        state.lanes[lane].push_back(record);
        drop(state);
        self.not_empty.notify_all();
        true
    }

    /// Pops a record from the first non-empty lane without blocking
    pub fn try_pop(&self) -> Option<Record> {
        let mut state = self.state.lock();
        let record = state.lanes.iter_mut().find_map(VecDeque::pop_front);
        drop(state);
        if record.is_some() {
            self.not_full.notify_all();
        }
        record
    }

    /// Pops a record from any lane, waiting while the queue is empty and producers remain
    ///
    /// Returns `None` once all producers are done and the queue is drained.
    pub fn pop(&self) -> Option<Record> {
        let mut state = self.state.lock();
        loop {
            if state.aborted {
                return None;
            }
            if let Some(record) = state.lanes.iter_mut().find_map(VecDeque::pop_front) {
                drop(state);
                self.not_full.notify_all();
                return Some(record);
            }
            if state.producers == 0 {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Pops one record from every lane, waiting until each lane has one
    ///
    /// Returns `Ok(None)` once all producers are done and the queue is drained. If a lane
    /// is closed and empty while another still holds records, the inputs were unbalanced:
    /// the queue is aborted and an error is returned.
    pub fn pop_fragment(&self) -> Result<Option<Vec<Record>>> {
        let mut state = self.state.lock();
        loop {
            if state.aborted {
                return Ok(None);
            }
            if state.has_fragment() {
                let fragment = state.take_fragment();
                drop(state);
                self.not_full.notify_all();
                return Ok(Some(fragment));
            }
            let starved = state
                .lanes
                .iter()
                .zip(&state.closed)
                .any(|(lane, &closed)| lane.is_empty() && closed);
            if starved {
                if state.is_empty() && state.producers == 0 {
                    return Ok(None);
                }
                if let Some((side, lane)) = state
                    .lanes
                    .iter()
                    .enumerate()
                    .find(|(_, lane)| !lane.is_empty())
                {
                    let err = FeedError::Unbalanced(side, lane.len());
                    state.aborted = true;
                    drop(state);
                    self.notify_waiters();
                    return Err(err.into());
                }
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Signals that the producer of `lane` will push no more records
    pub fn decrement_producers(&self, lane: usize) {
        let mut state = self.state.lock();
        if let Some(closed) = state.closed.get_mut(lane) {
            if !*closed {
                *closed = true;
                state.producers -= 1;
            }
        }
    }

    /// Wakes every waiting producer and consumer so they re-check the queue state
    pub fn notify_waiters(&self) {
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Abandons processing: blocked producers and consumers return immediately
    pub fn abort(&self) {
        self.state.lock().aborted = true;
        self.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }

    /// Number of active producers
    pub fn producers(&self) -> usize {
        self.state.lock().producers
    }

    /// Total number of queued records
    pub fn size(&self) -> usize {
        self.state.lock().lanes.iter().map(VecDeque::len).sum()
    }

    /// Whether all producers are done and the queue is drained
    pub fn is_done(&self) -> bool {
        let state = self.state.lock();
        state.producers == 0 && state.is_empty()
    }
}
