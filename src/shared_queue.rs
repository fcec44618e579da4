//! Unbounded FIFO token queue guarded by a single mutex.
//!
//! Raw operations live on [`QueueGuard`], which only exists while the lock is
//! held, so any check-then-act sequence written against one guard is atomic
//! with respect to every other task sharing the queue.

use std::collections::VecDeque;
use std::hint;
use std::sync::{Condvar, Mutex, MutexGuard};

use tracing::trace;

use crate::error::QueueError;
use crate::types::{Delivery, Token, WaitStrategy};

/// Outcome of a single consumer step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Take {
    Item(Delivery),
    /// The head is the end-of-stream marker; it stays queued.
    EndOfStream,
}

/// A synchronized FIFO shared by one producer and any number of consumers.
pub struct SharedQueue {
    inner: Mutex<QueueState>,
    non_empty: Condvar,
}

struct QueueState {
    tokens: VecDeque<Token>,
    sealed: bool,
    // Data items appended so far.
    appended: u64,
    // Data items removed so far; doubles as the next removal ordinal.
    removed: u64,
}

/// Exclusive access to the queue contents for the lifetime of the guard.
pub struct QueueGuard<'a> {
    state: MutexGuard<'a, QueueState>,
    non_empty: &'a Condvar,
}

impl SharedQueue {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueState {
                tokens: VecDeque::new(),
                sealed: false,
                appended: 0,
                removed: 0,
            }),
            non_empty: Condvar::new(),
        }
    }

    /// Acquire the queue lock.
    pub fn lock(&self) -> Result<QueueGuard<'_>, QueueError> {
        let state = self.inner.lock()?;
        Ok(QueueGuard {
            state,
            non_empty: &self.non_empty,
        })
    }

    /// Lock, append one token, release.
    pub fn push(&self, token: Token) -> Result<(), QueueError> {
        self.lock()?.append(token)
    }

    /// Remove the head item, or report end-of-stream without removing it,
    /// running `on_take` before the lock is released.
    ///
    /// The emptiness check, the peek, the removal and `on_take` all happen
    /// under one lock acquisition, so whatever `on_take` records follows the
    /// queue's removal order. While the queue is empty the caller either
    /// spins (dropping and re-taking the lock each round) or parks on the
    /// condvar.
    pub fn take_or_end<F>(&self, strategy: WaitStrategy, on_take: F) -> Result<Take, QueueError>
    where
        F: FnOnce(&Take),
    {
        loop {
            let mut guard = self.lock()?;
            if guard.is_empty() {
                match strategy {
                    WaitStrategy::Spin => {
                        drop(guard);
                        hint::spin_loop();
                        continue;
                    }
                    WaitStrategy::Block => guard = guard.wait_non_empty()?,
                }
            }
            let taken = if guard.peek_front().is_some_and(Token::is_end) {
                Take::EndOfStream
            } else if let Some(delivery) = guard.remove_front() {
                Take::Item(delivery)
            } else {
                continue;
            };
            on_take(&taken);
            drop(guard);
            return Ok(taken);
        }
    }

    /// Current number of queued tokens, end-of-stream included.
    pub fn len(&self) -> Result<usize, QueueError> {
        Ok(self.lock()?.state.tokens.len())
    }

    /// Data items appended over the queue's lifetime.
    pub fn appended(&self) -> Result<u64, QueueError> {
        Ok(self.lock()?.state.appended)
    }

    /// Data items removed over the queue's lifetime.
    pub fn removed(&self) -> Result<u64, QueueError> {
        Ok(self.lock()?.state.removed)
    }

    /// Copy of the queued tokens in FIFO order.
    pub fn snapshot(&self) -> Result<Vec<Token>, QueueError> {
        Ok(self.lock()?.state.tokens.iter().cloned().collect())
    }
}

impl<'a> QueueGuard<'a> {
    /// Add a token at the tail.
    ///
    /// Fails only once the end-of-stream marker has been queued; the rejected
    /// token is handed back inside the error.
    pub fn append(&mut self, token: Token) -> Result<(), QueueError> {
        if self.state.sealed {
            return Err(QueueError::Sealed(token));
        }
        let is_end = token.is_end();
        trace!(token = %token, "append");
        self.state.tokens.push_back(token);
        if !is_end {
            self.state.appended += 1;
        }
        if is_end {
            self.state.sealed = true;
            // Every waiter must get to see the marker.
            self.non_empty.notify_all();
        } else {
            self.non_empty.notify_one();
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.state.tokens.is_empty()
    }

    pub fn peek_front(&self) -> Option<&Token> {
        self.state.tokens.front()
    }

    /// Remove the head data item.
    ///
    /// Returns `None` when the queue is empty or the head is end-of-stream;
    /// the marker is never removed.
    pub fn remove_front(&mut self) -> Option<Delivery> {
        if !matches!(self.state.tokens.front(), Some(Token::Item(_))) {
            return None;
        }
        let Some(Token::Item(item)) = self.state.tokens.pop_front() else {
            return None;
        };
        let seq = self.state.removed;
        self.state.removed += 1;
        trace!(seq, item = %item, "remove_front");
        Some(Delivery { seq, item })
    }

    /// Block until the queue holds at least one token.
    pub fn wait_non_empty(self) -> Result<Self, QueueError> {
        let QueueGuard {
            mut state,
            non_empty,
        } = self;
        while state.tokens.is_empty() {
            // Wait releases the lock and re-acquires it before returning.
            state = non_empty.wait(state)?;
        }
        Ok(QueueGuard { state, non_empty })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::mpsc;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn items_leave_in_append_order() {
        let queue = SharedQueue::new();
        for value in ["a", "b", "c"] {
            queue.push(Token::item(value)).expect("push");
        }
        let mut guard = queue.lock().expect("lock");
        let taken: Vec<Delivery> = std::iter::from_fn(|| guard.remove_front()).collect();
        let items: Vec<&str> = taken.iter().map(|d| d.item.as_str()).collect();
        assert_eq!(items, ["a", "b", "c"]);
        let seqs: Vec<u64> = taken.iter().map(|d| d.seq).collect();
        assert_eq!(seqs, [0, 1, 2]);
        assert!(guard.is_empty());
        drop(guard);
        assert_eq!(queue.appended().expect("appended"), 3);
        assert_eq!(queue.removed().expect("removed"), 3);
        assert_eq!(queue.len().expect("len"), 0);
    }

    #[test]
    fn end_of_stream_is_never_removed() {
        let queue = SharedQueue::new();
        queue.push(Token::item("only")).expect("push");
        queue.push(Token::EndOfStream).expect("push end");

        let first = queue.take_or_end(WaitStrategy::Block, |_| {}).expect("take");
        assert!(matches!(first, Take::Item(ref d) if d.item == "only"));
        // Repeated observations leave the marker in place.
        for _ in 0..3 {
            assert_eq!(
                queue.take_or_end(WaitStrategy::Spin, |_| {}).expect("take"),
                Take::EndOfStream
            );
        }
        let mut guard = queue.lock().expect("lock");
        assert!(guard.remove_front().is_none());
        assert_eq!(guard.peek_front(), Some(&Token::EndOfStream));
        drop(guard);
        assert_eq!(queue.snapshot().expect("snapshot"), vec![Token::EndOfStream]);
        // The marker is not counted as data in either direction.
        assert_eq!(queue.appended().expect("appended"), 1);
        assert_eq!(queue.removed().expect("removed"), 1);
        assert_eq!(queue.len().expect("len"), 1);
    }

    #[test]
    fn append_after_end_of_stream_is_rejected() {
        let queue = SharedQueue::new();
        queue.push(Token::EndOfStream).expect("push end");
        match queue.push(Token::item("late")) {
            Err(QueueError::Sealed(token)) => assert_eq!(token, Token::item("late")),
            other => panic!("expected sealed error, got {other:?}"),
        }
        assert!(matches!(
            queue.push(Token::EndOfStream),
            Err(QueueError::Sealed(Token::EndOfStream))
        ));
        assert_eq!(queue.snapshot().expect("snapshot").len(), 1);
    }

    #[test]
    fn blocking_take_wakes_on_push() {
        let queue = Arc::new(SharedQueue::new());
        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let queue_clone = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            ready_tx.send(()).expect("send ready");
            let taken = queue_clone
                .take_or_end(WaitStrategy::Block, |_| {})
                .expect("take");
            done_tx.send(taken).expect("send taken");
        });

        ready_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("ready");
        // Pushing after the consumer parks should wake it.
        queue.push(Token::item("wake")).expect("push");

        let taken = done_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("receive take");
        assert!(matches!(taken, Take::Item(ref d) if d.item == "wake" && d.seq == 0));
        handle.join().expect("blocking take thread panicked");
    }

    #[test]
    fn end_of_stream_wakes_every_blocked_consumer() {
        let queue = Arc::new(SharedQueue::new());
        let consumers = 4;
        let barrier = Arc::new(Barrier::new(consumers));
        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let mut handles = Vec::new();
        for _ in 0..consumers {
            let queue = Arc::clone(&queue);
            let barrier = Arc::clone(&barrier);
            let ready_tx = ready_tx.clone();
            let done_tx = done_tx.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                ready_tx.send(()).expect("ready");
                let taken = queue.take_or_end(WaitStrategy::Block, |_| {}).expect("take");
                done_tx.send(taken).expect("done");
            }));
        }

        for _ in 0..consumers {
            ready_rx
                .recv_timeout(Duration::from_secs(1))
                .expect("ready recv");
        }
        queue.push(Token::EndOfStream).expect("push end");

        for _ in 0..consumers {
            let taken = done_rx
                .recv_timeout(Duration::from_secs(1))
                .expect("done recv");
            assert_eq!(taken, Take::EndOfStream);
        }
        for handle in handles {
            handle.join().expect("consumer thread panicked");
        }
        assert_eq!(queue.snapshot().expect("snapshot").len(), 1);
    }

    #[test]
    fn spinning_take_sees_late_items() {
        let queue = Arc::new(SharedQueue::new());
        let queue_clone = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            loop {
                match queue_clone.take_or_end(WaitStrategy::Spin, |_| {}).expect("take") {
                    Take::Item(delivery) => seen.push(delivery.item),
                    Take::EndOfStream => return seen,
                }
            }
        });

        for value in ["x", "y"] {
            thread::sleep(Duration::from_millis(10));
            queue.push(Token::item(value)).expect("push");
        }
        queue.push(Token::EndOfStream).expect("push end");

        let seen = handle.join().expect("spinning consumer panicked");
        assert_eq!(seen, ["x", "y"]);
    }

    #[test]
    fn compound_guard_checks_never_touch_an_empty_queue() {
        // Many consumers drive the raw guard API while the producer is still
        // appending; each check-peek-remove runs under a single guard.
        let queue = Arc::new(SharedQueue::new());
        let consumers = 8;
        let total = 500;
        let barrier = Arc::new(Barrier::new(consumers + 1));

        let mut handles = Vec::new();
        for _ in 0..consumers {
            let queue = Arc::clone(&queue);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                let mut mine = Vec::new();
                loop {
                    let mut guard = queue.lock().expect("lock");
                    if guard.is_empty() {
                        continue;
                    }
                    match guard.peek_front() {
                        Some(Token::EndOfStream) => break,
                        Some(Token::Item(_)) => {
                            let delivery = guard
                                .remove_front()
                                .expect("head vanished under the lock");
                            mine.push(delivery);
                        }
                        None => unreachable!("non-empty queue has a head"),
                    }
                }
                mine
            }));
        }

        barrier.wait();
        for id in 0..total {
            queue.push(Token::item(format!("item-{id}"))).expect("push");
        }
        queue.push(Token::EndOfStream).expect("push end");

        let mut seqs = HashSet::new();
        let mut items = HashSet::new();
        for handle in handles {
            let mine = handle.join().expect("consumer thread panicked");
            // Within one consumer, removals follow queue order.
            assert!(mine.windows(2).all(|pair| pair[0].seq < pair[1].seq));
            for delivery in mine {
                assert!(seqs.insert(delivery.seq));
                assert!(items.insert(delivery.item));
            }
        }
        assert_eq!(items.len(), total);
        assert_eq!(queue.snapshot().expect("snapshot"), vec![Token::EndOfStream]);
    }

    #[test]
    fn take_callback_runs_in_removal_order() {
        // Each callback runs before the lock is released, so the shared log
        // sees removals strictly in queue order even with many takers.
        let queue = Arc::new(SharedQueue::new());
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let consumers = 6;
        let total = 600u64;
        let barrier = Arc::new(Barrier::new(consumers + 1));

        let mut handles = Vec::new();
        for _ in 0..consumers {
            let queue = Arc::clone(&queue);
            let log = Arc::clone(&log);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                loop {
                    let taken = queue
                        .take_or_end(WaitStrategy::Spin, |taken| {
                            if let Take::Item(delivery) = taken {
                                log.lock().expect("log mutex poisoned").push(delivery.item.clone());
                            }
                        })
                        .expect("take");
                    if taken == Take::EndOfStream {
                        break;
                    }
                }
            }));
        }

        barrier.wait();
        for id in 0..total {
            queue.push(Token::item(id.to_string())).expect("push");
        }
        queue.push(Token::EndOfStream).expect("push end");
        for handle in handles {
            handle.join().expect("consumer thread panicked");
        }

        let log = log.lock().expect("log mutex poisoned");
        let expected: Vec<String> = (0..total).map(|id| id.to_string()).collect();
        assert_eq!(*log, expected);
    }
}
