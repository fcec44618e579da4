//! The single producer: appends a fixed item list, then the end-of-stream marker.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, info, info_span, warn};

use crate::error::QueueError;
use crate::logging::Console;
use crate::shared_queue::SharedQueue;
use crate::types::Token;

/// Returned when a pending delay is cut short by [`Interrupter::interrupt`].
#[derive(Debug, Error)]
#[error("producer delay interrupted")]
pub struct Interrupted;

/// Cloneable handle that cuts the producer's current (or next) delay short.
#[derive(Clone, Default)]
pub struct Interrupter {
    inner: Arc<InterruptState>,
}

#[derive(Default)]
struct InterruptState {
    pending: Mutex<bool>,
    wake: Condvar,
}

impl Interrupter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag an interrupt and wake the sleeper, if any.
    pub fn interrupt(&self) {
        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *pending = true;
        self.inner.wake.notify_all();
    }

    /// Sleep for `duration` unless interrupted first.
    ///
    /// An interrupt raised while nobody is sleeping stays pending and ends the
    /// next sleep immediately. Observing an interrupt clears it.
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (mut pending, _) = self
            .inner
            .wake
            .wait_timeout_while(pending, duration, |pending| !*pending)
            .unwrap_or_else(PoisonError::into_inner);
        if *pending {
            *pending = false;
            return Err(Interrupted);
        }
        Ok(())
    }
}

/// Source of the randomized pause after each append.
pub struct Pacing {
    max_delay_ms: u64,
    rng: StdRng,
}

impl Pacing {
    /// Delays are drawn uniformly from `[0, max_delay_ms)`; `0` disables them.
    pub fn new(max_delay_ms: u64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { max_delay_ms, rng }
    }

    pub fn next_delay(&mut self) -> Duration {
        if self.max_delay_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.rng.gen_range(0..self.max_delay_ms))
    }
}

/// What the producer did during its run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProducerReport {
    /// Items in the order they were appended.
    pub appended: Vec<String>,
    pub interruptions: usize,
}

pub struct Producer {
    queue: Arc<SharedQueue>,
    items: Vec<String>,
    pacing: Pacing,
    interrupter: Interrupter,
    console: Console,
}

impl Producer {
    pub fn new(queue: Arc<SharedQueue>, items: Vec<String>, pacing: Pacing, console: Console) -> Self {
        Self {
            queue,
            items,
            pacing,
            interrupter: Interrupter::new(),
            console,
        }
    }

    /// Handle for interrupting this producer's delays from another thread.
    pub fn interrupter(&self) -> Interrupter {
        self.interrupter.clone()
    }

    /// Append every item, pausing between appends, then append end-of-stream.
    ///
    /// The lock is held only for each append, never across a pause. An
    /// interrupted pause is logged and the run moves on to the next item.
    pub fn run(mut self) -> Result<ProducerReport, QueueError> {
        let _span = info_span!("producer", items = self.items.len()).entered();
        let mut report = ProducerReport::default();

        for item in std::mem::take(&mut self.items) {
            self.console.line(format_args!("Adding {item}"));
            self.queue.push(Token::item(item.as_str()))?;
            debug!(item = %item, "appended");
            report.appended.push(item);

            let delay = self.pacing.next_delay();
            if let Err(err) = self.interrupter.sleep(delay) {
                warn!(delay_ms = delay.as_millis() as u64, "{err}");
                self.console.line("Producer was interrupted.");
                report.interruptions += 1;
            }
        }

        self.console.line("Adding end-of-stream and exiting");
        self.queue.push(Token::EndOfStream)?;
        info!(
            appended = report.appended.len(),
            interruptions = report.interruptions,
            "producer finished"
        );
        Ok(report)
    }
}
