//! Consumers: drain data items until the end-of-stream marker shows up.

use std::sync::Arc;

use tracing::{debug, info, info_span};

use crate::error::QueueError;
use crate::logging::Console;
use crate::shared_queue::{SharedQueue, Take};
use crate::types::{Delivery, WaitStrategy};

/// What a single consumer removed before it saw end-of-stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    pub label: String,
    /// Deliveries in the order this consumer removed them.
    pub deliveries: Vec<Delivery>,
    pub saw_end: bool,
}

pub struct Consumer {
    label: String,
    queue: Arc<SharedQueue>,
    strategy: WaitStrategy,
    console: Console,
}

impl Consumer {
    pub fn new(
        label: impl Into<String>,
        queue: Arc<SharedQueue>,
        strategy: WaitStrategy,
        console: Console,
    ) -> Self {
        Self {
            label: label.into(),
            queue,
            strategy,
            console,
        }
    }

    /// Take items until the head of the queue is end-of-stream.
    ///
    /// The marker is observed, not removed, so every other consumer will see
    /// it too. Trace lines are written while the queue lock is still held,
    /// so stdout shows removals in queue order.
    pub fn run(self) -> Result<ConsumerReport, QueueError> {
        let _span =
            info_span!("consumer", label = %self.label, strategy = %self.strategy).entered();
        let mut report = ConsumerReport {
            label: self.label.clone(),
            ..ConsumerReport::default()
        };

        loop {
            let taken = self.queue.take_or_end(self.strategy, |taken| match taken {
                Take::Item(delivery) => {
                    self.console.line(format_args!("Removed {}", delivery.item));
                }
                Take::EndOfStream => self.console.line("Exiting"),
            })?;
            match taken {
                Take::Item(delivery) => {
                    debug!(seq = delivery.seq, item = %delivery.item, "removed");
                    report.deliveries.push(delivery);
                }
                Take::EndOfStream => {
                    report.saw_end = true;
                    break;
                }
            }
        }

        info!(removed = report.deliveries.len(), "consumer finished");
        Ok(report)
    }
}
