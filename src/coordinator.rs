//! Wires one producer and N consumers to a shared queue and waits for them.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow, bail};
use thiserror::Error;
use tracing::{info, warn};

use crate::consumer::{Consumer, ConsumerReport};
use crate::error::QueueError;
use crate::logging::Console;
use crate::producer::{Interrupter, Pacing, Producer, ProducerReport};
use crate::shared_queue::SharedQueue;
use crate::types::{Delivery, TaskColor, Token, WaitStrategy};

pub const DEFAULT_ITEMS: [&str; 5] = ["1", "2", "3", "4", "5"];
pub const DEFAULT_CONSUMERS: usize = 2;
pub const DEFAULT_MAX_DELAY_MS: u64 = 1000;

/// Parameters for a single producer/consumer run.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub items: Vec<String>,
    pub consumers: usize,
    /// Upper bound (exclusive) of the random pause after each append.
    pub max_delay_ms: u64,
    pub wait: WaitStrategy,
    pub seed: Option<u64>,
    pub color: bool,
    /// Print the per-task trace lines on stdout.
    pub echo: bool,
    /// Interrupt the producer once after this long, if still running.
    pub interrupt_after: Option<Duration>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            items: DEFAULT_ITEMS.iter().map(|item| item.to_string()).collect(),
            consumers: DEFAULT_CONSUMERS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            wait: WaitStrategy::default(),
            seed: None,
            color: true,
            echo: true,
            interrupt_after: None,
        }
    }
}

impl RunConfig {
    /// Items "1".."=count", the stress-test substitute for the fixed list.
    pub fn synthetic_items(count: usize) -> Vec<String> {
        (1..=count).map(|n| n.to_string()).collect()
    }

    fn console(&self, label: &str, color: TaskColor) -> Console {
        if self.echo {
            Console::new(label, color, self.color)
        } else {
            Console::silent(label)
        }
    }
}

/// A run in flight; [`RunHandle::join`] waits for every task.
pub struct RunHandle {
    queue: Arc<SharedQueue>,
    interrupter: Interrupter,
    interrupt_after: Option<Duration>,
    producer: JoinHandle<Result<ProducerReport, QueueError>>,
    consumers: Vec<JoinHandle<Result<ConsumerReport, QueueError>>>,
    started: Instant,
}

type ConsumerHandle = JoinHandle<Result<ConsumerReport, QueueError>>;

// Polling interval while waiting to fire a scheduled interrupt.
const INTERRUPT_POLL_MS: u64 = 5;

/// Start the producer and all consumers on their own threads.
pub fn spawn(config: &RunConfig) -> anyhow::Result<RunHandle> {
    if config.consumers == 0 {
        bail!("at least one consumer is required");
    }
    let queue = Arc::new(SharedQueue::new());
    let started = Instant::now();
    info!(
        items = config.items.len(),
        consumers = config.consumers,
        wait = %config.wait,
        "starting run"
    );

    let mut consumers: Vec<ConsumerHandle> = Vec::with_capacity(config.consumers);
    for index in 0..config.consumers {
        let label = format!("consumer-{index}");
        let consumer = Consumer::new(
            label.clone(),
            Arc::clone(&queue),
            config.wait,
            config.console(&label, TaskColor::consumer(index)),
        );
        match thread::Builder::new()
            .name(label.clone())
            .spawn(move || consumer.run())
        {
            Ok(handle) => consumers.push(handle),
            Err(err) => return Err(abort_spawn(&queue, consumers, err, &label)),
        }
    }

    let producer = Producer::new(
        Arc::clone(&queue),
        config.items.clone(),
        Pacing::new(config.max_delay_ms, config.seed),
        config.console("producer", TaskColor::producer()),
    );
    let interrupter = producer.interrupter();
    let producer = match thread::Builder::new()
        .name("producer".to_string())
        .spawn(move || producer.run())
    {
        Ok(handle) => handle,
        Err(err) => return Err(abort_spawn(&queue, consumers, err, "producer")),
    };

    Ok(RunHandle {
        queue,
        interrupter,
        interrupt_after: config.interrupt_after,
        producer,
        consumers,
        started,
    })
}

/// Release and join the consumers already started when a later spawn fails.
fn abort_spawn(
    queue: &SharedQueue,
    consumers: Vec<ConsumerHandle>,
    err: std::io::Error,
    what: &str,
) -> anyhow::Error {
    if let Err(push_err) = queue.push(Token::EndOfStream) {
        warn!("could not release consumers: {push_err}");
    }
    for handle in consumers {
        if handle.join().is_err() {
            warn!("consumer thread panicked during aborted start");
        }
    }
    anyhow::Error::new(err).context(format!("failed to spawn {what}"))
}

/// Run to completion: spawn every task, then join every task.
pub fn run(config: &RunConfig) -> anyhow::Result<RunReport> {
    spawn(config)?.join()
}

impl RunHandle {
    /// Cut the producer's current pause short, or its next one if it is
    /// between pauses.
    pub fn interrupt_producer(&self) {
        self.interrupter.interrupt();
    }

    /// Fire the configured interrupt once its time comes, unless the
    /// producer finishes first.
    fn await_scheduled_interrupt(&self) {
        let Some(after) = self.interrupt_after else {
            return;
        };
        let deadline = self.started + after;
        let poll = Duration::from_millis(INTERRUPT_POLL_MS);
        loop {
            if self.producer.is_finished() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                self.interrupt_producer();
                return;
            }
            thread::sleep(poll.min(deadline - now));
        }
    }

    /// Wait for the producer and every consumer, then snapshot the queue.
    ///
    /// Every thread is joined even when an earlier one failed; the first
    /// failure is reported afterwards.
    pub fn join(self) -> anyhow::Result<RunReport> {
        self.await_scheduled_interrupt();
        let RunHandle {
            queue,
            producer,
            consumers,
            started,
            ..
        } = self;

        let producer = producer
            .join()
            .map_err(|_| anyhow!("producer thread panicked"))
            .and_then(|result| result.context("producer failed"));
        if producer.is_err() {
            // Without the marker the consumers would wait forever.
            if let Err(err) = queue.push(Token::EndOfStream) {
                warn!("could not release consumers: {err}");
            }
        }

        let consumers: Vec<anyhow::Result<ConsumerReport>> = consumers
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| anyhow!("consumer thread panicked"))
                    .and_then(|result| result.context("consumer failed"))
            })
            .collect();

        let producer = producer?;
        let reports = consumers.into_iter().collect::<anyhow::Result<Vec<_>>>()?;
        let remaining = queue.snapshot().context("queue snapshot failed")?;
        let report = RunReport {
            produced: producer.appended,
            interruptions: producer.interruptions,
            consumers: reports,
            queue_appended: queue.appended().context("queue counters unavailable")?,
            queue_removed: queue.removed().context("queue counters unavailable")?,
            remaining,
            elapsed: started.elapsed(),
        };
        info!(
            removed = report.removed(),
            queued = queue.len().unwrap_or_default(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "run finished"
        );
        Ok(report)
    }
}

/// A broken ordering, delivery, or termination guarantee found after a run.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Violation {
    #[error("removed {removed} items but {produced} were produced")]
    CountMismatch { produced: usize, removed: usize },
    #[error("removal #{seq} was recorded more than once")]
    DuplicateRemoval { seq: u64 },
    #[error("removal #{position} took {found:?}, expected {expected:?}")]
    OutOfOrder {
        position: usize,
        expected: String,
        found: String,
    },
    #[error("{label} removed items out of queue order")]
    ConsumerOrder { label: String },
    #[error("{label} stopped without seeing end-of-stream")]
    MissedEndOfStream { label: String },
    #[error("queue counted {queue} appends and {queue_removed} removals, reports show {appended} and {removed}")]
    QueueCounters {
        queue: u64,
        queue_removed: u64,
        appended: usize,
        removed: usize,
    },
    #[error("queue should hold only end-of-stream, found {remaining:?}")]
    UnexpectedRemainder { remaining: Vec<Token> },
}

/// Everything observed during one run.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub produced: Vec<String>,
    pub interruptions: usize,
    pub consumers: Vec<ConsumerReport>,
    /// The queue's own append and removal counters.
    pub queue_appended: u64,
    pub queue_removed: u64,
    /// Queue contents after every task finished.
    pub remaining: Vec<Token>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn removed(&self) -> usize {
        self.consumers.iter().map(|c| c.deliveries.len()).sum()
    }

    /// All deliveries in global removal order.
    pub fn merged(&self) -> Vec<&Delivery> {
        let mut all: Vec<&Delivery> = self
            .consumers
            .iter()
            .flat_map(|c| c.deliveries.iter())
            .collect();
        all.sort_by_key(|d| d.seq);
        all
    }

    pub fn sentinel_left_in_queue(&self) -> bool {
        self.remaining == [Token::EndOfStream]
    }

    /// Check FIFO order, single delivery, and end-of-stream visibility.
    pub fn verify(&self) -> Vec<Violation> {
        let mut violations = Vec::new();

        let removed = self.removed();
        if removed != self.produced.len() {
            violations.push(Violation::CountMismatch {
                produced: self.produced.len(),
                removed,
            });
        }

        let merged = self.merged();
        let mut seqs = HashSet::with_capacity(merged.len());
        for delivery in &merged {
            if !seqs.insert(delivery.seq) {
                violations.push(Violation::DuplicateRemoval { seq: delivery.seq });
            }
        }

        if let Some((position, (expected, found))) = self
            .produced
            .iter()
            .zip(merged.iter().map(|d| &d.item))
            .enumerate()
            .find(|(_, (expected, found))| expected != found)
        {
            violations.push(Violation::OutOfOrder {
                position,
                expected: expected.clone(),
                found: found.clone(),
            });
        }

        for consumer in &self.consumers {
            if !consumer.deliveries.windows(2).all(|w| w[0].seq < w[1].seq) {
                violations.push(Violation::ConsumerOrder {
                    label: consumer.label.clone(),
                });
            }
            if !consumer.saw_end {
                violations.push(Violation::MissedEndOfStream {
                    label: consumer.label.clone(),
                });
            }
        }

        if self.queue_appended != self.produced.len() as u64
            || self.queue_removed != removed as u64
        {
            violations.push(Violation::QueueCounters {
                queue: self.queue_appended,
                queue_removed: self.queue_removed,
                appended: self.produced.len(),
                removed,
            });
        }

        if !self.sentinel_left_in_queue() {
            violations.push(Violation::UnexpectedRemainder {
                remaining: self.remaining.clone(),
            });
        }
        violations
    }

    /// Print the closing summary block on stdout.
    pub fn print_summary(&self, violations: &[Violation]) {
        let per_consumer: Vec<String> = self
            .consumers
            .iter()
            .map(|c| format!("{}:{}", c.label, c.deliveries.len()))
            .collect();
        println!("RUN SUMMARY");
        println!(
            "consumers={} items_produced={}",
            self.consumers.len(),
            self.produced.len()
        );
        println!("items_removed={}", self.removed());
        println!("per_consumer={}", per_consumer.join(","));
        println!("producer_interruptions={}", self.interruptions);
        println!("sentinel_left_in_queue={}", self.sentinel_left_in_queue());
        println!("elapsed_ms={}", self.elapsed.as_millis());
        if violations.is_empty() {
            println!("violations=none");
        } else {
            println!("violations={}", violations.len());
            for violation in violations {
                println!("  {violation}");
            }
        }
    }
}
