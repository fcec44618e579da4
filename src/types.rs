//! Shared token model and task labels used across the system.

use std::fmt;

use clap::ValueEnum;

/// A value travelling through the shared queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    /// Opaque data item produced for the consumers.
    Item(String),
    /// End-of-stream marker; appended once, last, and never removed.
    EndOfStream,
}

impl Token {
    /// Convenience constructor for a data item.
    pub fn item(value: impl Into<String>) -> Self {
        Self::Item(value.into())
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Item(value) => f.write_str(value),
            Self::EndOfStream => f.write_str("<end-of-stream>"),
        }
    }
}

/// A data item removed from the queue, stamped with its removal ordinal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// 0-based position in the global removal order.
    pub seq: u64,
    pub item: String,
}

/// How a consumer waits while the queue is empty.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum WaitStrategy {
    /// Release the lock and retry immediately (busy-wait).
    Spin,
    /// Park on the queue's condition variable until an append.
    #[default]
    Block,
}

impl fmt::Display for WaitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spin => f.write_str("spin"),
            Self::Block => f.write_str("block"),
        }
    }
}

/// Cosmetic ANSI color attached to a task's trace lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskColor {
    Yellow,
    Purple,
    Cyan,
    Green,
    Blue,
    Red,
    White,
}

impl TaskColor {
    const CONSUMER_PALETTE: [TaskColor; 6] = [
        TaskColor::Purple,
        TaskColor::Cyan,
        TaskColor::Green,
        TaskColor::Blue,
        TaskColor::Red,
        TaskColor::White,
    ];

    /// Color for the single producer.
    pub fn producer() -> Self {
        TaskColor::Yellow
    }

    /// Color for the consumer at `index`, cycling through the palette.
    pub fn consumer(index: usize) -> Self {
        Self::CONSUMER_PALETTE[index % Self::CONSUMER_PALETTE.len()]
    }

    pub fn ansi(self) -> &'static str {
        match self {
            TaskColor::Yellow => "\u{1b}[33m",
            TaskColor::Purple => "\u{1b}[35m",
            TaskColor::Cyan => "\u{1b}[36m",
            TaskColor::Green => "\u{1b}[32m",
            TaskColor::Blue => "\u{1b}[34m",
            TaskColor::Red => "\u{1b}[31m",
            TaskColor::White => "\u{1b}[37m",
        }
    }
}

pub const ANSI_RESET: &str = "\u{1b}[0m";
