//! Per-entry progress of a transfer.
//!
//! Entry tasks never touch display state directly. They push
//! [`ProgressEvent`]s through a [`ProgressHandle`]; one reporter task owns
//! every bar and counter and returns a [`TransferSummary`] once all handles
//! are dropped.

use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ui::format_bytes;
use crate::utils::pluralize;

pub const THROUGHPUT_SAMPLES: usize = 10;

/// Fixed-capacity ring of `(bytes, time)` samples; the oldest sample is
/// overwritten once full.
#[derive(Debug, Clone)]
pub struct ThroughputWindow {
    samples: [(u64, Option<Instant>); THROUGHPUT_SAMPLES],
    head: usize,
    len: usize,
}

impl Default for ThroughputWindow {
    fn default() -> Self {
        Self {
            samples: [(0, None); THROUGHPUT_SAMPLES],
            head: 0,
            len: 0,
        }
    }
}

impl ThroughputWindow {
    pub fn push(&mut self, bytes: u64, at: Instant) {
        let slot = (self.head + self.len) % THROUGHPUT_SAMPLES;
        self.samples[slot] = (bytes, Some(at));
        if self.len == THROUGHPUT_SAMPLES {
            self.head = (self.head + 1) % THROUGHPUT_SAMPLES;
        } else {
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn iter(&self) -> impl Iterator<Item = (u64, Instant)> + '_ {
        (0..self.len).filter_map(move |offset| {
            let (bytes, at) = self.samples[(self.head + offset) % THROUGHPUT_SAMPLES];
            at.map(|at| (bytes, at))
        })
    }

    /// Bytes per second over the buffered samples; zero until two exist.
    pub fn bytes_per_sec(&self) -> f64 {
        if self.len < 2 {
            return 0.0;
        }
        let oldest = self.iter().next().map(|(_, at)| at);
        let newest = self.iter().last().map(|(_, at)| at);
        let (Some(oldest), Some(newest)) = (oldest, newest) else {
            return 0.0;
        };
        let elapsed = newest.saturating_duration_since(oldest).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.iter().map(|(bytes, _)| bytes).sum::<u64>() as f64 / elapsed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOutcome {
    Completed,
    Stopped,
    Failed,
}

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started {
        entry: String,
        start: i64,
        stop: i64,
    },
    Record {
        entry: String,
        timestamp: i64,
        bytes: u64,
        at: Instant,
    },
    Skipped {
        entry: String,
    },
    Finished {
        entry: String,
        outcome: EntryOutcome,
    },
}

/// Cheap, cloneable sender side used by entry tasks.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressHandle {
    // A closed channel only means nobody is watching anymore.
    fn send(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }

    pub fn started(&self, entry: &str, start: i64, stop: i64) {
        self.send(ProgressEvent::Started {
            entry: entry.to_string(),
            start,
            stop,
        });
    }

    pub fn record(&self, entry: &str, timestamp: i64, bytes: u64) {
        self.send(ProgressEvent::Record {
            entry: entry.to_string(),
            timestamp,
            bytes,
            at: Instant::now(),
        });
    }

    pub fn skipped(&self, entry: &str) {
        self.send(ProgressEvent::Skipped {
            entry: entry.to_string(),
        });
    }

    pub fn finished(&self, entry: &str, outcome: EntryOutcome) {
        self.send(ProgressEvent::Finished {
            entry: entry.to_string(),
            outcome,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySummary {
    pub entry: String,
    pub records: u64,
    pub skipped: u64,
    pub bytes: u64,
    pub last_timestamp: Option<i64>,
    pub outcome: EntryOutcome,
}

impl EntrySummary {
    pub fn copied(&self) -> u64 {
        self.records.saturating_sub(self.skipped)
    }

    pub fn line(&self) -> String {
        let copied = self.copied();
        let mut line = format!(
            "Entry '{}' (copied {copied} {} ({})",
            self.entry,
            pluralize(copied, "record", None),
            format_bytes(self.bytes as f64)
        );
        if self.skipped > 0 {
            line.push_str(&format!(", skipped {} already present", self.skipped));
        }
        line.push(')');
        match self.outcome {
            EntryOutcome::Completed => {}
            EntryOutcome::Stopped => line.push_str(" [stopped]"),
            EntryOutcome::Failed => line.push_str(" [failed]"),
        }
        line
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferSummary {
    pub entries: Vec<EntrySummary>,
}

impl TransferSummary {
    pub fn interrupted(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.outcome == EntryOutcome::Stopped)
    }

    pub fn records(&self) -> u64 {
        self.entries.iter().map(EntrySummary::copied).sum()
    }

    pub fn bytes(&self) -> u64 {
        self.entries.iter().map(|entry| entry.bytes).sum()
    }

    /// Earliest `--start` that resumes every stopped entry without gaps.
    /// `None` when some stopped entry never got a record.
    pub fn resume_from(&self) -> Option<i64> {
        self.entries
            .iter()
            .filter(|entry| entry.outcome == EntryOutcome::Stopped)
            .map(|entry| entry.last_timestamp.map(|ts| ts + 1))
            .min()
            .flatten()
    }
}

struct EntryProgress {
    window_start: i64,
    window_stop: i64,
    last_timestamp: i64,
    last_record: Option<i64>,
    bytes: u64,
    records: u64,
    skipped: u64,
    throughput: ThroughputWindow,
    outcome: Option<EntryOutcome>,
    bar: ProgressBar,
}

impl EntryProgress {
    fn new(bar: ProgressBar) -> Self {
        Self {
            window_start: 0,
            window_stop: 0,
            last_timestamp: 0,
            last_record: None,
            bytes: 0,
            records: 0,
            skipped: 0,
            throughput: ThroughputWindow::default(),
            outcome: None,
            bar,
        }
    }

    fn message(&self, entry: &str) -> String {
        let copied = self.records.saturating_sub(self.skipped);
        format!(
            "Entry '{entry}' (copied {copied} {} ({}), speed {}/s)",
            pluralize(copied, "record", None),
            format_bytes(self.bytes as f64),
            format_bytes(self.throughput.bytes_per_sec())
        )
    }

    fn length(&self) -> u64 {
        self.window_stop.saturating_sub(self.window_start).max(0) as u64
    }
}

/// Owns the display and the per-entry counters.
pub struct ProgressReporter {
    multi: MultiProgress,
    visible: bool,
    style: Option<ProgressStyle>,
    entries: BTreeMap<String, EntryProgress>,
}

impl ProgressReporter {
    /// Bars are drawn only when stderr is a terminal and `visible` is set.
    pub fn new(visible: bool) -> Self {
        let visible = visible && std::io::stderr().is_terminal();
        let multi = if visible {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} [{bar:30.cyan/blue}] {percent:>3}% {msg}",
        )
        .ok()
        .map(|style| style.progress_chars("=> "));
        Self {
            multi,
            visible,
            style,
            entries: BTreeMap::new(),
        }
    }

    /// Run the reporter on its own task.
    pub fn spawn(self) -> (ProgressHandle, ReporterTask) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut reporter = self;
            while let Some(event) = rx.recv().await {
                reporter.apply(event);
            }
            reporter.summary()
        });
        (ProgressHandle { tx }, ReporterTask { task })
    }

    fn entry(&mut self, name: &str) -> &mut EntryProgress {
        let multi = &self.multi;
        let style = &self.style;
        let visible = self.visible;
        self.entries.entry(name.to_string()).or_insert_with(|| {
            let bar = multi.add(ProgressBar::new(0));
            if let Some(style) = style {
                bar.set_style(style.clone());
            }
            if visible {
                bar.enable_steady_tick(Duration::from_millis(120));
            }
            EntryProgress::new(bar)
        })
    }

    pub fn apply(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { entry, start, stop } => {
                let progress = self.entry(&entry);
                progress.window_start = start;
                progress.window_stop = stop;
                progress.last_timestamp = start;
                progress.bar.set_length(progress.length());
                let message = progress.message(&entry);
                progress.bar.set_message(message);
            }
            ProgressEvent::Record {
                entry,
                timestamp,
                bytes,
                at,
            } => {
                let progress = self.entry(&entry);
                let advance = timestamp.saturating_sub(progress.last_timestamp).max(0) as u64;
                progress.last_timestamp = timestamp;
                progress.last_record = Some(timestamp);
                progress.records += 1;
                progress.bytes += bytes;
                progress.throughput.push(bytes, at);
                progress.bar.inc(advance);
                let message = progress.message(&entry);
                progress.bar.set_message(message);
            }
            ProgressEvent::Skipped { entry } => {
                let progress = self.entry(&entry);
                progress.skipped += 1;
                let message = progress.message(&entry);
                progress.bar.set_message(message);
            }
            ProgressEvent::Finished { entry, outcome } => {
                let progress = self.entry(&entry);
                if progress.outcome.is_some() {
                    return;
                }
                progress.outcome = Some(outcome);
                let message = progress.message(&entry);
                match outcome {
                    EntryOutcome::Completed => {
                        progress.bar.set_position(progress.length());
                        progress.bar.finish_with_message(message);
                    }
                    EntryOutcome::Stopped => {
                        progress.bar.abandon_with_message(format!("{message} [stopped]"));
                    }
                    EntryOutcome::Failed => {
                        progress.bar.abandon_with_message(format!("{message} [failed]"));
                    }
                }
            }
        }
    }

    pub fn summary(&self) -> TransferSummary {
        TransferSummary {
            entries: self
                .entries
                .iter()
                .map(|(name, progress)| EntrySummary {
                    entry: name.clone(),
                    records: progress.records,
                    skipped: progress.skipped,
                    bytes: progress.bytes,
                    last_timestamp: progress.last_record,
                    outcome: progress.outcome.unwrap_or(EntryOutcome::Stopped),
                })
                .collect(),
        }
    }
}

pub struct ReporterTask {
    task: JoinHandle<TransferSummary>,
}

impl ReporterTask {
    /// Wait until every [`ProgressHandle`] is dropped and collect the summary.
    pub async fn finish(self) -> Result<TransferSummary> {
        self.task.await.context("progress reporter failed")
    }
}
