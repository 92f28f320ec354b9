//! Fragment intake and the bounded annotation worker pool.

use std::collections::HashSet;
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::blast::SearchService;
use crate::domain::Fragment;
use crate::error::AnnotateError;
use crate::reader::FragmentReader;
use crate::store::{RecordStore, StoreConnector};
use crate::taxonomy::TaxonomySource;
use crate::worker::AnnotationWorker;

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub allow_duplicates: bool,
    pub concurrency: usize,
    pub queue_capacity: usize,
    pub launch_interval: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            allow_duplicates: false,
            concurrency: 4,
            queue_capacity: 8,
            launch_interval: Duration::from_millis(600),
        }
    }
}

/// Enforces a minimum spacing between successive launches.
///
/// Owned and advanced by the dispatching thread only.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_launch: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_launch: None,
        }
    }

    /// Blocks until a launch is allowed, then records it.
    pub fn wait(&mut self) {
        if let Some(last) = self.last_launch {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                thread::sleep(self.min_interval - elapsed);
            }
        }
        self.last_launch = Some(Instant::now());
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchSummary {
    pub lines: usize,
    pub fragments: usize,
    pub skipped_duplicates: usize,
    pub malformed_lines: usize,
    pub invalid_fragments: usize,
    pub launched: usize,
    pub annotated: usize,
    pub failed: usize,
    pub alignments: usize,
    pub unresolved_taxa: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PoolCounters {
    annotated: AtomicUsize,
    failed: AtomicUsize,
    alignments: AtomicUsize,
    unresolved_taxa: AtomicUsize,
}

pub struct FragmentDispatcher<Q: ?Sized, T: ?Sized, C> {
    worker: AnnotationWorker<Q, T, C>,
    options: DispatchOptions,
}

impl<Q, T, C> FragmentDispatcher<Q, T, C>
where
    Q: SearchService + ?Sized + 'static,
    T: TaxonomySource + ?Sized + 'static,
    C: StoreConnector + 'static,
{
    pub fn new(
        worker: AnnotationWorker<Q, T, C>,
        options: DispatchOptions,
    ) -> Result<Self, AnnotateError> {
        if options.concurrency == 0 || options.queue_capacity == 0 {
            return Err(AnnotateError::InvalidConfig(
                "concurrency and queue capacity must be >= 1".to_string(),
            ));
        }
        Ok(Self { worker, options })
    }

    /// Reads fragment pairs from `input` and annotates each one on the pool.
    ///
    /// Unless duplicates are allowed, fragments whose header is already
    /// stored, or was already launched in this run, are skipped. A failing
    /// fragment never stops the run. Malformed lines and invalid reads are
    /// skipped; only an I/O failure on `input` ends the run early.
    pub fn run<R: Read>(&self, input: R) -> Result<DispatchSummary, AnnotateError> {
        let started_at = Utc::now();
        let mut seen = if self.options.allow_duplicates {
            HashSet::new()
        } else {
            self.worker.connector().connect()?.fragment_headers()?
        };

        let counters = Arc::new(PoolCounters::default());
        let (tx, rx) = mpsc::sync_channel::<Fragment>(self.options.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = Vec::with_capacity(self.options.concurrency);
        for index in 0..self.options.concurrency {
            match self.spawn_worker(index, Arc::clone(&rx), Arc::clone(&counters)) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    drop(tx);
                    join_all(handles)?;
                    return Err(err);
                }
            }
        }

        let mut summary = DispatchSummary {
            lines: 0,
            fragments: 0,
            skipped_duplicates: 0,
            malformed_lines: 0,
            invalid_fragments: 0,
            launched: 0,
            annotated: 0,
            failed: 0,
            alignments: 0,
            unresolved_taxa: 0,
            started_at,
            finished_at: started_at,
        };
        let mut limiter = RateLimiter::new(self.options.launch_interval);
        let mut outcome = Ok(());

        'input: for item in FragmentReader::new(input) {
            summary.lines += 1;
            let pair = match item {
                Ok(pair) => pair,
                Err(AnnotateError::InvalidRecord { line, message }) => {
                    tracing::warn!(line, %message, "skipping malformed input line");
                    summary.malformed_lines += 1;
                    continue;
                }
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            };
            for fragment in pair {
                let fragment = match fragment {
                    Ok(fragment) => fragment,
                    Err(err) => {
                        tracing::warn!(error = %err, "skipping invalid fragment");
                        summary.invalid_fragments += 1;
                        continue;
                    }
                };
                summary.fragments += 1;
                if !self.options.allow_duplicates && !seen.insert(fragment.header.clone()) {
                    tracing::debug!(header = %fragment.header, "skipping known fragment");
                    summary.skipped_duplicates += 1;
                    continue;
                }
                limiter.wait();
                if tx.send(fragment).is_err() {
                    outcome = Err(AnnotateError::WorkerPool(
                        "all annotation workers have exited".to_string(),
                    ));
                    break 'input;
                }
                summary.launched += 1;
            }
        }

        drop(tx);
        join_all(handles)?;
        outcome?;

        summary.annotated = counters.annotated.load(Ordering::SeqCst);
        summary.failed = counters.failed.load(Ordering::SeqCst);
        summary.alignments = counters.alignments.load(Ordering::SeqCst);
        summary.unresolved_taxa = counters.unresolved_taxa.load(Ordering::SeqCst);
        summary.finished_at = Utc::now();
        tracing::info!(
            launched = summary.launched,
            annotated = summary.annotated,
            failed = summary.failed,
            skipped = summary.skipped_duplicates,
            "dispatch finished"
        );
        Ok(summary)
    }

    fn spawn_worker(
        &self,
        index: usize,
        rx: Arc<Mutex<Receiver<Fragment>>>,
        counters: Arc<PoolCounters>,
    ) -> Result<JoinHandle<()>, AnnotateError> {
        let worker = self.worker.clone();
        thread::Builder::new()
            .name(format!("annotate-{index}"))
            .spawn(move || {
                loop {
                    let next = match rx.lock() {
                        Ok(receiver) => receiver.recv(),
                        Err(_) => break,
                    };
                    let Ok(fragment) = next else {
                        break;
                    };
                    match worker.annotate(&fragment) {
                        Ok(report) => {
                            counters.annotated.fetch_add(1, Ordering::SeqCst);
                            counters
                                .alignments
                                .fetch_add(report.alignments, Ordering::SeqCst);
                            counters
                                .unresolved_taxa
                                .fetch_add(report.unresolved_taxa, Ordering::SeqCst);
                        }
                        Err(err) => {
                            counters.failed.fetch_add(1, Ordering::SeqCst);
                            tracing::error!(
                                header = %fragment.header,
                                error = %err,
                                "fragment annotation failed"
                            );
                        }
                    }
                }
            })
            .map_err(|err| {
                AnnotateError::WorkerPool(format!("failed to spawn annotation worker: {err}"))
            })
    }
}

fn join_all(handles: Vec<JoinHandle<()>>) -> Result<(), AnnotateError> {
    let mut panicked = 0usize;
    for handle in handles {
        if handle.join().is_err() {
            panicked += 1;
        }
    }
    if panicked > 0 {
        return Err(AnnotateError::WorkerPool(format!(
            "{panicked} annotation worker(s) panicked"
        )));
    }
    Ok(())
}
