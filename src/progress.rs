use crate::error::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Bytes between reports when the total is unknown.
pub const PROGRESS_INTERVAL: u64 = 1 << 20;

/// Engine a progress report comes from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProgressOperation {
    BuildingSignature,
    BuildingDelta,
    ApplyingDelta,
}

impl fmt::Display for ProgressOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProgressOperation::BuildingSignature => "Building signature",
            ProgressOperation::BuildingDelta => "Building delta",
            ProgressOperation::ApplyingDelta => "Applying delta",
        };
        f.write_str(s)
    }
}

/// Snapshot of how far an engine got through its input.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProgressReport {
    pub operation: ProgressOperation,
    pub processed: u64,
    pub total: Option<u64>,
}

impl ProgressReport {
    /// Whole percent done, if the total is known.
    pub fn percentage(&self) -> Option<u8> {
        self.total.map(|total| {
            if total == 0 {
                100
            } else {
                Ord::min(self.processed.saturating_mul(100) / total, 100) as u8
            }
        })
    }
}

/// Receives progress reports on the engine's own thread.
///
/// Implemented for every `FnMut(ProgressReport) + Send` closure.
pub trait ProgressReporter: Send {
    fn report(&mut self, progress: ProgressReport);
}

impl<F> ProgressReporter for F
where
    F: FnMut(ProgressReport) + Send,
{
    fn report(&mut self, progress: ProgressReport) {
        self(progress)
    }
}

/// Turns byte counts into reports proportional to input consumed.
pub(crate) struct ProgressTracker<'a> {
    reporter: Option<&'a mut Box<dyn ProgressReporter>>,
    operation: ProgressOperation,
    total: Option<u64>,
    processed: u64,
    reported: Option<u64>,
    last_percent: Option<u8>,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(
        operation: ProgressOperation,
        total: Option<u64>,
        reporter: Option<&'a mut Box<dyn ProgressReporter>>,
    ) -> Self {
        ProgressTracker {
            reporter,
            operation,
            total,
            processed: 0,
            reported: None,
            last_percent: None,
        }
    }

    pub fn advance(&mut self, n: u64) {
        self.set(self.processed + n);
    }

    pub fn set(&mut self, processed: u64) {
        self.processed = processed;
        if self.reporter.is_none() {
            return;
        }
        let report = self.snapshot();
        let due = match (report.percentage(), self.total) {
            (Some(percent), Some(total)) if total > 0 => self.last_percent != Some(percent),
            _ => match self.reported {
                Some(last) => processed >= last + PROGRESS_INTERVAL,
                None => processed >= PROGRESS_INTERVAL,
            },
        };
        if due {
            self.emit(report);
        }
    }

    /// Final report, unless the last one already covered everything.
    pub fn finish(&mut self) {
        if self.reporter.is_some() && self.reported != Some(self.processed) {
            let report = self.snapshot();
            self.emit(report);
        }
    }

    fn snapshot(&self) -> ProgressReport {
        ProgressReport {
            operation: self.operation,
            processed: self.processed,
            total: self.total,
        }
    }

    fn emit(&mut self, report: ProgressReport) {
        if let Some(reporter) = self.reporter.as_mut() {
            reporter.report(report);
            self.reported = Some(report.processed);
            self.last_percent = report.percentage();
        }
    }
}

/// Shared flag for cooperative cancellation.
///
/// Engines check it between chunks and between delta operations, never in
/// the middle of one.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Fails with `Error::Cancelled` once the optional token fired.
#[inline]
pub(crate) fn checkpoint(token: &Option<CancelToken>) -> Result<()> {
    match token {
        Some(token) if token.is_cancelled() => Err(Error::Cancelled),
        _ => Ok(()),
    }
}
