//! The polling loop.
//!
//! Every `interval` the poller drains the label search: it pulls pages until
//! the cursor is exhausted and hands each issue to the handler before asking
//! for the next page. A failed page abandons the tick; the next tick starts
//! again from the first page.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::shutdown::ShutdownSignal;
use crate::tracker::{Issue, SearchQuery, Tracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Waiting,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The last page carried no cursor.
    Exhausted,
    /// A page could not be fetched, or the cursor stopped advancing.
    Failed,
    /// Shutdown was requested between pages.
    Interrupted,
}

/// What one drain did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub pages: usize,
    pub issues: usize,
    pub handler_errors: usize,
    pub outcome: DrainOutcome,
}

pub struct Poller {
    tracker: Arc<dyn Tracker>,
    label: String,
    query: SearchQuery,
    interval: Duration,
    shutdown: ShutdownSignal,
    state: PollerState,
}

impl Poller {
    pub fn new(
        tracker: Arc<dyn Tracker>,
        label: &str,
        page_size: u32,
        interval: Duration,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            tracker,
            label: label.to_string(),
            query: SearchQuery::for_label(label, page_size),
            interval,
            shutdown,
            state: PollerState::Waiting,
        }
    }

    pub const fn state(&self) -> PollerState {
        self.state
    }

    /// Fetch every page of the label search once, calling `handler` for each
    /// issue in order. Handler errors are logged and counted; they do not
    /// stop the drain.
    pub fn drain<H>(&mut self, handler: &mut H) -> DrainReport
    where
        H: FnMut(&Issue) -> anyhow::Result<()>,
    {
        self.state = PollerState::Draining;
        let mut report = DrainReport {
            pages: 0,
            issues: 0,
            handler_errors: 0,
            outcome: DrainOutcome::Exhausted,
        };
        let mut cursor: Option<String> = None;

        loop {
            let page = match self.tracker.search(&self.query.at_page(cursor.clone())) {
                Ok(page) => page,
                Err(e) => {
                    error!(label = %self.label, page = report.pages + 1, error = %e, "failed to search issues");
                    report.outcome = DrainOutcome::Failed;
                    break;
                }
            };
            report.pages += 1;

            for issue in &page.issues {
                report.issues += 1;
                if let Err(e) = handler(issue) {
                    report.handler_errors += 1;
                    error!(key = %issue.key, error = %format!("{e:#}"), "failed to process issue");
                }
            }

            let Some(next) = page.next_cursor() else {
                break;
            };
            if cursor.as_deref() == Some(next) {
                warn!(token = next, "search cursor did not advance, abandoning tick");
                report.outcome = DrainOutcome::Failed;
                break;
            }
            if self.shutdown.is_triggered() {
                report.outcome = DrainOutcome::Interrupted;
                break;
            }
            cursor = Some(next.to_string());
        }

        self.state = if self.shutdown.is_triggered() {
            PollerState::Stopped
        } else {
            PollerState::Waiting
        };
        report
    }

    /// Wait an interval, drain, repeat until shutdown.
    pub fn run<H>(&mut self, mut handler: H)
    where
        H: FnMut(&Issue) -> anyhow::Result<()>,
    {
        info!(
            label = %self.label,
            interval_secs = self.interval.as_secs_f64(),
            "starting poller"
        );
        while self.state != PollerState::Stopped {
            if self.shutdown.wait_timeout(self.interval) {
                self.state = PollerState::Stopped;
                break;
            }
            let report = self.drain(&mut handler);
            debug!(
                pages = report.pages,
                issues = report.issues,
                handler_errors = report.handler_errors,
                outcome = ?report.outcome,
                "drain finished"
            );
        }
        info!("poller stopped");
    }
}
