//! Bounded worker pool for dispatch jobs, and the in-memory record of what
//! each worker did.
//!
//! Jobs queue in an unbounded channel; at most `size` agents run at once.
//! Shutting the pool down closes the queue and joins the workers, so queued
//! jobs still run and running agents are awaited rather than killed.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{DispatchOutcome, Dispatcher, Job};
use crate::tracker::IssueKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchState {
    Queued,
    Running,
    Finished(DispatchOutcome),
}

#[derive(Debug, Clone)]
pub struct DispatchRecord {
    pub state: DispatchState,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Issue key → dispatch record, shared by the pool and its workers.
/// Lives only as long as the process.
#[derive(Debug, Clone, Default)]
pub struct DispatchRegistry {
    records: Arc<Mutex<HashMap<IssueKey, DispatchRecord>>>,
}

impl DispatchRegistry {
    fn update<F: FnOnce(&mut HashMap<IssueKey, DispatchRecord>)>(&self, f: F) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut records);
    }

    fn queued(&self, key: &IssueKey) {
        self.update(|records| {
            records.insert(
                key.clone(),
                DispatchRecord {
                    state: DispatchState::Queued,
                    queued_at: Utc::now(),
                    started_at: None,
                    finished_at: None,
                },
            );
        });
    }

    fn started(&self, key: &IssueKey) {
        self.update(|records| {
            if let Some(record) = records.get_mut(key) {
                record.state = DispatchState::Running;
                record.started_at = Some(Utc::now());
            }
        });
    }

    fn finished(&self, key: &IssueKey, outcome: DispatchOutcome) {
        self.update(|records| {
            if let Some(record) = records.get_mut(key) {
                record.state = DispatchState::Finished(outcome);
                record.finished_at = Some(Utc::now());
            }
        });
    }

    /// Number of jobs queued or running.
    pub fn in_flight(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| !matches!(r.state, DispatchState::Finished(_)))
            .count()
    }

    /// All records, sorted by issue key.
    pub fn snapshot(&self) -> Vec<(IssueKey, DispatchRecord)> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = records.iter().map(|(k, r)| (k.clone(), r.clone())).collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

pub struct DispatchPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    registry: DispatchRegistry,
}

impl DispatchPool {
    /// Start `size` worker threads (at least one) running `dispatcher`.
    pub fn start(size: usize, dispatcher: Dispatcher) -> anyhow::Result<Self> {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let dispatcher = Arc::new(dispatcher);
        let registry = DispatchRegistry::default();

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let receiver = Arc::clone(&receiver);
            let dispatcher = Arc::clone(&dispatcher);
            let registry = registry.clone();
            let handle = thread::Builder::new()
                .name(format!("dispatch-{id}"))
                .spawn(move || worker_loop(id, &receiver, &dispatcher, &registry))
                .context("spawning dispatch worker")?;
            workers.push(handle);
        }
        debug!(workers = size, "dispatch pool started");

        Ok(Self {
            sender: Some(sender),
            workers,
            registry,
        })
    }

    /// Queue a job. Never blocks on running agents.
    pub fn submit(&self, job: Job) -> anyhow::Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("dispatch pool is shut down"))?;
        self.registry.queued(&job.issue.key);
        sender
            .send(job)
            .map_err(|e| anyhow!("dispatch workers have exited; dropped {}", e.0.issue.key))
    }

    pub fn registry(&self) -> &DispatchRegistry {
        &self.registry
    }

    /// Stop accepting jobs and wait for every queued and running job.
    pub fn shutdown(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        let in_flight = self.registry.in_flight();
        if in_flight > 0 {
            info!(in_flight, "waiting for dispatched agents to finish");
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("dispatch worker panicked");
            }
        }
        self.log_summary();
    }

    /// One line per dispatch made by this process, then totals.
    fn log_summary(&self) {
        let records = self.registry.snapshot();
        let mut completed = 0;
        for (key, record) in &records {
            let DispatchState::Finished(outcome) = &record.state else {
                warn!(key = %key, state = ?record.state, "dispatch never finished");
                continue;
            };
            if *outcome == DispatchOutcome::Completed {
                completed += 1;
            }
            let seconds = record
                .started_at
                .zip(record.finished_at)
                .map(|(start, end)| (end - start).num_seconds());
            info!(
                key = %key,
                outcome = ?outcome,
                queued_at = %record.queued_at,
                run_secs = ?seconds,
                "dispatch finished"
            );
        }
        info!(
            dispatched = records.len(),
            completed,
            failed = records.len() - completed,
            "dispatch summary"
        );
    }
}

impl Drop for DispatchPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    id: usize,
    receiver: &Mutex<Receiver<Job>>,
    dispatcher: &Dispatcher,
    registry: &DispatchRegistry,
) {
    loop {
        let next = receiver.lock().unwrap_or_else(PoisonError::into_inner).recv();
        let Ok(job) = next else {
            debug!(worker = id, "dispatch queue closed");
            break;
        };
        registry.started(&job.issue.key);
        let outcome = dispatcher.run(&job);
        registry.finished(&job.issue.key, outcome);
    }
}
