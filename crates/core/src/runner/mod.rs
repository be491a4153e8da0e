// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Gost Plus - Task Runner Module
// Runs named tasks once or periodically and reports each execution

mod stats;
mod task;

pub use stats::{StatsTask, TASK_UPDATE_STATS};
pub use task::{ExecOptions, Task, TaskEvent, TaskId};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::Result;

/// Capacity of the event channel; further events are dropped until drained
pub const EVENT_CAPACITY: usize = 16;

/// Executor for [`Task`]s keyed by their [`TaskId`]
pub struct Runner {
    /// Active schedules: generation and cancellation token per id
    schedules: Arc<Mutex<HashMap<TaskId, (u64, CancellationToken)>>>,
    generation: AtomicU64,
    /// Background schedules, awaited by [`Runner::stop`]
    handles: Mutex<Vec<JoinHandle<()>>>,
    events_tx: mpsc::Sender<TaskEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<TaskEvent>>>,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        Self {
            schedules: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            handles: Mutex::new(Vec::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Take the receiving end of the event channel. Only the first call
    /// gets it.
    pub fn events(&self) -> Option<mpsc::Receiver<TaskEvent>> {
        self.events_rx.lock().take()
    }

    /// Execute `task` under a child of `parent`.
    ///
    /// In the foreground the task runs to completion and its error is
    /// returned. In the background this returns at once; the task runs
    /// immediately and then every `interval` until cancelled.
    pub async fn exec(
        &self,
        parent: &CancellationToken,
        task: Arc<dyn Task>,
        options: ExecOptions,
    ) -> Result<()> {
        let id = task.id();
        if options.cancel_existing {
            self.cancel(&id);
        }

        let token = parent.child_token();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        self.schedules
            .lock()
            .insert(id.clone(), (generation, token.clone()));

        if !options.background {
            let result = run_once(task.as_ref(), &token, &self.events_tx).await;
            release(&self.schedules, &id, generation);
            return result;
        }

        let schedules = self.schedules.clone();
        let events = self.events_tx.clone();
        let handle = tokio::spawn(async move {
            let _ = run_once(task.as_ref(), &token, &events).await;

            if !options.interval.is_zero() {
                let start = tokio::time::Instant::now() + options.interval;
                let mut ticker = tokio::time::interval_at(start, options.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            let _ = run_once(task.as_ref(), &token, &events).await;
                        }
                    }
                }
            }

            token.cancel();
            release(&schedules, &id, generation);
            debug!("Task {} schedule ended", id);
        });

        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
        Ok(())
    }

    /// Stop the schedule for `id` after its current execution
    pub fn cancel(&self, id: &TaskId) {
        if let Some((_, token)) = self.schedules.lock().remove(id) {
            token.cancel();
            debug!("Task {} cancelled", id);
        }
    }

    /// Stop every schedule
    pub fn cancel_all(&self) {
        for (id, (_, token)) in self.schedules.lock().drain() {
            token.cancel();
            debug!("Task {} cancelled", id);
        }
    }

    /// Cancel every schedule and wait for executions already in progress
    pub async fn stop(&self) {
        self.cancel_all();
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Task schedule ended abnormally: {}", e);
            }
        }
    }

    /// Whether a schedule for `id` is active
    pub fn is_scheduled(&self, id: &TaskId) -> bool {
        self.schedules.lock().contains_key(id)
    }
}

async fn run_once(
    task: &dyn Task,
    token: &CancellationToken,
    events: &mpsc::Sender<TaskEvent>,
) -> Result<()> {
    let id = task.id();
    let started = Instant::now();
    let result = task.run(token.clone()).await;
    debug!("Task {} finished in {:?}", id, started.elapsed());

    let event = TaskEvent {
        task_id: id,
        error: result.as_ref().err().map(|e| e.to_string()),
    };
    if let Err(e) = events.try_send(event) {
        trace!("Task event dropped: {}", e);
    }
    result
}

/// Forget the schedule unless a newer one took over the id
fn release(
    schedules: &Mutex<HashMap<TaskId, (u64, CancellationToken)>>,
    id: &TaskId,
    generation: u64,
) {
    let mut schedules = schedules.lock();
    if matches!(schedules.get(id), Some((g, _)) if *g == generation) {
        schedules.remove(id);
    }
}
