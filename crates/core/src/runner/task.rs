// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Task identity and the interface the runner executes

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Identity of a scheduled task
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(Cow<'static, str>);

impl TaskId {
    pub const fn from_static(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(Cow::Owned(id))
    }
}

impl From<&'static str> for TaskId {
    fn from(id: &'static str) -> Self {
        Self::from_static(id)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unit of work run by the [`Runner`](super::Runner)
#[async_trait]
pub trait Task: Send + Sync + 'static {
    fn id(&self) -> TaskId;

    /// One execution. `token` is cancelled when the schedule is cancelled;
    /// the runner never interrupts a running execution itself.
    async fn run(&self, token: CancellationToken) -> Result<()>;
}

/// How [`Runner::exec`](super::Runner::exec) schedules a task
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Run in the background and return immediately
    pub background: bool,
    /// Repeat at this rate after the first run; zero runs once
    pub interval: Duration,
    /// Cancel an existing schedule with the same id first
    pub cancel_existing: bool,
}

impl ExecOptions {
    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn cancel_existing(mut self, cancel_existing: bool) -> Self {
        self.cancel_existing = cancel_existing;
        self
    }
}

/// Published after every execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub error: Option<String>,
}
