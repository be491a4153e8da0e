// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Gost Plus - Service Lifecycle
// Run state, favorite flag, stats and owned forwarding services of one instance

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::forward::ForwardService;
use crate::stats::{CounterSnapshot, ServiceStats};

const CONSTRUCTED: u8 = 0;
const RUNNING: u8 = 1;
const CLOSED: u8 = 2;

/// Run state of a tunnel or entrypoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Never run
    Constructed,
    Running,
    /// Terminal for this instance
    Closed,
}

/// State shared between an instance and its serve loops
pub struct Lifecycle {
    name: String,
    state: AtomicU8,
    favorite: AtomicBool,
    stats: RwLock<ServiceStats>,
    last_error: RwLock<Option<String>>,
    /// In dependency order; closed in reverse
    handles: Mutex<Vec<Arc<dyn ForwardService>>>,
    closed_error: fn() -> Error,
}

impl Lifecycle {
    pub(crate) fn new(name: String, closed_error: fn() -> Error) -> Arc<Self> {
        Arc::new(Self {
            name,
            state: AtomicU8::new(CONSTRUCTED),
            favorite: AtomicBool::new(false),
            stats: RwLock::new(ServiceStats::default()),
            last_error: RwLock::new(None),
            handles: Mutex::new(Vec::new()),
            closed_error,
        })
    }

    /// Carry favorite flag and stats over from a previous instance
    pub(crate) fn inherit(&self, previous: &Lifecycle) {
        self.set_favorite(previous.is_favorite());
        self.set_stats(previous.stats());
    }

    pub fn state(&self) -> State {
        match self.state.load(Ordering::SeqCst) {
            CONSTRUCTED => State::Constructed,
            RUNNING => State::Running,
            _ => State::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == State::Closed
    }

    pub fn set_favorite(&self, favorite: bool) {
        self.favorite.store(favorite, Ordering::SeqCst);
    }

    pub fn is_favorite(&self) -> bool {
        self.favorite.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ServiceStats {
        self.stats.read().clone()
    }

    pub fn set_stats(&self, stats: ServiceStats) {
        *self.stats.write() = stats;
    }

    /// Last run or serve error
    pub fn err(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn set_err(&self, err: Option<String>) {
        *self.last_error.write() = err;
    }

    /// Live counters of the outermost owned service, while running
    pub fn counters(&self) -> Option<CounterSnapshot> {
        if self.state() != State::Running {
            return None;
        }
        self.handles.lock().iter().rev().find_map(|h| h.counters())
    }

    /// Build the services with `build` and start serving them.
    ///
    /// Fails without building when the instance is already closed or running.
    /// A build error is recorded and the instance stays not running.
    pub(crate) async fn launch<F>(self: &Arc<Self>, build: F) -> Result<()>
    where
        F: Future<Output = Result<Vec<Arc<dyn ForwardService>>>> + Send,
    {
        match self.state() {
            State::Closed => return Err((self.closed_error)()),
            State::Running => return Err(Error::AlreadyRunning(self.name.clone())),
            State::Constructed => {}
        }

        let services = match build.await {
            Ok(services) => services,
            Err(e) => {
                warn!("Failed to start {}: {}", self.name, e);
                self.set_err(Some(e.to_string()));
                return Err(e);
            }
        };

        {
            let mut handles = self.handles.lock();
            if let Err(actual) = self.state.compare_exchange(
                CONSTRUCTED,
                RUNNING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                drop(handles);
                // Closed or started by someone else while we were building
                for service in services.iter().rev() {
                    let _ = service.close();
                }
                return Err(if actual == CLOSED {
                    (self.closed_error)()
                } else {
                    Error::AlreadyRunning(self.name.clone())
                });
            }
            *handles = services.clone();
        }
        self.set_err(None);

        for service in services {
            let core = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = service.serve().await {
                    if core.is_closed() {
                        debug!("{} stopped: {}", core.name, e);
                    } else {
                        warn!("{} serve error: {}", core.name, e);
                    }
                    core.set_err(Some(e.to_string()));
                }
            });
        }

        info!("{} running", self.name);
        Ok(())
    }

    /// Trip the closed state and close owned services, last built first.
    ///
    /// Returns the first close error. Later calls do nothing.
    pub fn close(&self) -> Result<()> {
        if self.state.swap(CLOSED, Ordering::SeqCst) == CLOSED {
            return Ok(());
        }

        let handles = std::mem::take(&mut *self.handles.lock());
        let mut first_err = None;
        for handle in handles.iter().rev() {
            if let Err(e) = handle.close() {
                warn!("Failed to close service of {}: {}", self.name, e);
                first_err.get_or_insert(e);
            }
        }

        info!("{} closed", self.name);
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
