//! One-shot and repeating timers on the tokio runtime
//!
//! Each timer runs its callback on a runtime worker, concurrently with the
//! receive loop and with other timers. A [`TimerHandle`] cancels the timer;
//! its [`TimerId`] lets a callback check that it is still the timer its
//! target expects, so an expiry that races a cancellation is a no-op.

use crate::error::{NwpdError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::trace;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique timer identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

impl TimerId {
    fn next() -> Self {
        Self(NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Cancellation handle for a scheduled timer
#[derive(Debug)]
pub struct TimerHandle {
    id: TimerId,
    task: AbortHandle,
}

impl TimerHandle {
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Stop the timer; a callback already running completes
    pub fn cancel(&self) {
        trace!(timer = self.id.0, "Cancelling timer");
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[derive(Debug, Clone)]
pub struct TimerService {
    runtime: Handle,
}

impl TimerService {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Timer service on the runtime the caller is running in
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| NwpdError::Config(format!("no tokio runtime: {}", e)))
    }

    /// Run `f` once after `delay`
    pub fn once<F>(&self, delay: Duration, f: F) -> TimerHandle
    where
        F: FnOnce(TimerId) + Send + 'static,
    {
        let id = TimerId::next();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            f(id);
        });
        TimerHandle {
            id,
            task: task.abort_handle(),
        }
    }

    /// Run `f` every `period`, first after one full period
    pub fn repeating<F>(&self, period: Duration, f: F) -> TimerHandle
    where
        F: Fn() + Send + 'static,
    {
        let id = TimerId::next();
        let task = self.runtime.spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                f();
            }
        });
        TimerHandle {
            id,
            task: task.abort_handle(),
        }
    }
}
