// graph_ingest/src/clock.rs
// Time capabilities injected into the consumer, queue and poller.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self,) -> DateTime<Utc,>;
}

/// Suspends the caller. The only blocking points in the pipeline go through this.
#[async_trait]
pub trait Waiter: Send + Sync {
    async fn wait(&self, duration: Duration,);
}

#[derive(Debug, Default, Clone, Copy,)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self,) -> DateTime<Utc,> {
        Utc::now()
    }
}

#[derive(Debug, Default, Clone, Copy,)]
pub struct TokioWaiter;

#[async_trait]
impl Waiter for TokioWaiter {
    async fn wait(&self, duration: Duration,) {
        tokio::time::sleep(duration,).await;
    }
}

/// A clock that only moves when told to.
#[derive(Debug,)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc,>,>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc,>,) -> Self {
        Self {
            now: Mutex::new(start,),
        }
    }

    pub fn advance(&self, by: Duration,) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner(),);
        *now += chrono::Duration::from_std(by,).unwrap_or(chrono::Duration::zero(),);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now(),)
    }
}

impl Clock for ManualClock {
    fn now(&self,) -> DateTime<Utc,> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner(),)
    }
}

/// Records requested waits and advances a shared `ManualClock` instead of sleeping.
#[derive(Debug,)]
pub struct RecordingWaiter {
    clock: std::sync::Arc<ManualClock,>,
    waits: Mutex<Vec<Duration,>,>,
}

impl RecordingWaiter {
    pub fn new(clock: std::sync::Arc<ManualClock,>,) -> Self {
        Self {
            clock,
            waits: Mutex::new(Vec::new(),),
        }
    }

    pub fn waits(&self,) -> Vec<Duration,> {
        self.waits.lock().unwrap_or_else(|e| e.into_inner(),).clone()
    }
}

#[async_trait]
impl Waiter for RecordingWaiter {
    async fn wait(&self, duration: Duration,) {
        self.waits
            .lock()
            .unwrap_or_else(|e| e.into_inner(),)
            .push(duration,);
        self.clock.advance(duration,);
    }
}
