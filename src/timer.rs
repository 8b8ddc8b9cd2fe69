//! Stopwatches behind every trace event.
//!
//! Each project stage owns a [`Timer`]; the trace writer later drains them
//! into Chrome trace events, which is why a stopped timer remembers the
//! identity of the thread that stopped it.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::TimerError;

#[derive(Debug, Default)]
struct Inner {
    start: Option<Instant>,
    end: Option<Instant>,
    stopped_by: Option<String>,
}

/// A write-twice stopwatch: started once, stopped once.
///
/// All methods take `&self`; timers live inside shared `Project` records and
/// are driven from whichever worker thread happens to run the stage.
#[derive(Debug, Default)]
pub struct Timer {
    inner: Mutex<Inner>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the current monotonic time. Starting twice is an error.
    pub fn start(&self) -> Result<(), TimerError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.start.is_some() {
            return Err(TimerError::AlreadyStarted);
        }
        inner.start = Some(Instant::now());
        Ok(())
    }

    /// Records the end time and the identity of the stopping thread.
    pub fn stop(&self) -> Result<(), TimerError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.start.is_none() {
            return Err(TimerError::NotStarted);
        }
        if inner.end.is_some() {
            return Err(TimerError::AlreadyStopped);
        }
        inner.end = Some(Instant::now());
        inner.stopped_by = Some(current_thread_name());
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.inner.lock().unwrap().start.is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().unwrap().end.is_some()
    }

    /// Microseconds between `epoch` and the recorded start, if started.
    pub fn start_us_since(&self, epoch: Instant) -> Option<f64> {
        let inner = self.inner.lock().unwrap();
        inner
            .start
            .map(|start| start.saturating_duration_since(epoch).as_secs_f64() * 1e6)
    }

    /// Elapsed time between start and stop; zero unless both were recorded.
    pub fn duration(&self) -> Duration {
        let inner = self.inner.lock().unwrap();
        let (Some(start), Some(end)) = (inner.start, inner.end) else {
            return Duration::ZERO;
        };
        match end.checked_duration_since(start) {
            Some(elapsed) => elapsed,
            None => {
                tracing::warn!("timer measured a negative interval, clamping to zero");
                Duration::ZERO
            }
        }
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration().as_secs_f64() * 1e3
    }

    pub fn duration_us(&self) -> f64 {
        self.duration().as_secs_f64() * 1e6
    }

    /// Name of the thread that stopped this timer.
    pub fn stopped_by(&self) -> Option<String> {
        self.inner.lock().unwrap().stopped_by.clone()
    }
}

fn current_thread_name() -> String {
    let current = std::thread::current();
    match current.name() {
        Some(name) => name.to_owned(),
        None => format!("{:?}", current.id()),
    }
}
