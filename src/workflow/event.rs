use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info};

/// What a state reports while it runs.
///
/// `Entered` and `Completed` bracket a successful state. A failing state
/// emits `Entered` then `Errored` and never `Completed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Entered { state: String },
    Progress { state: String, message: String },
    Completed { state: String, elapsed: Duration },
    Errored { state: String, error: String },
}

impl Event {
    pub fn state(&self) -> &str {
        match self {
            Event::Entered { state }
            | Event::Progress { state, .. }
            | Event::Completed { state, .. }
            | Event::Errored { state, .. } => state,
        }
    }

    pub fn is_entry(&self) -> bool {
        matches!(self, Event::Entered { .. })
    }

    pub fn is_exit(&self) -> bool {
        matches!(self, Event::Completed { .. })
    }
}

/// Receives every event of the states it is subscribed to, in order, on
/// the task that runs the state.
pub trait Observer: Send + Sync {
    fn update(&self, event: &Event);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl Observer for LoggingObserver {
    fn update(&self, event: &Event) {
        match event {
            Event::Entered { state } => info!("[{}] started", state),
            Event::Progress { state, message } => info!("[{}] {}", state, message),
            Event::Completed { state, elapsed } => {
                info!("[{}] finished in {:.1}s", state, elapsed.as_secs_f64());
            }
            Event::Errored { state, error } => error!("[{}] failed: {}", state, error),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StateMetrics {
    pub entered: u32,
    pub completed: u32,
    pub errored: u32,
    pub progress: u32,
    pub total_time: Duration,
}

/// Per-state counters and accumulated run time.
#[derive(Debug, Default)]
pub struct MetricsObserver {
    states: Mutex<BTreeMap<String, StateMetrics>>,
}

impl MetricsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, state: &str) -> Option<StateMetrics> {
        self.states.lock().get(state).copied()
    }

    pub fn snapshot(&self) -> BTreeMap<String, StateMetrics> {
        self.states.lock().clone()
    }
}

impl Observer for MetricsObserver {
    fn update(&self, event: &Event) {
        let mut states = self.states.lock();
        let metrics = states.entry(event.state().to_string()).or_default();
        match event {
            Event::Entered { .. } => metrics.entered += 1,
            Event::Progress { .. } => metrics.progress += 1,
            Event::Completed { elapsed, .. } => {
                metrics.completed += 1;
                metrics.total_time += *elapsed;
            }
            Event::Errored { .. } => metrics.errored += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_accumulate() {
        let metrics = MetricsObserver::new();
        let init = || "init".to_string();
        metrics.update(&Event::Entered { state: init() });
        metrics.update(&Event::Progress {
            state: init(),
            message: "working".into(),
        });
        metrics.update(&Event::Completed {
            state: init(),
            elapsed: Duration::from_millis(250),
        });
        metrics.update(&Event::Entered { state: "stop".into() });
        metrics.update(&Event::Errored {
            state: "stop".into(),
            error: "boom".into(),
        });

        let init = metrics.get("init").unwrap();
        assert_eq!((init.entered, init.completed, init.progress), (1, 1, 1));
        assert_eq!(init.total_time, Duration::from_millis(250));
        let stop = metrics.get("stop").unwrap();
        assert_eq!((stop.entered, stop.completed, stop.errored), (1, 0, 1));
        assert_eq!(metrics.snapshot().len(), 2);
    }

    #[test]
    fn test_exit_is_only_completion() {
        let errored = Event::Errored {
            state: "x".into(),
            error: "e".into(),
        };
        assert!(!errored.is_exit());
        assert!(!errored.is_entry());
        assert!(Event::Entered { state: "x".into() }.is_entry());
    }
}
