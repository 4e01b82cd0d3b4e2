use std::sync::{Arc, Mutex, MutexGuard};

/// Sub-progress for the active phase, on the finer 0..=1000 scale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detail {
    pub label: String,
    pub value: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub running: bool,
    pub status: String,
    pub percent: u8,
    pub detail: Option<Detail>,
    pub last_error: Option<String>,
}

/// Fired after each unit of work a long pass completes. A test harness
/// subscribes instead of sampling wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepEvent {
    pub pass: &'static str,
    pub item: Option<String>,
}

type StepObserver = Arc<dyn Fn(&StepEvent) + Send + Sync>;

/// One shared status record per engine, polled by the serving layer. There
/// is a single channel, not one per operation; the latest writer wins.
#[derive(Clone, Default)]
pub struct ProgressChannel {
    state: Arc<Mutex<ProgressSnapshot>>,
    observer: Arc<Mutex<Option<StepObserver>>>,
}

impl ProgressChannel {
    pub fn begin(&self, status: &str) {
        let mut state = self.lock_state();
        state.running = true;
        state.status = status.to_string();
        state.percent = 0;
        state.detail = None;
        state.last_error = None;
    }

    pub fn update(&self, status: &str, percent: u8) {
        let mut state = self.lock_state();
        state.status = status.to_string();
        state.percent = percent.min(100);
    }

    pub fn detail(&self, label: &str, value: u16) {
        self.lock_state().detail = Some(Detail {
            label: label.to_string(),
            value: value.min(1000),
        });
    }

    pub fn clear_detail(&self) {
        self.lock_state().detail = None;
    }

    pub fn record_error(&self, context: &str) {
        self.lock_state().last_error = Some(context.to_string());
    }

    pub fn finish(&self, status: &str) {
        let mut state = self.lock_state();
        state.running = false;
        state.status = status.to_string();
        state.percent = 100;
        state.detail = None;
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.lock_state().clone()
    }

    pub fn set_observer(&self, observer: impl Fn(&StepEvent) + Send + Sync + 'static) {
        *self.lock_observer() = Some(Arc::new(observer));
    }

    pub fn step(&self, event: StepEvent) {
        let observer = self.lock_observer().clone();
        if let Some(observer) = observer {
            observer(&event);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ProgressSnapshot> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn lock_observer(&self) -> MutexGuard<'_, Option<StepObserver>> {
        self.observer.lock().unwrap_or_else(|err| err.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn begin_update_finish_cycle() {
        let progress = ProgressChannel::default();
        progress.begin("scanning");
        assert!(progress.snapshot().running);
        assert_eq!(progress.snapshot().percent, 0);

        progress.update("uploading", 40);
        progress.detail("real", 500);
        let snapshot = progress.snapshot();
        assert_eq!(snapshot.status, "uploading");
        assert_eq!(snapshot.percent, 40);
        assert_eq!(
            snapshot.detail,
            Some(Detail {
                label: "real".into(),
                value: 500
            })
        );

        progress.finish("done");
        let snapshot = progress.snapshot();
        assert!(!snapshot.running);
        assert_eq!(snapshot.percent, 100);
        assert!(snapshot.detail.is_none());
    }

    #[test]
    fn percent_and_detail_are_clamped() {
        let progress = ProgressChannel::default();
        progress.begin("x");
        progress.update("x", 250);
        progress.detail("y", 5000);
        let snapshot = progress.snapshot();
        assert_eq!(snapshot.percent, 100);
        assert_eq!(snapshot.detail.map(|d| d.value), Some(1000));
    }

    #[test]
    fn begin_clears_previous_error_context() {
        let progress = ProgressChannel::default();
        progress.record_error("boom");
        assert_eq!(progress.snapshot().last_error.as_deref(), Some("boom"));
        progress.begin("next pass");
        assert!(progress.snapshot().last_error.is_none());
    }

    #[test]
    fn observer_sees_each_step() {
        let progress = ProgressChannel::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        progress.set_observer(move |event| {
            assert_eq!(event.pass, "reconcile");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for i in 0..3 {
            progress.step(StepEvent {
                pass: "reconcile",
                item: Some(format!("item-{i}")),
            });
        }

        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }
}
