use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

// One process-wide elapsed clock shared by all action slots. Engaged when the
// first job starts, reset once every slot is idle again. The clock only
// accumulates while at least one job is running un-paused, so pausing the
// last active job freezes the display.
#[derive(Clone)]
pub struct SharedTimer {
    inner: Arc<Mutex<TimerInner>>,
}

struct TimerInner {
    engaged: bool,
    accumulated: Duration,
    ticking_since: Option<Instant>,
}

impl SharedTimer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TimerInner {
                engaged: false,
                accumulated: Duration::ZERO,
                ticking_since: None,
            })),
        }
    }

    // Reconcile the clock with the slot table: `any_job` is true while any
    // slot is occupied, `any_active` while any occupant is not paused.
    pub fn apply(&self, any_job: bool, any_active: bool) {
        let mut g = self.inner.lock().unwrap();
        if !any_job {
            g.engaged = false;
            g.accumulated = Duration::ZERO;
            g.ticking_since = None;
            return;
        }
        g.engaged = true;
        if any_active {
            if g.ticking_since.is_none() {
                g.ticking_since = Some(Instant::now());
            }
        } else if let Some(t0) = g.ticking_since.take() {
            g.accumulated += t0.elapsed();
        }
    }

    pub fn is_engaged(&self) -> bool {
        self.inner.lock().unwrap().engaged
    }

    pub fn elapsed(&self) -> Duration {
        let g = self.inner.lock().unwrap();
        match g.ticking_since {
            Some(t0) => g.accumulated + t0.elapsed(),
            None => g.accumulated,
        }
    }

    pub fn display(&self) -> String {
        format_hms(self.elapsed().as_secs())
    }
}

impl Default for SharedTimer {
    fn default() -> Self {
        Self::new()
    }
}

pub fn format_hms(total_secs: u64) -> String {
    let h = total_secs / 3600;
    let m = (total_secs % 3600) / 60;
    let s = total_secs % 60;
    format!("{h:02}:{m:02}:{s:02}")
}
