/// Elapsed time between two epoch-millisecond timestamps as `m:ss`, or
/// `h:mm:ss` once an hour has passed.
pub fn elapsed(start_ms: i64, now_ms: i64) -> String {
    let seconds = (now_ms - start_ms).max(0) / 1000;
    let minutes = seconds / 60;
    let hours = minutes / 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes % 60, seconds % 60)
    } else {
        format!("{}:{:02}", minutes, seconds % 60)
    }
}

/// Stopwatch for a whole workout run. Holds only its start time; every
/// reading is recomputed from the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionClock {
    start_ms: i64,
}

impl SessionClock {
    pub fn started_at(start_ms: i64) -> Self {
        Self { start_ms }
    }

    pub fn start_ms(&self) -> i64 {
        self.start_ms
    }

    pub fn display(&self, now_ms: i64) -> String {
        elapsed(self.start_ms, now_ms)
    }

    /// Whole minutes for the completion record; at least one once any
    /// time has passed.
    pub fn duration_minutes(&self, now_ms: i64) -> Option<u32> {
        let elapsed_ms = now_ms - self.start_ms;
        if elapsed_ms <= 0 {
            return None;
        }
        Some(((elapsed_ms / 60_000) as u32).max(1))
    }
}
