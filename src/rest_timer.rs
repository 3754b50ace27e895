//! Per-exercise rest countdowns.
//!
//! Remaining time is never accumulated by counting ticks. Every query derives
//! it from the timer's start timestamp and the current wall clock, so a
//! process that was suspended for a minute reads the right value on its very
//! first call after waking up.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use tracing::{debug, info};

pub const DEFAULT_REST_SECONDS: u32 = 60;

lazy_static! {
    static ref FIRST_INTEGER: Regex = Regex::new(r"\d+").unwrap();
}

/// Seconds encoded in a free-form rest string such as `"90s"` or `"2 min"`.
///
/// Only the first run of digits is read; units are ignored. Anything without
/// a usable positive integer falls back to [`DEFAULT_REST_SECONDS`].
pub fn parse_rest_duration(raw: Option<&str>) -> u32 {
    raw.and_then(|s| FIRST_INTEGER.find(s))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_REST_SECONDS)
}

/// `max(0, total - floor((now - start) / 1000))`. A clock that moved
/// backwards counts as no time elapsed.
pub fn remaining_seconds(start_ms: i64, total_seconds: u32, now_ms: i64) -> u32 {
    let elapsed = (now_ms - start_ms).max(0) / 1000;
    (total_seconds as i64 - elapsed).max(0) as u32
}

pub fn format_rest_time(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestTimerState {
    pub total_seconds: u32,
    pub start_ms: Option<i64>,
    pub active: bool,
}

impl RestTimerState {
    pub fn remaining(&self, now_ms: i64) -> u32 {
        match self.start_ms {
            Some(start) => remaining_seconds(start, self.total_seconds, now_ms),
            None => self.total_seconds,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestPress {
    Started(u32),
    Reset(u32),
}

/// Result of recomputing every active timer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestTick {
    pub remaining: Vec<(String, u32)>,
    /// Timers that reached zero during this recompute. Each countdown shows
    /// up here exactly once.
    pub completed: Vec<String>,
}

#[derive(Debug, Default)]
pub struct RestTimers {
    timers: HashMap<String, RestTimerState>,
}

impl RestTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, exercise_id: &str, total_seconds: u32, now_ms: i64) {
        info!("Rest timer started for {} ({}s)", exercise_id, total_seconds);
        self.timers.insert(
            exercise_id.to_string(),
            RestTimerState {
                total_seconds,
                start_ms: Some(now_ms),
                active: true,
            },
        );
    }

    pub fn reset(&mut self, exercise_id: &str, total_seconds: u32) {
        debug!("Rest timer reset for {} ({}s)", exercise_id, total_seconds);
        self.timers.insert(
            exercise_id.to_string(),
            RestTimerState {
                total_seconds,
                start_ms: None,
                active: false,
            },
        );
    }

    /// The single Start/Reset control: resets a running timer, otherwise
    /// starts one from the parsed rest time.
    pub fn press(&mut self, exercise_id: &str, raw_rest: Option<&str>, now_ms: i64) -> RestPress {
        let total = parse_rest_duration(raw_rest);
        if self.is_active(exercise_id) {
            self.reset(exercise_id, total);
            RestPress::Reset(total)
        } else {
            self.start(exercise_id, total, now_ms);
            RestPress::Started(total)
        }
    }

    /// Applies an edited rest time. Only a shorter duration resets the timer;
    /// returns whether it did.
    pub fn sync_total(&mut self, exercise_id: &str, total_seconds: u32) -> bool {
        match self.timers.get(exercise_id) {
            Some(state) if total_seconds < state.total_seconds => {
                self.reset(exercise_id, total_seconds);
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&self, exercise_id: &str) -> bool {
        self.timers
            .get(exercise_id)
            .map(|t| t.active)
            .unwrap_or(false)
    }

    pub fn get(&self, exercise_id: &str) -> Option<&RestTimerState> {
        self.timers.get(exercise_id)
    }

    pub fn remaining(&self, exercise_id: &str, now_ms: i64) -> Option<u32> {
        self.timers.get(exercise_id).map(|t| t.remaining(now_ms))
    }

    pub fn has_active(&self) -> bool {
        self.timers.values().any(|t| t.active)
    }

    pub fn tick(&mut self, now_ms: i64) -> RestTick {
        let mut tick = RestTick::default();
        for (id, state) in self.timers.iter_mut().filter(|(_, t)| t.active) {
            let remaining = state.remaining(now_ms);
            if remaining == 0 {
                state.active = false;
                tick.completed.push(id.clone());
            }
            tick.remaining.push((id.clone(), remaining));
        }
        tick.remaining.sort();
        tick.completed.sort();
        tick
    }

    /// Recompute right away after the host comes back from suspension.
    pub fn resume(&mut self, now_ms: i64) -> RestTick {
        self.tick(now_ms)
    }

    /// Drops every timer; used when the session view unmounts.
    pub fn clear(&mut self) {
        self.timers.clear();
    }
}

/// Best-effort "rest is over" affordance.
pub trait RestNotifier: Send + Sync {
    fn rest_complete(&self, exercise_id: &str) -> anyhow::Result<()>;
}

/// Rings the terminal bell.
#[derive(Debug, Default)]
pub struct TerminalBell;

impl RestNotifier for TerminalBell {
    fn rest_complete(&self, exercise_id: &str) -> anyhow::Result<()> {
        info!("Rest complete for {}", exercise_id);
        let mut out = std::io::stdout();
        out.write_all(b"\x07")?;
        out.flush()?;
        Ok(())
    }
}

/// Notifies for each completed timer, swallowing sink failures.
pub fn notify_completed(notifier: &dyn RestNotifier, completed: &[String]) {
    for id in completed {
        if let Err(e) = notifier.rest_complete(id) {
            debug!("Rest notification for {} unavailable: {}", id, e);
        }
    }
}
