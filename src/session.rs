//! One workout run, from mount to commit or exit.
//!
//! ```text
//! InProgress -> ConfirmingCompletion -> Committing -> Completed
//!      |                 |
//!      +-----------------+--> Exited
//! ```
//!
//! Transitions are plain methods on [`SessionController`]; the HTTP layer
//! only forwards events and renders [`SessionView`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::auth::SessionContext;
use crate::autosave::{AutoSaveScheduler, SaveSink};
use crate::clock::Clock;
use crate::config::SessionTiming;
use crate::models::{CompletionRecord, Exercise, PerformedExercise, Workout};
use crate::rest_timer::{
    format_rest_time, notify_completed, parse_rest_duration, RestNotifier, RestPress, RestTick,
    RestTimers,
};
use crate::session_clock::SessionClock;
use crate::store::WorkoutStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    InProgress,
    ConfirmingCompletion,
    Committing,
    Completed,
    Exited,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Exited)
    }
}

/// What the caller should do with the session view after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionSignal {
    Stay,
    LeaveView,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("exercise {0} is not part of this session")]
    UnknownExercise(String),
    #[error("complete at least one exercise before finishing the workout")]
    NothingCompleted,
    #[error("completion has not been requested")]
    NotConfirming,
    #[error("session is already {0:?}")]
    SessionClosed(SessionState),
    #[error("failed to save workout: {0}")]
    Persistence(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExerciseField {
    Name,
    Reps,
    Weight,
    RestTime,
    Notes,
    Adjustment,
    Description,
}

/// Live state of one exercise during a run. `planned` holds the last
/// persisted values; the `actual_*` fields shadow them until saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseState {
    pub planned: Exercise,
    pub actual_name: String,
    pub actual_reps: String,
    pub actual_weight: Option<String>,
    pub rest_time: Option<String>,
    pub notes: Option<String>,
    pub adjustment: Option<String>,
    pub description: Option<String>,
    pub completed: bool,
    pub current_sets: u32,
    pub editing: bool,
}

impl ExerciseState {
    fn new(planned: Exercise) -> Self {
        let mut state = Self {
            planned: planned.clone(),
            actual_name: String::new(),
            actual_reps: String::new(),
            actual_weight: None,
            rest_time: None,
            notes: None,
            adjustment: None,
            description: None,
            completed: false,
            current_sets: 0,
            editing: false,
        };
        state.revert_to(planned);
        state
    }

    pub fn id(&self) -> &str {
        &self.planned.id
    }

    /// Actual values win over planned ones unless left blank.
    pub fn resolved(&self) -> Exercise {
        Exercise {
            id: self.planned.id.clone(),
            name: non_blank(&self.actual_name).unwrap_or_else(|| self.planned.name.clone()),
            sets: self.planned.sets,
            reps: non_blank(&self.actual_reps).unwrap_or_else(|| self.planned.reps.clone()),
            weight: self
                .actual_weight
                .as_deref()
                .and_then(non_blank)
                .or_else(|| self.planned.weight.clone()),
            rest_time: self.rest_time.clone(),
            notes: self.notes.clone(),
            adjustment: self.adjustment.clone(),
            description: self.description.clone(),
        }
    }

    fn revert_to(&mut self, baseline: Exercise) {
        self.actual_name = baseline.name.clone();
        self.actual_reps = baseline.reps.clone();
        self.actual_weight = baseline.weight.clone();
        self.rest_time = baseline.rest_time.clone();
        self.notes = baseline.notes.clone();
        self.adjustment = baseline.adjustment.clone();
        self.description = baseline.description.clone();
        self.planned = baseline;
    }

    fn apply(&mut self, field: ExerciseField, value: String) {
        match field {
            ExerciseField::Name => self.actual_name = value,
            ExerciseField::Reps => self.actual_reps = value,
            ExerciseField::Weight => self.actual_weight = non_blank(&value),
            ExerciseField::RestTime => self.rest_time = non_blank(&value),
            ExerciseField::Notes => self.notes = non_blank(&value),
            ExerciseField::Adjustment => self.adjustment = non_blank(&value),
            ExerciseField::Description => self.description = non_blank(&value),
        }
    }

    fn performed(&self) -> PerformedExercise {
        let resolved = self.resolved();
        PerformedExercise {
            exercise_id: resolved.id,
            name: resolved.name,
            sets: resolved.sets,
            sets_completed: self.current_sets,
            reps: resolved.reps,
            weight: resolved.weight,
            rest_time: resolved.rest_time,
            notes: resolved.notes,
            adjustment: resolved.adjustment,
            description: resolved.description,
        }
    }
}

fn non_blank(value: &str) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Writes one edited exercise at a time and remembers what was last
/// persisted, which is what "discard" reverts to.
///
/// The store replaces a workout's whole list, so each write is the persisted
/// baseline with only the edited exercise swapped in. Edits still sitting in
/// other exercises' debounce windows never ride along.
pub struct ExerciseSaveSink {
    store: Arc<dyn WorkoutStore>,
    workout_id: String,
    persisted: Arc<Mutex<Vec<Exercise>>>,
}

#[async_trait]
impl SaveSink<Exercise> for ExerciseSaveSink {
    async fn save(&self, entity_id: &str, edited: Exercise) -> anyhow::Result<()> {
        // Held across the write so baseline updates apply in order.
        let mut persisted = self.persisted.lock().await;
        let mut exercises = persisted.clone();
        match exercises.iter_mut().find(|ex| ex.id == edited.id) {
            Some(slot) => *slot = edited,
            None => exercises.push(edited),
        }
        self.store
            .replace_exercises(&self.workout_id, exercises.clone())
            .await?;
        *persisted = exercises;
        tracing::debug!("Persisted exercise list after edit to {}", entity_id);
        Ok(())
    }
}

/// Collaborators a session is constructed with.
#[derive(Clone)]
pub struct SessionDeps {
    pub store: Arc<dyn WorkoutStore>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn RestNotifier>,
    pub timing: SessionTiming,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitOutcome {
    pub signal: SessionSignal,
    /// Set when the final write failed; the session is torn down regardless.
    pub save_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseView {
    pub exercise: Exercise,
    pub completed: bool,
    pub current_sets: u32,
    pub editing: bool,
    pub rest_remaining: u32,
    pub rest_display: String,
    pub rest_active: bool,
    pub saved: bool,
    pub save_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub workout_id: String,
    pub workout_name: String,
    pub user_id: String,
    pub state: SessionState,
    pub elapsed: String,
    pub completed: usize,
    pub total: usize,
    pub progress_percent: f64,
    pub can_complete: bool,
    pub last_error: Option<String>,
    pub exercises: Vec<ExerciseView>,
}

pub struct SessionController {
    context: SessionContext,
    workout: Workout,
    exercises: Vec<ExerciseState>,
    state: SessionState,
    clock: SessionClock,
    rest: RestTimers,
    saves: AutoSaveScheduler<Exercise>,
    persisted: Arc<Mutex<Vec<Exercise>>>,
    deps: SessionDeps,
    last_error: Option<String>,
}

impl SessionController {
    pub fn start(context: SessionContext, workout: Workout, deps: SessionDeps) -> Self {
        let persisted = Arc::new(Mutex::new(workout.exercises.clone()));

        let sink = Arc::new(ExerciseSaveSink {
            store: deps.store.clone(),
            workout_id: workout.id.clone(),
            persisted: persisted.clone(),
        });
        let saves = AutoSaveScheduler::new(sink, deps.timing.saved_marker);

        info!(
            "Starting session for workout {} ({} exercises, user {})",
            workout.id,
            workout.exercises.len(),
            context.user_id
        );

        Self {
            exercises: workout
                .exercises
                .iter()
                .cloned()
                .map(ExerciseState::new)
                .collect(),
            clock: SessionClock::started_at(deps.clock.now_ms()),
            context,
            workout,
            state: SessionState::InProgress,
            rest: RestTimers::new(),
            saves,
            persisted,
            deps,
            last_error: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn exercises(&self) -> &[ExerciseState] {
        &self.exercises
    }

    pub fn exercise(&self, exercise_id: &str) -> Result<&ExerciseState, SessionError> {
        let idx = self.index_of(exercise_id)?;
        Ok(&self.exercises[idx])
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn completed_count(&self) -> usize {
        self.exercises.iter().filter(|ex| ex.completed).count()
    }

    pub fn can_complete(&self) -> bool {
        !self.state.is_terminal() && self.completed_count() > 0
    }

    pub fn elapsed_display(&self) -> String {
        self.clock.display(self.deps.clock.now_ms())
    }

    pub fn resolved_exercises(&self) -> Vec<Exercise> {
        self.exercises.iter().map(ExerciseState::resolved).collect()
    }

    fn index_of(&self, exercise_id: &str) -> Result<usize, SessionError> {
        self.exercises
            .iter()
            .position(|ex| ex.id() == exercise_id)
            .ok_or_else(|| SessionError::UnknownExercise(exercise_id.to_string()))
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.state.is_terminal() {
            return Err(SessionError::SessionClosed(self.state));
        }
        Ok(())
    }

    // ── Completion flags ─────────────────────────────────────────────

    pub fn toggle_exercise_complete(
        &mut self,
        exercise_id: &str,
    ) -> Result<&ExerciseState, SessionError> {
        self.ensure_open()?;
        let idx = self.index_of(exercise_id)?;
        let exercise = &mut self.exercises[idx];
        exercise.completed = !exercise.completed;
        exercise.current_sets = if exercise.completed {
            exercise.planned.sets
        } else {
            0
        };
        Ok(&self.exercises[idx])
    }

    // ── Completion protocol ──────────────────────────────────────────

    pub fn request_completion(&mut self) -> Result<SessionState, SessionError> {
        self.ensure_open()?;
        if self.state == SessionState::Committing {
            return Err(SessionError::NotConfirming);
        }
        if self.completed_count() == 0 {
            return Err(SessionError::NothingCompleted);
        }
        self.state = SessionState::ConfirmingCompletion;
        Ok(self.state)
    }

    pub fn cancel_completion(&mut self) -> Result<SessionState, SessionError> {
        self.ensure_open()?;
        if self.state == SessionState::ConfirmingCompletion {
            self.state = SessionState::InProgress;
        }
        Ok(self.state)
    }

    /// Persists the edited exercises, the completion record and the counter.
    /// Any failure leaves the session waiting for confirmation with its
    /// in-memory state intact.
    pub async fn confirm_completion(&mut self) -> Result<SessionSignal, SessionError> {
        self.ensure_open()?;
        if self.state != SessionState::ConfirmingCompletion {
            return Err(SessionError::NotConfirming);
        }
        if self.completed_count() == 0 {
            self.state = SessionState::InProgress;
            return Err(SessionError::NothingCompleted);
        }

        self.state = SessionState::Committing;
        match self.commit().await {
            Ok(()) => {
                self.state = SessionState::Completed;
                self.last_error = None;
                self.teardown();
                info!(
                    "Workout {} completed in {}",
                    self.workout.id,
                    self.elapsed_display()
                );
                Ok(SessionSignal::LeaveView)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                error!("Failed to complete workout {}: {}", self.workout.id, message);
                self.state = SessionState::ConfirmingCompletion;
                self.last_error = Some(message.clone());
                Err(SessionError::Persistence(message))
            }
        }
    }

    async fn commit(&self) -> anyhow::Result<()> {
        self.flush_pending().await;

        self.write_exercises().await?;

        let record = self.completion_record();
        self.deps
            .store
            .record_completion(&self.workout.id, record)
            .await?;
        self.deps
            .store
            .increment_completion_counter(&self.workout.id)
            .await?;
        Ok(())
    }

    pub fn completion_record(&self) -> CompletionRecord {
        let exercises: Vec<PerformedExercise> =
            self.exercises.iter().map(ExerciseState::performed).collect();
        let weights = exercises.iter().map(|ex| ex.weight.clone()).collect();
        CompletionRecord {
            exercises,
            weights,
            category: self.workout.category.clone(),
            duration_minutes: self.clock.duration_minutes(self.deps.clock.now_ms()),
            notes: None,
        }
    }

    /// Leaves the session without completing it. Pending edits are flushed
    /// and the current list written before the leave signal is returned;
    /// timers are torn down even when that write fails.
    pub async fn exit(&mut self) -> Result<ExitOutcome, SessionError> {
        self.ensure_open()?;
        if self.state == SessionState::Committing {
            return Err(SessionError::NotConfirming);
        }

        self.flush_pending().await;
        let result = self.write_exercises().await;

        self.teardown();
        self.state = SessionState::Exited;

        let save_error = match result {
            Ok(()) => None,
            Err(e) => {
                let message = format!("{:#}", e);
                error!("Failed to save workout {} on exit: {}", self.workout.id, message);
                self.last_error = Some(message.clone());
                Some(message)
            }
        };

        info!("Exited session for workout {}", self.workout.id);
        Ok(ExitOutcome {
            signal: SessionSignal::LeaveView,
            save_error,
        })
    }

    async fn flush_pending(&self) {
        for (id, result) in self.saves.flush_all().await {
            if let Err(e) = result {
                warn!("Pending save for {} failed during flush: {:#}", id, e);
            }
        }
    }

    /// Writes the full resolved list and makes it the new baseline.
    async fn write_exercises(&self) -> anyhow::Result<()> {
        let exercises = self.resolved_exercises();
        let mut persisted = self.persisted.lock().await;
        self.deps
            .store
            .replace_exercises(&self.workout.id, exercises.clone())
            .await?;
        *persisted = exercises;
        Ok(())
    }

    fn teardown(&mut self) {
        self.rest.clear();
    }

    // ── Editing ──────────────────────────────────────────────────────

    pub fn begin_edit(&mut self, exercise_id: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        let idx = self.index_of(exercise_id)?;
        self.exercises[idx].editing = true;
        Ok(())
    }

    /// Applies one field edit live and (re)schedules the debounced save.
    pub async fn update_field(
        &mut self,
        exercise_id: &str,
        field: ExerciseField,
        value: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        let idx = self.index_of(exercise_id)?;
        self.exercises[idx].apply(field, value.into());

        if field == ExerciseField::RestTime {
            let total = parse_rest_duration(self.exercises[idx].rest_time.as_deref());
            self.rest.sync_total(exercise_id, total);
        }

        let payload = self.exercises[idx].resolved();
        self.saves
            .schedule_save(exercise_id, payload, self.deps.timing.debounce)
            .await;
        Ok(())
    }

    /// Drops unsaved edits and restores the last persisted values.
    pub async fn discard_edit(&mut self, exercise_id: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        let idx = self.index_of(exercise_id)?;
        self.saves.cancel(exercise_id).await;

        let baseline = self
            .persisted
            .lock()
            .await
            .iter()
            .find(|ex| ex.id == exercise_id)
            .cloned()
            .unwrap_or_else(|| self.exercises[idx].planned.clone());
        let total = parse_rest_duration(baseline.rest_time.as_deref());

        let exercise = &mut self.exercises[idx];
        exercise.revert_to(baseline);
        exercise.editing = false;
        self.rest.sync_total(exercise_id, total);
        Ok(())
    }

    /// Saves this exercise's pending edit now and leaves edit mode. A save
    /// that failed earlier is retried here, since nothing retries it
    /// automatically.
    pub async fn confirm_edit(&mut self, exercise_id: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        let idx = self.index_of(exercise_id)?;

        let result = if self.saves.is_pending(exercise_id).await {
            self.saves.flush(exercise_id).await
        } else if self.saves.failure(exercise_id).await.is_some() {
            let payload = self.exercises[idx].resolved();
            Some(self.saves.save_now(exercise_id, payload).await)
        } else {
            None
        };

        if let Some(Err(e)) = result {
            let message = format!("{:#}", e);
            self.last_error = Some(message.clone());
            return Err(SessionError::Persistence(message));
        }

        let exercise = &mut self.exercises[idx];
        exercise.planned = exercise.resolved();
        exercise.editing = false;
        Ok(())
    }

    // ── Rest timers ──────────────────────────────────────────────────

    pub fn start_rest(&mut self, exercise_id: &str) -> Result<u32, SessionError> {
        self.ensure_open()?;
        let idx = self.index_of(exercise_id)?;
        let total = parse_rest_duration(self.exercises[idx].rest_time.as_deref());
        self.rest.start(exercise_id, total, self.deps.clock.now_ms());
        Ok(total)
    }

    pub fn reset_rest(&mut self, exercise_id: &str) -> Result<u32, SessionError> {
        self.ensure_open()?;
        let idx = self.index_of(exercise_id)?;
        let total = parse_rest_duration(self.exercises[idx].rest_time.as_deref());
        self.rest.reset(exercise_id, total);
        Ok(total)
    }

    pub fn press_rest(&mut self, exercise_id: &str) -> Result<RestPress, SessionError> {
        self.ensure_open()?;
        let idx = self.index_of(exercise_id)?;
        let raw = self.exercises[idx].rest_time.clone();
        Ok(self
            .rest
            .press(exercise_id, raw.as_deref(), self.deps.clock.now_ms()))
    }

    /// Remaining rest, recomputed from the wall clock on every call.
    pub fn rest_remaining(&self, exercise_id: &str) -> Result<u32, SessionError> {
        let idx = self.index_of(exercise_id)?;
        Ok(self
            .rest
            .remaining(exercise_id, self.deps.clock.now_ms())
            .unwrap_or_else(|| parse_rest_duration(self.exercises[idx].rest_time.as_deref())))
    }

    pub fn rest_active(&self, exercise_id: &str) -> bool {
        self.rest.is_active(exercise_id)
    }

    pub fn has_active_rest(&self) -> bool {
        self.rest.has_active()
    }

    pub fn tick(&mut self) -> RestTick {
        let tick = self.rest.tick(self.deps.clock.now_ms());
        notify_completed(self.deps.notifier.as_ref(), &tick.completed);
        tick
    }

    /// Called when the host becomes visible again after suspension.
    pub fn resume(&mut self) -> RestTick {
        let tick = self.rest.resume(self.deps.clock.now_ms());
        notify_completed(self.deps.notifier.as_ref(), &tick.completed);
        tick
    }

    // ── View ─────────────────────────────────────────────────────────

    pub async fn view(&self) -> SessionView {
        let now = self.deps.clock.now_ms();
        let saved = self.saves.saved_ids().await;
        let failures = self.saves.failures().await;

        let exercises = self
            .exercises
            .iter()
            .map(|ex| {
                let rest_remaining = self
                    .rest
                    .remaining(ex.id(), now)
                    .unwrap_or_else(|| parse_rest_duration(ex.rest_time.as_deref()));
                ExerciseView {
                    exercise: ex.resolved(),
                    completed: ex.completed,
                    current_sets: ex.current_sets,
                    editing: ex.editing,
                    rest_remaining,
                    rest_display: format_rest_time(rest_remaining),
                    rest_active: self.rest.is_active(ex.id()),
                    saved: saved.iter().any(|id| id == ex.id()),
                    save_error: failures.get(ex.id()).cloned(),
                }
            })
            .collect();

        let completed = self.completed_count();
        let total = self.exercises.len();
        let progress_percent = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64 * 100.0
        };

        SessionView {
            workout_id: self.workout.id.clone(),
            workout_name: self.workout.name.clone(),
            user_id: self.context.user_id.clone(),
            state: self.state,
            elapsed: self.clock.display(now),
            completed,
            total,
            progress_percent,
            can_complete: self.can_complete(),
            last_error: self.last_error.clone(),
            exercises,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthProvider, Identity};
    use crate::clock::ManualClock;
    use crate::memory_store::MemoryStore;
    use crate::models::Difficulty;
    use chrono::Utc;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::time::Instant;

    #[derive(Default)]
    struct Chimes {
        rung: StdMutex<Vec<String>>,
    }

    impl RestNotifier for Chimes {
        fn rest_complete(&self, exercise_id: &str) -> anyhow::Result<()> {
            self.rung.lock().unwrap().push(exercise_id.to_string());
            Ok(())
        }
    }

    fn exercise(id: &str, name: &str, sets: u32, rest: &str) -> Exercise {
        Exercise {
            id: id.to_string(),
            name: name.to_string(),
            sets,
            reps: "10".to_string(),
            weight: Some("40kg".to_string()),
            rest_time: Some(rest.to_string()),
            notes: None,
            adjustment: None,
            description: None,
        }
    }

    fn workout(exercises: Vec<Exercise>) -> Workout {
        Workout {
            id: "w1".to_string(),
            user_id: "guest".to_string(),
            name: "Push Day".to_string(),
            description: String::new(),
            exercises,
            estimated_duration: "30 min".to_string(),
            difficulty: Difficulty::Beginner,
            category: "Chest".to_string(),
            created_at: Utc::now(),
            last_completed: None,
            completions: 0,
        }
    }

    struct Harness {
        session: SessionController,
        store: Arc<MemoryStore>,
        clock: ManualClock,
        chimes: Arc<Chimes>,
    }

    async fn harness(exercises: Vec<Exercise>) -> Harness {
        let workout = workout(exercises);
        let store = Arc::new(MemoryStore::with_workout(workout.clone()).await);
        let clock = ManualClock::at(1_700_000_000_000);
        let chimes = Arc::new(Chimes::default());
        let deps = SessionDeps {
            store: store.clone(),
            clock: Arc::new(clock.clone()),
            notifier: chimes.clone(),
            timing: SessionTiming::default(),
        };
        let context = AuthProvider::new("guest").session_context(Identity::Guest, &workout.id);
        Harness {
            session: SessionController::start(context, workout, deps),
            store,
            clock,
            chimes,
        }
    }

    fn bench_and_row() -> Vec<Exercise> {
        vec![
            exercise("bench", "Bench Press", 3, "60s"),
            exercise("row", "Barbell Row", 4, "90s"),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_sets_and_clears_current_sets() {
        let mut h = harness(bench_and_row()).await;

        let state = h.session.toggle_exercise_complete("row").unwrap();
        assert!(state.completed);
        assert_eq!(state.current_sets, 4);

        let state = h.session.toggle_exercise_complete("row").unwrap();
        assert!(!state.completed);
        assert_eq!(state.current_sets, 0);

        assert_eq!(
            h.session.toggle_exercise_complete("nope").unwrap_err(),
            SessionError::UnknownExercise("nope".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn completion_requires_a_completed_exercise_and_confirmation() {
        let mut h = harness(bench_and_row()).await;

        assert!(!h.session.can_complete());
        assert_eq!(
            h.session.request_completion().unwrap_err(),
            SessionError::NothingCompleted
        );
        assert_eq!(
            h.session.confirm_completion().await.unwrap_err(),
            SessionError::NotConfirming
        );
        assert_eq!(h.session.state(), SessionState::InProgress);

        h.session.toggle_exercise_complete("bench").unwrap();
        assert_eq!(
            h.session.request_completion().unwrap(),
            SessionState::ConfirmingCompletion
        );
        assert_eq!(h.session.cancel_completion().unwrap(), SessionState::InProgress);
        assert!(h.store.completions.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_commits_actual_values_and_counts_completion() {
        let mut h = harness(bench_and_row()).await;

        h.session.toggle_exercise_complete("bench").unwrap();
        h.session
            .update_field("bench", ExerciseField::Weight, "45kg")
            .await
            .unwrap();
        h.session.start_rest("bench").unwrap();
        h.clock.advance_ms(20 * 60_000);

        h.session.request_completion().unwrap();
        let signal = h.session.confirm_completion().await.unwrap();
        assert_eq!(signal, SessionSignal::LeaveView);
        assert_eq!(h.session.state(), SessionState::Completed);
        assert!(!h.session.has_active_rest());

        let workouts = h.store.workouts.lock().await;
        let stored = &workouts["w1"];
        assert_eq!(stored.completions, 1);
        assert_eq!(stored.exercises[0].weight.as_deref(), Some("45kg"));
        assert_eq!(stored.exercises[0].name, "Bench Press");

        let completions = h.store.completions.lock().await;
        assert_eq!(completions.len(), 1);
        let (workout_id, record) = &completions[0];
        assert_eq!(workout_id, "w1");
        assert_eq!(record.category, "Chest");
        assert_eq!(
            record.weights,
            vec![Some("45kg".to_string()), Some("40kg".to_string())]
        );
        assert_eq!(record.exercises[0].sets_completed, 3);
        assert_eq!(record.exercises[1].sets_completed, 0);
        assert_eq!(record.duration_minutes, Some(20));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_commit_stays_in_confirmation() {
        let mut h = harness(bench_and_row()).await;
        h.session.toggle_exercise_complete("bench").unwrap();
        h.session.request_completion().unwrap();

        h.store.set_failing(true);
        let err = h.session.confirm_completion().await.unwrap_err();
        assert!(matches!(err, SessionError::Persistence(_)));
        assert_eq!(h.session.state(), SessionState::ConfirmingCompletion);
        assert!(h.session.last_error().is_some());
        assert!(h.session.exercise("bench").unwrap().completed);

        h.store.set_failing(false);
        assert_eq!(
            h.session.confirm_completion().await.unwrap(),
            SessionSignal::LeaveView
        );
        assert_eq!(h.session.state(), SessionState::Completed);
        assert!(h.session.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_sessions_reject_further_events() {
        let mut h = harness(bench_and_row()).await;
        h.session.exit().await.unwrap();

        assert_eq!(
            h.session.toggle_exercise_complete("bench").unwrap_err(),
            SessionError::SessionClosed(SessionState::Exited)
        );
        assert!(h.session.exit().await.is_err());
        assert!(h.session.start_rest("bench").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn suspended_rest_timer_reads_zero_and_chimes_once() {
        let mut h = harness(vec![exercise("bench", "Bench Press", 3, "60s")]).await;

        let state = h.session.toggle_exercise_complete("bench").unwrap();
        assert!(state.completed);
        assert_eq!(state.current_sets, 3);

        assert_eq!(h.session.start_rest("bench").unwrap(), 60);
        h.clock.advance_ms(60_000);
        assert_eq!(h.session.rest_remaining("bench").unwrap(), 0);

        let tick = h.session.resume();
        assert_eq!(tick.completed, vec!["bench".to_string()]);
        h.clock.advance_ms(5_000);
        assert!(h.session.tick().completed.is_empty());
        assert!(h.session.tick().completed.is_empty());
        assert_eq!(h.chimes.rung.lock().unwrap().len(), 1);
        assert!(!h.session.rest_active("bench"));
    }

    #[tokio::test(start_paused = true)]
    async fn rest_button_toggles_and_idle_timer_shows_full_duration() {
        let mut h = harness(bench_and_row()).await;
        assert_eq!(h.session.rest_remaining("row").unwrap(), 90);

        assert_eq!(h.session.press_rest("row").unwrap(), RestPress::Started(90));
        h.clock.advance_ms(30_500);
        assert_eq!(h.session.rest_remaining("row").unwrap(), 60);
        assert_eq!(h.session.press_rest("row").unwrap(), RestPress::Reset(90));
        assert_eq!(h.session.rest_remaining("row").unwrap(), 90);

        h.session.start_rest("row").unwrap();
        assert_eq!(h.session.reset_rest("row").unwrap(), 90);
        assert!(!h.session.rest_active("row"));
    }

    #[tokio::test(start_paused = true)]
    async fn shortening_rest_time_resets_running_timer() {
        let mut h = harness(bench_and_row()).await;
        h.session.start_rest("row").unwrap();
        h.clock.advance_ms(10_000);

        h.session
            .update_field("row", ExerciseField::RestTime, "120s")
            .await
            .unwrap();
        assert!(h.session.rest_active("row"));

        h.session
            .update_field("row", ExerciseField::RestTime, "45s")
            .await
            .unwrap();
        assert!(!h.session.rest_active("row"));
        assert_eq!(h.session.rest_remaining("row").unwrap(), 45);
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_weight_edits_save_once_with_last_value() {
        let mut h = harness(bench_and_row()).await;
        let start = Instant::now();

        h.session
            .update_field("bench", ExerciseField::Weight, "42kg")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        h.session
            .update_field("bench", ExerciseField::Weight, "44kg")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        h.session
            .update_field("bench", ExerciseField::Weight, "46kg")
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;

        let calls = h.store.replace_calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].at - start, Duration::from_millis(1400));
        assert_eq!(calls[0].exercises.len(), 2);
        assert_eq!(calls[0].exercises[0].weight.as_deref(), Some("46kg"));
    }

    #[tokio::test(start_paused = true)]
    async fn edits_to_different_exercises_save_independently() {
        let mut h = harness(bench_and_row()).await;

        h.session
            .update_field("bench", ExerciseField::Reps, "8")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        h.session
            .update_field("row", ExerciseField::Reps, "12")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let calls = h.store.replace_calls.lock().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].exercises[0].reps, "8");
        assert_eq!(calls[1].exercises[0].reps, "8");
        assert_eq!(calls[1].exercises[1].reps, "12");
    }

    #[tokio::test(start_paused = true)]
    async fn discarded_edit_is_not_written_by_another_exercise_save() {
        let mut h = harness(bench_and_row()).await;

        h.session.begin_edit("row").unwrap();
        h.session
            .update_field("row", ExerciseField::Weight, "999kg")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.session
            .update_field("bench", ExerciseField::Reps, "8")
            .await
            .unwrap();
        h.session.discard_edit("row").await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let calls = h.store.replace_calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].exercises[0].reps, "8");
        assert_eq!(calls[0].exercises[1].weight.as_deref(), Some("40kg"));
        drop(calls);

        let stored = h.store.workouts.lock().await["w1"].exercises.clone();
        assert_eq!(stored[1].weight.as_deref(), Some("40kg"));
        assert_eq!(
            h.session.exercise("row").unwrap().resolved().weight.as_deref(),
            Some("40kg")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn confirmed_edit_survives_older_pending_save_of_another_exercise() {
        let mut h = harness(bench_and_row()).await;

        h.session
            .update_field("bench", ExerciseField::Reps, "8")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.session.begin_edit("row").unwrap();
        h.session
            .update_field("row", ExerciseField::Weight, "50kg")
            .await
            .unwrap();
        h.session.confirm_edit("row").await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let calls = h.store.replace_calls.lock().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].exercises[0].reps, "10");
        assert_eq!(calls[0].exercises[1].weight.as_deref(), Some("50kg"));
        drop(calls);

        let stored = h.store.workouts.lock().await["w1"].exercises.clone();
        assert_eq!(stored[0].reps, "8");
        assert_eq!(stored[1].weight.as_deref(), Some("50kg"));
    }

    #[tokio::test(start_paused = true)]
    async fn exit_flushes_pending_save_before_signalling() {
        let mut h = harness(bench_and_row()).await;
        let start = Instant::now();

        h.session
            .update_field("row", ExerciseField::Weight, "60kg")
            .await
            .unwrap();
        let outcome = h.session.exit().await.unwrap();
        assert_eq!(outcome.signal, SessionSignal::LeaveView);
        assert!(outcome.save_error.is_none());
        assert_eq!(h.session.state(), SessionState::Exited);

        {
            let calls = h.store.replace_calls.lock().await;
            assert!(!calls.is_empty());
            assert_eq!(calls[0].at, start);
            assert_eq!(calls[0].exercises[1].weight.as_deref(), Some("60kg"));
        }

        let before = h.store.replace_calls.lock().await.len();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.store.replace_calls.lock().await.len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn exit_tears_down_even_when_write_fails() {
        let mut h = harness(bench_and_row()).await;
        h.session.start_rest("bench").unwrap();
        h.store.set_failing(true);

        let outcome = h.session.exit().await.unwrap();
        assert_eq!(outcome.signal, SessionSignal::LeaveView);
        assert!(outcome.save_error.is_some());
        assert_eq!(h.session.state(), SessionState::Exited);
        assert!(!h.session.has_active_rest());
    }

    #[tokio::test(start_paused = true)]
    async fn discard_restores_persisted_values_and_drops_pending_save() {
        let mut h = harness(bench_and_row()).await;

        h.session.begin_edit("bench").unwrap();
        h.session
            .update_field("bench", ExerciseField::Name, "Incline Press")
            .await
            .unwrap();
        assert_eq!(
            h.session.exercise("bench").unwrap().resolved().name,
            "Incline Press"
        );

        h.session.discard_edit("bench").await.unwrap();
        let state = h.session.exercise("bench").unwrap();
        assert!(!state.editing);
        assert_eq!(state.actual_name, "Bench Press");

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h.store.replace_calls.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_edit_saves_now_and_becomes_the_new_baseline() {
        let mut h = harness(bench_and_row()).await;

        h.session.begin_edit("bench").unwrap();
        h.session
            .update_field("bench", ExerciseField::Reps, "6")
            .await
            .unwrap();
        h.session.confirm_edit("bench").await.unwrap();

        assert_eq!(h.store.replace_calls.lock().await.len(), 1);
        let view = h.session.view().await;
        assert!(view.exercises[0].saved);
        assert!(!view.exercises[0].editing);

        h.session.begin_edit("bench").unwrap();
        h.session
            .update_field("bench", ExerciseField::Reps, "15")
            .await
            .unwrap();
        h.session.discard_edit("bench").await.unwrap();
        assert_eq!(h.session.exercise("bench").unwrap().resolved().reps, "6");

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!h.session.view().await.exercises[0].saved);
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_edit_surfaces_failure_and_retries_on_demand() {
        let mut h = harness(bench_and_row()).await;
        h.store.set_failing(true);

        h.session.begin_edit("row").unwrap();
        h.session
            .update_field("row", ExerciseField::Weight, "70kg")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.store.replace_calls.lock().await.len(), 1);
        assert!(h.session.view().await.exercises[1].save_error.is_some());

        assert!(matches!(
            h.session.confirm_edit("row").await,
            Err(SessionError::Persistence(_))
        ));
        assert!(h.session.exercise("row").unwrap().editing);

        h.store.set_failing(false);
        h.session.confirm_edit("row").await.unwrap();
        assert_eq!(h.store.replace_calls.lock().await.len(), 3);
        let view = h.session.view().await;
        assert!(view.exercises[1].save_error.is_none());
        assert!(view.exercises[1].saved);
    }

    #[tokio::test(start_paused = true)]
    async fn view_reports_progress_and_elapsed_time() {
        let mut h = harness(bench_and_row()).await;
        h.session.toggle_exercise_complete("bench").unwrap();
        h.clock.advance_ms(65_000);

        let view = h.session.view().await;
        assert_eq!(view.completed, 1);
        assert_eq!(view.total, 2);
        assert_eq!(view.progress_percent, 50.0);
        assert!(view.can_complete);
        assert_eq!(view.elapsed, "1:05");
        assert_eq!(view.user_id, "guest");
        assert_eq!(view.exercises[1].rest_display, "1:30");
    }
}
