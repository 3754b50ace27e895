//! In-memory `WorkoutStore` with switchable failures, for session tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::db::summarize_completions;
use crate::models::{
    CategoryBreakdown, CompletionRecord, Exercise, ExercisePerformance, NewWorkout, Workout,
    WorkoutHistory, WorkoutPatch, WorkoutStats,
};
use crate::store::WorkoutStore;

#[derive(Debug, Clone)]
pub struct ReplaceCall {
    pub workout_id: String,
    pub exercises: Vec<Exercise>,
    pub at: Instant,
}

#[derive(Default)]
pub struct MemoryStore {
    pub workouts: Mutex<HashMap<String, Workout>>,
    pub replace_calls: Mutex<Vec<ReplaceCall>>,
    pub completions: Mutex<Vec<(String, CompletionRecord)>>,
    pub fail_writes: AtomicBool,
}

impl MemoryStore {
    pub async fn with_workout(workout: Workout) -> Self {
        let store = Self::default();
        store
            .workouts
            .lock()
            .await
            .insert(workout.id.clone(), workout);
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("store offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkoutStore for MemoryStore {
    async fn list_workouts(&self, user_id: &str) -> Result<Vec<Workout>> {
        let workouts = self.workouts.lock().await;
        Ok(workouts
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_workout(&self, id: &str) -> Result<Option<Workout>> {
        Ok(self.workouts.lock().await.get(id).cloned())
    }

    async fn create_workout(&self, user_id: &str, data: NewWorkout) -> Result<Workout> {
        self.check_writable()?;
        let workout = Workout {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: data.name,
            description: data.description,
            exercises: data.exercises,
            estimated_duration: data.estimated_duration.unwrap_or_default(),
            difficulty: data.difficulty,
            category: data.category,
            created_at: Utc::now(),
            last_completed: None,
            completions: 0,
        };
        self.workouts
            .lock()
            .await
            .insert(workout.id.clone(), workout.clone());
        Ok(workout)
    }

    async fn update_workout(&self, id: &str, patch: WorkoutPatch) -> Result<Workout> {
        self.check_writable()?;
        let mut workouts = self.workouts.lock().await;
        let workout = workouts
            .get_mut(id)
            .ok_or_else(|| anyhow!("No workout found for id: {}", id))?;
        if let Some(name) = patch.name {
            workout.name = name;
        }
        if let Some(exercises) = patch.exercises {
            workout.exercises = exercises;
        }
        Ok(workout.clone())
    }

    async fn delete_workout(&self, id: &str) -> Result<()> {
        self.check_writable()?;
        self.workouts
            .lock()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| anyhow!("No workout found for id: {}", id))
    }

    async fn replace_exercises(&self, workout_id: &str, exercises: Vec<Exercise>) -> Result<()> {
        self.replace_calls.lock().await.push(ReplaceCall {
            workout_id: workout_id.to_string(),
            exercises: exercises.clone(),
            at: Instant::now(),
        });
        self.check_writable()?;
        if let Some(workout) = self.workouts.lock().await.get_mut(workout_id) {
            workout.exercises = exercises;
        }
        Ok(())
    }

    async fn record_completion(&self, workout_id: &str, record: CompletionRecord) -> Result<()> {
        self.check_writable()?;
        self.completions
            .lock()
            .await
            .push((workout_id.to_string(), record));
        Ok(())
    }

    async fn increment_completion_counter(&self, workout_id: &str) -> Result<()> {
        self.check_writable()?;
        let mut workouts = self.workouts.lock().await;
        let workout = workouts
            .get_mut(workout_id)
            .ok_or_else(|| anyhow!("No workout found for id: {}", workout_id))?;
        workout.completions += 1;
        workout.last_completed = Some(Utc::now());
        Ok(())
    }

    async fn workout_stats(&self, user_id: &str) -> Result<WorkoutStats> {
        let total = self.list_workouts(user_id).await?.len() as u32;
        let completed: Vec<_> = self
            .workouts
            .lock()
            .await
            .values()
            .filter(|w| w.user_id == user_id)
            .filter_map(|w| w.last_completed)
            .collect();
        Ok(summarize_completions(total, &completed, Utc::now()))
    }

    async fn category_breakdown(&self, _user_id: &str) -> Result<Vec<CategoryBreakdown>> {
        Ok(Vec::new())
    }

    async fn workout_history(&self, _user_id: &str, _limit: Option<u32>) -> Result<Vec<WorkoutHistory>> {
        Ok(Vec::new())
    }

    async fn exercise_performances(
        &self,
        _user_id: &str,
        _history_id: &str,
    ) -> Result<Option<Vec<ExercisePerformance>>> {
        Ok(None)
    }
}
