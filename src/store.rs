use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::db::Database;
use crate::models::{
    CategoryBreakdown, CompletionRecord, Exercise, ExercisePerformance, NewWorkout, Workout,
    WorkoutHistory, WorkoutPatch, WorkoutStats,
};

/// Persistence collaborator used by sessions and the API.
#[async_trait]
pub trait WorkoutStore: Send + Sync {
    async fn list_workouts(&self, user_id: &str) -> Result<Vec<Workout>>;
    async fn get_workout(&self, id: &str) -> Result<Option<Workout>>;
    async fn create_workout(&self, user_id: &str, data: NewWorkout) -> Result<Workout>;
    async fn update_workout(&self, id: &str, patch: WorkoutPatch) -> Result<Workout>;
    async fn delete_workout(&self, id: &str) -> Result<()>;

    /// Delete-then-insert. Callers always send the complete list.
    async fn replace_exercises(&self, workout_id: &str, exercises: Vec<Exercise>) -> Result<()>;

    async fn record_completion(&self, workout_id: &str, record: CompletionRecord) -> Result<()>;
    async fn increment_completion_counter(&self, workout_id: &str) -> Result<()>;

    async fn workout_stats(&self, user_id: &str) -> Result<WorkoutStats>;
    async fn category_breakdown(&self, user_id: &str) -> Result<Vec<CategoryBreakdown>>;
    async fn workout_history(&self, user_id: &str, limit: Option<u32>) -> Result<Vec<WorkoutHistory>>;
    /// `None` when the history entry is missing or owned by someone else.
    async fn exercise_performances(
        &self,
        user_id: &str,
        history_id: &str,
    ) -> Result<Option<Vec<ExercisePerformance>>>;
}

#[derive(Clone)]
pub struct SqliteStore {
    database: Arc<Mutex<Database>>,
}

impl SqliteStore {
    pub fn new(database: Arc<Mutex<Database>>) -> Self {
        Self { database }
    }

    pub fn open(path: &str) -> Result<Self> {
        let database = Database::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path))?;
        Ok(Self::new(Arc::new(Mutex::new(database))))
    }
}

#[async_trait]
impl WorkoutStore for SqliteStore {
    async fn list_workouts(&self, user_id: &str) -> Result<Vec<Workout>> {
        let db = self.database.lock().await;
        db.list_workouts(user_id).context("Failed to list workouts")
    }

    async fn get_workout(&self, id: &str) -> Result<Option<Workout>> {
        let db = self.database.lock().await;
        db.get_workout(id)
            .with_context(|| format!("Failed to load workout {}", id))
    }

    async fn create_workout(&self, user_id: &str, data: NewWorkout) -> Result<Workout> {
        let db = self.database.lock().await;
        db.insert_workout(user_id, &data, Utc::now())
            .context("Failed to create workout")
    }

    async fn update_workout(&self, id: &str, patch: WorkoutPatch) -> Result<Workout> {
        let db = self.database.lock().await;
        db.update_workout(id, &patch)
            .with_context(|| format!("Failed to update workout {}", id))?
            .ok_or_else(|| anyhow!("No workout found for id: {}", id))
    }

    async fn delete_workout(&self, id: &str) -> Result<()> {
        let db = self.database.lock().await;
        if !db
            .delete_workout(id)
            .with_context(|| format!("Failed to delete workout {}", id))?
        {
            return Err(anyhow!("No workout found for id: {}", id));
        }
        Ok(())
    }

    async fn replace_exercises(&self, workout_id: &str, exercises: Vec<Exercise>) -> Result<()> {
        let db = self.database.lock().await;
        db.replace_exercises(workout_id, &exercises)
            .with_context(|| format!("Failed to save exercises for workout {}", workout_id))
    }

    async fn record_completion(&self, workout_id: &str, record: CompletionRecord) -> Result<()> {
        let db = self.database.lock().await;
        db.insert_completion(workout_id, &record, Utc::now())
            .with_context(|| format!("Failed to record completion for workout {}", workout_id))?;
        Ok(())
    }

    async fn increment_completion_counter(&self, workout_id: &str) -> Result<()> {
        let db = self.database.lock().await;
        let updated = db
            .increment_completion(workout_id, Utc::now())
            .with_context(|| format!("Failed to update completions for {}", workout_id))?;
        if !updated {
            return Err(anyhow!("No workout found for id: {}", workout_id));
        }
        Ok(())
    }

    async fn workout_stats(&self, user_id: &str) -> Result<WorkoutStats> {
        let db = self.database.lock().await;
        db.workout_stats(user_id, Utc::now())
            .context("Failed to compute workout stats")
    }

    async fn category_breakdown(&self, user_id: &str) -> Result<Vec<CategoryBreakdown>> {
        let db = self.database.lock().await;
        db.category_breakdown(user_id)
            .context("Failed to compute category breakdown")
    }

    async fn workout_history(&self, user_id: &str, limit: Option<u32>) -> Result<Vec<WorkoutHistory>> {
        let db = self.database.lock().await;
        db.workout_history(user_id, limit)
            .context("Failed to load workout history")
    }

    async fn exercise_performances(
        &self,
        user_id: &str,
        history_id: &str,
    ) -> Result<Option<Vec<ExercisePerformance>>> {
        let db = self.database.lock().await;
        db.exercise_performances(user_id, history_id)
            .with_context(|| format!("Failed to load performances for {}", history_id))
    }
}
