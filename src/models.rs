use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum Difficulty {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Beginner => "Beginner",
            Difficulty::Intermediate => "Intermediate",
            Difficulty::Advanced => "Advanced",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "Intermediate" => Difficulty::Intermediate,
            "Advanced" => Difficulty::Advanced,
            _ => Difficulty::Beginner,
        }
    }
}

/// Planned exercise as stored on a workout template.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Exercise {
    pub id: String,
    pub name: String,
    pub sets: u32,
    pub reps: String,
    #[serde(default)]
    pub weight: Option<String>,
    #[serde(default)]
    pub rest_time: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub adjustment: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workout {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub exercises: Vec<Exercise>,
    pub estimated_duration: String,
    pub difficulty: Difficulty,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub last_completed: Option<DateTime<Utc>>,
    pub completions: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewWorkout {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub exercises: Vec<Exercise>,
    #[serde(default)]
    pub estimated_duration: Option<String>,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub category: String,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub estimated_duration: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub category: Option<String>,
    pub exercises: Option<Vec<Exercise>>,
}

/// One exercise as it was actually performed in a session.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PerformedExercise {
    pub exercise_id: String,
    pub name: String,
    pub sets: u32,
    pub sets_completed: u32,
    pub reps: String,
    pub weight: Option<String>,
    pub rest_time: Option<String>,
    pub notes: Option<String>,
    pub adjustment: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRecord {
    pub exercises: Vec<PerformedExercise>,
    pub weights: Vec<Option<String>>,
    pub category: String,
    pub duration_minutes: Option<u32>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutHistory {
    pub id: String,
    pub workout_id: String,
    pub workout_name: String,
    pub category: String,
    pub completed_at: DateTime<Utc>,
    pub duration_minutes: Option<u32>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExercisePerformance {
    pub exercise_id: String,
    pub exercise_name: String,
    pub sets_completed: u32,
    pub reps_performed: Option<String>,
    pub weight_used: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutStats {
    pub total_workouts: u32,
    pub total_completions: u32,
    pub this_week_workouts: u32,
    pub this_month_workouts: u32,
    pub current_streak: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CategoryBreakdown {
    pub category: String,
    pub workout_count: u32,
    pub completion_count: u32,
}

// Seconds of work assumed per set when estimating a workout's length.
const SECONDS_PER_SET: u64 = 40;

/// Rough session length: every set costs its work time plus its rest.
/// Saturates instead of overflowing on absurd set counts or rest strings.
pub fn estimate_workout_minutes(exercises: &[Exercise]) -> u32 {
    let total_seconds = exercises
        .iter()
        .map(|ex| {
            let sets = u64::from(ex.sets.max(1));
            let rest = u64::from(crate::rest_timer::parse_rest_duration(ex.rest_time.as_deref()));
            sets.saturating_mul(SECONDS_PER_SET + rest)
        })
        .fold(0u64, u64::saturating_add);
    let minutes = total_seconds.saturating_add(30) / 60;
    u32::try_from(minutes).unwrap_or(u32::MAX)
}
