use crate::models::{
    CategoryBreakdown, CompletionRecord, Difficulty, Exercise, ExercisePerformance, NewWorkout,
    Workout, WorkoutHistory, WorkoutPatch, WorkoutStats,
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use std::collections::BTreeSet;

const DEFAULT_HISTORY_LIMIT: u32 = 50;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS workouts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                estimated_duration TEXT NOT NULL DEFAULT '',
                difficulty TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                last_completed TEXT,
                completions INTEGER NOT NULL DEFAULT 0
            )",
            (),
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS exercises (
                id TEXT NOT NULL,
                workout_id TEXT NOT NULL REFERENCES workouts(id),
                name TEXT NOT NULL,
                sets INTEGER NOT NULL,
                reps TEXT NOT NULL,
                weight TEXT,
                rest_time TEXT,
                notes TEXT,
                adjustment TEXT,
                description TEXT,
                order_index INTEGER NOT NULL,
                PRIMARY KEY (workout_id, id)
            )",
            (),
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS workout_history (
                id TEXT PRIMARY KEY,
                workout_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                duration_minutes INTEGER,
                notes TEXT,
                category TEXT NOT NULL DEFAULT ''
            )",
            (),
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS exercise_performance (
                id INTEGER PRIMARY KEY,
                workout_history_id TEXT NOT NULL REFERENCES workout_history(id),
                exercise_id TEXT NOT NULL,
                exercise_name TEXT NOT NULL,
                sets_completed INTEGER NOT NULL,
                reps_performed TEXT,
                weight_used TEXT,
                notes TEXT,
                created_at TEXT NOT NULL
            )",
            (),
        )?;

        Ok(Database { conn })
    }

    pub fn list_workouts(&self, user_id: &str) -> Result<Vec<Workout>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, name, description, estimated_duration, difficulty,
                    category, created_at, last_completed, completions
             FROM workouts
             WHERE user_id = ?1
             ORDER BY created_at DESC",
        )?;
        let mut workouts = stmt
            .query_map(params![user_id], workout_from_row)?
            .collect::<Result<Vec<_>>>()?;

        for workout in &mut workouts {
            workout.exercises = self.exercises_for(&workout.id)?;
        }
        Ok(workouts)
    }

    pub fn get_workout(&self, id: &str) -> Result<Option<Workout>> {
        let workout = self
            .conn
            .query_row(
                "SELECT id, user_id, name, description, estimated_duration, difficulty,
                        category, created_at, last_completed, completions
                 FROM workouts WHERE id = ?1",
                params![id],
                workout_from_row,
            )
            .optional()?;

        match workout {
            Some(mut workout) => {
                workout.exercises = self.exercises_for(&workout.id)?;
                Ok(Some(workout))
            }
            None => Ok(None),
        }
    }

    fn exercises_for(&self, workout_id: &str) -> Result<Vec<Exercise>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, sets, reps, weight, rest_time, notes, adjustment, description
             FROM exercises
             WHERE workout_id = ?1
             ORDER BY order_index ASC",
        )?;
        let rows = stmt.query_map(params![workout_id], |row| {
            Ok(Exercise {
                id: row.get(0)?,
                name: row.get(1)?,
                sets: row.get(2)?,
                reps: row.get(3)?,
                weight: row.get(4)?,
                rest_time: row.get(5)?,
                notes: row.get(6)?,
                adjustment: row.get(7)?,
                description: row.get(8)?,
            })
        })?;
        rows.collect()
    }

    pub fn insert_workout(
        &self,
        user_id: &str,
        data: &NewWorkout,
        now: DateTime<Utc>,
    ) -> Result<Workout> {
        let id = uuid::Uuid::new_v4().to_string();
        let estimated = data.estimated_duration.clone().unwrap_or_else(|| {
            format!(
                "{} min",
                crate::models::estimate_workout_minutes(&data.exercises)
            )
        });

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO workouts
                (id, user_id, name, description, estimated_duration, difficulty, category,
                 created_at, last_completed, completions)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, 0)",
            params![
                id,
                user_id,
                data.name,
                data.description,
                estimated,
                data.difficulty.as_str(),
                data.category,
                now.to_rfc3339(),
            ],
        )?;
        insert_exercises(&tx, &id, &data.exercises)?;
        tx.commit()?;

        self.get_workout(&id)?
            .ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    /// Applies the fields present in `patch`. Exercises, when given, replace
    /// the whole list. `None` when the workout does not exist.
    pub fn update_workout(&self, id: &str, patch: &WorkoutPatch) -> Result<Option<Workout>> {
        let Some(mut workout) = self.get_workout(id)? else {
            return Ok(None);
        };

        if let Some(name) = &patch.name {
            workout.name = name.clone();
        }
        if let Some(description) = &patch.description {
            workout.description = description.clone();
        }
        if let Some(estimated) = &patch.estimated_duration {
            workout.estimated_duration = estimated.clone();
        }
        if let Some(difficulty) = patch.difficulty {
            workout.difficulty = difficulty;
        }
        if let Some(category) = &patch.category {
            workout.category = category.clone();
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE workouts
             SET name = ?2, description = ?3, estimated_duration = ?4, difficulty = ?5,
                 category = ?6
             WHERE id = ?1",
            params![
                id,
                workout.name,
                workout.description,
                workout.estimated_duration,
                workout.difficulty.as_str(),
                workout.category,
            ],
        )?;
        if let Some(exercises) = &patch.exercises {
            tx.execute("DELETE FROM exercises WHERE workout_id = ?1", params![id])?;
            insert_exercises(&tx, id, exercises)?;
        }
        tx.commit()?;

        self.get_workout(id)
    }

    pub fn delete_workout(&self, id: &str) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM exercises WHERE workout_id = ?1", params![id])?;
        let deleted = tx.execute("DELETE FROM workouts WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    /// Full replace: every existing exercise row for the workout is removed
    /// and the given list inserted in order.
    pub fn replace_exercises(&self, workout_id: &str, exercises: &[Exercise]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM exercises WHERE workout_id = ?1",
            params![workout_id],
        )?;
        insert_exercises(&tx, workout_id, exercises)?;
        tx.commit()
    }

    /// Writes one history row plus a performance row per exercise and
    /// returns the history id.
    pub fn insert_completion(
        &self,
        workout_id: &str,
        record: &CompletionRecord,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let history_id = uuid::Uuid::new_v4().to_string();
        let completed_at = now.to_rfc3339();

        let tx = self.conn.unchecked_transaction()?;
        let inserted = tx.execute(
            "INSERT INTO workout_history
                (id, workout_id, user_id, completed_at, duration_minutes, notes, category)
             SELECT ?1, id, user_id, ?2, ?3, ?4, ?5 FROM workouts WHERE id = ?6",
            params![
                history_id,
                completed_at,
                record.duration_minutes,
                record.notes,
                record.category,
                workout_id,
            ],
        )?;
        if inserted == 0 {
            return Err(rusqlite::Error::QueryReturnedNoRows);
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO exercise_performance
                    (workout_history_id, exercise_id, exercise_name, sets_completed,
                     reps_performed, weight_used, notes, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for exercise in &record.exercises {
                stmt.execute(params![
                    history_id,
                    exercise.exercise_id,
                    exercise.name,
                    exercise.sets_completed,
                    exercise.reps,
                    exercise.weight,
                    exercise.notes,
                    completed_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(history_id)
    }

    /// Bumps the completion counter and stamps `last_completed`. `false` when
    /// the workout does not exist.
    pub fn increment_completion(&self, workout_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE workouts
             SET completions = completions + 1, last_completed = ?2
             WHERE id = ?1",
            params![workout_id, now.to_rfc3339()],
        )?;
        Ok(updated > 0)
    }

    /// Performance rows for one history entry. `None` when the entry does
    /// not exist or belongs to another user.
    pub fn exercise_performances(
        &self,
        user_id: &str,
        history_id: &str,
    ) -> Result<Option<Vec<ExercisePerformance>>> {
        let owned = self
            .conn
            .query_row(
                "SELECT 1 FROM workout_history WHERE id = ?1 AND user_id = ?2",
                params![history_id, user_id],
                |_| Ok(()),
            )
            .optional()?;
        if owned.is_none() {
            return Ok(None);
        }

        let mut stmt = self.conn.prepare(
            "SELECT exercise_id, exercise_name, sets_completed, reps_performed, weight_used, notes
             FROM exercise_performance
             WHERE workout_history_id = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![history_id], |row| {
            Ok(ExercisePerformance {
                exercise_id: row.get(0)?,
                exercise_name: row.get(1)?,
                sets_completed: row.get(2)?,
                reps_performed: row.get(3)?,
                weight_used: row.get(4)?,
                notes: row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>>>().map(Some)
    }

    pub fn workout_stats(&self, user_id: &str, now: DateTime<Utc>) -> Result<WorkoutStats> {
        let total_workouts: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM workouts WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;

        let mut stmt = self
            .conn
            .prepare("SELECT completed_at FROM workout_history WHERE user_id = ?1")?;
        let completions = stmt
            .query_map(params![user_id], |row| parse_timestamp(row, 0))?
            .collect::<Result<Vec<_>>>()?;

        Ok(summarize_completions(total_workouts, &completions, now))
    }

    pub fn category_breakdown(&self, user_id: &str) -> Result<Vec<CategoryBreakdown>> {
        let mut stmt = self.conn.prepare(
            "SELECT w.category,
                    COUNT(*) AS workout_count,
                    (SELECT COUNT(*) FROM workout_history h
                     WHERE h.user_id = ?1 AND h.category = w.category) AS completion_count
             FROM workouts w
             WHERE w.user_id = ?1
             GROUP BY w.category
             ORDER BY completion_count DESC, w.category ASC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(CategoryBreakdown {
                category: row.get(0)?,
                workout_count: row.get(1)?,
                completion_count: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    pub fn workout_history(&self, user_id: &str, limit: Option<u32>) -> Result<Vec<WorkoutHistory>> {
        let mut stmt = self.conn.prepare(
            "SELECT h.id, h.workout_id, COALESCE(w.name, ''), h.category, h.completed_at,
                    h.duration_minutes, h.notes
             FROM workout_history h
             LEFT JOIN workouts w ON w.id = h.workout_id
             WHERE h.user_id = ?1
             ORDER BY h.completed_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            params![user_id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT)],
            |row| {
                Ok(WorkoutHistory {
                    id: row.get(0)?,
                    workout_id: row.get(1)?,
                    workout_name: row.get(2)?,
                    category: row.get(3)?,
                    completed_at: parse_timestamp(row, 4)?,
                    duration_minutes: row.get(5)?,
                    notes: row.get(6)?,
                })
            },
        )?;
        rows.collect()
    }
}

fn insert_exercises(conn: &Connection, workout_id: &str, exercises: &[Exercise]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO exercises
            (id, workout_id, name, sets, reps, weight, rest_time, notes, adjustment,
             description, order_index)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )?;
    for (index, exercise) in exercises.iter().enumerate() {
        let id = if exercise.id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            exercise.id.clone()
        };
        stmt.execute(params![
            id,
            workout_id,
            exercise.name,
            exercise.sets,
            exercise.reps,
            exercise.weight,
            exercise.rest_time,
            exercise.notes,
            exercise.adjustment,
            exercise.description,
            index as i64,
        ])?;
    }
    Ok(())
}

fn workout_from_row(row: &Row) -> Result<Workout> {
    let difficulty: String = row.get(5)?;
    let last_completed: Option<String> = row.get(8)?;
    Ok(Workout {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        exercises: Vec::new(),
        estimated_duration: row.get(4)?,
        difficulty: Difficulty::parse(&difficulty),
        category: row.get(6)?,
        created_at: parse_timestamp(row, 7)?,
        last_completed: match last_completed {
            Some(raw) => Some(parse_rfc3339(&raw, 8)?),
            None => None,
        },
        completions: row.get(9)?,
    })
}

fn parse_timestamp(row: &Row, idx: usize) -> Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_rfc3339(&raw, idx)
}

fn parse_rfc3339(raw: &str, idx: usize) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Week starts on Monday. The streak counts consecutive days with at least
/// one completion, ending today or yesterday.
pub fn summarize_completions(
    total_workouts: u32,
    completions: &[DateTime<Utc>],
    now: DateTime<Utc>,
) -> WorkoutStats {
    let today = now.date_naive();
    let week_start = today - Duration::days(today.weekday().num_days_from_monday() as i64);

    let this_week_workouts = completions
        .iter()
        .filter(|c| {
            let day = c.date_naive();
            day >= week_start && day <= today
        })
        .count() as u32;

    let this_month_workouts = completions
        .iter()
        .filter(|c| c.year() == now.year() && c.month() == now.month())
        .count() as u32;

    let days: BTreeSet<NaiveDate> = completions.iter().map(|c| c.date_naive()).collect();
    let mut cursor = if days.contains(&today) {
        Some(today)
    } else {
        today.pred_opt().filter(|yesterday| days.contains(yesterday))
    };
    let mut current_streak = 0;
    while let Some(day) = cursor.filter(|d| days.contains(d)) {
        current_streak += 1;
        cursor = day.pred_opt();
    }

    WorkoutStats {
        total_workouts,
        total_completions: completions.len() as u32,
        this_week_workouts,
        this_month_workouts,
        current_streak,
    }
}
