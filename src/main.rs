use anyhow::Context;
use clap::{Parser, Subcommand};
use futures_util::future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use workout_tracker::api::{self, ApiState};
use workout_tracker::auth::{AuthProvider, Identity};
use workout_tracker::clock::SystemClock;
use workout_tracker::config::AppConfig;
use workout_tracker::rest_timer::TerminalBell;
use workout_tracker::store::{SqliteStore, WorkoutStore};

#[derive(Parser)]
#[command(name = "workout_tracker", version, about = "Workout session tracker")]
struct Cli {
    /// Act as this user instead of the guest identity
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API (default)
    Serve,
    /// Print saved workouts
    List,
    /// Print progress statistics
    Stats,
    /// Print recent completed workouts
    History {
        #[arg(long)]
        limit: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load().context("Failed to load configuration")?;
    let store = Arc::new(SqliteStore::open(&config.database_path())?);
    let auth = AuthProvider::new(config.guest_user_id.clone());
    let user_id = auth.current_user_id(&Identity::from_header(cli.user.as_deref()));

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            info!("Starting workout tracker API on {}", config.api_bind_addr);
            let state = ApiState::new(
                store,
                auth,
                Arc::new(SystemClock),
                Arc::new(TerminalBell),
                config.session_timing(),
                Duration::from_millis(config.rest_tick_ms),
            );
            let cors = api::build_cors(&config.cors_allowed_origins);
            api::run_server(state, &config.api_bind_addr, cors).await?;
        }
        Commands::List => {
            let workouts = store.list_workouts(&user_id).await?;
            if workouts.is_empty() {
                println!("No workouts saved for {}.", user_id);
            }
            for workout in workouts {
                println!(
                    "{}  {} [{}, {}] {} exercises, ~{}, completed {}x",
                    workout.id,
                    workout.name,
                    workout.category,
                    workout.difficulty.as_str(),
                    workout.exercises.len(),
                    workout.estimated_duration,
                    workout.completions
                );
            }
        }
        Commands::Stats => {
            let (stats, categories) = future::try_join(
                store.workout_stats(&user_id),
                store.category_breakdown(&user_id),
            )
            .await?;
            println!("Workouts:        {}", stats.total_workouts);
            println!("Completions:     {}", stats.total_completions);
            println!("This week:       {}", stats.this_week_workouts);
            println!("This month:      {}", stats.this_month_workouts);
            println!("Current streak:  {} day(s)", stats.current_streak);

            if !categories.is_empty() {
                println!();
                for row in categories {
                    println!(
                        "{:<16} {} workouts, {} completions",
                        row.category, row.workout_count, row.completion_count
                    );
                }
            }
        }
        Commands::History { limit } => {
            for entry in store.workout_history(&user_id, limit).await? {
                let duration = entry
                    .duration_minutes
                    .map(|m| format!("{} min", m))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  {} ({}) {}",
                    entry.completed_at.format("%Y-%m-%d %H:%M"),
                    entry.workout_name,
                    entry.category,
                    duration
                );
            }
        }
    }

    Ok(())
}
