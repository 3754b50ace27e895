use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database_url: String,

    // API Settings
    pub api_bind_addr: String,
    pub cors_allowed_origins: String,

    // Identity used when no authenticated user is present
    pub guest_user_id: String,

    // Session Settings
    pub autosave_debounce_ms: u64,
    pub saved_marker_ms: u64,
    pub rest_tick_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "workout_tracker.db".to_string(),
            api_bind_addr: "127.0.0.1:3001".to_string(),
            cors_allowed_origins: "http://localhost:3000".to_string(),
            guest_user_id: "guest".to_string(),
            autosave_debounce_ms: 1000,
            saved_marker_ms: 2000,
            rest_tick_ms: 100,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, figment::Error> {
        Figment::from(figment::providers::Serialized::defaults(
            AppConfig::default(),
        ))
        .merge(Toml::file("Tracker.toml"))
        .merge(Json::file("Tracker.json"))
        .merge(Env::raw().only(&[
            "DATABASE_URL",
            "API_BIND_ADDR",
            "CORS_ALLOWED_ORIGINS",
            "GUEST_USER_ID",
            "AUTOSAVE_DEBOUNCE_MS",
            "SAVED_MARKER_MS",
            "REST_TICK_MS",
        ]))
        .extract()
    }

    pub fn session_timing(&self) -> SessionTiming {
        SessionTiming {
            debounce: Duration::from_millis(self.autosave_debounce_ms),
            saved_marker: Duration::from_millis(self.saved_marker_ms),
        }
    }

    pub fn database_path(&self) -> String {
        self.database_url.replace("sqlite://", "")
    }
}

/// Debounce and acknowledgement windows handed to each session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    pub debounce: Duration,
    pub saved_marker: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        AppConfig::default().session_timing()
    }
}
