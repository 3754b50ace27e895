pub mod api;
pub mod auth;
pub mod autosave;
pub mod clock;
pub mod config;
pub mod db;
pub mod models;
pub mod rest_timer;
pub mod session;
pub mod session_clock;
pub mod store;

#[cfg(test)]
pub mod memory_store;
