use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info, warn};

use crate::auth::{AuthProvider, Identity};
use crate::clock::Clock;
use crate::config::SessionTiming;
use crate::models::{
    CategoryBreakdown, Exercise, ExercisePerformance, NewWorkout, Workout, WorkoutHistory,
    WorkoutPatch, WorkoutStats,
};
use crate::rest_timer::RestNotifier;
use crate::session::{
    ExerciseField, SessionController, SessionDeps, SessionError, SessionSignal, SessionView,
};
use crate::store::WorkoutStore;

/// Request header carrying the signed-in user's id. Absent means guest.
pub const USER_HEADER: &str = "x-user-id";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Session(e) => match e {
                SessionError::UnknownExercise(_) => StatusCode::NOT_FOUND,
                SessionError::NothingCompleted => StatusCode::UNPROCESSABLE_ENTITY,
                SessionError::NotConfirming | SessionError::SessionClosed(_) => {
                    StatusCode::CONFLICT
                }
                SessionError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {:#}", self);
        }
        let body = serde_json::json!({ "status": "error", "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

struct SessionHandle {
    controller: Arc<Mutex<SessionController>>,
    ticker: JoinHandle<()>,
}

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn WorkoutStore>,
    pub auth: AuthProvider,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn RestNotifier>,
    pub timing: SessionTiming,
    pub rest_tick: Duration,
    sessions: Arc<Mutex<HashMap<String, SessionHandle>>>,
}

impl ApiState {
    pub fn new(
        store: Arc<dyn WorkoutStore>,
        auth: AuthProvider,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn RestNotifier>,
        timing: SessionTiming,
        rest_tick: Duration,
    ) -> Self {
        Self {
            store,
            auth,
            clock,
            notifier,
            timing,
            rest_tick,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn session_deps(&self) -> SessionDeps {
        SessionDeps {
            store: self.store.clone(),
            clock: self.clock.clone(),
            notifier: self.notifier.clone(),
            timing: self.timing,
        }
    }

    fn user_id(&self, headers: &HeaderMap) -> String {
        self.auth.current_user_id(&identity(headers))
    }

    async fn owned_workout(&self, user_id: &str, workout_id: &str) -> ApiResult<Workout> {
        match self.store.get_workout(workout_id).await? {
            Some(workout) if workout.user_id == user_id => Ok(workout),
            _ => Err(ApiError::NotFound(format!("Workout {} not found", workout_id))),
        }
    }

    async fn active_session(&self, headers: &HeaderMap) -> ApiResult<Arc<Mutex<SessionController>>> {
        let user_id = self.user_id(headers);
        self.sessions
            .lock()
            .await
            .get(&user_id)
            .map(|handle| handle.controller.clone())
            .ok_or_else(|| ApiError::NotFound("No workout session in progress".to_string()))
    }

    async fn end_session(&self, user_id: &str) {
        if let Some(handle) = self.sessions.lock().await.remove(user_id) {
            handle.ticker.abort();
            info!("Session closed for user {}", user_id);
        }
    }
}

fn identity(headers: &HeaderMap) -> Identity {
    Identity::from_header(headers.get(USER_HEADER).and_then(|v| v.to_str().ok()))
}

/// Drives rest timers while a session is open. Stops itself once the
/// session reaches a terminal state; exit and completion also abort it.
fn spawn_ticker(controller: Arc<Mutex<SessionController>>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let mut session = controller.lock().await;
            if session.state().is_terminal() {
                break;
            }
            if session.has_active_rest() {
                session.tick();
            }
        }
    })
}

pub fn build_cors(allowed_origins: &str) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.trim() == "*" {
        return cors.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

pub fn router(state: ApiState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/api/workouts", get(list_workouts).post(create_workout))
        .route(
            "/api/workouts/:id",
            get(get_workout).patch(update_workout).delete(delete_workout),
        )
        .route("/api/workouts/:id/exercises", put(replace_exercises))
        .route("/api/progress/stats", get(get_stats))
        .route("/api/progress/categories", get(get_categories))
        .route("/api/progress/history", get(get_history))
        .route("/api/progress/history/:id/exercises", get(get_performances))
        .route("/api/session", get(get_session).post(start_session))
        .route("/api/session/complete", post(request_completion))
        .route("/api/session/confirm", post(confirm_completion))
        .route("/api/session/cancel", post(cancel_completion))
        .route("/api/session/exit", post(exit_session))
        .route("/api/session/resume", post(resume_session))
        .route("/api/session/exercises/:id", axum::routing::patch(update_field))
        .route("/api/session/exercises/:id/toggle", post(toggle_exercise))
        .route("/api/session/exercises/:id/edit", post(begin_edit))
        .route("/api/session/exercises/:id/discard", post(discard_edit))
        .route("/api/session/exercises/:id/confirm", post(confirm_edit))
        .route("/api/session/exercises/:id/rest", post(press_rest))
        .layer(cors)
        .with_state(state)
}

pub async fn run_server(state: ApiState, bind_addr: &str, cors: CorsLayer) -> anyhow::Result<()> {
    let app = router(state, cors);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("API server running at http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

// ── Workouts ─────────────────────────────────────────────────────────

/// Every exercise needs at least one set, and ids must be unique within a
/// workout (blank ids are assigned on insert).
fn validate_exercises(exercises: &[Exercise]) -> ApiResult<()> {
    let mut seen = std::collections::HashSet::new();
    for exercise in exercises {
        if exercise.sets < 1 {
            return Err(ApiError::Invalid(format!(
                "Exercise '{}' must have at least one set",
                exercise.name
            )));
        }
        if !exercise.id.is_empty() && !seen.insert(exercise.id.as_str()) {
            return Err(ApiError::Invalid(format!(
                "Duplicate exercise id: {}",
                exercise.id
            )));
        }
    }
    Ok(())
}

async fn list_workouts(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Workout>>> {
    let user_id = state.user_id(&headers);
    Ok(Json(state.store.list_workouts(&user_id).await?))
}

async fn create_workout(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(data): Json<NewWorkout>,
) -> ApiResult<(StatusCode, Json<Workout>)> {
    validate_exercises(&data.exercises)?;
    let user_id = state.user_id(&headers);
    let workout = state.store.create_workout(&user_id, data).await?;
    info!("Created workout {} for {}", workout.id, user_id);
    Ok((StatusCode::CREATED, Json(workout)))
}

async fn get_workout(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Workout>> {
    let user_id = state.user_id(&headers);
    Ok(Json(state.owned_workout(&user_id, &id).await?))
}

async fn update_workout(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<WorkoutPatch>,
) -> ApiResult<Json<Workout>> {
    if let Some(exercises) = &patch.exercises {
        validate_exercises(exercises)?;
    }
    let user_id = state.user_id(&headers);
    state.owned_workout(&user_id, &id).await?;
    Ok(Json(state.store.update_workout(&id, patch).await?))
}

async fn delete_workout(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let user_id = state.user_id(&headers);
    state.owned_workout(&user_id, &id).await?;
    state.store.delete_workout(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn replace_exercises(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(exercises): Json<Vec<Exercise>>,
) -> ApiResult<Json<Workout>> {
    validate_exercises(&exercises)?;
    let user_id = state.user_id(&headers);
    state.owned_workout(&user_id, &id).await?;
    state.store.replace_exercises(&id, exercises).await?;
    Ok(Json(state.owned_workout(&user_id, &id).await?))
}

// ── Progress ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

async fn get_stats(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<WorkoutStats>> {
    let user_id = state.user_id(&headers);
    Ok(Json(state.store.workout_stats(&user_id).await?))
}

async fn get_categories(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<CategoryBreakdown>>> {
    let user_id = state.user_id(&headers);
    Ok(Json(state.store.category_breakdown(&user_id).await?))
}

async fn get_history(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<WorkoutHistory>>> {
    let user_id = state.user_id(&headers);
    Ok(Json(state.store.workout_history(&user_id, query.limit).await?))
}

async fn get_performances(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ExercisePerformance>>> {
    let user_id = state.user_id(&headers);
    state
        .store
        .exercise_performances(&user_id, &id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("History entry {} not found", id)))
}

// ── Session ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSession {
    pub workout_id: String,
}

#[derive(Debug, Deserialize)]
pub struct FieldUpdate {
    pub field: ExerciseField,
    pub value: String,
}

/// Response for transitions that close the session view.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTransition {
    pub signal: SessionSignal,
    pub save_error: Option<String>,
    pub view: SessionView,
}

async fn start_session(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<StartSession>,
) -> ApiResult<(StatusCode, Json<SessionView>)> {
    let identity = identity(&headers);
    let user_id = state.auth.current_user_id(&identity);
    let workout = state.owned_workout(&user_id, &body.workout_id).await?;

    let mut sessions = state.sessions.lock().await;
    if let Some(existing) = sessions.get(&user_id) {
        if !existing.controller.lock().await.state().is_terminal() {
            return Err(ApiError::Conflict(
                "A workout session is already in progress".to_string(),
            ));
        }
    }

    let context = state.auth.session_context(identity, &workout.id);
    let controller = SessionController::start(context, workout, state.session_deps());
    let view = controller.view().await;
    let controller = Arc::new(Mutex::new(controller));
    let ticker = spawn_ticker(controller.clone(), state.rest_tick);

    if let Some(previous) = sessions.insert(user_id, SessionHandle { controller, ticker }) {
        previous.ticker.abort();
    }
    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_session(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<SessionView>> {
    let session = state.active_session(&headers).await?;
    let session = session.lock().await;
    Ok(Json(session.view().await))
}

async fn request_completion(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<SessionView>> {
    let session = state.active_session(&headers).await?;
    let mut session = session.lock().await;
    session.request_completion()?;
    Ok(Json(session.view().await))
}

async fn cancel_completion(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<SessionView>> {
    let session = state.active_session(&headers).await?;
    let mut session = session.lock().await;
    session.cancel_completion()?;
    Ok(Json(session.view().await))
}

async fn confirm_completion(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<SessionTransition>> {
    let user_id = state.user_id(&headers);
    let session = state.active_session(&headers).await?;
    let transition = {
        let mut session = session.lock().await;
        let signal = session.confirm_completion().await?;
        SessionTransition {
            signal,
            save_error: None,
            view: session.view().await,
        }
    };
    state.end_session(&user_id).await;
    Ok(Json(transition))
}

async fn exit_session(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<SessionTransition>> {
    let user_id = state.user_id(&headers);
    let session = state.active_session(&headers).await?;
    let transition = {
        let mut session = session.lock().await;
        let outcome = session.exit().await?;
        SessionTransition {
            signal: outcome.signal,
            save_error: outcome.save_error,
            view: session.view().await,
        }
    };
    state.end_session(&user_id).await;
    Ok(Json(transition))
}

async fn resume_session(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<SessionView>> {
    let session = state.active_session(&headers).await?;
    let mut session = session.lock().await;
    session.resume();
    Ok(Json(session.view().await))
}

async fn toggle_exercise(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionView>> {
    let session = state.active_session(&headers).await?;
    let mut session = session.lock().await;
    session.toggle_exercise_complete(&id)?;
    Ok(Json(session.view().await))
}

async fn begin_edit(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionView>> {
    let session = state.active_session(&headers).await?;
    let mut session = session.lock().await;
    session.begin_edit(&id)?;
    Ok(Json(session.view().await))
}

async fn update_field(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(update): Json<FieldUpdate>,
) -> ApiResult<Json<SessionView>> {
    let session = state.active_session(&headers).await?;
    let mut session = session.lock().await;
    session.update_field(&id, update.field, update.value).await?;
    Ok(Json(session.view().await))
}

async fn discard_edit(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionView>> {
    let session = state.active_session(&headers).await?;
    let mut session = session.lock().await;
    session.discard_edit(&id).await?;
    Ok(Json(session.view().await))
}

async fn confirm_edit(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionView>> {
    let session = state.active_session(&headers).await?;
    let mut session = session.lock().await;
    session.confirm_edit(&id).await?;
    Ok(Json(session.view().await))
}

async fn press_rest(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionView>> {
    let session = state.active_session(&headers).await?;
    let mut session = session.lock().await;
    session.press_rest(&id)?;
    Ok(Json(session.view().await))
}
