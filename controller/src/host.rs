use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::Mutex};
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use aircon_common::{
    ControllerConfig, DeviceController, EngineError, EventId, NewScheduleEvent, Preferences,
    RuntimeConfig, ScheduleDriver, ScheduleEngine, ScheduleEvent, UpcomingEventView,
    UpcomingQuery,
};

#[derive(Clone)]
struct AppState {
    device: Arc<Mutex<DeviceController>>,
    schedule: Arc<Mutex<ScheduleEngine>>,
    driver: Arc<Mutex<ScheduleDriver>>,
    preferences: Arc<Mutex<Preferences>>,
    timezone: Arc<Mutex<Tz>>,
    config: Arc<ControllerConfig>,
    store: AppStore,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    schedule_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct TimezoneUpdate {
    timezone: String,
}

#[derive(Debug, Serialize)]
struct TimeStatus {
    timezone: String,
    #[serde(rename = "localTime")]
    local_time: NaiveDateTime,
    #[serde(rename = "nowEpoch")]
    now_epoch: i64,
}

#[derive(Debug, Serialize)]
struct UpcomingResponse {
    events: Vec<UpcomingEventView>,
    skipped: Vec<EventId>,
}

const MAX_UPCOMING_HORIZON_HOURS: i64 = 24 * 366;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();

    let schedule = match store.load_schedule().await {
        Ok(Some(events)) => ScheduleEngine::from_events(events),
        Ok(None) => {
            info!("no stored schedule, seeding demo events");
            ScheduleEngine::with_demo_events()
        }
        Err(err) => {
            warn!("failed to load schedule from store: {err:#}");
            ScheduleEngine::new()
        }
    };

    let timezone_name = std::env::var("AIRCON_TIMEZONE").unwrap_or(runtime.timezone.clone());
    let timezone = timezone_name.parse::<Tz>().unwrap_or_else(|_| {
        warn!("unknown timezone '{timezone_name}', falling back to UTC");
        Tz::UTC
    });

    let app_state = AppState {
        device: Arc::new(Mutex::new(DeviceController::new(runtime.settings.clone()))),
        schedule: Arc::new(Mutex::new(schedule)),
        driver: Arc::new(Mutex::new(ScheduleDriver::new())),
        preferences: Arc::new(Mutex::new(runtime.preferences.clone())),
        timezone: Arc::new(Mutex::new(timezone)),
        config: Arc::new(runtime.controller.clone()),
        store,
    };

    spawn_control_loop(app_state.clone());
    spawn_state_log_loop(app_state.clone());

    let web_root = std::env::var("AIRCON_WEB_ROOT").unwrap_or_else(|_| "./web".to_string());
    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/power", post(handle_set_power))
        .route("/api/temperature", post(handle_adjust_temperature))
        .route("/api/temperature/up", post(handle_temperature_up))
        .route("/api/temperature/down", post(handle_temperature_down))
        .route("/api/mode", post(handle_set_mode))
        .route("/api/fan", post(handle_set_fan))
        .route("/api/swing", post(handle_set_swing))
        .route("/api/timer", post(handle_set_timer))
        .route(
            "/api/schedule",
            get(handle_get_schedule).post(handle_create_event),
        )
        .route("/api/schedule/upcoming", get(handle_get_upcoming))
        .route("/api/schedule/{id}", delete(handle_delete_event))
        .route(
            "/api/preferences",
            get(handle_get_preferences).put(handle_put_preferences),
        )
        .route("/api/time", get(handle_get_time))
        .route("/api/timezone", put(handle_put_timezone))
        .fallback_service(ServeDir::new(web_root))
        .with_state(app_state);

    let port = std::env::var("AIRCON_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn spawn_control_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_millis(app_state.config.reconcile_interval_ms));

        loop {
            interval.tick().await;

            let now = {
                let timezone = *app_state.timezone.lock().await;
                local_now(timezone)
            };

            let applied = {
                let schedule = app_state.schedule.lock().await;
                let mut device = app_state.device.lock().await;
                let mut driver = app_state.driver.lock().await;
                driver.reconcile(&schedule, &mut device, now)
            };

            if applied.iter().any(|event| event.changed) {
                if let Err(err) = persist_runtime_from_state(&app_state).await {
                    warn!("failed to persist scheduled device change: {err:#}");
                }
            }
        }
    });
}

fn spawn_state_log_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_millis(app_state.config.state_log_interval_ms));
        loop {
            interval.tick().await;

            let state = app_state.device.lock().await.snapshot();
            let now = {
                let timezone = *app_state.timezone.lock().await;
                local_now(timezone)
            };
            let next = {
                let schedule = app_state.schedule.lock().await;
                let upcoming = schedule.resolve_upcoming(now, Some(1), None);
                upcoming
                    .first()
                    .map(|occurrence| (occurrence.event.id, occurrence.at))
            };

            match serde_json::to_string(&state) {
                Ok(body) => info!(state = %body, next_event = ?next, "device state"),
                Err(err) => warn!("device state serialization failed: {err}"),
            }
        }
    });
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let preferences = state.preferences.lock().await.clone();
    let status = state.device.lock().await.status(&preferences);
    Json(status)
}

/// Runs one device mutation, persists when it changed something and
/// answers with the fresh status.
async fn update_device<F>(state: AppState, update: F) -> axum::response::Response
where
    F: FnOnce(&mut DeviceController) -> Result<bool, EngineError>,
{
    let result = {
        let mut device = state.device.lock().await;
        update(&mut device)
    };

    match result {
        Ok(true) => {
            if let Err(err) = persist_runtime_from_state(&state).await {
                warn!("failed to persist device update: {err:#}");
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to persist runtime settings",
                );
            }
        }
        Ok(false) => {}
        Err(err) => return engine_error_response(&err),
    }

    handle_get_status(State(state)).await.into_response()
}

async fn handle_set_power(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };

    let toggle = value.eq_ignore_ascii_case("toggle");
    let on = match parse_switch(value) {
        Some(on) => on,
        None if toggle => false,
        None => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "Invalid power value. Use 'on', 'off' or 'toggle'",
            )
        }
    };

    update_device(state, move |device| {
        Ok(if toggle {
            device.toggle_power()
        } else {
            device.set_power(on)
        })
    })
    .await
}

async fn handle_adjust_temperature(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("delta") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'delta' parameter");
    };
    let Ok(delta) = value.parse::<i32>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature delta");
    };

    update_device(state, move |device| Ok(device.adjust_temperature(delta))).await
}

async fn handle_temperature_up(State(state): State<AppState>) -> impl IntoResponse {
    update_device(state, |device| Ok(device.adjust_temperature(1))).await
}

async fn handle_temperature_down(State(state): State<AppState>) -> impl IntoResponse {
    update_device(state, |device| Ok(device.adjust_temperature(-1))).await
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value").cloned() else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };

    update_device(state, move |device| device.set_mode_str(&value)).await
}

async fn handle_set_fan(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value").cloned() else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };

    update_device(state, move |device| device.set_fan_speed_str(&value)).await
}

async fn handle_set_swing(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(swing) = params.get("value").and_then(|value| parse_switch(value)) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid swing value. Use 'on' or 'off'",
        );
    };

    update_device(state, move |device| Ok(device.set_swing(swing))).await
}

async fn handle_set_timer(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(minutes) = value.parse::<i64>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid timer value (0-480)");
    };

    update_device(state, move |device| Ok(device.set_timer(minutes))).await
}

async fn handle_get_schedule(State(state): State<AppState>) -> impl IntoResponse {
    let events = state.schedule.lock().await.to_events();
    Json(events)
}

async fn handle_create_event(
    State(state): State<AppState>,
    Json(fields): Json<NewScheduleEvent>,
) -> impl IntoResponse {
    // Held until the save completes so snapshots reach disk in order.
    let mut schedule = state.schedule.lock().await;
    let created = match schedule.create_event(fields) {
        Ok(event) => event,
        Err(err) => return engine_error_response(&err),
    };

    info!(event = %created.id, title = %created.title, "schedule event created");
    if let Err(err) = state.store.save_schedule(&schedule.to_events()).await {
        warn!("failed to persist schedule: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist schedule",
        );
    }

    (StatusCode::CREATED, Json(created)).into_response()
}

async fn handle_delete_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = id.parse::<EventId>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid event id");
    };

    let mut schedule = state.schedule.lock().await;
    let removed = match schedule.delete_event(id) {
        Ok(event) => event,
        Err(err) => return engine_error_response(&err),
    };

    info!(event = %removed.id, "schedule event deleted");
    if let Err(err) = state.store.save_schedule(&schedule.to_events()).await {
        warn!("failed to persist schedule: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist schedule",
        );
    }

    Json(removed).into_response()
}

async fn handle_get_upcoming(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let limit = match params.get("limit").map(|value| value.parse::<usize>()) {
        None => state.config.upcoming_limit,
        Some(Ok(limit)) => limit,
        Some(Err(_)) => return error_response(StatusCode::BAD_REQUEST, "Invalid limit"),
    };
    let horizon_hours = match params.get("horizonHours").map(|value| value.parse::<i64>()) {
        None => None,
        Some(Ok(hours)) if (0..=MAX_UPCOMING_HORIZON_HOURS).contains(&hours) => Some(hours),
        Some(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid horizonHours"),
    };

    let now = local_now(*state.timezone.lock().await);
    let mut query = UpcomingQuery::new(now).limit(limit);
    if let Some(hours) = horizon_hours {
        query = query.horizon(now + chrono::Duration::hours(hours));
    }

    let (events, skipped) = {
        let schedule = state.schedule.lock().await;
        let resolution = schedule.resolve(&query);
        let events: Vec<UpcomingEventView> =
            resolution.occurrences.iter().map(|o| o.view()).collect();
        let skipped: Vec<EventId> = resolution.skipped.iter().map(|s| s.id).collect();
        (events, skipped)
    };

    Json(UpcomingResponse { events, skipped }).into_response()
}

async fn handle_get_preferences(State(state): State<AppState>) -> impl IntoResponse {
    let preferences = state.preferences.lock().await.clone();
    Json(preferences)
}

async fn handle_put_preferences(
    State(state): State<AppState>,
    Json(mut update): Json<Preferences>,
) -> impl IntoResponse {
    update.sanitize();
    {
        let mut preferences = state.preferences.lock().await;
        *preferences = update.clone();
    }

    if let Err(err) = persist_runtime_from_state(&state).await {
        warn!("failed to persist preferences: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist preferences",
        );
    }

    Json(update).into_response()
}

async fn handle_get_time(State(state): State<AppState>) -> impl IntoResponse {
    let timezone = *state.timezone.lock().await;
    Json(TimeStatus {
        timezone: timezone.name().to_string(),
        local_time: local_now(timezone),
        now_epoch: Utc::now().timestamp(),
    })
}

async fn handle_put_timezone(
    State(state): State<AppState>,
    Json(update): Json<TimezoneUpdate>,
) -> impl IntoResponse {
    let Ok(timezone) = update.timezone.trim().parse::<Tz>() else {
        return error_response(StatusCode::BAD_REQUEST, "Unknown timezone");
    };

    {
        let mut active = state.timezone.lock().await;
        *active = timezone;
    }
    info!(timezone = timezone.name(), "timezone updated");

    if let Err(err) = persist_runtime_from_state(&state).await {
        warn!("failed to persist timezone update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist runtime settings",
        );
    }

    handle_get_time(State(state)).await.into_response()
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("AIRCON_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.aircon"));
        Self::in_dir(data_dir)
    }

    fn in_dir(data_dir: PathBuf) -> Self {
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            schedule_path: Arc::new(data_dir.join("schedule.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
                .context("failed to parse runtime config"),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        write_json(self.runtime_path.as_ref(), runtime).await
    }

    /// `None` when no schedule has ever been saved.
    async fn load_schedule(&self) -> anyhow::Result<Option<Vec<ScheduleEvent>>> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.schedule_path.as_ref()).await {
            Ok(raw) => serde_json::from_slice::<Vec<ScheduleEvent>>(&raw)
                .map(Some)
                .context("failed to parse stored schedule"),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_schedule(&self, events: &[ScheduleEvent]) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        write_json(self.schedule_path.as_ref(), &events).await
    }
}

async fn write_json<T: Serialize>(path: &std::path::Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let payload = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, payload)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    debug!(path = %path.display(), "saved");
    Ok(())
}

async fn persist_runtime_from_state(state: &AppState) -> anyhow::Result<()> {
    let settings = state.device.lock().await.settings();
    let preferences = state.preferences.lock().await.clone();
    let timezone = state.timezone.lock().await.name().to_string();

    let mut runtime = state.store.load_runtime_config().await?;
    runtime.settings = settings;
    runtime.preferences = preferences;
    runtime.timezone = timezone;
    runtime.controller = state.config.as_ref().clone();
    state.store.save_runtime_config(&runtime).await
}

fn local_now(timezone: Tz) -> NaiveDateTime {
    Utc::now().with_timezone(&timezone).naive_local()
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn engine_error_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::Validation { .. } | EngineError::InvalidArgument { .. } => {
            StatusCode::BAD_REQUEST
        }
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
    }
}

fn engine_error_response(err: &EngineError) -> axum::response::Response {
    error_response(engine_error_status(err), &err.to_string())
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_switch_values() {
        assert_eq!(parse_switch("ON"), Some(true));
        assert_eq!(parse_switch(" off "), Some(false));
        assert_eq!(parse_switch("toggle"), None);
    }

    #[test]
    fn maps_engine_errors_to_status_codes() {
        assert_eq!(
            engine_error_status(&EngineError::validation("date", "bad")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            engine_error_status(&EngineError::invalid_argument("mode", "blast")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            engine_error_status(&EngineError::NotFound(EventId::new(9))),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn store_round_trips_schedule_and_runtime() {
        let dir = std::env::temp_dir().join(format!("aircon-store-{}", std::process::id()));
        let store = AppStore::in_dir(dir.clone());

        assert!(store.load_schedule().await.unwrap().is_none());

        let events = ScheduleEngine::with_demo_events().to_events();
        store.save_schedule(&events).await.unwrap();
        assert_eq!(store.load_schedule().await.unwrap(), Some(events));

        let runtime = RuntimeConfig {
            timezone: "Europe/Berlin".to_string(),
            ..RuntimeConfig::default()
        };
        store.save_runtime_config(&runtime).await.unwrap();
        assert_eq!(
            store.load_runtime_config().await.unwrap().timezone,
            "Europe/Berlin"
        );

        let _ = std::fs::remove_dir_all(dir);
    }

    fn state_in_dir(dir: PathBuf) -> AppState {
        AppState {
            device: Arc::new(Mutex::new(DeviceController::default())),
            schedule: Arc::new(Mutex::new(ScheduleEngine::new())),
            driver: Arc::new(Mutex::new(ScheduleDriver::new())),
            preferences: Arc::new(Mutex::new(Preferences::default())),
            timezone: Arc::new(Mutex::new(Tz::UTC)),
            config: Arc::new(ControllerConfig::default()),
            store: AppStore::in_dir(dir),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_schedule_edits_all_reach_the_store() {
        let dir = std::env::temp_dir().join(format!("aircon-edits-{}", std::process::id()));
        let state = state_in_dir(dir.clone());

        let mut tasks = Vec::new();
        for hour in 0..16 {
            let state = state.clone();
            tasks.push(tokio::spawn(async move {
                let fields = NewScheduleEvent {
                    title: format!("event {hour}"),
                    date: "2024-07-15".to_string(),
                    time: format!("{hour:02}:00"),
                    action: "off".to_string(),
                    recurring: Some("daily".to_string()),
                    ..NewScheduleEvent::default()
                };
                handle_create_event(State(state), Json(fields))
                    .await
                    .into_response()
                    .status()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), StatusCode::CREATED);
        }

        let deleted = handle_delete_event(State(state.clone()), Path("3".to_string()))
            .await
            .into_response();
        assert_eq!(deleted.status(), StatusCode::OK);

        let stored = state.store.load_schedule().await.unwrap().unwrap();
        assert_eq!(stored.len(), 15);
        assert_eq!(stored, state.schedule.lock().await.to_events());

        let _ = std::fs::remove_dir_all(dir);
    }
}
