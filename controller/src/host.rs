use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::{Path as FsPath, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use serde_json::Value;
use tokio::{net::TcpListener, sync::Mutex};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use setback_common::{
    controller_state_topic, Actuator, CoordinatorConfig, CoordinatorState, DeviceInfo,
    PersistedSettings, RuntimeConfig, SetTemperature, SetbackCoordinator, SetbackError,
    StateChangedEvent,
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 16 * 1024;

#[derive(Clone)]
struct AppState {
    controllers: Arc<Vec<Controller>>,
    event_topic: Arc<String>,
    mqtt: AsyncClient,
    store: AppStore,
}

/// One climate device and the coordinator that owns its setback state.
struct Controller {
    id: usize,
    coordinator: Mutex<SetbackCoordinator<MqttActuator>>,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    state_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

/// Publishes set-temperature commands without waiting for the broker.
struct MqttActuator {
    mqtt: AsyncClient,
    topic: String,
}

impl Actuator for MqttActuator {
    fn submit(&self, command: SetTemperature) {
        let body = match serde_json::to_vec(&command) {
            Ok(body) => body,
            Err(err) => {
                warn!("set_temperature serialization failed: {err}");
                return;
            }
        };

        if let Err(err) = self
            .mqtt
            .try_publish(self.topic.as_str(), QoS::AtLeastOnce, false, body)
        {
            warn!(
                "set_temperature for {} not submitted: {err}",
                command.entity_id
            );
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct ControllerView {
    id: usize,
    device: DeviceInfo,
    climate_device: String,
    schedule_device: String,
    binary_input: Option<String>,
    state: CoordinatorState,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    if runtime.controllers.is_empty() {
        runtime.controllers.extend(controller_from_env());
    }
    runtime.sanitize();
    if runtime.controllers.is_empty() {
        warn!("no valid controllers configured; only the HTTP API will be served");
    }

    let persisted = store.load_state().await.unwrap_or_else(|err| {
        warn!("failed to load persisted state from store: {err:#}");
        HashMap::new()
    });

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let mut mqtt_options = MqttOptions::new("setback-controller-rust", mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let controllers = build_controllers(
        &runtime,
        &persisted,
        &mqtt,
        &runtime.network.command_topic,
    );
    let app_state = AppState {
        controllers: Arc::new(controllers),
        event_topic: Arc::new(runtime.network.event_topic.clone()),
        mqtt,
        store,
    };

    app_state
        .mqtt
        .subscribe(app_state.event_topic.as_str(), QoS::AtMostOnce)
        .await
        .context("failed to subscribe to state events")?;
    spawn_mqtt_loop(app_state.clone(), eventloop);

    let now = Utc::now();
    for controller in app_state.controllers.iter() {
        controller.coordinator.lock().await.refresh(now);
    }

    let app = router(app_state);

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("setback controller listening on http://{addr}");
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
    info!("shutting down setback controller");
}

fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/controllers", get(handle_list_controllers))
        .route("/api/controllers/{id}", get(handle_get_controller))
        .route("/api/controllers/{id}/forced", post(handle_set_forced))
        .route("/api/controllers/{id}/active", post(handle_set_active))
        .route(
            "/api/controllers/{id}/setback-temperature",
            post(handle_set_setback_temperature),
        )
        .route(
            "/api/controllers/{id}/normal-temperature",
            post(handle_set_normal_temperature),
        )
        .route("/api/controllers/{id}/set-setback", post(handle_set_setback))
        .route(
            "/api/controllers/{id}/clear-setback",
            post(handle_clear_setback),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

fn controller_from_env() -> Option<CoordinatorConfig> {
    let climate_device = std::env::var("SETBACK_CLIMATE_DEVICE").ok()?;
    let schedule_device = std::env::var("SETBACK_SCHEDULE_DEVICE").ok()?;

    let mut config = CoordinatorConfig::new(climate_device, schedule_device);
    config.name = std::env::var("SETBACK_NAME").ok();
    config.binary_input = std::env::var("SETBACK_BINARY_INPUT")
        .ok()
        .filter(|value| !value.trim().is_empty());
    Some(config)
}

fn build_controllers(
    runtime: &RuntimeConfig,
    persisted: &HashMap<String, Value>,
    mqtt: &AsyncClient,
    command_topic: &str,
) -> Vec<Controller> {
    runtime
        .controllers
        .iter()
        .enumerate()
        .map(|(id, config)| {
            let settings = persisted
                .get(&config.climate_device)
                .map(PersistedSettings::restore)
                .unwrap_or_default();

            let actuator = MqttActuator {
                mqtt: mqtt.clone(),
                topic: command_topic.to_string(),
            };
            let mut coordinator = SetbackCoordinator::new(config.clone(), settings, actuator);

            let publisher = mqtt.clone();
            let state_topic = controller_state_topic(id);
            coordinator.add_listener(move |state: &CoordinatorState| {
                match serde_json::to_vec(state) {
                    Ok(body) => {
                        if let Err(err) =
                            publisher.try_publish(state_topic.as_str(), QoS::AtLeastOnce, true, body)
                        {
                            warn!("controller state publish failed: {err}");
                        }
                    }
                    Err(err) => warn!("controller state serialization failed: {err}"),
                }
            });

            info!(
                "controller {id} manages {} (schedule {}, binary input {})",
                config.climate_device,
                config.schedule_device,
                config.binary_input.as_deref().unwrap_or("none")
            );

            Controller {
                id,
                coordinator: Mutex::new(coordinator),
            }
        })
        .collect()
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, &message.topic, &message.payload).await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: &str,
    payload: &[u8],
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    if topic != app_state.event_topic.as_str() {
        return Ok(());
    }

    let event: StateChangedEvent =
        serde_json::from_slice(payload).context("malformed state changed event")?;
    if event.new_state.is_none() {
        debug!("ignoring {} without new state", event.entity_id);
        return Ok(());
    }

    let now = Utc::now();
    let mut recovery_completed = false;
    for controller in app_state.controllers.iter() {
        let mut coordinator = controller.coordinator.lock().await;
        if !coordinator.config().references(&event.entity_id) {
            continue;
        }

        let before = coordinator.last_recovery_time();
        coordinator.handle_event(&event, now);
        recovery_completed |= coordinator.last_recovery_time() != before;
    }

    if recovery_completed {
        persist_state(app_state).await?;
    }
    Ok(())
}

async fn handle_list_controllers(State(state): State<AppState>) -> impl IntoResponse {
    let mut views = Vec::with_capacity(state.controllers.len());
    for controller in state.controllers.iter() {
        views.push(controller.view().await);
    }
    Json(views)
}

async fn handle_get_controller(
    State(state): State<AppState>,
    Path(id): Path<usize>,
) -> axum::response::Response {
    match state.controllers.get(id) {
        Some(controller) => Json(controller.view().await).into_response(),
        None => unknown_controller(),
    }
}

async fn handle_set_forced(
    State(state): State<AppState>,
    Path(id): Path<usize>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let Some(forced) = switch_param(&params) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid value. Use 'on' or 'off'");
    };
    mutate(&state, id, |coordinator| {
        coordinator.set_forced_setback(forced, Utc::now());
        Ok(())
    })
    .await
}

async fn handle_set_active(
    State(state): State<AppState>,
    Path(id): Path<usize>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let Some(active) = switch_param(&params) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid value. Use 'on' or 'off'");
    };
    mutate(&state, id, |coordinator| {
        coordinator.set_controller_active(active, Utc::now());
        Ok(())
    })
    .await
}

async fn handle_set_setback_temperature(
    State(state): State<AppState>,
    Path(id): Path<usize>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let Some(temperature) = temperature_param(&params) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    };
    mutate(&state, id, |coordinator| {
        let config = coordinator.config();
        check_range(
            temperature,
            config.setback_temperature_min,
            config.setback_temperature_max,
        )?;
        coordinator.set_setback_temperature(temperature, Utc::now());
        Ok(())
    })
    .await
}

async fn handle_set_normal_temperature(
    State(state): State<AppState>,
    Path(id): Path<usize>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let Some(temperature) = temperature_param(&params) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    };
    mutate(&state, id, |coordinator| {
        check_range(
            temperature,
            coordinator.normal_temperature_min(),
            coordinator.normal_temperature_max(),
        )?;
        coordinator.set_normal_temperature(temperature, Utc::now());
        Ok(())
    })
    .await
}

async fn handle_set_setback(
    State(state): State<AppState>,
    Path(id): Path<usize>,
) -> axum::response::Response {
    mutate(&state, id, |coordinator| {
        coordinator.set_forced_setback(true, Utc::now());
        Ok(())
    })
    .await
}

async fn handle_clear_setback(
    State(state): State<AppState>,
    Path(id): Path<usize>,
) -> axum::response::Response {
    mutate(&state, id, |coordinator| {
        coordinator.set_forced_setback(false, Utc::now());
        Ok(())
    })
    .await
}

/// Applies one change under the coordinator lock, persists, and answers
/// with the resulting view.
async fn mutate<F>(state: &AppState, id: usize, change: F) -> axum::response::Response
where
    F: FnOnce(&mut SetbackCoordinator<MqttActuator>) -> Result<(), SetbackError>,
{
    let Some(controller) = state.controllers.get(id) else {
        return unknown_controller();
    };

    {
        let mut coordinator = controller.coordinator.lock().await;
        if let Err(err) = change(&mut coordinator) {
            return error_response(StatusCode::BAD_REQUEST, &err.to_string());
        }
    }

    if let Err(err) = persist_state(state).await {
        warn!("failed to persist controller state: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist controller state",
        );
    }

    Json(controller.view().await).into_response()
}

impl Controller {
    async fn view(&self) -> ControllerView {
        let coordinator = self.coordinator.lock().await;
        let config = coordinator.config();
        ControllerView {
            id: self.id,
            device: coordinator.device_info(self.id.to_string()),
            climate_device: config.climate_device.clone(),
            schedule_device: config.schedule_device.clone(),
            binary_input: config.binary_input.clone(),
            state: coordinator.state(),
        }
    }
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("SETBACK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.setback"));
        Self::with_dir(&data_dir)
    }

    fn with_dir(data_dir: &FsPath) -> Self {
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            state_path: Arc::new(data_dir.join("state.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    #[cfg(test)]
    async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        write_json(self.runtime_path.as_ref(), runtime).await
    }

    /// Raw values keyed by climate device; coercion happens in
    /// [`PersistedSettings::restore`].
    async fn load_state(&self) -> anyhow::Result<HashMap<String, Value>> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.state_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<HashMap<String, Value>>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    #[cfg(test)]
    async fn save_state(&self, state: &HashMap<String, PersistedSettings>) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        write_json(self.state_path.as_ref(), state).await
    }
}

async fn write_json<T: Serialize>(path: &FsPath, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let payload = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, payload)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Snapshots every coordinator while holding the store lock, so the last
/// write on disk is also the newest snapshot.
async fn persist_state(state: &AppState) -> anyhow::Result<()> {
    let _guard = state.store.lock.lock().await;
    let mut snapshot = HashMap::with_capacity(state.controllers.len());
    for controller in state.controllers.iter() {
        let coordinator = controller.coordinator.lock().await;
        snapshot.insert(
            coordinator.config().climate_device.clone(),
            coordinator.persisted(),
        );
    }
    write_json(state.store.state_path.as_ref(), &snapshot).await
}

fn switch_param(params: &HashMap<String, String>) -> Option<bool> {
    match params.get("value")?.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn temperature_param(params: &HashMap<String, String>) -> Option<f32> {
    params
        .get("value")?
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|value| value.is_finite())
}

fn check_range(value: f32, min: f32, max: f32) -> Result<(), SetbackError> {
    if !value.is_finite() {
        return Err(SetbackError::NonFiniteTemperature);
    }
    if !(min..=max).contains(&value) {
        return Err(SetbackError::TemperatureOutOfRange { value, min, max });
    }
    Ok(())
}

fn unknown_controller() -> axum::response::Response {
    error_response(StatusCode::NOT_FOUND, "Unknown controller")
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
    use super::*;
    use serde_json::json;
    use setback_common::NetworkConfig;

    fn test_state(store: AppStore) -> (AppState, rumqttc::EventLoop) {
        let (mqtt, eventloop) =
            AsyncClient::new(MqttOptions::new("setback-test", "127.0.0.1", 1883), 64);
        let runtime = RuntimeConfig {
            network: NetworkConfig::default(),
            controllers: vec![CoordinatorConfig::new("climate.office", "schedule.workdays")
                .with_binary_input("binary_sensor.window")],
        };
        let controllers = build_controllers(
            &runtime,
            &HashMap::new(),
            &mqtt,
            &runtime.network.command_topic,
        );
        let state = AppState {
            controllers: Arc::new(controllers),
            event_topic: Arc::new(runtime.network.event_topic.clone()),
            mqtt,
            store,
        };
        (state, eventloop)
    }

    #[test]
    fn switch_param_accepts_on_off_variants() {
        let params = |value: &str| HashMap::from([("value".to_string(), value.to_string())]);

        assert_eq!(switch_param(&params("ON")), Some(true));
        assert_eq!(switch_param(&params("0")), Some(false));
        assert_eq!(switch_param(&params("maybe")), None);
        assert_eq!(switch_param(&HashMap::new()), None);
    }

    #[test]
    fn temperature_param_rejects_garbage() {
        let params = |value: &str| HashMap::from([("value".to_string(), value.to_string())]);

        assert_eq!(temperature_param(&params(" 18.5 ")), Some(18.5));
        assert_eq!(temperature_param(&params("warm")), None);
        assert_eq!(temperature_param(&params("NaN")), None);
    }

    #[test]
    fn check_range_reports_bounds() {
        assert_eq!(check_range(20.0, 5.0, 35.0), Ok(()));
        assert_eq!(
            check_range(40.0, 5.0, 35.0),
            Err(SetbackError::TemperatureOutOfRange {
                value: 40.0,
                min: 5.0,
                max: 35.0
            })
        );
    }

    #[tokio::test]
    async fn store_round_trips_state_and_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let store = AppStore::with_dir(dir.path());

        assert!(store.load_state().await.unwrap().is_empty());
        assert!(store.load_runtime_config().await.unwrap().controllers.is_empty());

        let settings = PersistedSettings {
            setback_temperature: 15.0,
            forced_setback: true,
            ..PersistedSettings::default()
        };
        store
            .save_state(&HashMap::from([("climate.office".to_string(), settings.clone())]))
            .await
            .unwrap();

        let loaded = store.load_state().await.unwrap();
        assert_eq!(PersistedSettings::restore(&loaded["climate.office"]), settings);

        let runtime = RuntimeConfig {
            controllers: vec![CoordinatorConfig::new("climate.office", "schedule.workdays")],
            ..RuntimeConfig::default()
        };
        store.save_runtime_config(&runtime).await.unwrap();
        let loaded = store.load_runtime_config().await.unwrap();
        assert_eq!(loaded.controllers, runtime.controllers);
    }

    #[tokio::test]
    async fn state_events_drive_the_matching_coordinator() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _eventloop) = test_state(AppStore::with_dir(dir.path()));

        let event = json!({
            "entity_id": "binary_sensor.window",
            "new_state": {"state": "on", "attributes": {}}
        });
        let payload = serde_json::to_vec(&event).unwrap();
        handle_mqtt_message(&state, &state.event_topic, &payload)
            .await
            .unwrap();

        let view = state.controllers[0].view().await;
        assert!(view.state.input_is_active);
        assert!(view.state.is_setback);
        assert_eq!(view.device.name, "Office");
    }

    #[tokio::test]
    async fn completed_recovery_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = AppStore::with_dir(dir.path());
        let (state, _eventloop) = test_state(store.clone());

        for event in [
            json!({"entity_id": "schedule.workdays", "new_state": {"state": "on"}}),
            json!({"entity_id": "schedule.workdays", "new_state": {"state": "off"}}),
            json!({
                "entity_id": "climate.office",
                "new_state": {
                    "state": "heat",
                    "attributes": {"current_temperature": 20.5, "temperature": 20.0}
                }
            }),
        ] {
            let payload = serde_json::to_vec(&event).unwrap();
            handle_mqtt_message(&state, &state.event_topic, &payload)
                .await
                .unwrap();
        }

        let view = state.controllers[0].view().await;
        assert!(!view.state.is_recovering);
        assert!(view.state.last_recovery_time.is_some());

        let saved = store.load_state().await.unwrap();
        assert!(saved["climate.office"]["last_recovery_time"].is_number());
    }

    #[tokio::test]
    async fn missing_new_state_and_foreign_topics_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _eventloop) = test_state(AppStore::with_dir(dir.path()));

        let payload = br#"{"entity_id": "schedule.workdays", "new_state": null}"#;
        handle_mqtt_message(&state, &state.event_topic, payload)
            .await
            .unwrap();
        handle_mqtt_message(&state, "other/topic", b"not json")
            .await
            .unwrap();

        let view = state.controllers[0].view().await;
        assert!(!view.state.schedule_active);
        assert!(!view.state.is_recovering);
    }

    #[tokio::test]
    async fn out_of_range_setpoint_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _eventloop) = test_state(AppStore::with_dir(dir.path()));

        let response = mutate(&state, 0, |coordinator| {
            check_range(
                50.0,
                coordinator.normal_temperature_min(),
                coordinator.normal_temperature_max(),
            )?;
            coordinator.set_normal_temperature(50.0, Utc::now());
            Ok(())
        })
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = mutate(&state, 7, |_| Ok(())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let view = state.controllers[0].view().await;
        assert_eq!(view.state.normal_temperature, 20.0);
    }

    #[tokio::test]
    async fn concurrent_changes_all_reach_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = AppStore::with_dir(dir.path());
        let (state, _eventloop) = test_state(store.clone());

        let forced = mutate(&state, 0, |coordinator| {
            coordinator.set_forced_setback(true, Utc::now());
            Ok(())
        });
        let normal = mutate(&state, 0, |coordinator| {
            coordinator.set_normal_temperature(21.5, Utc::now());
            Ok(())
        });
        let (forced, normal) = tokio::join!(forced, normal);
        assert_eq!(forced.status(), StatusCode::OK);
        assert_eq!(normal.status(), StatusCode::OK);

        let saved = store.load_state().await.unwrap();
        let restored = PersistedSettings::restore(&saved["climate.office"]);
        assert!(restored.forced_setback);
        assert_eq!(restored.normal_temperature, 21.5);
    }
}
