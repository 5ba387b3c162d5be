use std::{
    collections::HashMap,
    future::Future,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, QoS};
use serde::Serialize;
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{info, warn};

use cooling_common::{
    ControllerStatus, RuntimeConfig, TargetMode, TOPIC_CMD_MODE, TOPIC_CMD_TARGET,
    TOPIC_CONTROLLER_STATE, TOPIC_CONTROLLER_STATUS, TOPIC_SENSOR_HUMIDITY, TOPIC_SENSOR_TEMP,
};

use crate::{
    driver::{self, ControlLoop, ControllerHandle, DriverError},
    hardware::{RelayBank, SimulatedDht},
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;

#[derive(Clone)]
struct AppState {
    controller: ControllerHandle,
    accessory: Arc<AccessoryView>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct AccessoryView {
    name: String,
    manufacturer: String,
    model: String,
    serial: String,
    #[serde(rename = "minSetpoint")]
    min_setpoint: f64,
    #[serde(rename = "maxSetpoint")]
    max_setpoint: f64,
    #[serde(rename = "setpointStep")]
    setpoint_step: f64,
    #[serde(rename = "minReportableTemp")]
    min_reportable_temp: f64,
    #[serde(rename = "maxReportableTemp")]
    max_reportable_temp: f64,
    #[serde(rename = "reportableTempStep")]
    reportable_temp_step: f64,
}

#[derive(Debug, Serialize)]
struct MeasurementView {
    temperature: f64,
    humidity: f64,
}

#[derive(Debug, Serialize)]
struct StatePayload<'a> {
    #[serde(flatten)]
    status: &'a ControllerStatus,
    #[serde(rename = "updatedAt")]
    updated_at: DateTime<Utc>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = ConfigStore::new();
    let mut config = store.load().await.unwrap_or_else(|err| {
        warn!("failed to load config from {}: {err:#}", store.path.display());
        RuntimeConfig::default()
    });
    config.sanitize();
    info!(
        name = %config.name,
        sensor = config.temp_sensor_type,
        polling_ms = config.polling_interval,
        cache_timeout_ms = config.cache_timeout,
        "starting cooling controller"
    );

    let compressor = Arc::new(AtomicBool::new(false));
    let source = SimulatedDht::new(
        config.temp_sensor_type,
        config.temp_gpio_pin,
        compressor.clone(),
    );
    let relays = RelayBank::new(
        config.fan_gpio_pin,
        config.compressor_gpio_pin,
        config.relay_active_low,
        compressor,
    );
    let control = ControlLoop::new(source, relays, config.cooling.clone());
    let (controller, control_task) =
        driver::spawn(control, Duration::from_millis(config.polling_interval));

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options(), 64);
    let serving = serve(&config, controller.clone(), mqtt.clone(), eventloop);
    let result = stop_after(&controller, control_task, serving).await;

    if let Err(err) = mqtt.try_publish(TOPIC_CONTROLLER_STATUS, QoS::AtLeastOnce, true, "offline")
    {
        warn!("offline status publish failed: {err}");
    }
    info!("controller stopped");
    result
}

/// Awaits `serving`, then forces the control loop OFF and joins it, whatever
/// `serving` returned.
async fn stop_after<F>(
    controller: &ControllerHandle,
    control_task: JoinHandle<()>,
    serving: F,
) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    let served = serving.await;
    if let Err(err) = controller.shutdown().await {
        warn!("control loop already stopped: {err}");
    }
    let joined = control_task.await.context("control loop task failed");
    served.and(joined)
}

fn mqtt_options() -> MqttOptions {
    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);

    let mut options = MqttOptions::new("cooling-controller-rust", mqtt_host, mqtt_port);
    options.set_last_will(LastWill::new(
        TOPIC_CONTROLLER_STATUS,
        "offline",
        QoS::AtLeastOnce,
        true,
    ));
    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        options.set_credentials(user, pass);
    }
    options
}

async fn serve(
    config: &RuntimeConfig,
    controller: ControllerHandle,
    mqtt: AsyncClient,
    eventloop: rumqttc::EventLoop,
) -> anyhow::Result<()> {
    subscribe_topics(&mqtt).await?;
    mqtt.publish(TOPIC_CONTROLLER_STATUS, QoS::AtLeastOnce, true, "online")
        .await
        .context("failed to queue controller online status")?;
    spawn_mqtt_loop(controller.clone(), eventloop);
    spawn_state_publish_loop(controller.clone(), mqtt);

    let app_state = AppState {
        controller,
        accessory: Arc::new(AccessoryView {
            name: config.name.clone(),
            manufacturer: config.accessory.manufacturer.clone(),
            model: config.accessory.model.clone(),
            serial: config.accessory.serial.clone(),
            min_setpoint: config.cooling.min_setpoint,
            max_setpoint: config.cooling.max_setpoint,
            setpoint_step: config.cooling.setpoint_step,
            min_reportable_temp: config.cooling.min_reportable_temp,
            max_reportable_temp: config.cooling.max_reportable_temp,
            reportable_temp_step: config.cooling.reportable_temp_step,
        }),
    };

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/measurement", get(handle_get_measurement))
        .route("/api/accessory", get(handle_get_accessory))
        .route("/api/target", post(handle_set_target))
        .route("/api/mode", post(handle_set_mode))
        .with_state(app_state);

    let port = std::env::var("CONTROLLER_HTTP_PORT")
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
        .await
        .context("controller http server failed")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    for topic in [TOPIC_CMD_TARGET, TOPIC_CMD_MODE] {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(controller: ControllerHandle, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&controller, message.topic, message.payload.to_vec())
                            .await
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

fn spawn_state_publish_loop(controller: ControllerHandle, mqtt: AsyncClient) {
    tokio::spawn(async move {
        let mut updates = controller.subscribe();
        while updates.changed().await.is_ok() {
            let status = updates.borrow_and_update().clone();
            publish_status(&mqtt, &status).await;
        }
    });
}

async fn publish_status(mqtt: &AsyncClient, status: &ControllerStatus) {
    if status.sensor_valid {
        if let (Some(temp), Some(humidity)) = (status.current_temp, status.current_humidity) {
            let readings = [
                (TOPIC_SENSOR_TEMP, format!("{temp:.1}")),
                (TOPIC_SENSOR_HUMIDITY, format!("{humidity:.1}")),
            ];
            for (topic, payload) in readings {
                if let Err(err) = mqtt.publish(topic, QoS::AtLeastOnce, true, payload).await {
                    warn!("measurement publish on {topic} failed: {err}");
                }
            }
        }
    }

    let payload = StatePayload {
        status,
        updated_at: Utc::now(),
    };
    match serde_json::to_vec(&payload) {
        Ok(body) => {
            if let Err(err) = mqtt
                .publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
                .await
            {
                warn!("controller state publish failed: {err}");
            }
        }
        Err(err) => warn!("controller state serialization failed: {err}"),
    }
}

async fn handle_mqtt_message(
    controller: &ControllerHandle,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;

    match topic.as_str() {
        TOPIC_CMD_TARGET => {
            let target = message
                .trim()
                .parse::<f64>()
                .with_context(|| format!("invalid target temperature '{message}'"))?;
            controller.set_target_temperature(target).await?;
        }
        TOPIC_CMD_MODE => {
            let mode = TargetMode::from_host(&message)?;
            controller.set_target_mode(mode).await?;
        }
        _ => {}
    }

    Ok(())
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.controller.status())
}

async fn handle_get_measurement(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.controller.status();
    match (status.sensor_valid, status.current_temp, status.current_humidity) {
        (true, Some(temperature), Some(humidity)) => Json(MeasurementView {
            temperature,
            humidity,
        })
        .into_response(),
        _ => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            status
                .sensor_error
                .as_deref()
                .unwrap_or("sensor data is stale"),
        ),
    }
}

async fn handle_get_accessory(State(state): State<AppState>) -> impl IntoResponse {
    Json(AccessoryView::clone(&state.accessory))
}

async fn handle_set_target(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(target) = value.parse::<f64>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    };

    if let Err(err) = state.controller.set_target_temperature(target).await {
        return driver_error_response(err);
    }

    handle_get_status(State(state)).await.into_response()
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let mode = match TargetMode::from_host(value) {
        Ok(mode) => mode,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    if let Err(err) = state.controller.set_target_mode(mode).await {
        return driver_error_response(err);
    }

    handle_get_status(State(state)).await.into_response()
}

struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    fn new() -> Self {
        let data_dir = std::env::var("COOLING_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.cooling"));

        Self {
            path: data_dir.join("config.json"),
        }
    }

    async fn load(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!("no config at {}, using defaults", self.path.display());
                Ok(RuntimeConfig::default())
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn driver_error_response(err: DriverError) -> axum::response::Response {
    let status = match err {
        DriverError::Config(_) => StatusCode::BAD_REQUEST,
        DriverError::Closed => StatusCode::SERVICE_UNAVAILABLE,
    };
    error_response(status, &err.to_string())
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
