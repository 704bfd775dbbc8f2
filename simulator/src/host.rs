use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{debug, info, warn};

use plant_common::{
    CommandEncoding, FieldNames, HTTP_COMMAND_PATH, HTTP_DATA_PATH, TOPIC_DEVICE_COMMANDS,
    TOPIC_DEVICE_DATA,
};

use crate::plant::PlantModel;

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;

#[derive(Clone)]
struct AppState {
    plant: Arc<Mutex<PlantModel>>,
    http_fields: Arc<FieldNames>,
    http_commands: Arc<CommandEncoding>,
}

#[derive(Debug, Deserialize)]
struct DeviceCommand {
    command: String,
    #[serde(default)]
    value: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);

    let mut mqtt_options = MqttOptions::new("plant-simulator", mqtt_host, mqtt_port);
    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 32);

    let app_state = AppState {
        plant: Arc::new(Mutex::new(PlantModel::default())),
        http_fields: Arc::new(FieldNames::request_response()),
        http_commands: Arc::new(CommandEncoding::request_response()),
    };

    spawn_mqtt_loop(app_state.plant.clone(), mqtt.clone(), eventloop);
    spawn_plant_loop(app_state.plant.clone(), mqtt);

    let app = Router::new()
        .route(HTTP_DATA_PATH, get(handle_get_data))
        .route(HTTP_COMMAND_PATH, post(handle_post_command))
        .with_state(app_state);

    let port = std::env::var("SIMULATOR_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8081);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind simulator server at {addr}"))?;

    info!("simulated plant listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn spawn_mqtt_loop(
    plant: Arc<Mutex<PlantModel>>,
    mqtt: AsyncClient,
    mut eventloop: rumqttc::EventLoop,
) {
    let commands = CommandEncoding::publish_subscribe();

    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("simulator mqtt connected");
                    if let Err(err) =
                        mqtt.try_subscribe(TOPIC_DEVICE_COMMANDS, QoS::AtLeastOnce)
                    {
                        warn!("simulator subscribe failed: {err}");
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if message.topic != TOPIC_DEVICE_COMMANDS {
                        continue;
                    }
                    if message.payload.len() > MAX_MQTT_PAYLOAD_BYTES {
                        warn!(
                            "dropping oversized command payload ({} bytes)",
                            message.payload.len()
                        );
                        continue;
                    }
                    let text = String::from_utf8_lossy(&message.payload);
                    match commands.parse_text(text.trim()) {
                        Some(command) => {
                            info!("mqtt command: {}", text.trim());
                            plant.lock().await.apply(&command);
                        }
                        None => warn!("ignoring unknown mqtt command {:?}", text.trim()),
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("simulator mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_plant_loop(plant: Arc<Mutex<PlantModel>>, mqtt: AsyncClient) {
    let fields = FieldNames::publish_subscribe();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;

            let payload = {
                let mut plant = plant.lock().await;
                plant.step(1.0);
                debug!(
                    running = plant.is_running(),
                    mode = ?plant.mode(),
                    temperature = plant.temperature_c(),
                    power = plant.power_w(),
                    "plant step"
                );
                serde_json::to_vec(&plant.payload(&fields))
            };

            match payload {
                Ok(body) => {
                    if let Err(err) = mqtt
                        .publish(TOPIC_DEVICE_DATA, QoS::AtMostOnce, false, body)
                        .await
                    {
                        debug!("telemetry publish failed: {err}");
                    }
                }
                Err(err) => warn!("telemetry serialization failed: {err}"),
            }
        }
    });
}

async fn handle_get_data(State(state): State<AppState>) -> impl IntoResponse {
    let plant = state.plant.lock().await;
    Json(plant.payload(&state.http_fields))
}

async fn handle_post_command(
    State(state): State<AppState>,
    Json(request): Json<DeviceCommand>,
) -> axum::response::Response {
    let Some(command) = state
        .http_commands
        .parse_token(&request.command, request.value)
    else {
        return error_response(StatusCode::BAD_REQUEST, "Unknown or invalid command");
    };

    info!("http command: {}", request.command);
    state.plant.lock().await.apply(&command);
    StatusCode::OK.into_response()
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
