use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, Method},
    middleware,
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use onair_shared::{
    Categories, ChannelName, Clock, MetadataPatch, NewSlot, ScheduleMetadata, ScheduleSnapshot,
    Slot, SlotEntry, SlotPatch, TimerSnapshot, TimerState,
};
use onair_store::{
    ChannelRegistry, CredentialAuthorizer, KeyValueStore, ScheduleStore, TimerEngine,
};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};

#[derive(Clone)]
pub struct AppState {
    pub channels: ChannelRegistry,
    pub schedule: ScheduleStore,
    pub timer: TimerEngine,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(kv: Arc<dyn KeyValueStore>, config: ServerConfig, clock: Arc<dyn Clock>) -> Self {
        let authorizer = Arc::new(CredentialAuthorizer::new(
            Arc::clone(&kv),
            config.admin_token.clone(),
        ));
        Self {
            channels: ChannelRegistry::new(Arc::clone(&kv), authorizer.clone()),
            schedule: ScheduleStore::new(Arc::clone(&kv), authorizer.clone()),
            timer: TimerEngine::new(kv, authorizer, clock),
            rate_limiter: RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/channels", get(list_channels).post(create_channel))
        .route("/channels/:channel", delete(delete_channel))
        .route("/channels/:channel/credential", put(set_credential))
        .route("/schedule/:channel", get(get_schedule))
        .route("/schedule/:channel/slots", post(append_slot))
        .route(
            "/schedule/:channel/slots/:index",
            patch(update_slot).delete(delete_slot),
        )
        .route("/schedule/:channel/metadata", patch(set_metadata))
        .route("/schedule/:channel/categories", put(set_categories))
        .route("/timer/:channel", get(timer_snapshot))
        .route("/timer/:channel/duration", post(timer_set_duration))
        .route("/timer/:channel/start", post(timer_start))
        .route("/timer/:channel/stop", post(timer_stop))
        .route("/timer/:channel/pause", post(timer_pause))
        .route("/timer/:channel/resume", post(timer_resume))
        .route("/timer/:channel/adjust", post(timer_adjust))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Request / response bodies ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    admin_enabled: bool,
}

#[derive(Deserialize)]
struct CreateChannelRequest {
    name: String,
    #[serde(default)]
    credential: Option<String>,
}

#[derive(Deserialize)]
struct CredentialRequest {
    credential: String,
}

#[derive(Serialize)]
struct AppendSlotResponse {
    index: String,
    slot: Slot,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DurationRequest {
    #[serde(default)]
    hours: i64,
    #[serde(default)]
    minutes: i64,
    #[serde(default)]
    start_immediately: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdjustRequest {
    delta_minutes: i64,
}

// ─── Helpers ───

/// Token from `Authorization: Bearer <token>`; a bare value is accepted too.
fn bearer_token(headers: &HeaderMap) -> &str {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    auth.strip_prefix("Bearer ").unwrap_or(auth).trim()
}

fn channel_name(raw: &str) -> Result<ChannelName, ServerError> {
    Ok(ChannelName::parse(raw)?)
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ServerError> {
    let Json(value) = payload?;
    Ok(value)
}

// ─── Public reads ───

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        admin_enabled: state.config.admin_token.is_some(),
    })
}

async fn list_channels(State(state): State<AppState>) -> Result<Json<Vec<ChannelName>>, ServerError> {
    Ok(Json(state.channels.list_channels().await?))
}

/// A name that can never be registered reads like any unknown channel.
async fn get_schedule(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<ScheduleSnapshot>, ServerError> {
    let Ok(channel) = ChannelName::parse(&raw) else {
        debug!(channel = %raw, "Schedule requested for invalid channel name");
        return Ok(Json(ScheduleSnapshot {
            channel: raw,
            ..ScheduleSnapshot::default()
        }));
    };
    Ok(Json(state.schedule.get_schedule(&channel).await?))
}

async fn timer_snapshot(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<TimerSnapshot>, ServerError> {
    let Ok(channel) = ChannelName::parse(&raw) else {
        debug!(channel = %raw, "Timer requested for invalid channel name");
        return Ok(Json(TimerSnapshot::unset()));
    };
    Ok(Json(state.timer.snapshot(&channel).await?))
}

// ─── Channel registry ───

async fn create_channel(
    headers: HeaderMap,
    State(state): State<AppState>,
    payload: Result<Json<CreateChannelRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let req = body(payload)?;
    let channel = state
        .channels
        .create_channel(bearer_token(&headers), &req.name, req.credential.as_deref())
        .await?;
    Ok(Json(serde_json::json!({ "channel": channel })))
}

async fn delete_channel(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    state
        .channels
        .delete_channel(bearer_token(&headers), &channel)
        .await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn set_credential(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(channel): Path<String>,
    payload: Result<Json<CredentialRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let channel = channel_name(&channel)?;
    let req = body(payload)?;
    state
        .channels
        .set_credential(bearer_token(&headers), &channel, &req.credential)
        .await?;
    Ok(Json(serde_json::json!({ "updated": true })))
}

// ─── Schedule writes ───

async fn append_slot(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(channel): Path<String>,
    payload: Result<Json<NewSlot>, JsonRejection>,
) -> Result<Json<AppendSlotResponse>, ServerError> {
    let channel = channel_name(&channel)?;
    let new_slot = body(payload)?;
    let SlotEntry { index, slot } = state
        .schedule
        .append_slot(bearer_token(&headers), &channel, new_slot)
        .await?;
    Ok(Json(AppendSlotResponse { index, slot }))
}

async fn update_slot(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((channel, index)): Path<(String, String)>,
    payload: Result<Json<SlotPatch>, JsonRejection>,
) -> Result<Json<SlotEntry>, ServerError> {
    let channel = channel_name(&channel)?;
    let patch = body(payload)?;
    let entry = state
        .schedule
        .update_slot(bearer_token(&headers), &channel, &index, patch)
        .await?;
    Ok(Json(entry))
}

async fn delete_slot(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((channel, index)): Path<(String, String)>,
) -> Result<Json<ScheduleSnapshot>, ServerError> {
    let channel = channel_name(&channel)?;
    state
        .schedule
        .delete_slot(bearer_token(&headers), &channel, &index)
        .await?;
    Ok(Json(state.schedule.get_schedule(&channel).await?))
}

async fn set_metadata(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(channel): Path<String>,
    payload: Result<Json<MetadataPatch>, JsonRejection>,
) -> Result<Json<ScheduleMetadata>, ServerError> {
    let channel = channel_name(&channel)?;
    let patch = body(payload)?;
    let metadata = state
        .schedule
        .set_metadata(bearer_token(&headers), &channel, patch)
        .await?;
    Ok(Json(metadata))
}

async fn set_categories(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(channel): Path<String>,
    payload: Result<Json<Categories>, JsonRejection>,
) -> Result<Json<Categories>, ServerError> {
    let channel = channel_name(&channel)?;
    let categories = body(payload)?;
    let categories = state
        .schedule
        .set_categories(bearer_token(&headers), &channel, categories)
        .await?;
    Ok(Json(categories))
}

// ─── Timer writes ───

async fn timer_set_duration(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(channel): Path<String>,
    payload: Result<Json<DurationRequest>, JsonRejection>,
) -> Result<Json<TimerState>, ServerError> {
    let channel = channel_name(&channel)?;
    let req = body(payload)?;
    let timer = state
        .timer
        .set_duration(
            bearer_token(&headers),
            &channel,
            req.hours,
            req.minutes,
            req.start_immediately,
        )
        .await?;
    Ok(Json(timer))
}

async fn timer_start(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> Result<Json<TimerState>, ServerError> {
    let channel = channel_name(&channel)?;
    Ok(Json(state.timer.start(bearer_token(&headers), &channel).await?))
}

async fn timer_stop(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> Result<Json<TimerState>, ServerError> {
    let channel = channel_name(&channel)?;
    Ok(Json(state.timer.stop(bearer_token(&headers), &channel).await?))
}

async fn timer_pause(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> Result<Json<TimerState>, ServerError> {
    let channel = channel_name(&channel)?;
    Ok(Json(state.timer.pause(bearer_token(&headers), &channel).await?))
}

async fn timer_resume(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> Result<Json<TimerState>, ServerError> {
    let channel = channel_name(&channel)?;
    Ok(Json(state.timer.resume(bearer_token(&headers), &channel).await?))
}

async fn timer_adjust(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(channel): Path<String>,
    payload: Result<Json<AdjustRequest>, JsonRejection>,
) -> Result<Json<TimerState>, ServerError> {
    let channel = channel_name(&channel)?;
    let req = body(payload)?;
    let timer = state
        .timer
        .adjust(bearer_token(&headers), &channel, req.delta_minutes)
        .await?;
    Ok(Json(timer))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
