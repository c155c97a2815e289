//! Status endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use dashcast_cast::DeviceRecord;
use dashcast_core::RoomId;
use dashcast_relay::RoomSnapshot;
use dashcast_stream::StreamRecord;
use serde::Serialize;
use tracing::info;

use crate::http::{AppError, AppResult, AppState};

#[derive(Debug, Serialize)]
pub struct StreamStatus {
    pub screen: String,
    pub room: RoomId,
    pub started_at: DateTime<Utc>,
    pub last_ping_at: Option<DateTime<Utc>>,
    pub last_pong_at: Option<DateTime<Utc>>,
    pub restart_count: u32,
}

impl From<StreamRecord> for StreamStatus {
    fn from(record: StreamRecord) -> Self {
        Self {
            screen: record.screen_name,
            room: record.room,
            started_at: record.started_at,
            last_ping_at: record.last_ping_at,
            last_pong_at: record.last_pong_at,
            restart_count: record.restart_count,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub streams: Vec<StreamStatus>,
    pub devices: Vec<DeviceRecord>,
    pub rooms: Vec<RoomSnapshot>,
    pub connections: usize,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub host: String,
    pub reset: bool,
}

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        streams: state.streams.snapshot().into_iter().map(StreamStatus::from).collect(),
        devices: state
            .registry
            .as_ref()
            .map(|registry| registry.devices())
            .unwrap_or_default(),
        rooms: state.relay.rooms(),
        connections: state.relay.connection_count(),
    })
}

/// POST /api/devices/{host}/reset
///
/// Only a device whose supervision paused after repeated failures can be reset.
pub async fn reset_device(
    State(state): State<AppState>,
    Path(host): Path<String>,
) -> AppResult<(StatusCode, Json<ResetResponse>)> {
    let registry = state
        .registry
        .as_ref()
        .ok_or_else(|| AppError::unavailable("device supervision is disabled"))?;

    if registry.reset(&host) {
        info!(host = %host, "Device reset requested");
        return Ok((StatusCode::ACCEPTED, Json(ResetResponse { host, reset: true })));
    }

    match registry.device(&host) {
        Some(device) => Err(AppError::conflict(format!(
            "device {host} is {:?}, only paused devices can be reset",
            device.state
        ))),
        None => Err(AppError::not_found(format!("unknown device {host}"))),
    }
}
