//! Shared API models
//!
//! Response types used by more than one route module.

use crate::bus_ingest::BusIngestSnapshot;
use serde::Serialize;

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self { ok: true, data }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub viewers: u64,
    pub store_backend: String,
}

/// Ingest status response
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub topic: String,
    pub bus: BusIngestSnapshot,
    pub viewers: u64,
}
