//! Application state
//!
//! Holds all shared components and state

use crate::bus_ingest::{
    bus_channel, BusIngestStats, BusIngestWorker, BusPublisher, BusSubscription,
    DEFAULT_QUEUE_CAPACITY,
};
use crate::camera_info_client::{CameraInfoProvider, DEFAULT_TIMEOUT_MS};
use crate::frame_store::FrameStore;
use crate::ingest_pipeline::FramePipeline;
use crate::raw_message_log::RawMessageLog;
use crate::realtime_hub::{RealtimeHub, DEFAULT_VIEWER_QUEUE_CAPACITY};
use crate::reprocess::ReprocessOperator;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    MySql,
    Memory,
}

impl StoreBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mysql" => Some(Self::MySql),
            "memory" | "mem" => Some(Self::Memory),
            _ => None,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Database URL
    pub database_url: String,
    /// Server port
    pub port: u16,
    /// Server host
    pub host: String,
    pub store_backend: StoreBackend,
    /// Frame topic name, recorded as the raw message source
    pub bus_topic: String,
    pub bus_queue_capacity: usize,
    /// Camera metadata service; `{camera_id}` is substituted, else the id is appended
    pub camera_info_url: Option<String>,
    pub camera_info_timeout: Duration,
    /// Outbound frames buffered per viewer before frames are skipped
    pub viewer_queue_capacity: usize,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "mysql://root@localhost/frame_ingest".to_string()),
            port: env_parse("PORT").unwrap_or(8080),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            store_backend: std::env::var("STORE_BACKEND")
                .ok()
                .and_then(|v| StoreBackend::parse(&v))
                .unwrap_or(StoreBackend::MySql),
            bus_topic: std::env::var("BUS_TOPIC").unwrap_or_else(|_| "frames".to_string()),
            bus_queue_capacity: env_parse("BUS_QUEUE_CAPACITY").unwrap_or(DEFAULT_QUEUE_CAPACITY),
            camera_info_url: std::env::var("CAMERA_INFO_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            camera_info_timeout: Duration::from_millis(
                env_parse("CAMERA_INFO_TIMEOUT_MS").unwrap_or(DEFAULT_TIMEOUT_MS),
            ),
            viewer_queue_capacity: env_parse("VIEWER_QUEUE_CAPACITY")
                .unwrap_or(DEFAULT_VIEWER_QUEUE_CAPACITY),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// FrameStore (MySQL or in-memory)
    pub store: Arc<dyn FrameStore>,
    /// RawMessageLog (bus payloads and outcomes)
    pub raw_log: RawMessageLog,
    /// FramePipeline (enrich, persist, broadcast)
    pub pipeline: FramePipeline,
    /// RealtimeHub (viewer WebSocket fan-out)
    pub realtime: Arc<RealtimeHub>,
    /// Enqueue side of the frame topic
    pub bus: BusPublisher,
    /// BusIngestWorker counters
    pub bus_stats: Arc<BusIngestStats>,
    /// ReprocessOperator
    pub reprocess: Arc<ReprocessOperator>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the components together
    ///
    /// Returns the state plus the bus worker and its subscription; the caller spawns the
    /// worker. The worker stops once every clone of the state (holding the publisher)
    /// is dropped.
    pub fn assemble(
        config: AppConfig,
        store: Arc<dyn FrameStore>,
        camera_info: Arc<dyn CameraInfoProvider>,
    ) -> (Self, BusIngestWorker, BusSubscription) {
        let realtime = Arc::new(RealtimeHub::with_queue_capacity(config.viewer_queue_capacity));
        let raw_log = RawMessageLog::new(store.clone());
        let pipeline = FramePipeline::new(store.clone(), camera_info, realtime.clone());
        let reprocess = Arc::new(ReprocessOperator::new(store.clone()));

        let (bus, subscription) = bus_channel(config.bus_topic.clone(), config.bus_queue_capacity);
        let worker = BusIngestWorker::new(raw_log.clone(), pipeline.clone());
        let bus_stats = worker.stats();

        let state = Self {
            config,
            store,
            raw_log,
            pipeline,
            realtime,
            bus,
            bus_stats,
            reprocess,
            started_at: Instant::now(),
        };

        (state, worker, subscription)
    }
}
