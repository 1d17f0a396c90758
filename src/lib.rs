//! Frame Ingest Server Library
//!
//! Ingests telemetry frames (camera metadata plus per-object detections) from a message
//! bus topic and from streaming devices, stores them, and fans them out to live viewers.
//!
//! ## Architecture (7 Components)
//!
//! 1. FrameSchema - Payload validation into typed frames
//! 2. RawMessageLog - Durable record of every bus payload and its outcome
//! 3. CameraInfoClient - Camera metadata enrichment
//! 4. BusIngestWorker - Sequential topic consumer
//! 5. DeviceSession - Metadata/image pairing per device connection
//! 6. RealtimeHub - Viewer WebSocket fan-out
//! 7. ReprocessOperator - Replay of logged raw messages
//!
//! FramePipeline is the completion path shared by both ingest paths; FrameStore is the
//! persistence boundary.

pub mod bus_ingest;
pub mod camera_info_client;
pub mod device_session;
pub mod frame_schema;
pub mod frame_store;
pub mod ingest_pipeline;
pub mod raw_message_log;
pub mod realtime_hub;
pub mod reprocess;
pub mod web_api;
pub mod models;
pub mod error;
pub mod state;

pub use error::{Error, Result};
pub use state::AppState;
