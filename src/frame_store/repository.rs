//! MySQL FrameStore
//!
//! Tables: `raw_messages`, `frames`, `detected_objects` (migrations/001_frame_ingest.sql)

use super::{FrameId, FrameQuery, FrameStore, StoreError, StoredFrame, StoredObject};
use crate::frame_schema::{CameraInfo, Frame, ImageDimensions};
use crate::raw_message_log::{ParseOutcome, RawMessage, RawMessageFilter, RawMessageId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};
use std::collections::HashMap;

/// MySQL-backed store
#[derive(Clone)]
pub struct MySqlFrameStore {
    pool: MySqlPool,
}

impl MySqlFrameStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    fn row_to_raw(row: &MySqlRow) -> Result<RawMessage, sqlx::Error> {
        let status: String = row.try_get("parse_outcome")?;
        let reason: Option<String> = row.try_get("failure_reason")?;

        Ok(RawMessage {
            id: row.try_get("raw_id")?,
            source: row.try_get("source")?,
            payload: row.try_get("payload")?,
            received_at: row.try_get("received_at")?,
            outcome: ParseOutcome::from_parts(&status, reason),
            processed_at: row.try_get("processed_at")?,
        })
    }

    fn row_to_frame(row: &MySqlRow) -> Result<StoredFrame, sqlx::Error> {
        let camera_name: Option<String> = row.try_get("camera_name")?;
        let camera_info = match camera_name {
            Some(name) => Some(CameraInfo {
                name,
                category: row.try_get::<Option<String>, _>("camera_category")?.unwrap_or_default(),
                location: row.try_get::<Option<String>, _>("camera_location")?.unwrap_or_default(),
                institute: row.try_get::<Option<String>, _>("camera_institute")?.unwrap_or_default(),
            }),
            None => None,
        };

        let width: Option<u32> = row.try_get("image_width")?;
        let height: Option<u32> = row.try_get("image_height")?;

        Ok(StoredFrame {
            id: row.try_get("id")?,
            frame_id: row.try_get("frame_id")?,
            camera_id: row.try_get("camera_id")?,
            camera_info,
            captured_at: row.try_get("captured_at")?,
            image_dimensions: width.zip(height).map(|(width, height)| ImageDimensions { width, height }),
            objects: Vec::new(),
            has_image: row.try_get("has_image")?,
            stored_at: row.try_get("created_at")?,
        })
    }

    /// Objects of every frame in `frame_row_ids`, grouped by frame, in stored order
    async fn load_objects(
        &self,
        frame_row_ids: &[FrameId],
    ) -> Result<HashMap<FrameId, Vec<StoredObject>>, sqlx::Error> {
        let mut by_frame: HashMap<FrameId, Vec<StoredObject>> = HashMap::new();
        if frame_row_ids.is_empty() {
            return Ok(by_frame);
        }

        let sql = format!(
            "SELECT frame_row_id, object_id, object_type, lat, lng, altitude, speed_kt \
             FROM detected_objects \
             WHERE frame_row_id IN ({}) \
             ORDER BY frame_row_id, seq",
            placeholders(frame_row_ids.len())
        );

        let mut q = sqlx::query(&sql);
        for id in frame_row_ids {
            q = q.bind(*id);
        }
        let rows = q.fetch_all(&self.pool).await?;

        for r in &rows {
            let frame_row_id: FrameId = r.try_get("frame_row_id")?;
            by_frame.entry(frame_row_id).or_default().push(StoredObject {
                object_id: r.try_get("object_id")?,
                object_type: r.try_get("object_type")?,
                lat: r.try_get("lat")?,
                lng: r.try_get("lng")?,
                altitude: r.try_get("altitude")?,
                speed_kt: r.try_get("speed_kt")?,
            });
        }

        Ok(by_frame)
    }
}

/// `?, ?, ?` for an `IN (...)` list
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[async_trait]
impl FrameStore for MySqlFrameStore {
    async fn persist_frame(&self, frame: &Frame) -> Result<FrameId, StoreError> {
        let info = frame.camera_info.as_ref();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO frames
                (frame_id, camera_id, captured_at,
                 camera_name, camera_category, camera_location, camera_institute,
                 image_width, image_height, image_jpeg, has_image)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&frame.frame_id)
        .bind(&frame.camera_id)
        .bind(frame.captured_at)
        .bind(info.map(|i| i.name.as_str()))
        .bind(info.map(|i| i.category.as_str()))
        .bind(info.map(|i| i.location.as_str()))
        .bind(info.map(|i| i.institute.as_str()))
        .bind(frame.image_dimensions.map(|d| d.width))
        .bind(frame.image_dimensions.map(|d| d.height))
        .bind(frame.image.as_deref())
        .bind(frame.has_image())
        .execute(&mut *tx)
        .await?;

        let frame_row_id = result.last_insert_id();

        for (seq, obj) in frame.objects.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO detected_objects
                    (frame_row_id, seq, object_id, object_type, lat, lng, altitude, speed_kt)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(frame_row_id)
            .bind(seq as u32)
            .bind(&obj.object_id)
            .bind(obj.object_type.as_deref())
            .bind(obj.lat)
            .bind(obj.lng)
            .bind(obj.altitude)
            .bind(obj.speed)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            id = frame_row_id,
            frame_id = %frame.frame_id,
            camera_id = %frame.camera_id,
            objects = frame.objects.len(),
            "Frame persisted"
        );

        Ok(frame_row_id)
    }

    async fn persist_raw(&self, source: &str, payload: &[u8]) -> Result<RawMessageId, StoreError> {
        let received_at: DateTime<Utc> = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO raw_messages (source, payload, received_at, parse_outcome)
            VALUES (?, ?, ?, 'pending')
            "#,
        )
        .bind(source)
        .bind(payload)
        .bind(received_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_id())
    }

    async fn update_raw_outcome(
        &self,
        raw_id: RawMessageId,
        outcome: &ParseOutcome,
    ) -> Result<bool, StoreError> {
        if !outcome.is_terminal() {
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE raw_messages
            SET parse_outcome = ?, failure_reason = ?, processed_at = ?
            WHERE raw_id = ? AND parse_outcome = 'pending'
            "#,
        )
        .bind(outcome.as_str())
        .bind(outcome.reason())
        .bind(Utc::now())
        .bind(raw_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_raw_by_id(&self, raw_id: RawMessageId) -> Result<Option<RawMessage>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT raw_id, source, payload, received_at, parse_outcome, failure_reason, processed_at
            FROM raw_messages
            WHERE raw_id = ?
            "#,
        )
        .bind(raw_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::row_to_raw).transpose()?)
    }

    async fn list_raw(&self, filter: &RawMessageFilter) -> Result<Vec<RawMessage>, StoreError> {
        let mut query = String::from(
            "SELECT raw_id, source, payload, received_at, parse_outcome, failure_reason, processed_at \
             FROM raw_messages",
        );
        if filter.outcome.is_some() {
            query.push_str(" WHERE parse_outcome = ?");
        }
        query.push_str(" ORDER BY raw_id DESC LIMIT ?");

        let mut q = sqlx::query(&query);
        if let Some(status) = filter.outcome {
            q = q.bind(status.as_str());
        }
        let rows = q
            .bind(super::clamp_limit(filter.limit))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(Self::row_to_raw).collect::<Result<Vec<_>, _>>()?)
    }

    async fn list_frames(&self, query: &FrameQuery) -> Result<Vec<StoredFrame>, StoreError> {
        let mut sql = String::from(
            "SELECT id, frame_id, camera_id, captured_at, \
             camera_name, camera_category, camera_location, camera_institute, \
             image_width, image_height, has_image, created_at \
             FROM frames",
        );
        if query.camera_id.is_some() {
            sql.push_str(" WHERE camera_id = ?");
        }
        sql.push_str(" ORDER BY id DESC LIMIT ?");

        let mut q = sqlx::query(&sql);
        if let Some(camera_id) = &query.camera_id {
            q = q.bind(camera_id);
        }
        let rows = q
            .bind(query.effective_limit())
            .fetch_all(&self.pool)
            .await?;

        let mut frames = rows
            .iter()
            .map(Self::row_to_frame)
            .collect::<Result<Vec<_>, _>>()?;

        let ids: Vec<FrameId> = frames.iter().map(|f| f.id).collect();
        let mut objects = self.load_objects(&ids).await?;
        for frame in &mut frames {
            frame.objects = objects.remove(&frame.id).unwrap_or_default();
        }

        Ok(frames)
    }

    fn backend(&self) -> &'static str {
        "mysql"
    }
}
