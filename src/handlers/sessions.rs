//! Session ingestion API
//!
//! Lets processes that do not link this crate submit the log stream of a
//! failed operation and have it analysed like a local session.

use crate::{
    error::AppError,
    metrics,
    notify::WebhookNotifier,
    service::AnalysisService,
    session::{Level, SourceLocation},
};
use axum::{extract::State, http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Longest accepted `source.file` or `source.function`
pub const MAX_SOURCE_FIELD_BYTES: usize = 512;

/// Shared state for the ingestion API
#[derive(Clone)]
pub struct IngestState {
    pub service: AnalysisService,
    pub notifier: Option<WebhookNotifier>,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    /// Correlation id chosen by the caller; generated when absent
    #[serde(default)]
    pub session_id: Option<Uuid>,
    pub source: SourceLocation,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub entries: Vec<IngestEntry>,
}

#[derive(Debug, Deserialize)]
pub struct IngestEntry {
    pub level: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub session_id: Uuid,
    /// Entries kept after blank messages were dropped
    pub entries: usize,
    /// Whether an analysis was scheduled for this session
    pub dispatched: bool,
}

/// POST /api/v1/sessions - Replay a submitted log stream into a session
///
/// Responds before any analysis runs.
pub async fn ingest_session(
    State(state): State<IngestState>,
    Json(request): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestResponse>), AppError> {
    if request.source.file.trim().is_empty() && request.source.function.trim().is_empty() {
        return Err(AppError::BadRequest(
            "source.file or source.function is required".to_string(),
        ));
    }

    if request.source.file.len() > MAX_SOURCE_FIELD_BYTES
        || request.source.function.len() > MAX_SOURCE_FIELD_BYTES
    {
        return Err(AppError::BadRequest(format!(
            "source.file and source.function are limited to {} bytes",
            MAX_SOURCE_FIELD_BYTES
        )));
    }

    // Validate everything up front so a bad entry does not leave a half-replayed session
    let mut entries = Vec::with_capacity(request.entries.len());
    for entry in request.entries {
        let level: Level = entry
            .level
            .parse()
            .map_err(|e: crate::session::ParseLevelError| AppError::BadRequest(e.to_string()))?;
        if level == Level::Analysis {
            return Err(AppError::BadRequest(
                "ANALYSIS entries cannot be submitted".to_string(),
            ));
        }
        entries.push((level, entry.message));
    }

    let session_id = request.session_id.unwrap_or_else(Uuid::new_v4);
    let mut builder = state
        .service
        .session_builder(request.source.clone())
        .id(session_id)
        .tags(request.tags.clone())
        .without_source_excerpt();

    if let Some(notifier) = &state.notifier {
        builder = builder.on_analysis(notifier.callback(session_id, request.source, request.tags));
    }

    let session = builder.build();
    for (level, message) in entries {
        session.append(level, message);
    }

    let dispatched = session.is_dispatched();
    metrics::record_ingested_session(dispatched);

    tracing::info!(
        session_id = %session_id,
        source = %session.source(),
        entries = session.entries().len(),
        dispatched,
        "Ingested log session"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            session_id,
            entries: session.entries().len(),
            dispatched,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_request_defaults() {
        let json = r#"{"source": {"file": "app.py", "function": "checkout"}}"#;
        let request: IngestRequest = serde_json::from_str(json).unwrap();
        assert!(request.session_id.is_none());
        assert!(request.tags.is_empty());
        assert!(request.entries.is_empty());
    }
}
