use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::import::{
    apply_import, normalize_rows, read_file, ColumnMapping, ImportPreview, ImportReport,
    ImportSession, PercentMode,
};
use crate::AppState;

const DEFAULT_FILE_NAME: &str = "upload.csv";

#[derive(Debug, Default, Deserialize)]
pub struct CommitRequest {
    #[serde(default)]
    pub mapping: Option<ColumnMapping>,
    #[serde(rename = "percentualMode", default)]
    pub percent_mode: Option<PercentMode>,
}

fn parse_import_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::Validation("Invalid import ID format".to_string()))
}

fn import_not_found() -> AppError {
    AppError::NotFound("Import not found".to_string())
}

/// Accepts a multipart upload, parses it and keeps it as a pending import.
pub async fn upload_import(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Json<ImportPreview>> {
    let mut multipart = multipart?;
    let mut upload: Option<(Option<String>, Bytes)> = None;
    let mut name_override: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                let name = field.file_name().map(str::to_string);
                let bytes = field.bytes().await?;
                upload = Some((name, bytes));
            }
            Some("fileName") => {
                name_override = Some(field.text().await?);
            }
            other => {
                log::debug!("Ignoring multipart field {:?}", other);
            }
        }
    }

    let (uploaded_name, bytes) =
        upload.ok_or_else(|| AppError::Validation("file is required".to_string()))?;
    let file_name = name_override
        .or(uploaded_name)
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());

    log::info!("Received import upload {} ({} bytes)", file_name, bytes.len());

    let parse_name = file_name.clone();
    let table = tokio::task::spawn_blocking(move || read_file(&parse_name, &bytes))
        .await
        .map_err(|e| AppError::Internal(format!("import parser task failed: {}", e)))?
        .inspect_err(|e| log::warn!("Rejected upload {}: {}", file_name, e))?;

    let preview = state.imports.insert(ImportSession::new(file_name, table)).await;
    log::info!(
        "Import {} ready: {} rows, missing mapping for {:?}",
        preview.import_id,
        preview.row_count,
        preview.missing_fields
    );

    Ok(Json(preview))
}

pub async fn get_import(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ImportPreview>> {
    let id = parse_import_id(&id)?;
    let session = state.imports.get(&id).await.ok_or_else(import_not_found)?;
    Ok(Json(session.preview()))
}

/// Maps, normalises and writes the rows of `session`.
async fn commit_session(
    state: &AppState,
    session: &ImportSession,
    request: CommitRequest,
) -> AppResult<ImportReport> {
    let mapping = request.mapping.unwrap_or_else(|| session.suggested.clone());
    let mode = request.percent_mode.unwrap_or_default();

    let trades = mapping
        .resolve(&session.table.headers)
        .and_then(|resolved| normalize_rows(&session.table, &resolved, mode))
        .inspect_err(|e| log::warn!("Import {} rejected: {}", session.id, e))?;

    state.db.run(move |conn| apply_import(conn, &trades)).await
}

/// Applies a pending import. The session is taken out of the store for the
/// duration of the commit, so a concurrent commit of the same id sees it as
/// missing. Failures put it back for a retry with a corrected mapping.
pub async fn commit_import(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> AppResult<Json<ImportReport>> {
    let id = parse_import_id(&id)?;
    let request: CommitRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CommitRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::Validation(format!("Invalid commit request: {}", e)))?
    };

    let session = state.imports.remove(&id).await.ok_or_else(import_not_found)?;
    match commit_session(&state, &session, request).await {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            state.imports.restore(session).await;
            Err(e)
        }
    }
}

pub async fn discard_import(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let id = parse_import_id(&id)?;
    state.imports.remove(&id).await.ok_or_else(import_not_found)?;
    log::info!("Discarded import {}", id);
    Ok(Json(json!({ "message": "Import discarded" })))
}
