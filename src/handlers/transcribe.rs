//! # Transcription Endpoint
//!
//! `POST /transcribe` accepts a multipart form with one file part named
//! `file`, stages it to disk, runs the model over it and answers with
//! `{"transcription": "<text>"}`.
//!
//! ## Request flow:
//! 1. **Admit** the request through the pending-request gate (503 when full),
//!    before any of the body is buffered
//! 2. **Read** the multipart stream, keeping the first `file` part and
//!    draining the rest (400 when there is none, 413 over the size limit)
//! 3. **Stage** the bytes to a temp file named after the sniffed container
//! 4. **Transcribe** on a blocking thread under the inference timeout (504)
//! 5. **Clean up** the temp file, whatever the outcome
//!
//! ## Rust Concepts:
//! - **spawn_blocking**: inference is CPU-bound and must not stall the actix worker
//! - **tokio::time::timeout**: races the blocking task against the clock
//! - **Ownership of the permit**: the admission permit moves into the blocking
//!   task, so the slot stays taken until inference really stops
//! - **Drop guards**: if the handler future is dropped (client disconnect),
//!   the guard raises the cancel flag and the blocking task winds down

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::stream::StreamExt;
use serde::Serialize;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audio::format::AudioFormat;
use crate::error::{AppError, AppResult};
use crate::middleware::request_id;
use crate::staging::StagedFile;
use crate::state::AppState;
use crate::transcription::CancelFlag;

/// Name of the form part carrying the audio.
const FILE_FIELD: &str = "file";

/// Successful response body.
#[derive(Debug, Serialize)]
pub struct TranscriptionResponse {
    pub transcription: String,
}

/// The file part of an upload, fully buffered.
#[derive(Debug)]
struct Upload {
    filename: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

/// Transcribe an uploaded audio file.
///
/// ## Endpoint: `POST /transcribe`
///
/// ## Request:
/// Multipart form data with an audio file part named "file"
///
/// ## Response:
/// ```json
/// { "transcription": "Hello, this is a test transcription." }
/// ```
///
/// Errors use the `{"detail", "code"}` body from [`AppError`].
pub async fn transcribe(
    req: HttpRequest,
    state: web::Data<AppState>,
    payload: Multipart,
) -> AppResult<HttpResponse> {
    let request_id = request_id(&req);
    let limit = state.config.server.max_upload_bytes;

    // Taken before reading the body so a full queue also bounds buffered
    // uploads. Early returns below release it.
    let permit = state.try_admit().map_err(|e| {
        warn!(request_id = %request_id, "Rejecting upload, transcription queue is full");
        e
    })?;

    let upload = read_upload(payload, limit).await?.ok_or_else(|| {
        debug!(request_id = %request_id, "No file part in upload");
        AppError::MissingFile
    })?;

    if upload.bytes.is_empty() {
        return Err(AppError::BadRequest("Uploaded file is empty.".to_string()));
    }

    info!(
        request_id = %request_id,
        filename = %upload.filename,
        size_bytes = upload.bytes.len(),
        "Received upload"
    );

    let suffix = staging_suffix(&upload, &state.config.staging.default_suffix, request_id);
    let staged = stage(upload.bytes, suffix, state.config.staging.temp_dir.clone()).await?;
    debug!(request_id = %request_id, path = %staged.path().display(), "Staged upload");

    let result = run_inference(&state, staged.path().to_path_buf(), permit).await;

    staged.cleanup();
    state.record_transcription(result.is_ok());

    match result {
        Ok(text) => {
            info!(request_id = %request_id, chars = text.len(), "Transcription finished");
            Ok(HttpResponse::Ok().json(TranscriptionResponse { transcription: text }))
        }
        Err(e) => {
            error!(request_id = %request_id, "Transcription failed: {}", e);
            Err(e)
        }
    }
}

/// Buffer the first `file` part of the form and drain everything else.
///
/// Returns `Ok(None)` when the form has no file part.
async fn read_upload(mut payload: Multipart, limit: usize) -> AppResult<Option<Upload>> {
    let mut upload: Option<Upload> = None;

    while let Some(item) = payload.next().await {
        let mut field: Field = item?;

        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string);

        match filename {
            Some(filename) if upload.is_none() && field.name() == Some(FILE_FIELD) => {
                let content_type = field.content_type().map(|mime| mime.essence_str().to_string());

                let mut bytes = Vec::new();
                while let Some(chunk) = field.next().await {
                    let chunk = chunk?;
                    if bytes.len() + chunk.len() > limit {
                        return Err(AppError::PayloadTooLarge(limit));
                    }
                    bytes.extend_from_slice(&chunk);
                }

                upload = Some(Upload {
                    filename,
                    content_type,
                    bytes,
                });
            }
            _ => {
                while let Some(chunk) = field.next().await {
                    chunk?;
                }
            }
        }
    }

    Ok(upload)
}

/// Suffix for the staged file.
///
/// The leading bytes decide; the client's content type is only compared
/// against them for the log.
fn staging_suffix(upload: &Upload, default_suffix: &str, request_id: Uuid) -> String {
    let declared = upload.content_type.as_deref().and_then(AudioFormat::from_mime);

    match AudioFormat::sniff(&upload.bytes) {
        Some(format) => {
            if let Some(declared) = declared.filter(|declared| *declared != format) {
                warn!(
                    request_id = %request_id,
                    "Upload declared as {:?} but looks like {:?}, staging as {}",
                    declared,
                    format,
                    format.suffix()
                );
            }
            format.suffix().to_string()
        }
        None => {
            warn!(
                request_id = %request_id,
                content_type = ?upload.content_type,
                "Unrecognised audio container, staging as {}",
                default_suffix
            );
            default_suffix.to_string()
        }
    }
}

/// Write the upload to disk on the blocking pool.
async fn stage(bytes: Vec<u8>, suffix: String, dir: Option<PathBuf>) -> AppResult<StagedFile> {
    web::block(move || StagedFile::create(&bytes, &suffix, dir.as_deref()))
        .await
        .map_err(|e| AppError::Staging(format!("Staging task failed: {}", e)))?
        .map_err(|e| AppError::Staging(format!("Failed to stage upload: {}", e)))
}

/// Run the transcriber over `path`, bounded by the configured timeout.
///
/// The cancel flag is raised on timeout, and also when this future is dropped
/// before the task finishes. The blocking task notices it at its next
/// checkpoint and releases the model and the admission permit.
///
/// The timeout covers time spent waiting for the model as well as running it.
async fn run_inference(
    state: &AppState,
    path: PathBuf,
    permit: OwnedSemaphorePermit,
) -> AppResult<String> {
    let transcriber = Arc::clone(&state.transcriber);
    let cancel = CancelFlag::new();
    let task_cancel = cancel.clone();
    let _cancel_on_drop = cancel.cancel_on_drop();

    let task = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        transcriber.transcribe(&path, &task_cancel)
    });

    let secs = state.config.performance.inference_timeout_secs;
    match tokio::time::timeout(Duration::from_secs(secs), task).await {
        Ok(Ok(result)) => result.map_err(AppError::from),
        Ok(Err(join_error)) => Err(AppError::Inference(format!(
            "Transcription task failed: {}",
            join_error
        ))),
        Err(_) => {
            cancel.cancel();
            Err(AppError::Timeout(secs))
        }
    }
}
