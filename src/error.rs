//! # Error Handling
//!
//! Every way a transcription request can fail is a variant of [`AppError`].
//! Handlers return `Result<HttpResponse, AppError>` and actix turns the error
//! side into a JSON response through the [`ResponseError`] impl below.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Enums for Error Types
//! - **Variants**: One per failure kind, so callers can't confuse a bad upload with a broken model
//! - **Data**: Each variant carries the human-readable detail string
//! - **Pattern matching**: `match` maps each variant to a status code exhaustively
//!
//! ### Traits for Error Conversion
//! - **From trait**: Lets `?` convert lower-level errors (multipart, inference) into `AppError`
//! - **ResponseError trait**: Converts errors to HTTP responses
//! - **Display trait**: Defines how errors are formatted in logs
//!
//! ## Response shape:
//! ```json
//! { "detail": "No file uploaded.", "code": "missing_file" }
//! ```

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

use crate::transcription::InferenceError;

/// Failure kinds of the transcription service.
///
/// ## Status Mapping:
/// - **MissingFile / BadRequest** → 400 (client sent nothing usable)
/// - **PayloadTooLarge** → 413
/// - **Staging / AudioDecode / Inference** → 500 (request failed, process stays healthy)
/// - **Busy** → 503 (too many uploads already waiting for the model)
/// - **Timeout** → 504 (inference ran past the configured timeout and was cancelled)
#[derive(Debug)]
pub enum AppError {
    /// No multipart part named `file` was present
    MissingFile,

    /// Malformed multipart body or otherwise unusable upload
    BadRequest(String),

    /// Upload exceeded `server.max_upload_bytes`
    PayloadTooLarge(usize),

    /// Writing the upload to a temp file failed
    Staging(String),

    /// The staged file could not be decoded as audio
    AudioDecode(String),

    /// The model failed while running
    Inference(String),

    /// Admission bound reached
    Busy,

    /// Inference took longer than the configured timeout
    Timeout(u64),
}

impl AppError {
    /// Machine-readable code placed next to `detail` in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::MissingFile => "missing_file",
            AppError::BadRequest(_) => "bad_request",
            AppError::PayloadTooLarge(_) => "payload_too_large",
            AppError::Staging(_) => "staging_failed",
            AppError::AudioDecode(_) => "audio_decode_failed",
            AppError::Inference(_) => "inference_failed",
            AppError::Busy => "busy",
            AppError::Timeout(_) => "timeout",
        }
    }

    /// Message returned to the client under `detail`.
    ///
    /// Staging and inference messages are passed through verbatim.
    pub fn detail(&self) -> String {
        match self {
            AppError::MissingFile => "No file uploaded.".to_string(),
            AppError::BadRequest(msg)
            | AppError::Staging(msg)
            | AppError::AudioDecode(msg)
            | AppError::Inference(msg) => msg.clone(),
            AppError::PayloadTooLarge(limit) => {
                format!("Uploaded file exceeds the {} byte limit.", limit)
            }
            AppError::Busy => "Transcription capacity exhausted, retry later.".to_string(),
            AppError::Timeout(secs) => format!("Transcription did not finish within {}s.", secs),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::MissingFile => write!(f, "Bad request: no file uploaded"),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::PayloadTooLarge(limit) => write!(f, "Upload larger than {} bytes", limit),
            AppError::Staging(msg) => write!(f, "Staging error: {}", msg),
            AppError::AudioDecode(msg) => write!(f, "Audio decode error: {}", msg),
            AppError::Inference(msg) => write!(f, "Inference error: {}", msg),
            AppError::Busy => write!(f, "Service busy"),
            AppError::Timeout(secs) => write!(f, "Inference timed out after {}s", secs),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingFile | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Staging(_) | AppError::AudioDecode(_) | AppError::Inference(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Busy => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "detail": self.detail(),
            "code": self.code(),
        }))
    }
}

/// Multipart parsing problems are the client's fault.
///
/// A body that isn't multipart at all is reported as a missing file, which
/// is what a form without the `file` part looks like to the caller.
impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        match err {
            actix_multipart::MultipartError::ContentTypeMissing
            | actix_multipart::MultipartError::ContentTypeParse
            | actix_multipart::MultipartError::ContentTypeIncompatible
            | actix_multipart::MultipartError::BoundaryMissing => AppError::MissingFile,
            other => AppError::BadRequest(format!("Malformed multipart body: {}", other)),
        }
    }
}

/// Cancellation only happens when the timeout fires, so it is reported
/// as a timeout by the handler; here it falls back to an inference error.
impl From<InferenceError> for AppError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::Decode(msg) => AppError::AudioDecode(msg),
            InferenceError::Model(msg) => AppError::Inference(msg),
            InferenceError::Cancelled => AppError::Inference(err.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::MissingFile.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::BadRequest("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::PayloadTooLarge(10).status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(AppError::Staging("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(AppError::AudioDecode("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(AppError::Inference("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(AppError::Busy.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(AppError::Timeout(5).status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_inference_error_conversion() {
        let decode: AppError = InferenceError::Decode("probe failed".into()).into();
        assert!(matches!(decode, AppError::AudioDecode(ref m) if m == "probe failed"));

        let model: AppError = InferenceError::Model("shape mismatch".into()).into();
        assert!(matches!(model, AppError::Inference(ref m) if m == "shape mismatch"));
    }

    #[actix_web::test]
    async fn test_error_body_shape() {
        let response = AppError::AudioDecode("unsupported format".into()).error_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(response.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["detail"], "unsupported format");
        assert_eq!(value["code"], "audio_decode_failed");
    }
}
