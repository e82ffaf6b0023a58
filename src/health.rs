use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /health`: liveness plus what the model host is doing.
///
/// The model is loaded before the server binds, so a reachable server always
/// reports it as loaded.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = &state.config;

    let endpoints: Vec<serde_json::Value> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms()
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "model": {
            "status": "loaded",
            "info": state.transcriber.describe()
        },
        "admission": {
            "max_pending_requests": config.performance.max_pending_requests,
            "pending_requests": state.pending_requests(),
            "inference_timeout_secs": config.performance.inference_timeout_secs
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "transcriptions_succeeded": metrics.transcriptions_succeeded,
            "transcriptions_failed": metrics.transcriptions_failed,
            "transcriptions_rejected": metrics.transcriptions_rejected,
            "endpoints": endpoints
        },
        "memory": get_memory_info()
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let read_kb = |key: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(key))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .unwrap_or(0)
                    * 1024
            };

            return json!({
                "resident_memory_bytes": read_kb("VmRSS:"),
                "virtual_memory_bytes": read_kb("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::transcription::engine::testing::{FakeBehavior, FakeTranscriber};
    use actix_web::{test, App};
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_health_reports_model_and_admission() {
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(FakeTranscriber::new(FakeBehavior::Reply(String::new()))),
        );
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["model"]["status"], "loaded");
        assert_eq!(body["model"]["info"]["model"], "fake");
        assert_eq!(body["model"]["info"]["precision"], "f32");
        assert_eq!(body["admission"]["max_pending_requests"], 8);
        assert_eq!(body["admission"]["pending_requests"], 0);
    }
}
