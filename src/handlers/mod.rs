//! # HTTP Handlers
//!
//! Routes and the CORS policy that wraps them.
//!
//! ## Routes:
//! - `POST /transcribe`: upload audio, get text back
//! - `GET /health`: service and model status

pub mod transcribe;

use actix_cors::Cors;
use actix_web::web;

use crate::config::ServerConfig;
use crate::health;

pub use transcribe::transcribe;

/// Register every route on an `App`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/transcribe", web::post().to(transcribe))
        .route("/health", web::get().to(health::health_check));
}

/// Browser access policy: the configured origins may POST with credentials
/// and any request header.
pub fn cors_policy(server: &ServerConfig) -> Cors {
    server
        .allowed_origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allowed_methods(vec!["POST"])
        .allow_any_header()
        .supports_credentials()
        .max_age(3600)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::AppState;
    use crate::transcription::engine::testing::{FakeBehavior, FakeTranscriber};
    use actix_web::http::{header, Method, StatusCode};
    use actix_web::{test, App};
    use std::sync::Arc;

    fn preflight(origin: &str, method: &str) -> test::TestRequest {
        test::TestRequest::default()
            .method(Method::OPTIONS)
            .uri("/transcribe")
            .insert_header((header::ORIGIN, origin))
            .insert_header((header::ACCESS_CONTROL_REQUEST_METHOD, method))
            .insert_header((header::ACCESS_CONTROL_REQUEST_HEADERS, "x-client-version"))
    }

    async fn allowed_origin_for(req: test::TestRequest) -> Option<String> {
        let config = AppConfig::default();
        let state = AppState::new(
            config.clone(),
            Arc::new(FakeTranscriber::new(FakeBehavior::Reply(String::new()))),
        );
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .wrap(cors_policy(&config.server))
                .configure(configure),
        )
        .await;

        match test::try_call_service(&app, req.to_request()).await {
            Ok(response) => response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
            Err(_) => None,
        }
    }

    #[actix_web::test]
    async fn test_preflight_from_listed_origin_is_allowed() {
        let config = AppConfig::default();
        let state = AppState::new(
            config.clone(),
            Arc::new(FakeTranscriber::new(FakeBehavior::Reply(String::new()))),
        );
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .wrap(cors_policy(&config.server))
                .configure(configure),
        )
        .await;

        let response = test::call_service(
            &app,
            preflight("http://localhost:3000", "POST").to_request(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:3000"
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
            "true"
        );
        assert!(headers
            .get(header::ACCESS_CONTROL_ALLOW_METHODS)
            .unwrap()
            .to_str()
            .unwrap()
            .contains("POST"));
    }

    #[actix_web::test]
    async fn test_second_listed_origin_is_allowed() {
        let origin = allowed_origin_for(preflight("https://your-company-website.com", "POST")).await;
        assert_eq!(origin.as_deref(), Some("https://your-company-website.com"));
    }

    #[actix_web::test]
    async fn test_unlisted_origin_is_not_allowed() {
        let origin = allowed_origin_for(preflight("https://evil.example.com", "POST")).await;
        assert!(origin.is_none());
    }

    #[actix_web::test]
    async fn test_only_post_is_allowed() {
        let origin = allowed_origin_for(preflight("http://localhost:3000", "DELETE")).await;
        assert!(origin.is_none());
    }

    #[actix_web::test]
    async fn test_routes_are_registered() {
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(FakeTranscriber::new(FakeBehavior::Reply(String::new()))),
        );
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure),
        )
        .await;

        let health = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(health.status(), StatusCode::OK);

        let unknown = test::call_service(&app, test::TestRequest::get().uri("/transcripts").to_request()).await;
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    }
}
