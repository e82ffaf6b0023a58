//! # Speech Transcribe Backend - Main Application Entry Point
//!
//! This is the main entry point for the transcription web server.
//! It loads one Whisper model and serves it over a small Actix-web API:
//!
//! - `POST /transcribe`: multipart audio upload in, `{"transcription": "..."}` out
//! - `GET /health`: service, model and counter status
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: The server is asynchronous; model inference runs on blocking threads
//! - **modules**: Code is organized into separate modules (mod statements)
//! - **Result<T, E>**: Startup failures propagate with `?` and end the process
//! - **Arc**: One loaded model is shared by every worker thread
//! - **static**: Global shutdown flag that lives for the entire program duration
//!
//! ## Application Architecture:
//! - **config**: Application configuration (defaults, TOML file, environment variables)
//! - **state**: Shared state: config, the transcriber, the admission gate and counters
//! - **health**: Health check endpoint
//! - **middleware**: Request logging and per-endpoint metrics
//! - **handlers**: Routes, CORS policy and the transcription handler
//! - **staging**: Temp files holding uploads while the model reads them
//! - **audio**: Container sniffing, decoding and resampling
//! - **transcription**: The Whisper model behind the `Transcriber` trait
//! - **device**: CPU / CUDA / Metal selection
//! - **error**: Error types and their HTTP responses

// Module declarations - These tell Rust about our other source files
mod audio;         // Format sniffing and decoding (audio/ directory)
mod config;        // Configuration management (config.rs)
mod device;        // Compute device selection (device.rs)
mod error;         // Error handling types (error.rs)
mod handlers;      // HTTP request handlers (handlers/ directory)
mod health;        // Health check endpoint (health.rs)
mod middleware;    // Custom middleware (middleware/ directory)
mod staging;       // Upload temp files (staging.rs)
mod state;         // Application state management (state.rs)
mod transcription; // Whisper model and the Transcriber trait (transcription/ directory)

// External crate imports - These are dependencies from Cargo.toml
use actix_web::{web, App, HttpServer};  // Web framework
use anyhow::Result;    // Better error handling with context
use config::AppConfig; // Our custom configuration struct
use state::AppState;   // Our custom application state
use std::sync::atomic::{AtomicBool, Ordering};  // Thread-safe boolean for shutdown
use std::sync::Arc;
use tracing::{error, info};  // Structured logging
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};  // Logging setup
use transcription::WhisperTranscriber;

/// Global shutdown signal that can be accessed from anywhere in the program.
/// AtomicBool is thread-safe, meaning multiple threads can safely read/write to it.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging** for debugging and monitoring
/// 3. **Loads the Whisper model**; if that fails the process exits without serving
/// 4. **Creates shared application state** that all requests can access
/// 5. **Configures the HTTP server** with CORS, middleware and routes
/// 6. **Handles graceful shutdown** when receiving system signals
///
/// ## Key Rust Concepts:
/// - `#[actix_web::main]`: This macro sets up the async runtime
/// - `Result<()>`: Returning `Err` from `main` prints the error and exits non-zero
/// - `?`: The question mark operator returns early if there's an error
#[actix_web::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting speech-transcribe-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!("Allowed origins: {}", config.server.allowed_origins.join(", "));

    // The model is loaded once, before binding. Serving without it is not an option.
    let transcriber = match WhisperTranscriber::load(&config.models).await {
        Ok(transcriber) => transcriber,
        Err(e) => {
            error!("Failed to load Whisper model '{}': {:#}", config.models.whisper_model, e);
            return Err(e);
        }
    };
    info!("Whisper model ready: {:?}", transcription::Transcriber::describe(&transcriber));

    let app_state = AppState::new(config.clone(), Arc::new(transcriber));
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    // Set up signal handlers for graceful shutdown (Ctrl+C, SIGTERM)
    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        App::new()
            // Share our application state with all request handlers
            .app_data(web::Data::new(app_state.clone()))
            // Middleware runs in reverse registration order for requests:
            // logging first, then metrics, then CORS
            .wrap(handlers::cors_policy(&app_state.config.server))
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .configure(handlers::configure)
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Wait for either the server to finish OR a shutdown signal
    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            // Graceful: in-flight uploads finish and clean up their temp files
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system for the application.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "info", "speech_transcribe_backend=trace")
/// - If not set, defaults to "speech_transcribe_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "speech_transcribe_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Set up signal handlers for graceful shutdown.
///
/// ## What this does:
/// - Listens for SIGTERM (termination signal from system)
/// - Listens for SIGINT (interrupt signal, usually Ctrl+C)
/// - When either signal is received, sets the global shutdown flag
///
/// If a handler can't be installed the server keeps running and can only be
/// stopped by a hard kill, so that is logged as an error.
fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                return;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(sigint) => sigint,
            Err(e) => {
                error!("Failed to install SIGINT handler: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Wait for the shutdown signal to be set.
///
/// Polls the flag every 100ms; `tokio::time::sleep` yields to other tasks
/// between checks.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
