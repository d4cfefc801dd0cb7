//! REST API server for launching bundles
//!
//! ## Endpoints
//!
//! GET  /health          - Liveness
//! POST /api/v1/run      - Launch; options in the query string, archive as the body
//! POST /api/v1/stop     - Stop the running bundle
//! GET  /api/v1/status   - Supervisor status
//! GET  /api/v1/logs     - Live console output (Server-Sent Events)

use actix_web::{http::StatusCode, web, App, HttpResponse, HttpServer, Responder};
use bundle_launcher::logging::init_logger;
use bundle_launcher::{
    ArchiveSource, Launcher, LauncherBuilder, LauncherError, LogEvent, RunRequest, RunStatus,
    SharedLauncher,
};
use clap::Parser;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "launcher-server")]
#[command(version, about = "HTTP front end for the bundle launcher")]
struct Args {
    /// Address to bind
    #[arg(long, env = "LAUNCHER_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to bind
    #[arg(long, env = "LAUNCHER_PORT", default_value_t = 8080)]
    port: u16,

    /// Directory holding the workspace and the settings file
    #[arg(long, env = "LAUNCHER_ROOT", default_value = "/tmp/bundle-launcher")]
    root: PathBuf,

    /// Archive fetched when a run request carries no body
    #[arg(long, env = "LAUNCHER_ARCHIVE_URL")]
    archive_url: Option<String>,

    /// Password for encrypted archives
    #[arg(long, env = "LAUNCHER_ARCHIVE_PASSWORD", hide_env_values = true)]
    archive_password: Option<String>,

    /// Program that runs the bundle's entry file
    #[arg(long, env = "LAUNCHER_PROGRAM", default_value = "node")]
    program: String,

    /// Largest accepted upload, in MiB
    #[arg(long, env = "LAUNCHER_MAX_UPLOAD_MB", default_value_t = 100)]
    max_upload_mb: usize,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let args = Args::parse();
    init_logger(args.verbose);

    let launcher = LauncherBuilder::new()
        .data_dir(&args.root)
        .program(&args.program, Vec::<String>::new())
        .archive_password(args.archive_password.clone())
        .remote_archive_url(args.archive_url.clone())
        .build()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
    let state = web::Data::from(Arc::new(launcher) as SharedLauncher);
    let upload_limit = args.max_upload_mb * 1024 * 1024;

    info!(
        "Launcher API starting on http://{}:{} (data in {})",
        args.host,
        args.port,
        args.root.display()
    );

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(web::PayloadConfig::new(upload_limit))
            .route("/health", web::get().to(health_check))
            .service(
                web::scope("/api/v1")
                    .route("/run", web::post().to(run_bundle))
                    .route("/stop", web::post().to(stop_bundle))
                    .route("/status", web::get().to(get_status))
                    .route("/logs", web::get().to(stream_logs)),
            )
    })
    .bind((args.host.as_str(), args.port))?
    .run()
    .await
}

// ============ API Types ============

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorInfo {
    pub kind: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StatusInfo {
    #[serde(flatten)]
    pub status: RunStatus,
    pub subscribers: usize,
}

#[derive(Debug, Serialize)]
pub struct StopInfo {
    pub stopped: bool,
}

fn status_for(err: &LauncherError) -> StatusCode {
    match err {
        LauncherError::Superseded => StatusCode::CONFLICT,
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &LauncherError) -> HttpResponse {
    HttpResponse::build(status_for(err)).json(ApiResponse {
        success: false,
        message: err.to_string(),
        data: Some(ErrorInfo { kind: err.kind() }),
    })
}

/// One SSE frame per event; the payload is the event as JSON.
fn sse_frame(event: &LogEvent) -> String {
    match serde_json::to_string(event) {
        Ok(json) => format!("data: {}\n\n", json),
        Err(e) => {
            warn!("Dropping unserialisable log event: {}", e);
            String::new()
        }
    }
}

// ============ Handlers ============

/// Health check endpoint
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "bundle-launcher",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Launch a bundle
///
/// An empty body falls back to the configured remote archive.
async fn run_bundle(
    query: web::Query<BTreeMap<String, String>>,
    body: web::Bytes,
    launcher: web::Data<Launcher>,
) -> HttpResponse {
    let request = RunRequest::from_pairs(query.into_inner());

    let result = if body.is_empty() {
        launcher.launch_remote(request).await
    } else {
        launcher
            .launch(request, ArchiveSource::upload(body.to_vec()))
            .await
    };

    match result {
        Ok(report) => HttpResponse::Ok().json(ApiResponse::ok(report.message(), report)),
        Err(e) => {
            warn!("Launch failed: {}", e);
            error_response(&e)
        }
    }
}

/// Stop the running bundle
async fn stop_bundle(launcher: web::Data<Launcher>) -> HttpResponse {
    let stopped = launcher.stop().await;
    let message = if stopped {
        "Bundle stopped"
    } else {
        "No bundle was running"
    };
    HttpResponse::Ok().json(ApiResponse::ok(message, StopInfo { stopped }))
}

/// Get supervisor status
async fn get_status(launcher: web::Data<Launcher>) -> HttpResponse {
    let status = launcher.status();
    let info = StatusInfo {
        subscribers: launcher.broadcaster().subscriber_count(),
        status,
    };
    HttpResponse::Ok().json(ApiResponse::ok(format!("Supervisor is {}", info.status.state), info))
}

/// Live log stream; output emitted before the connection is not replayed.
async fn stream_logs(launcher: web::Data<Launcher>) -> HttpResponse {
    let subscription = launcher.subscribe();
    let frames = futures::stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        let frame = web::Bytes::from(sse_frame(&event));
        Some((Ok::<_, actix_web::Error>(frame), subscription))
    });

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{body::MessageBody, test};
    use bundle_launcher::{OutputStream, SupervisorState};

    fn status_of<R: Responder>(resp: R) -> StatusCode {
        resp.respond_to(&test::TestRequest::default().to_http_request())
            .status()
    }

    fn launcher_in(dir: &std::path::Path) -> web::Data<Launcher> {
        web::Data::new(LauncherBuilder::new().data_dir(dir).build().unwrap())
    }

    fn query(pairs: &[(&str, &str)]) -> web::Query<BTreeMap<String, String>> {
        web::Query(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    async fn json_of(resp: HttpResponse) -> serde_json::Value {
        let bytes = resp.into_body().try_into_bytes().unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[actix_web::test]
    async fn health_endpoint_works() {
        assert_eq!(status_of(health_check().await), StatusCode::OK);
    }

    #[actix_web::test]
    async fn run_without_session_id_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = launcher_in(tmp.path());

        let resp = run_bundle(
            query(&[("MODE", "public")]),
            web::Bytes::from_static(b"PK"),
            launcher.clone(),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = json_of(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["data"]["kind"], "validation");
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[actix_web::test]
    async fn run_without_body_or_remote_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = launcher_in(tmp.path());

        let resp = run_bundle(
            query(&[("SESSION_ID", "abc")]),
            web::Bytes::new(),
            launcher,
        )
        .await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = json_of(resp).await;
        assert_eq!(body["data"]["kind"], "acquisition");
    }

    #[actix_web::test]
    async fn stop_and_status_when_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = launcher_in(tmp.path());

        let body = json_of(stop_bundle(launcher.clone()).await).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["stopped"], false);

        let body = json_of(get_status(launcher.clone()).await).await;
        assert_eq!(body["data"]["state"], "idle");
        assert_eq!(body["data"]["subscribers"], 0);
        assert_eq!(launcher.status().state, SupervisorState::Idle);
    }

    #[actix_web::test]
    async fn log_stream_subscribes() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = launcher_in(tmp.path());

        let resp = stream_logs(launcher.clone()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(launcher.broadcaster().subscriber_count(), 1);

        drop(resp);
        assert_eq!(launcher.broadcaster().subscriber_count(), 0);
    }

    #[::core::prelude::v1::test]
    fn error_status_mapping() {
        assert_eq!(
            status_for(&LauncherError::Validation("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&LauncherError::Superseded), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&LauncherError::Extraction("Wrong password".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[::core::prelude::v1::test]
    fn sse_frames_carry_json_events() {
        let frame = sse_frame(&LogEvent::Chunk {
            stream: OutputStream::Stdout,
            text: "ready\n".to_string(),
        });
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("\n\n"));
        assert!(frame.contains(r#""type":"chunk""#));
        assert!(frame.contains(r#""stream":"stdout""#));

        let frame = sse_frame(&LogEvent::Exit { code: Some(1) });
        assert!(frame.contains(r#""type":"exit""#));
        assert!(frame.contains(r#""code":1"#));
    }
}
