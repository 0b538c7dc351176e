//! HTTP surface: render submission, status probe and generated files.

use crate::orchestrator::Orchestrator;
use crate::request::RenderRequest;
use crate::{sweeper, Error};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

/// Public prefix under which generated files are served.
pub const OUTPUT_PREFIX: &str = "/output";

/// Build the router around a shared orchestrator.
pub fn build_router(orchestrator: Arc<Orchestrator>) -> Router {
    let files = ServeDir::new(orchestrator.config().store.dir.clone());

    Router::new()
        .route("/check-status", get(check_status))
        .route("/generate-pdf", post(generate_pdf))
        .nest_service(OUTPUT_PREFIX, files)
        .layer(CorsLayer::permissive())
        .with_state(orchestrator)
}

/// GET /check-status
async fn check_status() -> &'static str {
    "Server is running"
}

/// POST /generate-pdf
async fn generate_pdf(
    State(orchestrator): State<Arc<Orchestrator>>,
    headers: HeaderMap,
    Json(request): Json<RenderRequest>,
) -> Response {
    match orchestrator.submit(request).await {
        Ok(path) => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let pdf_url = format!(
                "{}{}/{}",
                public_base(&headers, orchestrator.config().port),
                OUTPUT_PREFIX,
                name
            );
            info!("PDF ready: {}", pdf_url);
            Json(serde_json::json!({ "pdfUrl": pdf_url })).into_response()
        }
        Err(e) => {
            error!("Error in generate-pdf endpoint: {}", e);
            error_response(&e).into_response()
        }
    }
}

/// Status code and plain-text body for a failed render.
pub fn error_response(err: &Error) -> (StatusCode, String) {
    match err {
        Error::InvalidRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
        Error::RequestTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "PDF generation timeout".to_string()),
        Error::UnreachableTarget(_) | Error::InvalidTarget(_) => (
            StatusCode::BAD_GATEWAY,
            format!("Error generating PDF: {}", err.message()),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error generating PDF: {}", err.message()),
        ),
    }
}

/// `<scheme>://<host>` as the caller reached us.
fn public_base(headers: &HeaderMap, port: u16) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| format!("localhost:{}", port));
    format!("{}://{}", scheme, host)
}

/// Serve until Ctrl-C / SIGTERM, with the retention sweep running alongside.
pub async fn serve(orchestrator: Orchestrator) -> anyhow::Result<()> {
    let config = orchestrator.config().clone();
    std::fs::create_dir_all(&config.store.dir)?;

    let sweeper = sweeper::spawn(config.store.clone());
    let app = build_router(Arc::new(orchestrator));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server is listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_follows_request_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(public_base(&headers, 3001), "http://localhost:3001");
        headers.insert(header::HOST, "pdf.example.com".parse().unwrap());
        headers.insert("x-forwarded-proto", "https".parse().unwrap());
        assert_eq!(public_base(&headers, 3001), "https://pdf.example.com");
    }

    #[test]
    fn errors_map_to_non_success_statuses() {
        let (status, body) = error_response(&Error::InvalidRequest("URL is required".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "URL is required");

        let (status, body) = error_response(&Error::RequestTimeout(300));
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body, "PDF generation timeout");

        let (status, _) = error_response(&Error::UnreachableTarget("404".into()));
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (status, body) = error_response(&Error::ProcessFailure("exited with error".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Error generating PDF: exited with error");
    }
}
