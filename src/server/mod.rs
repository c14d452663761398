// HTTP server - axum router, bearer auth middleware and lifecycle
// Every /api route except the OAuth callback requires a verified identity.

pub mod routes;
pub mod streaming;

use axum::{
    Json, Router,
    extract::{Request, State},
    http::{HeaderValue, Method, header},
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::auth::{IdentityVerifier, bearer_token, is_allowed};
use crate::config::ServerConfig;
use crate::error::AppError;
use crate::library::Library;

/// Paths reachable without a bearer token
const PUBLIC_PATHS: &[&str] = &["/health", "/api/health", "/api/spotify/callback"];

/// Shared state for all handlers
pub struct AppState {
    pub library: Library,
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Emails allowed to use the API; empty allows everyone
    pub allowed_users: Vec<String>,
}

/// Holds the running server's shutdown mechanism
pub struct RunningServer {
    pub shutdown_tx: oneshot::Sender<()>,
    pub addr: SocketAddr,
    pub handle: JoinHandle<()>,
}

impl RunningServer {
    /// Signal shutdown and wait for in-flight requests to drain
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.handle.await {
            log::error!("Server task failed: {}", e);
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "band-practice",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Auth middleware - verifies the Bearer token, enforces the allow-list and
/// hands the caller's Identity to handlers through request extensions.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if PUBLIC_PATHS.contains(&request.uri().path()) || request.method() == Method::OPTIONS {
        return Ok(next.run(request).await);
    }

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string)
        .ok_or(AppError::Unauthorized)?;

    let identity = state
        .verifier
        .verify(&token)
        .await
        .ok_or(AppError::Unauthorized)?;

    if !is_allowed(&state.allowed_users, &identity) {
        log::warn!("Rejected user {} not on the allow-list", identity.uid);
        return Err(AppError::Forbidden("Access denied".to_string()));
    }

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if origins.is_empty() {
        return cors.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                log::warn!("Ignoring invalid CORS origin {:?}", o);
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

/// Build the full application router
pub fn router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/health", get(health))
        .merge(routes::api_routes())
        .merge(streaming::sync_routes())
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

/// Start the HTTP server. Returns the running server handle (for shutdown) or an error.
pub async fn start_server(
    config: &ServerConfig,
    state: Arc<AppState>,
) -> Result<RunningServer, String> {
    let app = router(state, &config.cors_origins);

    let addr = listen_addr(&config.host, config.port)?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;
    let actual_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local addr: {}", e))?;

    log::info!("Server listening on {}", actual_addr);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                log::info!("Shutdown signal received, draining connections...");
            })
            .await
        {
            log::error!("Server error: {}", e);
        }
        log::info!("Server stopped");
    });

    Ok(RunningServer {
        shutdown_tx,
        addr: actual_addr,
        handle,
    })
}

/// The configured host and port. Port 0 lets the OS pick one.
fn listen_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let ip: std::net::IpAddr = host
        .parse()
        .map_err(|e| format!("Invalid listen address {:?}: {}", host, e))?;
    Ok(SocketAddr::new(ip, port))
}


#[cfg(test)]
mod tests {
    use super::test_support::{app_state, spawn_server};
    use super::*;
    use crate::library::test_support::harness;
    use serde_json::Value;

    #[tokio::test]
    async fn test_port_in_use_is_an_error() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port,
            cors_origins: Vec::new(),
        };
        let err = start_server(&config, app_state(&harness())).await.err().unwrap();
        assert!(err.contains(&port.to_string()), "{}", err);
    }

    #[test]
    fn test_listen_addr() {
        assert_eq!(listen_addr("127.0.0.1", 8080).unwrap().port(), 8080);
        assert!(listen_addr("localhost:80", 80).is_err());
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let server = spawn_server().await;
        let resp = server
            .client
            .get(format!("{}/health", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_missing_or_unknown_token() {
        let server = spawn_server().await;
        let resp = server
            .client
            .get(format!("{}/api/users/me", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);

        let resp = server.get("/api/users/me", "nope").send().await.unwrap();
        assert_eq!(resp.status(), 401);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_allow_list_enforced() {
        let server = spawn_server().await;
        let resp = server
            .post("/api/auth/login", "outsider-token")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 403);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "Access denied");
    }
}
