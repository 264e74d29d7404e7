//! HTTP server setup and the proxy handler.
//!
//! # Responsibilities
//! - Create the Axum router with the proxy handler
//! - Wire up middleware (request ID, tracing)
//! - Admit requests through the gateway core
//! - Forward admitted requests to the selected instance
//! - Report upstream outcomes back to the circuit breaker
//! - Observability (metrics, correlation IDs)

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Request, StatusCode, Uri, Version},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::gateway::{Gateway, RouteRequest};
use crate::health::Outcome;
use crate::http::request::{caller_identity, request_id, split_version, X_REQUEST_ID};
use crate::http::response::{apply_rate_limit_headers, error_response, strip_hop_by_hop};
use crate::observability::metrics;
use crate::resilience::timeouts::with_deadline;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub client: Client<HttpConnector, Body>,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server in front of `gateway`.
    pub fn new(gateway: Arc<Gateway>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let state = AppState { gateway, client };
        Self {
            router: Self::build_router(state),
        }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// No router-wide timeout: the deadline is the resolved endpoint's, so
    /// endpoints added by a reload get their own timeout.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    /// The router, for serving on a custom listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` resolves.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Main proxy handler.
/// Admits the request, forwards it, and reports the outcome.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start_time = Instant::now();
    let request_id = request_id(request.headers());
    let method = request.method().clone();
    let method_str = method.to_string();

    let (version, path) = split_version(
        request.uri().path(),
        request.headers(),
        state.gateway.default_version(),
    );
    let route = RouteRequest {
        path,
        method: method_str.clone(),
        version,
        caller: caller_identity(request.headers(), Some(peer)),
    };

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %route.path,
        version = %route.version,
        "Proxying request"
    );

    // 1. Admission: route, rate limit, instance selection
    let admission = match state.gateway.admit(&route).await {
        Ok(admission) => admission,
        Err(rejection) => {
            tracing::info!(request_id = %request_id, path = %route.path, reason = %rejection, "Request rejected");
            let response = rejection.into_response();
            metrics::record_request(&method_str, response.status().as_u16(), "none", start_time);
            return response;
        }
    };
    let endpoint_id = admission.endpoint.id.clone();

    // 2. Build the upstream request
    let (parts, body) = request.into_parts();
    let upstream_uri = match upstream_uri(admission.instance().base_url(), &route.path, parts.uri.query()) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Invalid upstream URI");
            metrics::record_request(&method_str, 502, &endpoint_id, start_time);
            return error_response(StatusCode::BAD_GATEWAY, "bad_gateway", "Upstream request failed");
        }
    };

    let mut upstream = Request::from_parts(parts, body);
    *upstream.uri_mut() = upstream_uri;
    *upstream.version_mut() = Version::HTTP_11;
    let headers = upstream.headers_mut();
    strip_hop_by_hop(headers);
    headers.remove(header::HOST);
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(X_REQUEST_ID, value);
    }

    // 3. Forward under the endpoint timeout
    let timeout = admission.endpoint.timeout;
    let (outcome, mut response) = match with_deadline(timeout, state.client.request(upstream)).await {
        Ok(Ok(response)) => {
            let status = response.status();
            let (mut parts, body) = response.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            (Outcome::Status(status), Response::from_parts(parts, Body::new(body)))
        }
        Ok(Err(e)) => {
            tracing::error!(request_id = %request_id, instance = %admission.instance().id, error = %e, "Upstream error");
            (
                Outcome::ConnectionError,
                error_response(StatusCode::BAD_GATEWAY, "bad_gateway", "Upstream request failed"),
            )
        }
        Err(_) => {
            tracing::warn!(request_id = %request_id, instance = %admission.instance().id, timeout_ms = timeout.as_millis() as u64, "Upstream timed out");
            (
                Outcome::Timeout,
                error_response(StatusCode::GATEWAY_TIMEOUT, "gateway_timeout", "Upstream timed out"),
            )
        }
    };

    // 4. Passive health signal
    state.gateway.report(&admission, outcome).await;

    if let Some(result) = &admission.rate_limit {
        apply_rate_limit_headers(response.headers_mut(), result);
    }
    metrics::record_request(&method_str, response.status().as_u16(), &endpoint_id, start_time);
    response
}

/// `base` + `path` (+ `?query`).
fn upstream_uri(base: &str, path: &str, query: Option<&str>) -> Result<Uri, axum::http::uri::InvalidUri> {
    let uri = match query {
        Some(q) => format!("{}{}?{}", base, path, q),
        None => format!("{}{}", base, path),
    };
    uri.parse()
}
