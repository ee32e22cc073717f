//! Request correlation.

use std::{net::SocketAddr, time::Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{HeaderValue, header::CONTENT_TYPE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use tracing::Instrument;
use uuid::Uuid;

use super::ClientIp;
use crate::{AppState, observability::metrics};

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Longer client-supplied ids are replaced rather than echoed.
const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// First pipeline stage: request id, client IP and the request span.
///
/// An incoming `X-Request-Id` is reused so ids correlate across services.
/// JSON error bodies get the id injected into `error.request_id`.
pub async fn request_id_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty() && s.len() <= MAX_REQUEST_ID_LEN)
        .map(|s| RequestId::from_string(s.to_string()))
        .unwrap_or_else(RequestId::new);

    let client_ip = state.client_ip.resolve(
        req.headers(),
        req.extensions().get::<ConnectInfo<SocketAddr>>(),
    );

    req.extensions_mut().insert(request_id.clone());
    req.extensions_mut().insert(ClientIp(client_ip));

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let route = metric_route(&req);
    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    let started = Instant::now();
    let response = next.run(req).instrument(span).await;
    metrics::record_http_request(
        method.as_str(),
        &route,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );

    let mut response = inject_request_id_into_error(response, &request_id).await;
    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

/// Route template for metric labels. Raw paths are client-controlled and
/// would give every distinct URL its own series.
fn metric_route(req: &Request) -> String {
    req.extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |m| m.as_str().to_string())
}

/// Add the request id to a JSON error body: `error.request_id` for
/// [`ErrorResponse`](crate::error::ErrorResponse) bodies, top-level
/// `requestId` for throttle bodies. Other responses pass through untouched.
async fn inject_request_id_into_error(response: Response, request_id: &RequestId) -> Response {
    let status = response.status();
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));

    if !(status.is_client_error() || status.is_server_error()) || !is_json {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return (parts, Body::empty()).into_response(),
    };

    let Ok(mut json) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
        return Response::from_parts(parts, Body::from(bytes));
    };

    let id = serde_json::Value::String(request_id.0.clone());
    if let Some(error) = json.get_mut("error").and_then(|e| e.as_object_mut()) {
        error.insert("request_id".to_string(), id);
    } else if let Some(body) = json.as_object_mut()
        && body.contains_key("status")
    {
        body.insert("requestId".to_string(), id);
    } else {
        return Response::from_parts(parts, Body::from(bytes));
    }

    let modified = serde_json::to_vec(&json).unwrap_or_else(|_| bytes.to_vec());
    Response::from_parts(parts, Body::from(modified))
}

#[cfg(test)]
mod tests {
    use axum::{Router, http::StatusCode, routing::get};
    use tower::ServiceExt;

    use super::*;

    async fn label_route(req: Request, next: Next) -> Response {
        let route = metric_route(&req);
        let mut response = next.run(req).await;
        response
            .headers_mut()
            .insert("x-route", HeaderValue::from_str(&route).unwrap());
        response
    }

    #[tokio::test]
    async fn test_metric_route_uses_template() {
        let app: Router = Router::new()
            .route("/tenants/{id}/users", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn(label_route));

        for (uri, expected) in [
            ("/tenants/42/users", "/tenants/{id}/users"),
            ("/tenants/43/users", "/tenants/{id}/users"),
            ("/random-8f3a2c", "unmatched"),
        ] {
            let response = app
                .clone()
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.headers()["x-route"], expected, "{uri}");
        }
    }

    fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
        Response::builder()
            .status(status)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[tokio::test]
    async fn test_inject_into_error_object() {
        let id = RequestId::from_string("req-1".to_string());
        let response = json_response(
            StatusCode::UNAUTHORIZED,
            serde_json::json!({"error": {"type": "authentication_error", "message": "no"}}),
        );

        let json = body_json(inject_request_id_into_error(response, &id).await).await;
        assert_eq!(json["error"]["request_id"], "req-1");
        assert_eq!(json["error"]["type"], "authentication_error");
    }

    #[tokio::test]
    async fn test_inject_into_throttle_body() {
        let id = RequestId::from_string("req-2".to_string());
        let response = json_response(
            StatusCode::TOO_MANY_REQUESTS,
            serde_json::json!({"status": 429, "error": "Too Many Requests"}),
        );

        let json = body_json(inject_request_id_into_error(response, &id).await).await;
        assert_eq!(json["requestId"], "req-2");
        assert_eq!(json["error"], "Too Many Requests");
    }

    #[tokio::test]
    async fn test_success_untouched() {
        let id = RequestId::from_string("req-3".to_string());
        let response = json_response(StatusCode::OK, serde_json::json!({"status": "ok"}));

        let json = body_json(inject_request_id_into_error(response, &id).await).await;
        assert!(json.get("requestId").is_none());
    }

    #[tokio::test]
    async fn test_non_json_untouched() {
        let id = RequestId::from_string("req-4".to_string());
        let response = Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .header(CONTENT_TYPE, "text/plain")
            .body(Body::from("Bad Request"))
            .unwrap();

        let modified = inject_request_id_into_error(response, &id).await;
        let bytes = modified.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(bytes.as_ref(), b"Bad Request");
    }
}
