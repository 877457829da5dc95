use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use chatgate_common::RequestId;
use chatgate_core::{Engine, EngineResponse, GatewayError};
use chatgate_protocol::openai::chat::request::ChatCompletionRequest;
use chatgate_protocol::openai::images::ImageGenerationRequest;
use chatgate_provider_core::RequestContext;

#[derive(Clone)]
struct GatewayRouterState {
    engine: Arc<Engine>,
}

pub fn gateway_router(engine: Arc<Engine>) -> Router {
    let state = GatewayRouterState { engine };
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/v1/images/generations", post(images_generations))
        .layer(middleware::from_fn_with_state(state.clone(), client_auth))
        .route("/health", get(health))
        .route("/", get(identity))
        .with_state(state)
}

/// Optional bearer auth for clients. Auth material is stripped before the
/// request reaches handlers or logs either way.
async fn client_auth(
    State(state): State<GatewayRouterState>,
    mut req: axum::http::Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    let request_id = RequestId::generate();
    let config = &state.engine.state().config;

    let presented = extract_bearer(req.headers());
    let mut header_pairs: Vec<(String, String)> = req
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    chatgate_common::redact::redact_headers(&mut header_pairs);
    tracing::debug!(
        request_id = %request_id,
        method = %req.method(),
        path = req.uri().path(),
        headers = ?header_pairs,
        "request received"
    );

    req.headers_mut().remove(header::AUTHORIZATION);
    req.extensions_mut().insert(request_id.clone());

    if !config.skip_auth
        && let Some(expected) = &config.auth_token
    {
        let authorized = presented
            .as_deref()
            .is_some_and(|token| blake3::hash(token.as_bytes()) == blake3::hash(expected.as_bytes()));
        if !authorized {
            let err = GatewayError::AuthenticationFailed("missing or invalid API key".to_string());
            return Err(error_response(&err, &request_id));
        }
    }

    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let prefix = "Bearer ";
    if value.len() > prefix.len() && value[..prefix.len()].eq_ignore_ascii_case(prefix) {
        let token = value[prefix.len()..].trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    None
}

async fn chat_completions(
    State(state): State<GatewayRouterState>,
    axum::Extension(request_id): axum::Extension<RequestId>,
    body: Bytes,
) -> Response {
    let request: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            let err = GatewayError::BadRequest(err.to_string());
            return error_response(&err, &request_id);
        }
    };

    info!(
        request_id = %request_id,
        model = %request.model,
        stream = request.is_stream(),
        "chat completion received"
    );
    let ctx = request_context(&state, &request_id);
    match state.engine.chat(&ctx, request).await {
        Ok(EngineResponse::Stream(rx)) => sse_response(rx, &request_id),
        Ok(EngineResponse::Completion(envelope)) => json_response(&*envelope, &request_id),
        Ok(EngineResponse::Images(images)) => json_response(&images, &request_id),
        Err(err) => {
            info!(request_id = %request_id, error = %err, "chat completion failed");
            error_response(&err, &request_id)
        }
    }
}

async fn images_generations(
    State(state): State<GatewayRouterState>,
    axum::Extension(request_id): axum::Extension<RequestId>,
    body: Bytes,
) -> Response {
    let request: ImageGenerationRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            let err = GatewayError::BadRequest(err.to_string());
            return error_response(&err, &request_id);
        }
    };

    let ctx = request_context(&state, &request_id);
    match state.engine.images(&ctx, request).await {
        Ok(images) => json_response(&images, &request_id),
        Err(err) => {
            info!(request_id = %request_id, error = %err, "image generation failed");
            error_response(&err, &request_id)
        }
    }
}

async fn list_models(
    State(state): State<GatewayRouterState>,
    axum::Extension(request_id): axum::Extension<RequestId>,
) -> Response {
    json_response(&state.engine.list_models(), &request_id)
}

async fn health(State(state): State<GatewayRouterState>) -> Response {
    let mut providers = serde_json::Map::new();
    for (provider, counts) in state.engine.pool_counts() {
        providers.insert(
            provider,
            json!({
                "active": counts.active,
                "cooldown": counts.cooldown,
                "disabled": counts.disabled,
            }),
        );
    }
    axum::Json(json!({"status": "ok", "providers": providers})).into_response()
}

async fn identity() -> Response {
    axum::Json(json!({
        "name": "chatgate",
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

fn request_context(state: &GatewayRouterState, request_id: &RequestId) -> RequestContext {
    RequestContext::new(
        request_id.as_str(),
        state.engine.state().config.request_deadline_duration(),
    )
}

fn sse_response(rx: tokio::sync::mpsc::Receiver<Bytes>, request_id: &RequestId) -> Response {
    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    let mut resp = Response::new(Body::from_stream(stream));
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    resp.headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    attach_request_id(&mut resp, request_id);
    resp
}

fn json_response<T: serde::Serialize>(value: &T, request_id: &RequestId) -> Response {
    let mut resp = axum::Json(value).into_response();
    attach_request_id(&mut resp, request_id);
    resp
}

fn error_response(err: &GatewayError, request_id: &RequestId) -> Response {
    let status =
        StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut resp = (status, axum::Json(err.envelope(request_id.as_str()))).into_response();
    attach_request_id(&mut resp, request_id);
    resp
}

fn attach_request_id(resp: &mut Response, request_id: &RequestId) {
    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        resp.headers_mut().insert("x-chatgate-request-id", value);
    }
}
