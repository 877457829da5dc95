//! Adapter behavior against a scripted fake upstream.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde_json::{Value as JsonValue, json};

use chatgate_protocol::openai::chat::request::ChatCompletionRequest;
use chatgate_protocol::openai::chat::types::{ChatRole, FinishReason};
use chatgate_provider_core::{
    AdapterError, AdapterResponse, FeatureFlag, ModelDescriptor, ProviderAdapter, RequestContext,
    RouteTarget,
};
use chatgate_provider_impl::upstream::{
    UpstreamBody, UpstreamClient, UpstreamRequest, UpstreamResponse,
};
use chatgate_provider_impl::{GlmAdapter, K2Adapter, QwenAdapter};
use chatgate_session::SessionBundle;

enum FakeReply {
    Json(u16, JsonValue),
    JsonWithHeaders(u16, JsonValue, Vec<(String, String)>),
    Sse(Vec<JsonValue>),
}

#[derive(Default)]
struct FakeUpstream {
    requests: Mutex<Vec<UpstreamRequest>>,
    replies: Mutex<VecDeque<FakeReply>>,
}

impl FakeUpstream {
    fn push(&self, reply: FakeReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    fn recorded(&self) -> Vec<UpstreamRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl UpstreamClient for FakeUpstream {
    fn send<'a>(
        &'a self,
        req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, AdapterError>> + Send + 'a>> {
        self.requests.lock().unwrap().push(req);
        let reply = self.replies.lock().unwrap().pop_front();
        Box::pin(async move {
            match reply.expect("fake upstream ran out of scripted replies") {
                FakeReply::Json(status, body) => Ok(UpstreamResponse {
                    status,
                    headers: Vec::new(),
                    body: UpstreamBody::Bytes(Bytes::from(body.to_string())),
                }),
                FakeReply::JsonWithHeaders(status, body, headers) => Ok(UpstreamResponse {
                    status,
                    headers,
                    body: UpstreamBody::Bytes(Bytes::from(body.to_string())),
                }),
                FakeReply::Sse(events) => {
                    let (tx, rx) = tokio::sync::mpsc::channel(16);
                    tokio::spawn(async move {
                        for event in events {
                            let frame = format!("data: {event}\n\n");
                            if tx.send(Bytes::from(frame)).await.is_err() {
                                return;
                            }
                        }
                        let _ = tx.send(Bytes::from_static(b"data: [DONE]\n\n")).await;
                    });
                    Ok(UpstreamResponse {
                        status: 200,
                        headers: vec![(
                            "content-type".to_string(),
                            "text/event-stream".to_string(),
                        )],
                        body: UpstreamBody::Stream(rx),
                    })
                }
            }
        })
    }
}

fn ctx() -> RequestContext {
    RequestContext::new("req-test", Duration::from_secs(120))
}

fn chat_request(model: &str, stream: bool) -> ChatCompletionRequest {
    serde_json::from_value(json!({
        "model": model,
        "stream": stream,
        "messages": [{"role": "user", "content": "hi"}]
    }))
    .unwrap()
}

fn glm_route(flags: &[FeatureFlag]) -> RouteTarget {
    RouteTarget {
        public_name: "GLM-4.5".to_string(),
        descriptor: ModelDescriptor::new("GLM-4.5", "glm", "0727-360B-API"),
        flags: flags.iter().copied().collect(),
    }
}

fn qwen_route(public: &str, flags: &[FeatureFlag]) -> RouteTarget {
    RouteTarget {
        public_name: public.to_string(),
        descriptor: ModelDescriptor::new("qwen3-max", "qwen", "qwen3-max"),
        flags: flags.iter().copied().collect(),
    }
}

fn glm_session() -> SessionBundle {
    let mut bundle = SessionBundle::new("glm", 3600);
    bundle.bearer_token = Some("jwt-token".to_string());
    bundle.cookies.insert("acw_tc".to_string(), "c1".to_string());
    bundle
}

fn qwen_session() -> SessionBundle {
    let mut bundle = SessionBundle::new("qwen", 3600);
    bundle
        .cookies
        .insert("ssxmod_itna".to_string(), "cv".to_string());
    bundle
        .extra
        .insert("raw_token".to_string(), "raw-tok".to_string());
    bundle
        .extra
        .insert("cookie_value".to_string(), "cv".to_string());
    bundle
}

fn glm_sse(events: &[(&str, &str, bool)]) -> FakeReply {
    FakeReply::Sse(
        events
            .iter()
            .map(|(phase, content, done)| {
                json!({"data": {"phase": phase, "content": content, "done": done}})
            })
            .collect(),
    )
}

async fn drain(
    mut rx: chatgate_provider_core::ChunkStream,
) -> Vec<chatgate_protocol::openai::chat::stream::ChatCompletionChunk> {
    let mut out = Vec::new();
    while let Some(item) = rx.recv().await {
        out.push(item.expect("stream item"));
    }
    out
}

#[tokio::test]
async fn glm_streaming_emits_role_deltas_and_stop() {
    let upstream = Arc::new(FakeUpstream::default());
    upstream.push(glm_sse(&[
        ("answer", "Hel", false),
        ("answer", "Hello", false),
        ("answer", "Hello", true),
    ]));
    let adapter = GlmAdapter::new(upstream.clone());

    let response = adapter
        .complete(&ctx(), &glm_route(&[]), &chat_request("GLM-4.5", true), &glm_session())
        .await
        .unwrap();
    let AdapterResponse::Stream(rx) = response else {
        panic!("expected stream");
    };
    let chunks = drain(rx).await;

    assert_eq!(chunks[0].choices[0].delta.role, Some(ChatRole::Assistant));
    let text: String = chunks
        .iter()
        .filter_map(|chunk| chunk.choices[0].delta.content.clone())
        .collect();
    assert_eq!(text, "Hello");
    assert_eq!(
        chunks.last().unwrap().choices[0].finish_reason,
        Some(FinishReason::Stop)
    );

    // The upstream call carried the session's auth material.
    let sent = upstream.recorded();
    assert_eq!(sent.len(), 1);
    let auth = sent[0]
        .headers
        .iter()
        .find(|(name, _)| name == "authorization")
        .unwrap();
    assert_eq!(auth.1, "Bearer jwt-token");
}

#[tokio::test]
async fn glm_thinking_routes_reasoning_and_swaps_features() {
    let upstream = Arc::new(FakeUpstream::default());
    upstream.push(glm_sse(&[
        ("thinking", "let me think", false),
        ("answer", "42", true),
    ]));
    let adapter = GlmAdapter::new(upstream.clone());

    let route = RouteTarget {
        public_name: "GLM-4.5-Thinking".to_string(),
        ..glm_route(&[FeatureFlag::Thinking])
    };
    let response = adapter
        .complete(&ctx(), &route, &chat_request("GLM-4.5-Thinking", true), &glm_session())
        .await
        .unwrap();
    let AdapterResponse::Stream(rx) = response else {
        panic!("expected stream");
    };
    let chunks = drain(rx).await;

    let reasoning: String = chunks
        .iter()
        .filter_map(|chunk| chunk.choices[0].delta.reasoning_content.clone())
        .collect();
    let content: String = chunks
        .iter()
        .filter_map(|chunk| chunk.choices[0].delta.content.clone())
        .collect();
    assert_eq!(reasoning, "let me think");
    assert_eq!(content, "42");

    let body: JsonValue =
        serde_json::from_slice(upstream.recorded()[0].body.as_ref().unwrap()).unwrap();
    assert_eq!(body["features"]["enable_thinking"], json!(true));
    assert_eq!(body["features"]["enable_web_search"], json!(false));
}

#[tokio::test]
async fn glm_nonstream_envelope_matches_stream_concatenation() {
    let events = [
        ("answer", "Hel", false),
        ("answer", "Hello world", false),
        ("answer", "Hello world", true),
    ];

    let upstream = Arc::new(FakeUpstream::default());
    upstream.push(glm_sse(&events));
    let adapter = GlmAdapter::new(upstream);
    let response = adapter
        .complete(&ctx(), &glm_route(&[]), &chat_request("GLM-4.5", false), &glm_session())
        .await
        .unwrap();
    let AdapterResponse::Completion(envelope) = response else {
        panic!("expected completion");
    };
    assert_eq!(
        envelope.choices[0].message.content.as_deref(),
        Some("Hello world")
    );
    assert_eq!(envelope.choices[0].finish_reason, FinishReason::Stop);
}

#[tokio::test]
async fn qwen_request_carries_all_nine_mandatory_fields() {
    let upstream = Arc::new(FakeUpstream::default());
    upstream.push(FakeReply::Json(200, json!({"data": {"id": "chat-123"}})));
    upstream.push(FakeReply::Sse(vec![json!({
        "choices": [{"delta": {"content": "ok", "status": "finished"}}]
    })]));
    let adapter = QwenAdapter::new(upstream.clone());

    let route = RouteTarget {
        public_name: "qwen3-max-thinking".to_string(),
        ..qwen_route("qwen3-max-thinking", &[FeatureFlag::Thinking])
    };
    adapter
        .complete(
            &ctx(),
            &route,
            &chat_request("qwen3-max-thinking", true),
            &qwen_session(),
        )
        .await
        .unwrap();

    let sent = upstream.recorded();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].url.contains("/api/v1/chats/new"));

    let body: JsonValue = serde_json::from_slice(sent[1].body.as_ref().unwrap()).unwrap();
    assert!(body["session_id"].as_str().is_some());
    assert_eq!(body["chat_id"], json!("chat-123"));
    assert_eq!(body["parent_id"], JsonValue::Null);
    assert_eq!(body["chat_mode"], json!("normal"));
    assert!(body["timestamp"].as_i64().unwrap() > 1_600_000_000_000);
    assert_eq!(body["chat_type"], json!("t2t"));
    for message in body["messages"].as_array().unwrap() {
        assert_eq!(message["chat_type"], json!("text"));
        assert!(message["extra"].is_object());
    }
    assert_eq!(body["feature_config"]["output_schema"], json!("phase"));
    assert_eq!(body["feature_config"]["thinking_enabled"], json!(true));
    assert_eq!(body["feature_config"]["thinking_budget"], json!(60));
}

#[tokio::test]
async fn qwen_credential_is_compressed_at_send_time() {
    let upstream = Arc::new(FakeUpstream::default());
    upstream.push(FakeReply::Json(200, json!({"data": {"id": "chat-1"}})));
    upstream.push(FakeReply::Sse(vec![json!({
        "choices": [{"delta": {"content": "ok", "status": "finished"}}]
    })]));
    let adapter = QwenAdapter::new(upstream.clone());

    adapter
        .complete(
            &ctx(),
            &qwen_route("qwen3-max", &[]),
            &chat_request("qwen3-max", true),
            &qwen_session(),
        )
        .await
        .unwrap();

    let sent = upstream.recorded();
    let auth = sent[1]
        .headers
        .iter()
        .find(|(name, _)| name == "authorization")
        .unwrap()
        .1
        .clone();
    let encoded = auth.strip_prefix("Bearer ").unwrap();
    let (token, cookie) =
        chatgate_provider_impl::qwen::compress::decompress_credential(encoded).unwrap();
    assert_eq!(token, "raw-tok");
    assert_eq!(cookie, "cv");
}

#[tokio::test]
async fn qwen_image_generation_reduces_aspect_ratio_and_buffers_urls() {
    let upstream = Arc::new(FakeUpstream::default());
    upstream.push(FakeReply::Json(200, json!({"data": {"id": "chat-img"}})));
    upstream.push(FakeReply::Sse(vec![
        json!({"choices": [{"delta": {"content": "https://cdn.example/img-1.png"}}]}),
        json!({"choices": [{"delta": {"status": "finished"}}]}),
    ]));
    let adapter = QwenAdapter::new(upstream.clone());

    let mut request = chat_request("qwen3-max-image", false);
    request.extra_body = Some(json!({"size": "1920x1080"}));
    let route = RouteTarget {
        public_name: "qwen3-max-image".to_string(),
        ..qwen_route("qwen3-max-image", &[FeatureFlag::Image])
    };
    let response = adapter
        .complete(&ctx(), &route, &request, &qwen_session())
        .await
        .unwrap();

    let AdapterResponse::Images(images) = response else {
        panic!("expected image envelope");
    };
    assert_eq!(
        images.data[0].url.as_deref(),
        Some("https://cdn.example/img-1.png")
    );

    let body: JsonValue =
        serde_json::from_slice(upstream.recorded()[1].body.as_ref().unwrap()).unwrap();
    assert_eq!(body["chat_type"], json!("t2i"));
    assert_eq!(body["size"], json!("1920x1080"));
    assert_eq!(body["image_gen_config"]["aspect_ratio"], json!("16:9"));
}

#[tokio::test]
async fn upstream_401_surfaces_as_auth_rejection() {
    let upstream = Arc::new(FakeUpstream::default());
    upstream.push(FakeReply::Json(401, json!({"detail": "expired"})));
    let adapter = GlmAdapter::new(upstream);

    let err = adapter
        .complete(&ctx(), &glm_route(&[]), &chat_request("GLM-4.5", true), &glm_session())
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::AuthRejected { status: 401, .. }));
}

#[tokio::test]
async fn rate_limit_retries_until_success() {
    let upstream = Arc::new(FakeUpstream::default());
    upstream.push(FakeReply::JsonWithHeaders(
        429,
        json!({"detail": "slow down"}),
        vec![("retry-after".to_string(), "0".to_string())],
    ));
    upstream.push(glm_sse(&[("answer", "ok", true)]));
    let adapter = GlmAdapter::new(upstream.clone());

    let response = adapter
        .complete(&ctx(), &glm_route(&[]), &chat_request("GLM-4.5", true), &glm_session())
        .await
        .unwrap();
    assert!(matches!(response, AdapterResponse::Stream(_)));
    assert_eq!(upstream.recorded().len(), 2);
}

#[tokio::test]
async fn k2_guest_session_sends_no_authorization_header() {
    let upstream = Arc::new(FakeUpstream::default());
    upstream.push(FakeReply::Sse(vec![
        json!({"event": "cmpl", "text": "hello from guest"}),
        json!({"event": "all_done"}),
    ]));
    let adapter = K2Adapter::new(upstream.clone());

    let mut session = SessionBundle::new("k2", 3600);
    session.cookies.insert("kimi_sid".to_string(), "g1".to_string());

    let route = RouteTarget {
        public_name: "kimi-k2".to_string(),
        descriptor: ModelDescriptor::new("kimi-k2", "k2", "k2"),
        flags: Default::default(),
    };
    let response = adapter
        .complete(&ctx(), &route, &chat_request("kimi-k2", false), &session)
        .await
        .unwrap();

    let AdapterResponse::Completion(envelope) = response else {
        panic!("expected completion");
    };
    assert_eq!(
        envelope.choices[0].message.content.as_deref(),
        Some("hello from guest")
    );

    let sent = upstream.recorded();
    assert!(
        !sent[0]
            .headers
            .iter()
            .any(|(name, _)| name == "authorization")
    );
    assert!(sent[0].headers.iter().any(|(name, _)| name == "cookie"));
}
