//! Adapter chunks → SSE bytes, with backpressure and cancellation.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use chatgate_provider_core::{ChunkStream, CredentialHandle, CredentialPool, Outcome};

const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// Frame adapter chunks as SSE and report the credential outcome when the
/// stream ends, errors, or the client walks away.
///
/// The output channel holds at most one unsent frame: a slow client slows
/// the upstream read instead of ballooning memory. Dropping the returned
/// receiver propagates cancellation to the adapter within one chunk, and a
/// cancellation is reported as `success` — the credential did nothing
/// wrong.
pub fn pipe_sse(
    mut chunks: ChunkStream,
    pool: Arc<CredentialPool>,
    handle: CredentialHandle,
    request_id: String,
) -> mpsc::Receiver<Bytes> {
    let (tx, rx) = mpsc::channel::<Bytes>(1);
    tokio::spawn(async move {
        let mut failed = false;
        while let Some(item) = chunks.recv().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(err) => {
                    warn!(request_id = %request_id, error = %err, "stream failed mid-flight");
                    failed = true;
                    break;
                }
            };
            let json = match serde_json::to_string(&chunk) {
                Ok(json) => json,
                Err(err) => {
                    warn!(request_id = %request_id, error = %err, "unserializable chunk skipped");
                    continue;
                }
            };
            if tx
                .send(Bytes::from(format!("data: {json}\n\n")))
                .await
                .is_err()
            {
                debug!(request_id = %request_id, "client disconnected mid-stream");
                drop(chunks);
                pool.report(&handle, Outcome::Success);
                return;
            }
        }

        let _ = tx.send(Bytes::from_static(DONE_FRAME)).await;
        pool.report(
            &handle,
            if failed {
                Outcome::TransientFailure
            } else {
                Outcome::Success
            },
        );
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatgate_protocol::openai::chat::stream::ChatCompletionChunk;
    use chatgate_protocol::openai::chat::types::{FinishReason, StreamDelta};
    use chatgate_provider_core::{Credential, CredentialState, PoolConfig};

    fn setup() -> (Arc<CredentialPool>, CredentialHandle) {
        let pool = Arc::new(CredentialPool::new(PoolConfig::default()));
        pool.insert("mock", Credential::token("t"));
        let handle = pool.checkout("mock").unwrap();
        (pool, handle)
    }

    fn content(text: &str) -> ChatCompletionChunk {
        ChatCompletionChunk::single(
            "c".to_string(),
            0,
            "m".to_string(),
            StreamDelta {
                content: Some(text.to_string()),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn frames_chunks_and_terminates_with_done() {
        let (pool, handle) = setup();
        let (tx, chunks) = mpsc::channel(4);
        tx.send(Ok(content("hi"))).await.unwrap();
        tx.send(Ok(ChatCompletionChunk::finish(
            "c".to_string(),
            0,
            "m".to_string(),
            FinishReason::Stop,
        )))
        .await
        .unwrap();
        drop(tx);

        let mut rx = pipe_sse(chunks, pool.clone(), handle.clone(), "req".to_string());
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(String::from_utf8(frame.to_vec()).unwrap());
        }
        assert!(frames[0].starts_with("data: {"));
        assert!(frames[0].ends_with("\n\n"));
        assert_eq!(frames.last().unwrap(), "data: [DONE]\n\n");
        assert_eq!(pool.failure_count(handle.id), Some(0));
    }

    #[tokio::test]
    async fn client_disconnect_stops_upstream_and_reports_success() {
        let (pool, handle) = setup();
        let (tx, chunks) = mpsc::channel(4);

        let rx = pipe_sse(chunks, pool.clone(), handle.clone(), "req".to_string());
        // Feed until the capacity-1 pipe is saturated, then hang up.
        tx.send(Ok(content("one"))).await.unwrap();
        tx.send(Ok(content("two"))).await.unwrap();
        drop(rx);

        // The pipe task notices on its next send and drops the chunk
        // receiver, which closes this sender.
        tx.send(Ok(content("three"))).await.ok();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(tx.is_closed());

        assert_eq!(pool.state(handle.id), Some(CredentialState::Active));
        assert_eq!(pool.failure_count(handle.id), Some(0));
    }

    #[tokio::test]
    async fn adapter_error_midstream_reports_transient_failure() {
        let (pool, handle) = setup();
        let (tx, chunks) = mpsc::channel(4);
        tx.send(Ok(content("partial"))).await.unwrap();
        tx.send(Err(chatgate_provider_core::AdapterError::InvalidResponse(
            "upstream hiccup".to_string(),
        )))
        .await
        .unwrap();
        drop(tx);

        let mut rx = pipe_sse(chunks, pool.clone(), handle.clone(), "req".to_string());
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(String::from_utf8(frame.to_vec()).unwrap());
        }
        // The stream still terminates cleanly for the client.
        assert_eq!(frames.last().unwrap(), "data: [DONE]\n\n");
        assert_eq!(pool.failure_count(handle.id), Some(1));
    }
}
