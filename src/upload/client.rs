//! HTTP client for the document ingestion backend.
//!
//! Three endpoints: bulk submission, single-file submission, and the
//! per-batch progress stream (server-sent events).
//!
//! File contents and the bearer token are never logged.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream};
use futures_util::{FutureExt, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use super::snapshot::Snapshot;
use super::types::{BatchHandle, BatchId, PayloadSource, UploadPart};
use crate::error::IngestError;

pub type SnapshotStream = BoxStream<'static, Result<Snapshot, IngestError>>;

/// Network seam between the coordinator and the backend.
pub trait IngestApi: Send + Sync {
    fn submit_batch(&self, parts: Vec<UploadPart>) -> BoxFuture<'_, Result<BatchHandle, IngestError>>;

    fn submit_single(&self, part: UploadPart) -> BoxFuture<'_, Result<BatchHandle, IngestError>>;

    fn progress(&self, batch_id: BatchId) -> BoxFuture<'_, Result<SnapshotStream, IngestError>>;
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Clone)]
pub struct HttpIngestClient {
    client: Arc<Client>,
    base_url: Url,
    token: String,
}

impl HttpIngestClient {
    pub fn new(client: Arc<Client>, base_url: Url, token: String) -> Self {
        Self {
            client,
            base_url,
            token,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, IngestError> {
        self.base_url
            .join(path)
            .map_err(|e| IngestError::Config(format!("Invalid endpoint {}: {}", path, e)))
    }

    async fn post_form(&self, path: &str, form: Form, file_count: usize) -> Result<BatchHandle, IngestError> {
        let url = self.endpoint(path)?;
        info!("[SUBMIT] POST {} ({} files)", path, file_count);

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        info!("[SUBMIT] POST {} -> {}", path, status.as_u16());

        if !status.is_success() {
            return Err(parse_error_response(response).await);
        }

        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| IngestError::InvalidResponse(format!("Failed to parse submit response: {}", e)))?;

        Ok(BatchHandle {
            id: BatchId(body.id),
        })
    }

    async fn open_progress(&self, batch_id: BatchId) -> Result<SnapshotStream, IngestError> {
        let path = format!("api/documents/batch/{}/progress", batch_id);
        let url = self.endpoint(&path)?;
        info!("[CHANNEL] GET batch/{}/progress", batch_id.redacted());

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .header("Accept", "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(parse_error_response(response).await);
        }

        Ok(event_stream(response.bytes_stream()))
    }
}

impl IngestApi for HttpIngestClient {
    fn submit_batch(&self, parts: Vec<UploadPart>) -> BoxFuture<'_, Result<BatchHandle, IngestError>> {
        async move {
            let count = parts.len();
            let mut form = Form::new();
            for part in parts {
                form = form.part("files", to_multipart(part).await?);
            }
            self.post_form("api/documents/batch", form, count).await
        }
        .boxed()
    }

    fn submit_single(&self, part: UploadPart) -> BoxFuture<'_, Result<BatchHandle, IngestError>> {
        async move {
            let form = Form::new().part("file", to_multipart(part).await?);
            self.post_form("api/documents/upload", form, 1).await
        }
        .boxed()
    }

    fn progress(&self, batch_id: BatchId) -> BoxFuture<'_, Result<SnapshotStream, IngestError>> {
        self.open_progress(batch_id).boxed()
    }
}

async fn to_multipart(part: UploadPart) -> Result<Part, IngestError> {
    let bytes = match part.payload {
        PayloadSource::Memory(bytes) => bytes.to_vec(),
        PayloadSource::Disk(path) => tokio::fs::read(&path).await?,
    };
    Ok(Part::bytes(bytes).file_name(part.filename))
}

async fn parse_error_response(response: reqwest::Response) -> IngestError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.detail.or(b.message))
        .unwrap_or_default();

    IngestError::Http { status, message }
}

struct LineDecoder<B> {
    bytes: BoxStream<'static, Result<B, reqwest::Error>>,
    buffer: Vec<u8>,
    ready: VecDeque<Result<Snapshot, IngestError>>,
    finished: bool,
}

impl<B: AsRef<[u8]>> LineDecoder<B> {
    fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.ready.extend(decode_line(&line));
        }
    }

    /// A last line without a trailing newline still counts.
    fn flush(&mut self) {
        let rest = std::mem::take(&mut self.buffer);
        self.ready.extend(decode_line(&rest));
        self.finished = true;
    }
}

/// Splits a byte stream into lines and decodes each `data:` line (or bare
/// JSON line) as a snapshot. Other SSE fields and comments are skipped.
fn event_stream<S, B>(bytes: S) -> SnapshotStream
where
    S: futures_util::Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let decoder = LineDecoder {
        bytes: bytes.boxed(),
        buffer: Vec::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(decoder, |mut decoder| async move {
        loop {
            if let Some(event) = decoder.ready.pop_front() {
                return Some((event, decoder));
            }
            if decoder.finished {
                return None;
            }
            match decoder.bytes.next().await {
                Some(Ok(chunk)) => decoder.feed(chunk.as_ref()),
                Some(Err(e)) => {
                    decoder.ready.push_back(Err(IngestError::Channel(e.to_string())));
                    decoder.finished = true;
                }
                None => decoder.flush(),
            }
        }
    })
    .boxed()
}

fn decode_line(line: &[u8]) -> Option<Result<Snapshot, IngestError>> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();

    let payload = if let Some(data) = line.strip_prefix("data:") {
        data.trim()
    } else if line.starts_with('{') {
        line
    } else {
        return None;
    };

    if payload.is_empty() {
        return None;
    }

    debug!("[CHANNEL] event ({} bytes)", payload.len());
    Some(
        Snapshot::from_json(payload)
            .map_err(|e| IngestError::Channel(format!("Malformed progress event: {}", e))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::types::AggregateStatus;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_client(mock_url: &str) -> HttpIngestClient {
        let client = Arc::new(Client::new());
        let base_url = Url::parse(mock_url).unwrap();
        HttpIngestClient::new(client, base_url, "test_token".to_string())
    }

    fn part(name: &str) -> UploadPart {
        UploadPart {
            filename: name.to_string(),
            payload: PayloadSource::Memory(b"hello".to_vec().into()),
        }
    }

    #[tokio::test]
    async fn test_submit_batch_returns_id() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("POST"))
            .and(path("/api/documents/batch"))
            .and(header("Authorization", "Bearer test_token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "batch-123", "total_files": 2})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let handle = client.submit_batch(vec![part("a.pdf"), part("b.pdf")]).await.unwrap();
        assert_eq!(handle.id, BatchId("batch-123".into()));
    }

    #[tokio::test]
    async fn test_submit_single_uses_upload_endpoint() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("POST"))
            .and(path("/api/documents/upload"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "single-1"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let handle = client.submit_single(part("a.pdf")).await.unwrap();
        assert_eq!(handle.id, BatchId("single-1".into()));
    }

    #[tokio::test]
    async fn test_submit_maps_server_error_detail() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("POST"))
            .and(path("/api/documents/batch"))
            .respond_with(
                ResponseTemplate::new(413).set_body_json(serde_json::json!({"detail": "Payload too large"})),
            )
            .mount(&mock_server)
            .await;

        let err = client.submit_batch(vec![part("a.pdf")]).await.unwrap_err();
        match err {
            IngestError::Http { status, message } => {
                assert_eq!(status, 413);
                assert_eq!(message, "Payload too large");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_submit_server_error_is_retryable() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("POST"))
            .and(path("/api/documents/batch"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let err = client.submit_batch(vec![part("a.pdf")]).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_progress_stream_decodes_events() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        let body = concat!(
            ": keep-alive\n",
            "event: progress\n",
            "data: {\"id\":\"b1\",\"total_files\":2,\"completed_files\":1,\"failed_files\":0,\"status\":\"processing\",\"files\":[]}\n",
            "\n",
            "data: {\"id\":\"b1\",\"total_files\":2,\"completed_files\":2,\"failed_files\":0,\"status\":\"completed\",\"files\":[]}\n",
            "\n",
        );

        Mock::given(method("GET"))
            .and(path("/api/documents/batch/b1/progress"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&mock_server)
            .await;

        let stream = client.progress(BatchId("b1".into())).await.unwrap();
        let events: Vec<_> = stream.collect().await;

        assert_eq!(events.len(), 2);
        let first = events[0].as_ref().unwrap();
        assert_eq!(first.completed_files, 1);
        assert_eq!(first.status, AggregateStatus::Processing);
        let last = events[1].as_ref().unwrap();
        assert!(last.is_terminal());
    }

    #[tokio::test]
    async fn test_progress_malformed_event_is_channel_error() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("GET"))
            .and(path("/api/documents/batch/b2/progress"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("data: {not json}\n", "text/event-stream"))
            .mount(&mock_server)
            .await;

        let stream = client.progress(BatchId("b2".into())).await.unwrap();
        let events: Vec<_> = stream.collect().await;
        assert!(matches!(events.as_slice(), [Err(IngestError::Channel(_))]));
    }

    #[tokio::test]
    async fn test_event_stream_decodes_unterminated_last_line() {
        let terminal = r#"data: {"total_files":1,"completed_files":1,"failed_files":0,"status":"completed","files":[]}"#;
        let chunks: Vec<Result<Vec<u8>, reqwest::Error>> = vec![Ok(terminal.as_bytes().to_vec())];

        let events: Vec<_> = event_stream(stream::iter(chunks)).collect().await;

        assert_eq!(events.len(), 1);
        assert!(events[0].as_ref().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_event_stream_joins_split_chunks() {
        let chunks: Vec<Result<Vec<u8>, reqwest::Error>> = vec![
            Ok(br#"{"total_files":2,"completed_"#.to_vec()),
            Ok(b"files\":1,\"failed_files\":0,\"status\":\"processing\"}\n".to_vec()),
            Ok(b": keep-alive".to_vec()),
        ];

        let events: Vec<_> = event_stream(stream::iter(chunks)).collect().await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().completed_files, 1);
    }

    #[tokio::test]
    async fn test_progress_not_found() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("GET"))
            .and(path("/api/documents/batch/missing/progress"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let result = client.progress(BatchId("missing".into())).await;
        assert!(matches!(result, Err(IngestError::Http { status: 404, .. })));
    }
}
