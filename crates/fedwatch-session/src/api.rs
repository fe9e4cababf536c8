use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use fedwatch_common::{
    ClusterSnapshot, FrameworkCatalog, StatusReply, TrainingConfig, UploadReport, MAX_UPLOAD_BYTES,
};

use crate::error::ApiError;
use crate::sse::{SseDecoder, StreamEvent};

pub type LogEventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ApiError>> + Send>>;

/// Status and body of a command response, left uninterpreted so the
/// dispatcher decides what each status code means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReply {
    pub status: u16,
    pub body: String,
}

impl RawReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The training server as seen by the session.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn snapshot(&self) -> Result<ClusterSnapshot, ApiError>;
    async fn training_status(&self) -> Result<StatusReply, ApiError>;
    async fn frameworks(&self) -> Result<FrameworkCatalog, ApiError>;

    async fn start(&self, config: &TrainingConfig) -> Result<RawReply, ApiError>;
    async fn stop(&self) -> Result<RawReply, ApiError>;
    async fn reset(&self) -> Result<RawReply, ApiError>;

    /// Connect to the training log. The stream ends after a
    /// [`StreamEvent::Complete`] or when the connection drops.
    async fn open_log(&self) -> Result<LogEventStream, ApiError>;
}

#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    http: Client,
    // no overall timeout: the log stream stays open for the whole run
    stream_http: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpControlPlane {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http = Client::builder().timeout(request_timeout).build()?;
        let stream_http = Client::builder()
            .connect_timeout(request_timeout)
            .build()?;
        Ok(Self {
            http,
            stream_http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn auth(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let resp = self.auth(self.http.get(self.url(path))).send().await?;
        expect_json(resp).await
    }

    async fn post_raw(&self, req: RequestBuilder) -> Result<RawReply, ApiError> {
        let resp = self.auth(req).send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(RawReply { status, body })
    }

    /// Send a dataset to every worker through the server.
    pub async fn upload(&self, path: &Path) -> Result<UploadReport, ApiError> {
        let size = tokio::fs::metadata(path).await?.len();
        if size > MAX_UPLOAD_BYTES {
            return Err(ApiError::TooLarge {
                size,
                limit_mb: MAX_UPLOAD_BYTES / (1024 * 1024),
            });
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dataset".to_string());
        let bytes = tokio::fs::read(path).await?;
        tracing::info!(file = %file_name, size, "uploading dataset");

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);
        // large files over slow links: no overall timeout
        let resp = self
            .auth(self.stream_http.post(self.url("/api/upload")).multipart(form))
            .send()
            .await?;
        expect_json(resp).await
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn snapshot(&self) -> Result<ClusterSnapshot, ApiError> {
        self.get_json("/api/cluster").await
    }

    async fn training_status(&self) -> Result<StatusReply, ApiError> {
        self.get_json("/api/training/status").await
    }

    async fn frameworks(&self) -> Result<FrameworkCatalog, ApiError> {
        self.get_json("/api/frameworks").await
    }

    async fn start(&self, config: &TrainingConfig) -> Result<RawReply, ApiError> {
        self.post_raw(self.http.post(self.url("/api/training/start")).json(config))
            .await
    }

    async fn stop(&self) -> Result<RawReply, ApiError> {
        self.post_raw(self.http.post(self.url("/api/training/stop")))
            .await
    }

    async fn reset(&self) -> Result<RawReply, ApiError> {
        self.post_raw(self.http.post(self.url("/api/training/reset")))
            .await
    }

    async fn open_log(&self) -> Result<LogEventStream, ApiError> {
        let resp = self
            .auth(
                self.stream_http
                    .get(self.url("/api/training/log"))
                    .header(ACCEPT, "text/event-stream"),
            )
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }

        let mut decoder = SseDecoder::default();
        let events = resp
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => decoder
                    .push(&bytes)
                    .into_iter()
                    .filter_map(StreamEvent::from_frame)
                    .map(Ok)
                    .collect::<Vec<_>>(),
                Err(e) => vec![Err(ApiError::from(e))],
            })
            .flat_map(futures_util::stream::iter);
        Ok(Box::pin(events))
    }
}

async fn expect_json<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(ApiError::from_status(status.as_u16(), &body));
    }
    Ok(serde_json::from_str(&body)?)
}
