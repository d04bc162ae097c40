use std::time::Duration;

use futures_util::FutureExt;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::service::{DetectionService, ServiceFuture};
use crate::{
    CommandAck, CountingLine, DetectionStats, FrameImage, FrameSnapshot, Health, SeekAck, SeekMode,
    SeekRequest, ServiceError, StreamMetadata, StreamSource,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Detection service reached over its REST API.
#[derive(Clone)]
pub struct HttpDetectionService {
    client: Client,
    base_url: String,
}

/// Superset of the fields the detection endpoints answer with.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Envelope {
    success: Option<bool>,
    error: Option<String>,
    paused: Option<bool>,
    position: Option<u64>,
    frames: Option<u64>,
    fps: Option<f64>,
    duration: Option<f64>,
    frame: Option<String>,
}

impl Envelope {
    fn into_result(self) -> Result<Self, ServiceError> {
        if self.success == Some(false) {
            let message = self.error.unwrap_or_else(|| "request failed".to_string());
            return Err(ServiceError::from_message(message));
        }
        Ok(self)
    }

    fn metadata(&self) -> StreamMetadata {
        StreamMetadata {
            position: self.position,
            total_frames: self.frames,
            fps: self.fps.filter(|fps| fps.is_finite() && *fps > 0.0),
            duration_seconds: self
                .duration
                .filter(|duration| duration.is_finite() && *duration >= 0.0),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatsEnvelope {
    success: Option<bool>,
    error: Option<String>,
    data: Option<DetectionStats>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LineEnvelope {
    success: Option<bool>,
    error: Option<String>,
    line: Option<[[i32; 2]; 2]>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorBody {
    error: Option<String>,
}

impl HttpDetectionService {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ServiceError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| ServiceError::Request {
                url: base_url.clone(),
                message: err.to_string(),
            })?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        url: String,
    ) -> Result<T, ServiceError> {
        let response = request
            .send()
            .await
            .map_err(|err| ServiceError::Request {
                url: url.clone(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
            tracing::debug!(%url, status = status.as_u16(), %message, "detection service error");
            return Err(ServiceError::HttpStatus {
                url,
                status: status.as_u16(),
                message,
            });
        }

        response.json::<T>().await.map_err(|err| ServiceError::Decode {
            url,
            message: err.to_string(),
        })
    }

    async fn post_command(&self, path: &str) -> Result<Envelope, ServiceError> {
        let url = self.url(path);
        tracing::trace!(%url, "command");
        let envelope: Envelope = self.send(self.client.post(&url), url).await?;
        envelope.into_result()
    }

    async fn get_frame_envelope(&self) -> Result<Envelope, ServiceError> {
        let url = self.url("/api/detect/frame");
        let envelope: Envelope = self.send(self.client.get(&url), url).await?;
        envelope.into_result()
    }
}

impl DetectionService for HttpDetectionService {
    fn health(&self) -> ServiceFuture<'_, Health> {
        async move {
            let url = self.url("/api/health");
            self.send(self.client.get(&url), url).await
        }
        .boxed()
    }

    fn start(&self, source: StreamSource) -> ServiceFuture<'_, ()> {
        async move {
            let url = self.url("/api/detect/start");
            let request = self.client.post(&url).json(&json!({ "source": source }));
            let envelope: Envelope = self.send(request, url).await?;
            envelope.into_result().map(|_| ())
        }
        .boxed()
    }

    fn stop(&self) -> ServiceFuture<'_, ()> {
        async move { self.post_command("/api/detect/stop").await.map(|_| ()) }.boxed()
    }

    fn pause(&self) -> ServiceFuture<'_, CommandAck> {
        async move {
            let envelope = self.post_command("/api/detect/pause").await?;
            Ok(CommandAck {
                paused: envelope.paused,
            })
        }
        .boxed()
    }

    fn resume(&self) -> ServiceFuture<'_, CommandAck> {
        async move {
            let envelope = self.post_command("/api/detect/resume").await?;
            Ok(CommandAck {
                paused: envelope.paused,
            })
        }
        .boxed()
    }

    fn seek(&self, request: SeekRequest) -> ServiceFuture<'_, SeekAck> {
        async move {
            let url = self.url("/api/detect/seek");
            let body = match request.mode {
                SeekMode::Relative => json!({ "offset": request.value }),
                SeekMode::Absolute => json!({ "target": request.value }),
            };
            let envelope: Envelope = self.send(self.client.post(&url).json(&body), url).await?;
            let envelope = envelope.into_result()?;
            Ok(SeekAck {
                position: envelope.position,
            })
        }
        .boxed()
    }

    fn frame(&self) -> ServiceFuture<'_, FrameSnapshot> {
        async move {
            let envelope = self.get_frame_envelope().await?;
            let metadata = envelope.metadata();
            Ok(FrameSnapshot {
                frame: envelope.frame.map(FrameImage::new),
                metadata,
            })
        }
        .boxed()
    }

    fn position(&self) -> ServiceFuture<'_, StreamMetadata> {
        // The service exposes position only alongside the frame.
        async move {
            let envelope = self.get_frame_envelope().await?;
            Ok(envelope.metadata())
        }
        .boxed()
    }

    fn stats(&self) -> ServiceFuture<'_, DetectionStats> {
        async move {
            let url = self.url("/api/detect/stats");
            let envelope: StatsEnvelope = self.send(self.client.get(&url), url).await?;
            if envelope.success == Some(false) {
                let message = envelope
                    .error
                    .unwrap_or_else(|| "failed to fetch stats".to_string());
                return Err(ServiceError::from_message(message));
            }
            Ok(envelope.data.unwrap_or_default())
        }
        .boxed()
    }

    fn counting_line(&self) -> ServiceFuture<'_, Option<CountingLine>> {
        async move {
            let url = self.url("/api/counting/line");
            let envelope: LineEnvelope = self.send(self.client.get(&url), url).await?;
            if envelope.success == Some(false) {
                let message = envelope
                    .error
                    .unwrap_or_else(|| "failed to fetch counting line".to_string());
                return Err(ServiceError::from_message(message));
            }
            Ok(envelope.line.map(|[start, end]| CountingLine::new(start, end)))
        }
        .boxed()
    }

    fn set_counting_line(&self, line: CountingLine) -> ServiceFuture<'_, ()> {
        async move {
            let url = self.url("/api/counting/line");
            let request = self.client.post(&url).json(&line);
            let envelope: Envelope = self.send(request, url).await?;
            envelope.into_result().map(|_| ())
        }
        .boxed()
    }

    fn reset_count(&self) -> ServiceFuture<'_, ()> {
        async move { self.post_command("/api/counting/reset").await.map(|_| ()) }.boxed()
    }
}
