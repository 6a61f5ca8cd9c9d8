use std::path::Path;

use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::debug;

use super::error::UploadError;
use crate::{config::agent::UploadConfig, core::event::EventPayload};

/// Sends an event artifact somewhere and returns a reference to it.
#[async_trait::async_trait]
pub trait Uploader: Send + Sync {
    /// `Ok(None)` when the upload was accepted without a usable reference.
    async fn send(&self, meta: &EventPayload, artifact: &Path) -> Result<Option<String>, UploadError>;
}

/// Multipart `POST` with a `meta` JSON field and an `image` file.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpUploader {
    /// `Ok(None)` when no upload URL is configured.
    pub fn from_config(config: &UploadConfig) -> Result<Option<Self>, UploadError> {
        if !config.is_enabled() {
            return Ok(None);
        }
        let client = reqwest::Client::builder().timeout(config.timeout()).build()?;
        Ok(Some(HttpUploader {
            client,
            url: config.url.clone(),
            token: config.token.clone().filter(|t| !t.is_empty()),
        }))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl Uploader for HttpUploader {
    async fn send(&self, meta: &EventPayload, artifact: &Path) -> Result<Option<String>, UploadError> {
        let image = tokio::fs::read(artifact)
            .await
            .map_err(|source| UploadError::Read {
                path: artifact.to_path_buf(),
                source,
            })?;
        let file_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot.jpg".to_string());

        let form = Form::new().text("meta", serde_json::to_string(meta)?).part(
            "image",
            Part::bytes(image)
                .file_name(file_name)
                .mime_str("image/jpeg")?,
        );

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        debug!("Upload accepted ({}): {} bytes of response", status, body.len());
        Ok(reference_from_body(&body))
    }
}

/// `url`, then `image_url`, then `id` from a JSON object body; `"ok"` when the
/// body is not a JSON object.
fn reference_from_body(body: &str) -> Option<String> {
    let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(body) else {
        return Some("ok".to_string());
    };

    ["url", "image_url", "id"]
        .iter()
        .find_map(|key| match fields.get(*key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) if n.as_f64() != Some(0.0) => Some(n.to_string()),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;
    use crate::core::vision::DetectionResult;

    #[test]
    fn test_reference_from_body() {
        assert_eq!(
            reference_from_body(r#"{"url":"https://cdn/x.jpg","id":7}"#).as_deref(),
            Some("https://cdn/x.jpg")
        );
        assert_eq!(
            reference_from_body(r#"{"url":"","image_url":"https://cdn/y.jpg"}"#).as_deref(),
            Some("https://cdn/y.jpg")
        );
        assert_eq!(reference_from_body(r#"{"id":42}"#).as_deref(), Some("42"));
        assert_eq!(reference_from_body(r#"{"status":"stored"}"#), None);
        assert_eq!(reference_from_body("stored").as_deref(), Some("ok"));
        assert_eq!(reference_from_body("[1,2]").as_deref(), Some("ok"));
    }

    #[test]
    fn test_disabled_without_url() {
        assert!(HttpUploader::from_config(&UploadConfig::default())
            .unwrap()
            .is_none());
    }

    /// Accepts one request, captures it, answers with `response_body`.
    async fn one_shot_server(status: &'static str, response_body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/upload", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request.ends_with(b"--\r\n") || request.ends_with(b"0\r\n\r\n") {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{response_body}",
                response_body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).into_owned()
        });

        (url, handle)
    }

    fn artifact(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("cam_20260301T100000Z.jpg");
        std::fs::write(&path, b"JPEGDATA").unwrap();
        path
    }

    #[tokio::test]
    async fn test_multipart_upload_with_token() {
        let dir = TempDir::new().unwrap();
        let (url, server) = one_shot_server("200 OK", r#"{"url":"https://cdn/cam.jpg"}"#).await;
        let uploader = HttpUploader::from_config(&UploadConfig {
            url,
            token: Some("secret".into()),
            ..Default::default()
        })
        .unwrap()
        .unwrap();

        let meta = EventPayload::new("cam", &DetectionResult::default());
        let reference = uploader.send(&meta, &artifact(&dir)).await.unwrap();
        assert_eq!(reference.as_deref(), Some("https://cdn/cam.jpg"));

        let request = server.await.unwrap();
        let lowered = request.to_lowercase();
        assert!(lowered.starts_with("post /upload"));
        assert!(lowered.contains("authorization: bearer secret"));
        assert!(request.contains(r#"name="meta""#));
        assert!(request.contains(r#"name="image"; filename="cam_20260301T100000Z.jpg""#));
        assert!(request.contains(r#""device_id":"cam""#));
        assert!(request.contains("JPEGDATA"));
    }

    #[tokio::test]
    async fn test_rejected_upload_is_an_error() {
        let dir = TempDir::new().unwrap();
        let (url, server) = one_shot_server("500 Internal Server Error", "{}").await;
        let uploader = HttpUploader::from_config(&UploadConfig {
            url,
            ..Default::default()
        })
        .unwrap()
        .unwrap();

        let meta = EventPayload::new("cam", &DetectionResult::default());
        let err = uploader.send(&meta, &artifact(&dir)).await.unwrap_err();
        assert!(matches!(err, UploadError::Status(500)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_artifact() {
        let dir = TempDir::new().unwrap();
        let uploader = HttpUploader::from_config(&UploadConfig {
            url: "http://127.0.0.1:9/upload".into(),
            ..Default::default()
        })
        .unwrap()
        .unwrap();

        let meta = EventPayload::new("cam", &DetectionResult::default());
        let err = uploader
            .send(&meta, &dir.path().join("missing.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Read { .. }));
    }
}
