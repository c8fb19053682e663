use std::time::Duration;

use annota_core::{Document, PipelineConfig, Properties};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;

use crate::error::TransportError;
use crate::scheduler::Backend;

pub const MSGPACK: &str = "application/x-msgpack";

/// One request/response exchange with a remote annotation server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `document` with the pipeline configuration and return the
    /// annotated copy the server produced.
    async fn annotate(
        &self,
        backend: &Backend,
        properties: &Properties,
        document: &Document,
    ) -> Result<Document, TransportError>;

    /// Whether the backend answers its liveness endpoint.
    async fn check_status(&self, backend: &Backend) -> Result<bool, TransportError>;
}

/// HTTP transport: `POST {backend}/?properties=<json>` with a MessagePack body.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    credentials: Option<(String, String)>,
}

impl HttpTransport {
    pub fn new(config: &PipelineConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if config.timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(config.timeout_ms));
        }
        Ok(Self {
            client: builder.build()?,
            credentials: config.api_key.clone().zip(config.api_secret.clone()),
        })
    }

    fn endpoint(backend: &Backend, path: &str) -> Result<String, TransportError> {
        match backend.protocol.as_str() {
            "http" | "https" => Ok(format!("{backend}/{path}")),
            other => Err(TransportError::UnsupportedProtocol(other.to_string())),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some((key, secret)) => request.basic_auth(key, Some(secret)),
            None => request,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn annotate(
        &self,
        backend: &Backend,
        properties: &Properties,
        document: &Document,
    ) -> Result<Document, TransportError> {
        let body = rmp_serde::to_vec_named(document)?;
        let request = self
            .client
            .post(Self::endpoint(backend, "")?)
            .query(&[("properties", properties.to_json())])
            .header(CONTENT_TYPE, MSGPACK)
            .body(body);

        let response = self.authorize(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        Ok(rmp_serde::from_slice(&bytes)?)
    }

    async fn check_status(&self, backend: &Backend) -> Result<bool, TransportError> {
        let response = self
            .authorize(self.client.get(Self::endpoint(backend, "ping")?))
            .send()
            .await?;
        let code = response.status().as_u16();
        Ok((200..400).contains(&code))
    }
}
