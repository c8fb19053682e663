//! Execution engines: where a planned pipeline actually runs.

mod local;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use annota_core::{Document, PipelineConfig};
use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::client::{HttpTransport, RemoteClient};
use crate::error::PipelineError;
use crate::pool::StagePool;

pub use local::LocalPipeline;

/// What a completion callback receives: the document as far as it got, and
/// the error that stopped it, if any.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub document: Document,
    pub error: Option<PipelineError>,
}

impl Outcome {
    pub fn ok(document: Document) -> Self {
        Self {
            document,
            error: None,
        }
    }

    pub fn failed(document: Document, error: PipelineError) -> Self {
        Self {
            document,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<Document, PipelineError> {
        match self.error {
            None => Ok(self.document),
            Some(e) => Err(e),
        }
    }
}

/// Completion callback, invoked exactly once per submitted document.
pub type OnDone = Box<dyn FnOnce(Outcome) + Send + 'static>;

/// Common surface of the local pipeline and the remote client.
#[async_trait]
pub trait AnnotationEngine: Send + Sync {
    /// Queue `document`; `on_done` is called once it has been annotated or
    /// has failed.
    async fn submit(&self, document: Document, on_done: OnDone);

    /// Submit one document and wait for its outcome.
    async fn annotate_one(&self, document: Document) -> Outcome {
        let (tx, rx) = oneshot::channel();
        self.submit(
            document,
            Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        )
        .await;
        rx.await.unwrap_or_else(|_| {
            Outcome::failed(
                Document::default(),
                PipelineError::Worker("completion callback was dropped".into()),
            )
        })
    }

    /// Wait for queued work and release resources.
    async fn shutdown(&self);
}

#[async_trait]
impl AnnotationEngine for LocalPipeline {
    async fn submit(&self, document: Document, on_done: OnDone) {
        // The handle is not needed; completion is reported through `on_done`.
        let _ = self.annotate_async(document, on_done).await;
    }

    async fn shutdown(&self) {
        LocalPipeline::shutdown(self).await;
    }
}

/// Build the engine `config` asks for: remote when backends are listed,
/// otherwise a local pipeline drawing stages from `pool`.
pub async fn build_engine(
    config: &PipelineConfig,
    pool: Arc<StagePool>,
) -> Result<Arc<dyn AnnotationEngine>, PipelineError> {
    if !config.is_remote() {
        return Ok(Arc::new(LocalPipeline::build(config, pool).await?));
    }

    let transport = Arc::new(HttpTransport::new(config)?);
    let mut client = RemoteClient::new(config, transport)?;
    if config.fallback_to_local {
        client = client.with_fallback(LocalPipeline::build(config, pool).await?);
    }
    Ok(Arc::new(client))
}
