//! Annotates documents on remote servers.
//!
//! The client never runs stages itself (unless a local fallback is
//! attached). It schedules one job per document on a [`BackendScheduler`];
//! the job sends the document to the backend it was leased and merges the
//! response into the submitted document.

mod transport;

use std::sync::{Arc, Mutex};

use annota_core::{Document, PipelineConfig, Properties};
use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::{AnnotationEngine, LocalPipeline, OnDone, Outcome};
use crate::error::PipelineError;
use crate::scheduler::{Backend, BackendScheduler, SlotLease};

pub use transport::{HttpTransport, Transport, MSGPACK};

/// Keys that configure the client itself and are not forwarded to servers.
const CLIENT_ONLY_KEYS: &[&str] = &["backends", "threads", "timeoutMs", "fallbackToLocalPipeline"];

pub struct RemoteClient {
    backends: Vec<Backend>,
    scheduler: BackendScheduler,
    transport: Arc<dyn Transport>,
    properties: Properties,
    fallback: Option<LocalPipeline>,
}

impl RemoteClient {
    /// Parse `config.backends` and start scheduling over them.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: &PipelineConfig, transport: Arc<dyn Transport>) -> Result<Self, PipelineError> {
        config.validate()?;
        let backends = Backend::parse_list(&config.backends)?;
        let scheduler = BackendScheduler::start(backends.clone())?;
        Ok(Self {
            backends,
            scheduler,
            transport,
            properties: request_properties(config),
            fallback: None,
        })
    }

    /// Annotate locally whenever a remote call fails.
    pub fn with_fallback(mut self, pipeline: LocalPipeline) -> Self {
        self.fallback = Some(pipeline);
        self
    }

    /// The configuration sent along with every request.
    pub fn request_properties(&self) -> &Properties {
        &self.properties
    }

    /// Queue `document` for the next free backend.
    ///
    /// `on_done` is always called exactly once, including when the client
    /// has already shut down.
    pub fn annotate<F>(&self, document: Document, on_done: F)
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        let job_id = Uuid::new_v4();
        debug!(job = %job_id, "queueing document");
        // Held outside the job so a rejected job can still report back.
        let pending = Arc::new(Mutex::new(Some((document, on_done))));

        let job = {
            let pending = Arc::clone(&pending);
            let transport = Arc::clone(&self.transport);
            let properties = self.properties.clone();
            let fallback = self.fallback.clone();
            move |lease: SlotLease| {
                if let Some((document, on_done)) = take(&pending) {
                    tokio::spawn(async move {
                        let outcome =
                            round_trip(job_id, lease, transport, properties, fallback, document).await;
                        on_done(outcome);
                    });
                }
            }
        };

        if let Err(e) = self.scheduler.schedule(job) {
            if let Some((document, on_done)) = take(&pending) {
                on_done(Outcome::failed(document, e));
            }
        }
    }

    /// Annotate and block the calling thread until the result arrives.
    ///
    /// Must not be called from an async context.
    pub fn annotate_blocking(&self, document: Document) -> Result<Document, PipelineError> {
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        self.annotate(document, move |outcome| {
            let _ = tx.send(outcome);
        });
        rx.recv()
            .map_err(|_| PipelineError::Worker("completion callback was dropped".into()))?
            .into_result()
    }

    /// Build a document from `text` and annotate it remotely, blocking.
    pub fn process(&self, text: impl Into<String>) -> Result<Document, PipelineError> {
        self.annotate_blocking(Document::new(text))
    }

    /// Ask every configured backend whether it is up.
    pub async fn check_backends(&self) -> Vec<(Backend, bool)> {
        let mut statuses = Vec::with_capacity(self.backends.len());
        for backend in &self.backends {
            let up = match self.transport.check_status(backend).await {
                Ok(up) => up,
                Err(e) => {
                    debug!(backend = %backend, error = %e, "backend status check failed");
                    false
                }
            };
            statuses.push((backend.clone(), up));
        }
        statuses
    }

    /// Wait until every queued document has been handed to a backend.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        if let Some(fallback) = &self.fallback {
            fallback.shutdown().await;
        }
    }

    /// Wait until no request is in flight.
    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await;
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    pub fn scheduler(&self) -> &BackendScheduler {
        &self.scheduler
    }
}

#[async_trait]
impl AnnotationEngine for RemoteClient {
    async fn submit(&self, document: Document, on_done: OnDone) {
        self.annotate(document, on_done);
    }

    async fn shutdown(&self) {
        RemoteClient::shutdown(self).await;
    }
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take()
}

/// Send one document, return the slot, then fold in the response or fall back.
async fn round_trip(
    job_id: Uuid,
    lease: SlotLease,
    transport: Arc<dyn Transport>,
    properties: Properties,
    fallback: Option<LocalPipeline>,
    mut document: Document,
) -> Outcome {
    let backend = lease.backend().clone();
    debug!(job = %job_id, backend = %backend, "sending document");
    let result = transport.annotate(&backend, &properties, &document).await;
    lease.release();

    match result {
        Ok(response) => {
            document.merge_from(response);
            Outcome::ok(document)
        }
        Err(e) => match fallback {
            Some(local) => {
                warn!(
                    job = %job_id,
                    backend = %backend,
                    error = %e,
                    "remote annotation failed, annotating locally"
                );
                local.run_blocking(document).await
            }
            None => {
                warn!(job = %job_id, backend = %backend, error = %e, "remote annotation failed");
                Outcome::failed(document, e.into())
            }
        },
    }
}

/// The flat configuration a server needs to rebuild this pipeline.
fn request_properties(config: &PipelineConfig) -> Properties {
    config
        .properties
        .iter()
        .filter(|(key, _)| !CLIENT_ONLY_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect::<Properties>()
        .with("annotators", config.annotators.join(","))
        .with("enforceRequirements", config.enforce_requirements.to_string())
        .with("resolvePrerequisites", config.resolve_prerequisites.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_properties_drop_client_settings() {
        let props = Properties::new()
            .with("annotators", "tokenize ssplit")
            .with("backends", "localhost:9000")
            .with("threads", "4")
            .with("tokenize.whitespace", "true");
        let config = PipelineConfig::from_properties(&props).unwrap();
        let sent = request_properties(&config);

        assert_eq!(sent.get("annotators"), Some("tokenize,ssplit"));
        assert_eq!(sent.get("tokenize.whitespace"), Some("true"));
        assert_eq!(sent.get("resolvePrerequisites"), Some("true"));
        assert!(!sent.contains("backends"));
        assert!(!sent.contains("threads"));
    }
}
