//! Process-wide cache of constructed stage instances.
//!
//! Stages can be expensive to build (model loading), so each
//! `(name, signature)` pair is constructed at most once and shared by every
//! pipeline that asks for it. The pool is an explicit object handed to
//! whoever builds pipelines; there is no global instance.

mod memo;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use annota_core::{Annotator, Properties};
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::registry::StageRegistry;

pub use memo::MemoMap;

/// `(stage name, configuration signature)`.
pub type PoolKey = (String, String);

pub struct StagePool {
    registry: Arc<StageRegistry>,
    cache: MemoMap<PoolKey, Arc<dyn Annotator>, PipelineError>,
    constructions: Arc<AtomicU64>,
}

impl StagePool {
    pub fn new(registry: Arc<StageRegistry>) -> Self {
        Self {
            registry,
            cache: MemoMap::new(),
            constructions: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn registry(&self) -> &Arc<StageRegistry> {
        &self.registry
    }

    /// The instance of `name` for this configuration, constructing it on
    /// first use.
    ///
    /// Concurrent requests for the same key wait for one construction. If
    /// construction fails, every waiter gets the error and the entry is
    /// dropped so a later call tries again.
    pub async fn get(
        &self,
        name: &str,
        props: &Properties,
    ) -> Result<Arc<dyn Annotator>, PipelineError> {
        let factory = self.registry.factory(name)?.clone();
        let stage = factory.name().to_string();
        let signature = factory.signature(props);
        let key = (stage.clone(), signature.clone());

        if let Some(annotator) = self.cache.peek(&key) {
            debug!(stage = %stage, "stage pool hit");
            return Ok(annotator);
        }

        let props = props.clone();
        let constructions = Arc::clone(&self.constructions);
        self.cache
            .get_or_try_init(key, move || async move {
                constructions.fetch_add(1, Ordering::Relaxed);
                info!(stage = %stage, signature = %signature, "constructing stage");
                let started = Instant::now();

                let built = tokio::task::spawn_blocking(move || factory.build(&props)).await;
                match built {
                    Ok(Ok(annotator)) => {
                        info!(
                            stage = %stage,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "stage constructed"
                        );
                        Ok(annotator)
                    }
                    Ok(Err(e)) => {
                        warn!(stage = %stage, error = %e, "stage construction failed");
                        Err(PipelineError::StageConstruction {
                            stage,
                            message: e.to_string(),
                        })
                    }
                    Err(join) => {
                        warn!(stage = %stage, error = %join, "stage construction panicked");
                        Err(PipelineError::StageConstruction {
                            stage,
                            message: format!("construction task failed: {join}"),
                        })
                    }
                }
            })
            .await
    }

    /// Some already-built instance of `name`, whatever its configuration.
    pub fn existing(&self, name: &str) -> Option<Arc<dyn Annotator>> {
        let name = crate::resolver::normalize(name);
        self.cache.find_ready(|(stage, _)| *stage == name)
    }

    /// Forget every cached instance.
    pub fn clear(&self) {
        let dropped = self.cache.len();
        self.cache.clear();
        info!(dropped, "stage pool cleared");
    }

    /// Cached entries, including constructions still in progress.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// How many times a factory has been invoked.
    pub fn constructions(&self) -> u64 {
        self.constructions.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for StagePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagePool")
            .field("entries", &self.cache.len())
            .field("constructions", &self.constructions())
            .finish()
    }
}
