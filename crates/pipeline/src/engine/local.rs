use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use annota_core::{tags, Annotator, Document, PipelineConfig, PoolPolicy, StageDescriptor, Tag};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::Outcome;
use crate::error::{panic_message, PipelineError};
use crate::metrics::PipelineMetrics;
use crate::pool::StagePool;
use crate::resolver::{self, normalize};

struct Inner {
    stages: Vec<(StageDescriptor, Arc<dyn Annotator>)>,
    permits: Arc<Semaphore>,
    threads: usize,
    metrics: RwLock<PipelineMetrics>,
    pool: Option<Arc<StagePool>>,
    pool_policy: PoolPolicy,
}

/// Runs an ordered list of stages over documents in this process.
///
/// Cloning is cheap and every clone drives the same stages, permits and
/// metrics. At most `threads` documents are annotated at once.
#[derive(Clone)]
pub struct LocalPipeline {
    inner: Arc<Inner>,
}

impl LocalPipeline {
    /// Resolve, fetch from the pool and check the requested stages.
    pub async fn build(config: &PipelineConfig, pool: Arc<StagePool>) -> Result<Self, PipelineError> {
        config.validate()?;

        let names: Vec<String> = if config.resolve_prerequisites {
            resolver::resolve(&config.annotators, pool.registry().prerequisites())?
        } else {
            config
                .annotators
                .iter()
                .map(|a| normalize(a))
                .filter(|a| !a.is_empty())
                .collect()
        };

        let props = config.stage_properties();
        let mut stages = Vec::with_capacity(names.len());
        for name in &names {
            let annotator = pool.get(name, &props).await?;
            stages.push((StageDescriptor::of(name.clone(), annotator.as_ref()), annotator));
        }

        if config.enforce_requirements {
            check_requirements(&stages)?;
        }

        info!(
            stages = %names.join(","),
            threads = config.resolved_threads(),
            "local pipeline built"
        );
        Ok(Self::assemble(
            stages,
            config.resolved_threads(),
            Some(pool),
            config.pool_policy,
        ))
    }

    /// Wrap already-constructed stages, in the given order, without
    /// resolution or requirement checks.
    pub fn from_stages<I, S>(stages: I, threads: usize) -> Self
    where
        I: IntoIterator<Item = (S, Arc<dyn Annotator>)>,
        S: Into<String>,
    {
        let stages = stages
            .into_iter()
            .map(|(name, annotator)| (StageDescriptor::of(name, annotator.as_ref()), annotator))
            .collect();
        Self::assemble(stages, threads, None, PoolPolicy::Retain)
    }

    fn assemble(
        stages: Vec<(StageDescriptor, Arc<dyn Annotator>)>,
        threads: usize,
        pool: Option<Arc<StagePool>>,
        pool_policy: PoolPolicy,
    ) -> Self {
        let threads = threads.max(1);
        Self {
            inner: Arc::new(Inner {
                stages,
                permits: Arc::new(Semaphore::new(threads)),
                threads,
                metrics: RwLock::new(PipelineMetrics::default()),
                pool,
                pool_policy,
            }),
        }
    }

    pub fn stages(&self) -> impl Iterator<Item = &StageDescriptor> {
        self.inner.stages.iter().map(|(descriptor, _)| descriptor)
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages().map(|d| d.name.clone()).collect()
    }

    pub fn threads(&self) -> usize {
        self.inner.threads
    }

    /// Permits not currently held by an in-flight document.
    pub fn available_permits(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Run every stage in order on the calling thread.
    ///
    /// The first failing stage stops the run; fields written by earlier
    /// stages stay on the document.
    pub fn annotate(&self, document: &mut Document) -> Result<(), PipelineError> {
        let result = self.run_stages(document);
        self.metrics_mut().record_document(result.is_ok());
        result
    }

    fn run_stages(&self, document: &mut Document) -> Result<(), PipelineError> {
        for (descriptor, annotator) in &self.inner.stages {
            let started = Instant::now();
            let result = annotator.apply(document);
            self.metrics_mut()
                .record_stage(&descriptor.name, started.elapsed());
            if let Err(e) = result {
                debug!(stage = %descriptor.name, error = %e, "stage failed");
                return Err(PipelineError::StageApply {
                    stage: descriptor.name.clone(),
                    source: Arc::new(e),
                });
            }
        }
        Ok(())
    }

    /// Annotate on a blocking worker and report the result via `on_done`.
    ///
    /// Waits here until a permit is free, so a caller submitting faster than
    /// the pipeline drains is slowed down. The permit is released after
    /// `on_done` returns.
    pub async fn annotate_async<F>(&self, document: Document, on_done: F) -> JoinHandle<()>
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        let permit = match Arc::clone(&self.inner.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return tokio::spawn(async move {
                    on_done(Outcome::failed(document, PipelineError::Shutdown));
                });
            }
        };

        let pipeline = self.clone();
        tokio::spawn(async move {
            let outcome = pipeline.run_blocking(document).await;
            on_done(outcome);
            drop(permit);
        })
    }

    /// Submit every document and wait until all of them have been reported.
    pub async fn annotate_all<I, F>(&self, documents: I, on_done: F)
    where
        I: IntoIterator<Item = Document>,
        F: Fn(Outcome) + Send + Sync + 'static,
    {
        let on_done = Arc::new(on_done);
        let mut handles = Vec::new();
        for document in documents {
            let on_done = Arc::clone(&on_done);
            handles.push(self.annotate_async(document, move |outcome| on_done(outcome)).await);
        }
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "completion callback failed");
            }
        }
    }

    /// Annotate on a blocking worker, turning a panicking stage into an error.
    pub(crate) async fn run_blocking(&self, document: Document) -> Outcome {
        let pipeline = self.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let mut document = document;
            let result = panic::catch_unwind(AssertUnwindSafe(|| pipeline.annotate(&mut document)));
            match result {
                Ok(Ok(())) => Outcome::ok(document),
                Ok(Err(e)) => Outcome::failed(document, e),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(error = %message, "stage panicked");
                    pipeline.metrics_mut().record_document(false);
                    Outcome::failed(document, PipelineError::Worker(message))
                }
            }
        })
        .await;

        joined.unwrap_or_else(|e| {
            error!(error = %e, "annotation worker was cancelled");
            Outcome::failed(Document::default(), PipelineError::Worker(e.to_string()))
        })
    }

    /// Build a document from `text` and annotate it.
    pub fn process(&self, text: impl Into<String>) -> Result<Document, PipelineError> {
        let mut document = Document::new(text);
        self.annotate(&mut document)?;
        Ok(document)
    }

    pub fn metrics(&self) -> PipelineMetrics {
        self.metrics_ref().clone()
    }

    /// Per-stage timing summary.
    pub fn timing_information(&self) -> String {
        self.metrics_ref().summary()
    }

    /// Wait for every in-flight document, stop accepting new ones, then apply
    /// the pool policy.
    pub async fn shutdown(&self) {
        let permits = u32::try_from(self.inner.threads).unwrap_or(u32::MAX);
        if let Ok(all) = self.inner.permits.acquire_many(permits).await {
            self.inner.permits.close();
            drop(all);
            debug!("local pipeline drained");
        }
        if self.inner.pool_policy == PoolPolicy::ClearOnShutdown {
            if let Some(pool) = &self.inner.pool {
                pool.clear();
            }
        }
    }

    fn metrics_ref(&self) -> RwLockReadGuard<'_, PipelineMetrics> {
        self.inner
            .metrics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn metrics_mut(&self) -> RwLockWriteGuard<'_, PipelineMetrics> {
        self.inner
            .metrics
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for LocalPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPipeline")
            .field("stages", &self.stage_names())
            .field("threads", &self.inner.threads)
            .finish()
    }
}

/// Every stage's required tags must be provided by an earlier stage.
fn check_requirements(stages: &[(StageDescriptor, Arc<dyn Annotator>)]) -> Result<(), PipelineError> {
    let mut provided: BTreeSet<Tag> = BTreeSet::from([tags::TEXT]);
    for (descriptor, _) in stages {
        if let Some(missing) = descriptor.requires.difference(&provided).next() {
            return Err(PipelineError::MissingRequirement {
                stage: descriptor.name.clone(),
                requirement: missing.to_string(),
            });
        }
        provided.extend(descriptor.provides.iter().copied());
    }
    Ok(())
}
