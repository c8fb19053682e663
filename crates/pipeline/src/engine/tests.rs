use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use annota_core::{keys, tags, Annotator, PoolPolicy, Properties, StageError, Tag};
use serde_json::json;

use super::*;
use crate::registry::StageRegistry;

/// Appends its name to the document's `log` field.
struct Recorder {
    name: &'static str,
    fail: bool,
    panic: bool,
    delay: Duration,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Recorder {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            fail: false,
            panic: false,
            delay: Duration::ZERO,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Annotator for Recorder {
    fn requires(&self) -> BTreeSet<Tag> {
        BTreeSet::new()
    }

    fn requirements_satisfied(&self) -> BTreeSet<Tag> {
        BTreeSet::new()
    }

    fn apply(&self, document: &mut Document) -> Result<(), StageError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.panic {
            panic!("{} exploded", self.name);
        }
        if self.fail {
            return Err(StageError::failed(format!("{} refused", self.name)));
        }
        let mut log = document
            .get_raw("log")
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();
        log.push(json!(self.name));
        document.set_raw("log", json!(log));
        Ok(())
    }
}

fn log_of(document: &Document) -> Vec<String> {
    document
        .get_raw("log")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

fn abc(threads: usize) -> LocalPipeline {
    LocalPipeline::from_stages(
        [
            ("a", Arc::new(Recorder::new("A")) as Arc<dyn Annotator>),
            ("b", Arc::new(Recorder::new("B")) as Arc<dyn Annotator>),
            ("c", Arc::new(Recorder::new("C")) as Arc<dyn Annotator>),
        ],
        threads,
    )
}

fn reference_pool() -> Arc<StagePool> {
    Arc::new(StagePool::new(Arc::new(StageRegistry::with_reference_stages())))
}

// ── Ordering and failures ─────────────────────────────────────

#[test]
fn stages_run_in_plan_order() {
    let pipeline = abc(1);
    let mut doc = Document::new("x");
    pipeline.annotate(&mut doc).unwrap();
    assert_eq!(log_of(&doc), vec!["A", "B", "C"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn plan_order_holds_under_parallelism() {
    let pipeline = abc(4);
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&outcomes);
    pipeline
        .annotate_all((0..16).map(|i| Document::new(format!("doc {i}"))), move |o| {
            sink.lock().unwrap().push(o)
        })
        .await;

    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 16);
    for outcome in outcomes.iter() {
        assert!(outcome.is_ok());
        assert_eq!(log_of(&outcome.document), vec!["A", "B", "C"]);
    }
}

#[test]
fn failing_stage_stops_the_run() {
    let mut failing = Recorder::new("B");
    failing.fail = true;
    let pipeline = LocalPipeline::from_stages(
        [
            ("a", Arc::new(Recorder::new("A")) as Arc<dyn Annotator>),
            ("b", Arc::new(failing) as Arc<dyn Annotator>),
            ("c", Arc::new(Recorder::new("C")) as Arc<dyn Annotator>),
        ],
        1,
    );

    let mut doc = Document::new("x");
    let err = pipeline.annotate(&mut doc).unwrap_err();
    assert!(matches!(err, PipelineError::StageApply { ref stage, .. } if stage == "b"));
    assert!(err.to_string().contains("B refused"), "{err}");
    assert_eq!(log_of(&doc), vec!["A"]);

    let metrics = pipeline.metrics();
    assert_eq!(metrics.failures, 1);
    assert!(!metrics.stages.contains_key("c"));
}

#[tokio::test]
async fn async_failure_reaches_the_callback() {
    let mut failing = Recorder::new("B");
    failing.fail = true;
    let pipeline = LocalPipeline::from_stages(
        [
            ("a", Arc::new(Recorder::new("A")) as Arc<dyn Annotator>),
            ("b", Arc::new(failing) as Arc<dyn Annotator>),
        ],
        2,
    );

    let outcome = pipeline.annotate_one(Document::new("x")).await;
    assert!(!outcome.is_ok());
    assert_eq!(log_of(&outcome.document), vec!["A"]);
    assert!(matches!(outcome.error, Some(PipelineError::StageApply { .. })));
}

#[tokio::test]
async fn panicking_stage_is_a_worker_error() {
    let mut bomb = Recorder::new("boom");
    bomb.panic = true;
    let pipeline = LocalPipeline::from_stages([("boom", Arc::new(bomb) as Arc<dyn Annotator>)], 1);

    let outcome = pipeline.annotate_one(Document::new("x")).await;
    match outcome.error {
        Some(PipelineError::Worker(message)) => assert!(message.contains("boom exploded")),
        other => panic!("expected worker error, got {other:?}"),
    }
    assert_eq!(pipeline.available_permits(), 1, "permit must be returned");
}

// ── Backpressure ──────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_permit_serializes_documents() {
    let mut slow = Recorder::new("slow");
    slow.delay = Duration::from_millis(150);
    let peak = Arc::clone(&slow.peak);
    let pipeline = LocalPipeline::from_stages([("slow", Arc::new(slow) as Arc<dyn Annotator>)], 1);

    let done = Arc::new(AtomicUsize::new(0));
    let d = Arc::clone(&done);
    let first = pipeline
        .annotate_async(Document::new("one"), move |_| {
            d.fetch_add(1, Ordering::SeqCst);
        })
        .await;
    assert_eq!(pipeline.available_permits(), 0);

    let d = Arc::clone(&done);
    let blocked = tokio::time::timeout(
        Duration::from_millis(30),
        pipeline.annotate_async(Document::new("two"), move |_| {
            d.fetch_add(1, Ordering::SeqCst);
        }),
    )
    .await;
    assert!(blocked.is_err(), "second submission must wait for a permit");
    assert_eq!(done.load(Ordering::SeqCst), 0);

    first.await.unwrap();
    assert_eq!(done.load(Ordering::SeqCst), 1);

    let d = Arc::clone(&done);
    pipeline
        .annotate_async(Document::new("three"), move |_| {
            d.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .await
        .unwrap();
    assert_eq!(done.load(Ordering::SeqCst), 2);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallelism_is_bounded_by_threads() {
    let mut slow = Recorder::new("slow");
    slow.delay = Duration::from_millis(20);
    let peak = Arc::clone(&slow.peak);
    let pipeline = LocalPipeline::from_stages([("slow", Arc::new(slow) as Arc<dyn Annotator>)], 3);

    pipeline
        .annotate_all((0..12).map(|_| Document::new("x")), |_| {})
        .await;
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(pipeline.metrics().documents_annotated, 12);
}

// ── Building through the pool ─────────────────────────────────

#[tokio::test]
async fn build_resolves_and_annotates() {
    let pool = reference_pool();
    let pipeline = LocalPipeline::build(&PipelineConfig::for_annotators(["ssplit"]), pool)
        .await
        .unwrap();
    assert_eq!(pipeline.stage_names(), vec!["tokenize", "ssplit"]);

    let doc = pipeline.process("Hello world. Bye now.").unwrap();
    assert_eq!(doc.require(&keys::TOKENS).unwrap().len(), 6);
    assert_eq!(doc.require(&keys::SENTENCES).unwrap().len(), 2);
    assert!(pipeline.timing_information().contains("tokenize"));
}

#[tokio::test]
async fn missing_requirement_is_reported_at_build() {
    let mut config = PipelineConfig::for_annotators(["ssplit"]);
    config.resolve_prerequisites = false;
    let err = LocalPipeline::build(&config, reference_pool()).await.err().unwrap();
    assert!(
        matches!(err, PipelineError::MissingRequirement { ref stage, ref requirement }
            if stage == "ssplit" && requirement == tags::TOKENS.name()),
        "got {err:?}"
    );
}

#[tokio::test]
async fn unchecked_pipeline_fails_at_run_time() {
    let mut config = PipelineConfig::for_annotators(["ssplit"]);
    config.resolve_prerequisites = false;
    config.enforce_requirements = false;
    let pipeline = LocalPipeline::build(&config, reference_pool()).await.unwrap();
    let err = pipeline.process("no tokens").unwrap_err();
    assert!(matches!(err, PipelineError::StageApply { ref stage, .. } if stage == "ssplit"));
}

#[tokio::test]
async fn unregistered_stage_fails_build() {
    let err = LocalPipeline::build(&PipelineConfig::for_annotators(["pos"]), reference_pool())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, PipelineError::UnknownStage(ref n) if n == "pos"));
}

#[tokio::test]
async fn unrelated_keys_share_cached_stages() {
    let pool = reference_pool();

    let mut first = PipelineConfig::for_annotators(["tokenize"]);
    first.properties.insert("tokenize.whitespace".into(), "true".into());
    let mut second = first.clone();
    second.properties.insert("unrelated.flag".into(), "x".into());
    let mut third = first.clone();
    third.properties.insert("tokenize.whitespace".into(), "false".into());

    LocalPipeline::build(&first, pool.clone()).await.unwrap();
    LocalPipeline::build(&second, pool.clone()).await.unwrap();
    assert_eq!(pool.constructions(), 1);

    LocalPipeline::build(&third, pool.clone()).await.unwrap();
    assert_eq!(pool.constructions(), 2);
}

// ── Shutdown ──────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_rejects_new_work_and_applies_pool_policy() {
    let pool = reference_pool();
    let mut config = PipelineConfig::for_annotators(["tokenize"]);
    config.pool_policy = PoolPolicy::ClearOnShutdown;
    let pipeline = LocalPipeline::build(&config, pool.clone()).await.unwrap();
    assert_eq!(pool.len(), 1);

    pipeline.annotate_one(Document::new("a b")).await.into_result().unwrap();
    AnnotationEngine::shutdown(&pipeline).await;
    assert!(pool.is_empty());

    let outcome = pipeline.annotate_one(Document::new("late")).await;
    assert!(matches!(outcome.error, Some(PipelineError::Shutdown)));
}

#[tokio::test]
async fn retain_policy_keeps_pool() {
    let pool = reference_pool();
    let pipeline = LocalPipeline::build(&PipelineConfig::for_annotators(["tokenize"]), pool.clone())
        .await
        .unwrap();
    pipeline.shutdown().await;
    assert_eq!(pool.len(), 1);
}

#[tokio::test]
async fn build_engine_picks_local_without_backends() {
    let config = PipelineConfig::for_annotators(["ssplit"]);
    let engine = build_engine(&config, reference_pool()).await.unwrap();
    let outcome = engine.annotate_one(Document::new("One. Two.")).await;
    let doc = outcome.into_result().unwrap();
    assert_eq!(doc.require(&keys::SENTENCES).unwrap().len(), 2);
    engine.shutdown().await;
}

#[test]
fn outcome_into_result() {
    let ok = Outcome::ok(Document::new("x"));
    assert!(ok.clone().into_result().is_ok());
    let failed = Outcome::failed(Document::new("x"), PipelineError::Shutdown);
    assert!(!failed.is_ok());
    assert!(matches!(failed.into_result(), Err(PipelineError::Shutdown)));
}

#[test]
fn properties_feed_stage_config() {
    let props = Properties::new()
        .with("annotators", "tokenize")
        .with("tokenize.lowercase", "true");
    let config = PipelineConfig::from_properties(&props).unwrap();
    assert_eq!(config.stage_properties().get("tokenize.lowercase"), Some("true"));
}
