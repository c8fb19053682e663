use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::time::Duration;

use annota_core::{Document, SignatureKey, StageError, Tag};

use super::*;
use crate::registry::StageFactory;

struct Marker;

impl Annotator for Marker {
    fn requires(&self) -> BTreeSet<Tag> {
        BTreeSet::new()
    }
    fn requirements_satisfied(&self) -> BTreeSet<Tag> {
        BTreeSet::new()
    }
    fn apply(&self, _document: &mut Document) -> Result<(), StageError> {
        Ok(())
    }
}

/// A registry with one slow `pos` stage that counts its constructions and
/// fails while `fail` is set.
fn slow_registry(builds: Arc<AtomicUsize>, fail: Arc<AtomicBool>) -> Arc<StageRegistry> {
    let mut registry = StageRegistry::new();
    registry
        .register(StageFactory::new(
            "pos",
            vec![SignatureKey::exact("pos.model")],
            move |_props| {
                builds.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(50));
                if fail.load(Ordering::SeqCst) {
                    Err(StageError::failed("model file missing"))
                } else {
                    Ok(Arc::new(Marker) as Arc<dyn Annotator>)
                }
            },
        ))
        .unwrap();
    Arc::new(registry)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_gets_construct_once() {
    let builds = Arc::new(AtomicUsize::new(0));
    let pool = Arc::new(StagePool::new(slow_registry(
        builds.clone(),
        Arc::new(AtomicBool::new(false)),
    )));

    let props = Properties::new().with("pos.model", "english");
    let mut handles = Vec::new();
    for _ in 0..10 {
        let pool = pool.clone();
        let props = props.clone();
        handles.push(tokio::spawn(async move { pool.get("pos", &props).await }));
    }
    let mut instances = Vec::new();
    for h in handles {
        instances.push(h.await.unwrap().unwrap());
    }

    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert_eq!(pool.constructions(), 1);
    for instance in &instances[1..] {
        assert!(Arc::ptr_eq(&instances[0], instance));
    }
}

#[tokio::test]
async fn signature_decides_sharing() {
    let builds = Arc::new(AtomicUsize::new(0));
    let pool = StagePool::new(slow_registry(builds.clone(), Arc::new(AtomicBool::new(false))));

    let english = Properties::new().with("pos.model", "english");
    let noisy = english.clone().with("ner.model", "3class");
    let german = Properties::new().with("pos.model", "german");

    let a = pool.get("pos", &english).await.unwrap();
    let b = pool.get("pos", &noisy).await.unwrap();
    let c = pool.get("POS", &german).await.unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(builds.load(Ordering::SeqCst), 2);
    assert_eq!(pool.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn construction_failure_reaches_every_waiter_then_retries() {
    let builds = Arc::new(AtomicUsize::new(0));
    let fail = Arc::new(AtomicBool::new(true));
    let pool = Arc::new(StagePool::new(slow_registry(builds.clone(), fail.clone())));

    let props = Properties::new();
    let mut handles = Vec::new();
    for _ in 0..5 {
        let pool = pool.clone();
        let props = props.clone();
        handles.push(tokio::spawn(async move { pool.get("pos", &props).await }));
    }
    for h in handles {
        let err = h.await.unwrap().err().expect("construction should fail");
        assert!(
            matches!(err, PipelineError::StageConstruction { ref stage, ref message }
                if stage == "pos" && message.contains("model file missing")),
            "got {err:?}"
        );
    }
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert!(pool.is_empty(), "failed entry must be evicted");

    fail.store(false, Ordering::SeqCst);
    assert!(pool.get("pos", &props).await.is_ok());
    assert_eq!(builds.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unknown_stage_is_not_cached() {
    let pool = StagePool::new(Arc::new(StageRegistry::with_reference_stages()));
    let err = pool.get("parse", &Properties::new()).await.err().unwrap();
    assert!(matches!(err, PipelineError::UnknownStage(ref n) if n == "parse"));
    assert!(pool.is_empty());
    assert_eq!(pool.constructions(), 0);
}

#[tokio::test]
async fn existing_and_clear() {
    let pool = StagePool::new(Arc::new(StageRegistry::with_reference_stages()));
    assert!(pool.existing("tokenize").is_none());

    let built = pool.get("tokenize", &Properties::new()).await.unwrap();
    let found = pool.existing("Tokenize").unwrap();
    assert!(Arc::ptr_eq(&built, &found));

    pool.clear();
    assert!(pool.is_empty());
    assert!(pool.existing("tokenize").is_none());

    let rebuilt = pool.get("tokenize", &Properties::new()).await.unwrap();
    assert!(!Arc::ptr_eq(&built, &rebuilt));
    assert_eq!(pool.constructions(), 2);
}

#[tokio::test]
async fn separator_characters_in_values_keep_instances_apart() {
    let pool = StagePool::new(Arc::new(crate::registry::StageRegistry::with_reference_stages()));

    let packed = Properties::new().with("tokenize.lowercase", "true;tokenize.whitespace=true");
    let split = Properties::new()
        .with("tokenize.lowercase", "true")
        .with("tokenize.whitespace", "true;tokenize.whitespace=");

    let a = pool.get("tokenize", &packed).await.unwrap();
    let b = pool.get("tokenize", &split).await.unwrap();

    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(pool.constructions(), 2);
}
