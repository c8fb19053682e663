use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use annota_core::{Annotator, Properties, SignatureKey, StageError};

use crate::error::PipelineError;
use crate::resolver::{normalize, PrerequisiteMap};
use crate::stages;

type BuildFn = dyn Fn(&Properties) -> Result<Arc<dyn Annotator>, StageError> + Send + Sync;

/// Builds instances of one named stage.
///
/// `signature_keys` lists the configuration keys that change the built
/// instance's behavior. Two configurations that agree on those keys share a
/// cached instance.
#[derive(Clone)]
pub struct StageFactory {
    name: String,
    signature_keys: Vec<SignatureKey>,
    build: Arc<BuildFn>,
}

impl StageFactory {
    pub fn new<F>(name: impl Into<String>, signature_keys: Vec<SignatureKey>, build: F) -> Self
    where
        F: Fn(&Properties) -> Result<Arc<dyn Annotator>, StageError> + Send + Sync + 'static,
    {
        Self {
            name: normalize(&name.into()),
            signature_keys,
            build: Arc::new(build),
        }
    }

    /// A factory whose signature is every key under `{name}.`.
    pub fn scoped<F>(name: impl Into<String>, build: F) -> Self
    where
        F: Fn(&Properties) -> Result<Arc<dyn Annotator>, StageError> + Send + Sync + 'static,
    {
        let name = normalize(&name.into());
        let keys = vec![SignatureKey::scope(&name)];
        Self::new(name, keys, build)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature_keys(&self) -> &[SignatureKey] {
        &self.signature_keys
    }

    pub fn signature(&self, props: &Properties) -> String {
        props.signature(&self.signature_keys)
    }

    pub fn build(&self, props: &Properties) -> Result<Arc<dyn Annotator>, StageError> {
        (self.build)(props)
    }
}

impl fmt::Debug for StageFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageFactory")
            .field("name", &self.name)
            .field("signature_keys", &self.signature_keys)
            .finish_non_exhaustive()
    }
}

/// Every stage the process knows how to build, plus the prerequisite table
/// the resolver plans against.
#[derive(Debug, Clone)]
pub struct StageRegistry {
    factories: BTreeMap<String, StageFactory>,
    prerequisites: PrerequisiteMap,
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StageRegistry {
    /// No factories, standard prerequisite table.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
            prerequisites: PrerequisiteMap::standard(),
        }
    }

    /// Registry preloaded with the built-in `tokenize` and `ssplit` stages.
    pub fn with_reference_stages() -> Self {
        let mut registry = Self::new();
        for factory in stages::reference_factories() {
            // Names are distinct, so registration cannot collide.
            let _ = registry.register(factory);
        }
        registry
    }

    /// Add a factory for a stage already listed in the prerequisite table.
    pub fn register(&mut self, factory: StageFactory) -> Result<(), PipelineError> {
        if self.factories.contains_key(factory.name()) {
            return Err(PipelineError::Config(format!(
                "stage \"{}\" is already registered",
                factory.name()
            )));
        }
        if !self.prerequisites.contains(factory.name()) {
            self.prerequisites.insert(factory.name(), Vec::<String>::new());
        }
        tracing::debug!(stage = factory.name(), "registered stage factory");
        self.factories.insert(factory.name().to_string(), factory);
        Ok(())
    }

    /// Add a factory together with the stages it must run after.
    pub fn register_with_prerequisites<I, S>(
        &mut self,
        factory: StageFactory,
        prerequisites: I,
    ) -> Result<(), PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prereqs: Vec<String> = prerequisites
            .into_iter()
            .map(|p| normalize(p.as_ref()))
            .collect();
        let name = factory.name().to_string();
        self.register(factory)?;
        self.prerequisites.insert(name, prereqs);
        Ok(())
    }

    pub fn factory(&self, name: &str) -> Result<&StageFactory, PipelineError> {
        let name = normalize(name);
        self.factories
            .get(&name)
            .ok_or(PipelineError::UnknownStage(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&normalize(name))
    }

    pub fn prerequisites(&self) -> &PrerequisiteMap {
        &self.prerequisites
    }

    /// Registered stage names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
