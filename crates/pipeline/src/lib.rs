pub mod client;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod registry;
pub mod resolver;
pub mod scheduler;
pub mod server;
pub mod stages;

pub use client::{HttpTransport, RemoteClient, Transport};
pub use engine::{build_engine, AnnotationEngine, LocalPipeline, OnDone, Outcome};
pub use error::{PipelineError, TransportError};
pub use metrics::PipelineMetrics;
pub use pool::StagePool;
pub use registry::{StageFactory, StageRegistry};
pub use resolver::{resolve, PrerequisiteMap};
pub use scheduler::{Backend, BackendScheduler, SlotLease};
pub use server::{router, serve, ServerState};
