pub mod annotator;
pub mod config;
pub mod document;
pub mod error;
pub mod properties;
pub mod tag;

pub use annotator::{Annotator, StageDescriptor};
pub use config::{load_dotenv, PipelineConfig, PoolPolicy};
pub use document::Document;
pub use error::{ConfigError, StageError};
pub use properties::{Properties, SignatureKey};
pub use tag::{keys, tags, Key, Sentence, Tag, Token};
