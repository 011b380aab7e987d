//! Core modules for the gasket

pub mod source;
pub mod embedder;
pub mod variance;
pub mod claims;
pub mod lockout;
pub mod token;
pub mod gate;
pub mod buffer;
pub mod gasket;
pub mod api;

pub use source::{CompletionSource, EchoSource, FailoverRouter, FragmentStream, OllamaBackend, OpenAiBackend, ScriptedSource};
pub use embedder::{Embedder, HashingEmbedder, HttpEmbedder};
pub use variance::{dispersion, health_index, VarianceEngine, VarianceMeasure};
pub use claims::{ClaimExtractor, CrossChecker, FactGuard, ReferenceOracle, StaticOracle};
pub use lockout::{FileLockoutStore, LockoutStore, MemoryLockoutStore};
pub use token::TokenSigner;
pub use gate::{ConstitutionalGate, GateSettings};
pub use buffer::{BufferSettings, EventStream, RedactionBuffer};
pub use gasket::{Gasket, GasketParts};
pub use api::{create_router, run_server};
