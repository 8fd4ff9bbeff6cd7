pub mod classify;
pub mod client;
pub mod codec;
pub mod config;
pub mod editor;
pub mod expand;
pub mod providers;

pub use classify::{classify_response, GenerationError};
pub use client::GenerationClient;
pub use config::EngineConfig;
pub use editor::{EditError, Editor, SubmitOutcome};
pub use providers::{DryrunProvider, GeminiProvider, ImageProvider, ImageProviderRegistry, ProviderRequest};
