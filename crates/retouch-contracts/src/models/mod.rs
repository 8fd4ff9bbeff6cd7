mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, CAPABILITY_EDIT};
pub use selectors::{ModelSelection, ModelSelector};
