mod registry;
mod selectors;

pub use registry::{Capability, ModelProvider, ModelRegistry, ModelSpec};
pub use selectors::{ModelSelection, ModelSelector};
