use std::fmt;

use indexmap::IndexMap;

/// What a model can be asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Text-to-image generation.
    Image,
    /// Image-plus-instruction editing; the synthesis stage needs this.
    Edit,
    /// Image understanding with text output; the extraction stage needs this.
    Vision,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Edit => "edit",
            Self::Vision => "vision",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelProvider {
    Gemini,
    /// Offline stand-in that never touches the network.
    Dryrun,
}

impl ModelProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Dryrun => "dryrun",
        }
    }

    pub fn needs_api_key(self) -> bool {
        matches!(self, Self::Gemini)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: ModelProvider,
    pub capabilities: Vec<Capability>,
}

impl ModelSpec {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Known models in preference order. The first model with a capability is
/// the default for it.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name.trim())
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: Capability) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: Capability) -> Option<ModelSpec> {
        self.get(name)
            .filter(|model| model.supports(capability))
            .cloned()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: ModelProvider, capabilities: &[Capability]| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider,
                capabilities: capabilities.to_vec(),
            },
        );
    };

    insert(
        "gemini-2.5-flash-image",
        ModelProvider::Gemini,
        &[Capability::Image, Capability::Edit],
    );
    insert(
        "gemini-3-pro-image-preview",
        ModelProvider::Gemini,
        &[Capability::Image, Capability::Edit],
    );
    insert("gemini-2.0-flash", ModelProvider::Gemini, &[Capability::Vision]);
    insert("gemini-2.5-flash", ModelProvider::Gemini, &[Capability::Vision]);
    insert("gemini-3-pro-preview", ModelProvider::Gemini, &[Capability::Vision]);
    insert(
        "dryrun-image-1",
        ModelProvider::Dryrun,
        &[Capability::Image, Capability::Edit],
    );
    insert("dryrun-vision-1", ModelProvider::Dryrun, &[Capability::Vision]);

    map
}
