//! Assistant profiles: one engine, different prompts and tool catalogues.

use deskpilot_config::AssistantConfig;
use deskpilot_core::tool::ToolRegistry;
use tracing::warn;

/// The injection points of the engine for one assistant.
#[derive(Clone)]
pub struct AssistantProfile {
    pub name: String,
    pub system_prompt: String,
    pub tools: ToolRegistry,
}

impl AssistantProfile {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>, tools: ToolRegistry) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            tools,
        }
    }

    /// Build a profile from config, restricting `registry` to the listed tools.
    pub fn from_config(name: &str, config: &AssistantConfig, registry: &ToolRegistry) -> Self {
        for tool in &config.tools {
            if registry.get(tool).is_none() {
                warn!(assistant = name, tool = %tool, "Assistant lists an unknown tool, ignoring it");
            }
        }
        Self::new(name, &config.system_prompt, registry.subset(&config.tools))
    }
}
