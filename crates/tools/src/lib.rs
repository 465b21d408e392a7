//! Built-in tool implementations for DeskPilot.
//!
//! Record tools read and change the tenant's business records through an
//! injected [`RecordSource`]; `web_lookup` asks the completion service a
//! search-augmented side question.

pub mod get_record;
pub mod records;
pub mod search_records;
pub mod update_record;
pub mod web_lookup;

use deskpilot_core::provider::Provider;
use deskpilot_core::tool::ToolRegistry;
use std::sync::Arc;
use std::time::Duration;

pub use records::{InMemoryRecordSource, Record, RecordSource};

/// Settings for the lookup tool's side-channel completion call.
pub struct LookupSettings {
    pub provider: Arc<dyn Provider>,
    pub model: String,
    pub timeout: Duration,
}

/// Create a tool registry with all built-in tools.
pub fn default_registry(records: Arc<dyn RecordSource>, lookup: LookupSettings) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(search_records::SearchRecordsTool::new(records.clone())));
    registry.register(Arc::new(get_record::GetRecordTool::new(records.clone())));
    registry.register(Arc::new(update_record::UpdateRecordTool::new(records)));
    registry.register(Arc::new(web_lookup::WebLookupTool::new(
        lookup.provider,
        lookup.model,
        lookup.timeout,
    )));
    registry
}
