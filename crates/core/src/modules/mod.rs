pub mod http_module;
pub mod listener_module;
pub mod module_manager;
pub mod output_module;
pub mod traits;

// Re-export for convenience
pub use http_module::HttpModule;
pub use listener_module::{ListenerModule, ListenerState};
pub use module_manager::ModuleManager;
pub use output_module::OutputModule;
pub use traits::{AsyncModule, ModuleEvent, ModuleId, ModuleMessage};
