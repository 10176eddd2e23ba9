pub mod connectors;
pub mod engine;
pub mod llm;
pub mod manifest;
pub mod store;
pub mod template;
pub mod validation;
pub mod vault;
