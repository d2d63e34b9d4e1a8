pub mod actions;
pub mod db;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod store;
