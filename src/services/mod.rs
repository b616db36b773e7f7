pub mod backup;
pub mod decision;
pub mod events;
pub mod llm;
pub mod pause;
pub mod prompts;
pub mod retry;
pub mod stream;
pub mod worker;
pub mod workflow;
