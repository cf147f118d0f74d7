pub mod agent;
pub mod bridge;
pub mod config;
pub mod errors;
pub mod lock;
pub mod orchestrator;
pub mod state;
pub mod stream;
pub mod workbench;
