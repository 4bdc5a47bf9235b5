pub mod agent;
pub mod autofix;
pub mod config;
pub mod error;
pub mod monitor;
pub mod platform;
pub mod queue;
pub mod server;
pub mod services;
pub mod shutdown;
pub mod store;
pub mod webhook;
pub mod workflow;
pub mod workspace;
