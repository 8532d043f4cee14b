pub mod actions;
pub mod config;
pub mod deployments;
pub mod jenkins;
pub mod retry;
pub mod services;
pub mod state_store;
