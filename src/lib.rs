pub mod config;
pub mod db;
pub mod error;
#[cfg(test)]
mod memory_store;
pub mod models;
pub mod predict;
pub mod reconcile;
pub mod report;
pub mod risk;
pub mod runtime;
pub mod session;
pub mod state;
pub mod store;
pub mod subscription;
