mod ack;
mod api;
mod config;
mod server;
mod state;
mod subscription;
#[cfg(test)]
pub(crate) mod test_support;
mod webhook;
mod worker;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::{ServiceConfig, StoreBackend};
pub use server::run_server;
pub use state::AppState;
pub use worker::{process_job, spawn_classification_worker, WorkerControl};
