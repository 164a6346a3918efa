//! # NameGnome Serve
//!
//! Renames local media libraries (TV, movie, music) so downstream media
//! servers match each file to canonical provider metadata. The pipeline
//! runs in three phases (scan, plan, apply) exposed as a REST service and
//! a CLI.

pub mod anthology;
pub mod api;
pub mod apply;
pub mod disambig;
pub mod error;
pub mod jobs;
pub mod mapper;
pub mod plan;
pub mod providers;
pub mod scanner;

use namegnome_common::config::AppConfig;
use namegnome_common::events::EventBus;
use providers::gateway::ProviderGateway;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application state shared across handlers and pipeline runs.
#[derive(Clone)]
pub struct AppState {
    /// Cache database pool
    pub db: SqlitePool,
    /// Event bus backing the SSE job streams
    pub event_bus: EventBus,
    /// Provider gateway (registry + rate limits + caching)
    pub gateway: Arc<ProviderGateway>,
    /// Resolved runtime configuration
    pub config: Arc<AppConfig>,
    /// In-flight and completed jobs
    pub jobs: jobs::JobRegistry,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, gateway: Arc<ProviderGateway>, config: AppConfig) -> Self {
        Self {
            db,
            event_bus: event_bus.clone(),
            gateway,
            config: Arc::new(config),
            jobs: jobs::JobRegistry::new(event_bus),
        }
    }
}

pub use api::build_router;
