//! Labdesk Server
//!
//! Dashboard backend for virtual security labs: tracks the labs of a user,
//! forwards stop/extend requests to the provisioning backend and serves the
//! credentials needed to reach a running lab.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod service;

pub use config::Config;
pub use error::{Error, Result};

use service::lab_store::LabLifecycleStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<LabLifecycleStore>,
}
