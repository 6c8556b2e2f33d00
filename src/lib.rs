//! Document control: codes, approval workflow, version chains, folder access and audit trails.

pub mod access;
pub mod audit;
pub mod code;
pub mod collaborators;
pub mod config;
pub mod document;
pub mod error;
pub mod folder;
pub mod revision;
pub mod service;
mod store;
pub mod types;
pub mod utils;
pub mod workflow;

pub use config::EngineConfig;
pub use error::{CollaboratorError, LifecycleError, ValidationError};
pub use service::DocumentService;
