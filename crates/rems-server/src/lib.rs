//! REMS Intermediary: routes CDS Hooks and ETASU requests for REMS drugs to
//! the administrator responsible for each medication.

pub mod admin;
pub mod config;
pub mod directory;
pub mod error;
pub mod etasu;
pub mod handlers;
pub mod hooks;
pub mod middleware;
pub mod observability;
pub mod proxy;
pub mod resolver;
pub mod seed;
pub mod server;

pub use config::AppConfig;
pub use observability::init_tracing;
pub use server::{AppState, RemsServer, ServerBuilder, build_app};
