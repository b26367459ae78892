mod logging;
mod persistence;
mod runner;
mod security;
mod server;
mod services;
mod store;

pub use logging::init as init_logging;
pub use runner::{DryRunTaskRunner, NotificationStore, TaskRunner};
pub use security::{AccessDenied, ApiKeyParseError, ApiKeyRegistry, PermissionGate, PermissionSet};
pub use server::{ServerConfig, ServerState, build_server_app};
pub use services::{
    EntityPatch, EntitySearchService, EntityService, SearchPage, ServiceError, get_by_id,
};
pub use store::InMemoryStore;
