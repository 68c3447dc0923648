//! ResolveSpec: schema-driven generic CRUD over pluggable PostgreSQL backends.

pub mod backend;
pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod model;
pub mod options;
pub mod query;
pub mod response;
pub mod routes;
pub mod service;
pub mod sql;
pub mod state;

pub use backend::{connect, BackendKind};
pub use config::Settings;
pub use error::{AppError, ConfigError, ModelError, QueryError};
pub use model::{EntityDescriptor, ModelRegistry, Reflect, TableMetadata};
pub use options::RequestOptions;
pub use query::Database;
pub use response::{Envelope, ResponseFormat};
pub use routes::{app, common_routes, common_routes_with_ready, entity_routes};
pub use service::{CrudHandler, CrudRequest, Operation};
pub use state::AppState;
