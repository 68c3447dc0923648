//! Shared application state for all routes.

use std::sync::Arc;

use crate::model::ModelRegistry;
use crate::query::Database;
use crate::service::CrudHandler;

#[derive(Clone)]
pub struct AppState {
    pub crud: CrudHandler,
}

impl AppState {
    pub fn new(registry: Arc<ModelRegistry>, db: Arc<dyn Database>) -> Self {
        AppState {
            crud: CrudHandler::new(registry, db),
        }
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        self.crud.database()
    }
}
