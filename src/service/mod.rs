//! CRUD orchestration over the query abstraction.

mod crud;
pub use crud::{CrudHandler, CrudRequest, Operation, RequestBody};
