//! Backend-neutral query abstraction: predicates, builders and the
//! `Database` contract.

mod condition;
mod database;
mod select;
mod write;

pub use condition::{Comparison, Condition};
pub use database::{transaction, BoxFuture, Capability, Database, ExecResult, TxFn};
pub use select::{Direction, Join, JoinKind, OrderBy, Projection, RelationLoad, Select, SelectQuery, TableRef};
pub use write::{Delete, DeleteQuery, Insert, InsertQuery, Update, UpdateQuery};
