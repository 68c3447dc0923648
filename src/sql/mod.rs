//! PostgreSQL rendering shared by both adapters: identifiers quoted, values bound.

mod builder;
pub mod params;
pub use builder::*;
pub use params::{PgBindValue, PgParam};
