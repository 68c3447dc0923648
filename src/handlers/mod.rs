//! HTTP handlers for the generic entity endpoints.

pub mod entity;
pub use entity::*;
