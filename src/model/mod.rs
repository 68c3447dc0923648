//! Entity shapes, descriptors, the model registry and table metadata.

mod descriptor;
mod metadata;
mod reflect;
mod registry;

pub use descriptor::{Column, EntityDescriptor, Relation};
pub use metadata::{ColumnMetadata, TableMetadata};
pub use reflect::{Field, Record, RecordFn, Reflect, RelationKeys, ScalarType, Shape};
pub use registry::{ModelRegistry, RegisteredModel};
