//! Client-facing table metadata derived from an entity descriptor.

use serde::{Deserialize, Serialize};

use crate::model::descriptor::EntityDescriptor;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary: bool,
    pub is_unique: bool,
    pub has_index: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnMetadata>,
    pub relations: Vec<String>,
}

impl TableMetadata {
    pub fn from_descriptor(descriptor: &EntityDescriptor) -> Self {
        TableMetadata {
            schema: descriptor.schema.clone().unwrap_or_default(),
            table: descriptor.table.clone(),
            columns: descriptor
                .columns
                .iter()
                .map(|c| ColumnMetadata {
                    name: c.name.clone(),
                    data_type: c.sql_type().to_string(),
                    is_nullable: c.nullable,
                    is_primary: c.primary,
                    is_unique: c.unique,
                    has_index: c.indexed,
                })
                .collect(),
            relations: descriptor.relation_names(),
        }
    }
}
