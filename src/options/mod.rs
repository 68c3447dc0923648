//! Declarative read options: parsing, sanitizing and applying them to a query.

mod compiler;
mod operator;
mod types;

pub use compiler::{apply, compile, projections, relation_load, COUNT_SKIPPED};
pub use operator::FilterOperator;
pub use types::{
    ComputedColumn, CustomOperator, FilterOption, LogicOperator, PreloadOption, RequestOptions, SortOption,
};
