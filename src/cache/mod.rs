//! Shadow cache of provider records, kept per source in mirror tables.

pub mod freshness;
pub mod insert_builder;
pub mod manager;
pub mod mimic;

pub use freshness::*;
pub use insert_builder::{MimicInsertBuilder, RowValue, WhereStatementManager};
pub use manager::{aspect_columns, CacheManager};
pub use mimic::{replace_condition, CacheScope, DeleteFactory, Mimic, MimicSelect};
