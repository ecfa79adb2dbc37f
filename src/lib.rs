pub mod cache;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod provider;
pub mod query;
pub mod store;

#[cfg(test)]
mod test_support;

pub use cache::{CacheManager, CachePolicy, Mimic};
pub use error::{CacheError, FetchError, QueryError, StoreError};
pub use logic::{Complement, InstanceModifier, Overrider, ReconcileContext};
pub use model::*;
pub use provider::{DataProvider, Extractor, RawRecord, RecordAdapter};
pub use query::{compile, dialect_by_name, CompiledQuery, PostgresDialect, QueryConverter, QuerySettings, SqlDialect, SqlServerDialect};
pub use store::{DbQuerier, PostgresExecutor, SqlExecutor};
