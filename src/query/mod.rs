pub mod compiler;
pub mod dialect;
pub mod layout;

pub use compiler::{compile, CompiledQuery, Page, QueryConverter, QuerySettings, SpatialFilter};
pub use dialect::{dialect_by_name, PostgresDialect, SqlDialect, SqlServerDialect};
pub use layout::{ColumnCategory, LayoutEntry, LayoutTarget, NonInstanceColumn, RelatedLayout, RowLayout, StreamSource};
