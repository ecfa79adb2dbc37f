use crate::error::StoreError;
use crate::model::{SqlStatement, Value};

/// One result row, columns in select-list order.
pub type DbRow = Vec<Value>;

/// Seam between the SQL-producing layers and a live database.
///
/// Implementations acquire a pooled connection per call and give it back on
/// every path, including errors.
#[async_trait::async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Run a statement that returns rows.
    async fn fetch_rows(&self, statement: &SqlStatement) -> Result<Vec<DbRow>, StoreError>;

    /// Run a statement for its side effects and return the rows affected.
    async fn execute(&self, statement: &SqlStatement) -> Result<u64, StoreError>;
}
