use crate::error::StoreError;
use crate::model::{Instance, PrimitiveType, PropertyValue, SpatialValue, SqlStatement, StreamHandle, Value};
use crate::query::{ColumnCategory, CompiledQuery, LayoutTarget, NonInstanceColumn, RowLayout};
use crate::query::SqlDialect;
use crate::store::traits::{DbRow, SqlExecutor};
use log::{debug, warn};
use std::collections::HashSet;

/// Runs compiled statements and turns the rows back into instances.
pub struct DbQuerier<'a> {
    executor: &'a dyn SqlExecutor,
    dialect: &'a dyn SqlDialect,
}

impl<'a> DbQuerier<'a> {
    pub fn new(executor: &'a dyn SqlExecutor, dialect: &'a dyn SqlDialect) -> Self {
        Self { executor, dialect }
    }

    pub async fn execute(
        &self,
        statement: &SqlStatement,
        layout: &RowLayout,
        class_name: &str,
        non_instance_columns: &[NonInstanceColumn],
    ) -> Result<Vec<Instance>, StoreError> {
        let rows = self.executor.fetch_rows(statement).await?;
        let row_count = rows.len();
        let instances = materialize(rows, layout, class_name, non_instance_columns)?;
        debug!(
            "materialized {} {} instances from {} rows",
            instances.len(),
            class_name,
            row_count
        );
        Ok(instances)
    }

    pub async fn execute_compiled(&self, compiled: &CompiledQuery) -> Result<Vec<Instance>, StoreError> {
        self.execute(&compiled.statement(), &compiled.layout, &compiled.class_name, &[])
            .await
    }

    /// Total matching instances, ignoring paging.
    pub async fn count(&self, compiled: &CompiledQuery) -> Result<u64, StoreError> {
        let statement = compiled
            .count_statement()
            .unwrap_or_else(|| compiled.statement());
        let rows = self.executor.fetch_rows(&statement).await?;
        let row = rows.first().ok_or_else(|| StoreError::Decode {
            index: 0,
            type_name: "count (no row returned)".to_string(),
        })?;
        let value = column(row, 0)?;
        value
            .as_i64()
            .and_then(|count| u64::try_from(count).ok())
            .ok_or_else(|| StoreError::Decode {
                index: 0,
                type_name: format!("count ({:?})", value),
            })
    }

    pub async fn execute_non_query(&self, statement: &SqlStatement) -> Result<u64, StoreError> {
        self.executor.execute(statement).await
    }

    /// Read the bytes behind a stream handle.
    pub async fn open_stream(&self, handle: &StreamHandle) -> Result<Vec<u8>, StoreError> {
        let mut params = self.dialect.new_params();
        let placeholder = params.push(Value::string(handle.instance_id.as_str()), PrimitiveType::String);
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = {};",
            handle.column, handle.table, handle.id_column, placeholder
        );

        let rows = self.executor.fetch_rows(&SqlStatement::new(sql, params)).await?;
        match rows.into_iter().next().and_then(|row| row.into_iter().next()) {
            Some(Value::Binary(bytes)) => Ok(bytes),
            Some(Value::Null) => Ok(Vec::new()),
            Some(Value::String(text)) => Ok(text.into_bytes()),
            _ => Err(StoreError::MissingStream(format!(
                "{}.{} for {}",
                handle.table, handle.column, handle.instance_id
            ))),
        }
    }
}

fn column(row: &DbRow, index: usize) -> Result<Value, StoreError> {
    row.get(index).cloned().ok_or_else(|| StoreError::Decode {
        index,
        type_name: format!("missing column (row has {})", row.len()),
    })
}

fn spatial_value(wkt: Value, srid: Value) -> Value {
    match wkt {
        Value::String(wkt) => {
            let srid = srid
                .as_i64()
                .and_then(|s| i32::try_from(s).ok())
                .unwrap_or_default();
            Value::String(SpatialValue::new(wkt, srid).to_string())
        }
        _ => Value::Null,
    }
}

/// Rebuild instances from raw rows following `layout`. Rows repeating an id
/// already seen are dropped.
pub fn materialize(
    rows: Vec<DbRow>,
    layout: &RowLayout,
    class_name: &str,
    non_instance_columns: &[NonInstanceColumn],
) -> Result<Vec<Instance>, StoreError> {
    let mut seen = HashSet::new();
    let mut instances = Vec::new();

    for row in rows {
        let id = match row.first() {
            Some(Value::Null) | None => {
                warn!("skipping {} row without an id", class_name);
                continue;
            }
            Some(id) => id.to_string(),
        };
        if !seen.insert(id.clone()) {
            continue;
        }
        instances.push(materialize_row(&row, id, layout, class_name, non_instance_columns)?);
    }
    Ok(instances)
}

fn materialize_row(
    row: &DbRow,
    id: String,
    layout: &RowLayout,
    class_name: &str,
    non_instance_columns: &[NonInstanceColumn],
) -> Result<Instance, StoreError> {
    let mut instance = Instance::new(class_name, id);
    let mut related: Vec<Option<Instance>> = vec![None; layout.related.len()];
    let mut cursor = 1;

    for entry in &layout.entries {
        let value = match &entry.category {
            ColumnCategory::InstanceData => {
                cursor += 1;
                PropertyValue::Literal(column(row, cursor - 1)?)
            }
            ColumnCategory::SpatialInstanceData => {
                cursor += 2;
                PropertyValue::Literal(spatial_value(column(row, cursor - 2)?, column(row, cursor - 1)?))
            }
            ColumnCategory::StreamData(source) => {
                let owner_id = match entry.target {
                    LayoutTarget::Instance => Some(instance.id.clone()),
                    LayoutTarget::Related(i) => related[i].as_ref().map(|r| r.id.clone()),
                };
                let Some(instance_id) = owner_id else {
                    continue;
                };
                PropertyValue::Stream(StreamHandle {
                    table: source.table.clone(),
                    column: source.column.clone(),
                    id_column: source.id_column.clone(),
                    instance_id,
                })
            }
            ColumnCategory::RelatedInstanceId => {
                let value = column(row, cursor)?;
                cursor += 1;
                if let (LayoutTarget::Related(i), false) = (entry.target, value.is_null()) {
                    let spec = &layout.related[i];
                    let related_id = value.to_string();
                    instance.set_related_instance_id(&spec.relationship, &related_id);
                    related[i] = Some(Instance::new(&spec.class_name, related_id));
                }
                continue;
            }
        };

        match entry.target {
            LayoutTarget::Instance => instance.set(&entry.name, value),
            LayoutTarget::Related(i) => {
                if let Some(target) = related[i].as_mut() {
                    target.set(&entry.name, value);
                }
            }
        }
    }

    for (spec, target) in layout.related.iter().zip(related) {
        if let Some(target) = target {
            instance.add_related(&spec.relationship, spec.direction, target);
        }
    }

    for (offset, extra) in non_instance_columns.iter().enumerate() {
        let value = column(row, cursor + offset)?;
        instance.set_extended(&extra.key, value.to_json());
    }
    Ok(instance)
}
