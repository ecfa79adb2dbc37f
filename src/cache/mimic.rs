use crate::cache::insert_builder::{MimicInsertBuilder, RowValue, WhereStatementManager};
use crate::error::QueryError;
use crate::model::{
    aspect_complete_key, aspect_created_key, CriteriaNode, Id, Instance, ParamNameValueMap, PrimitiveType,
    PropertyDef, PropertySelection, Schema, SchemaClass, SpatialPolygon, SpatialValue, SqlStatement, Value,
};
use crate::query::compiler::{Namespace, SqlAssembly, ROOT_ALIAS};
use crate::query::{LayoutTarget, NonInstanceColumn, RowLayout, SpatialFilter, SqlDialect};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use log::debug;

/// What part of a source's cache a select covers.
#[derive(Debug, Clone, Copy)]
pub enum CacheScope<'s> {
    Ids(&'s [Id]),
    Polygon(&'s SpatialPolygon),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MimicSelect {
    pub statement: SqlStatement,
    pub layout: RowLayout,
    pub non_instance_columns: Vec<NonInstanceColumn>,
}

/// Builds a per-row delete condition for delete-before-insert; `None` inserts
/// the row without deleting first.
pub type DeleteFactory<'f> = &'f dyn Fn(&Instance) -> Option<WhereStatementManager>;

/// Mirrors the primary query surface against the shadow-cache tables.
pub struct Mimic<'a> {
    schema: &'a Schema,
    dialect: &'a dyn SqlDialect,
    default_srid: i32,
}

// Streams stay in the primary store only.
fn cached_properties<'s>(schema: &'s Schema, class: &SchemaClass) -> Result<Vec<&'s PropertyDef>, QueryError> {
    Ok(schema
        .all_properties(&class.name)?
        .into_iter()
        .map(|(_, p)| p)
        .filter(|p| !p.is_stream())
        .collect())
}

/// Delete the row a source already holds for the instance.
pub fn replace_condition(class: &SchemaClass, source: &str, id: &str) -> WhereStatementManager {
    WhereStatementManager::new(format!(
        "{} = :source AND {} = :id",
        class.mapping.cache_source_column,
        class.cache_id_column()
    ))
    .with_param("source", source)
    .with_param("id", id)
}

impl<'a> Mimic<'a> {
    pub fn new(schema: &'a Schema, dialect: &'a dyn SqlDialect, default_srid: i32) -> Self {
        Self {
            schema,
            dialect,
            default_srid,
        }
    }

    pub fn build_select(
        &self,
        source: &str,
        scope: CacheScope<'_>,
        query_class: &str,
        selection: &PropertySelection,
        non_instance_columns: &[NonInstanceColumn],
        extra_criteria: Option<&CriteriaNode>,
    ) -> Result<MimicSelect, QueryError> {
        let mut assembly = SqlAssembly::new(
            self.schema,
            self.dialect,
            Namespace::Cache,
            query_class,
            self.dialect.new_params(),
        )?;
        let root = assembly.root();
        assembly.select(root, ROOT_ALIAS, selection, LayoutTarget::Instance)?;
        for extra in non_instance_columns {
            let column = assembly.root_column(&extra.column);
            assembly.push_column(column);
        }

        let source_column = assembly.root_column(&root.mapping.cache_source_column);
        let placeholder = assembly.bind(Value::string(source), PrimitiveType::String);
        assembly.add_predicate(format!("{} = {}", source_column, placeholder));

        match scope {
            CacheScope::Ids(ids) if ids.is_empty() => assembly.add_predicate("1 = 0".to_string()),
            CacheScope::Ids(ids) => {
                let id_column = assembly.root_id_column();
                let placeholders = ids
                    .iter()
                    .map(|id| assembly.bind(Value::string(id.as_str()), PrimitiveType::String))
                    .collect::<Vec<_>>();
                assembly.add_predicate(format!("{} IN ({})", id_column, placeholders.join(", ")));
            }
            CacheScope::Polygon(polygon) => {
                assembly.add_spatial_filter(&SpatialFilter::new(polygon.clone()))?;
            }
        }

        if let Some(criteria) = extra_criteria {
            assembly.add_criteria(criteria)?;
        }

        let sql = assembly.select_sql(None);
        debug!("cache select on {} for {}: {}", query_class, source, sql);
        let (layout, params) = assembly.into_parts();
        Ok(MimicSelect {
            statement: SqlStatement::new(sql, params),
            layout,
            non_instance_columns: non_instance_columns.to_vec(),
        })
    }

    /// One duplicate-safe insert per instance, optionally preceded by a delete.
    /// `additional_columns` are also written onto a row the source already
    /// holds for the id. `seed` carries the parameters of a batch being extended.
    #[allow(clippy::too_many_arguments)]
    pub fn build_insert(
        &self,
        source: &str,
        instances: &[Instance],
        class_name: &str,
        additional_columns: &[(String, Value)],
        delete_factory: Option<DeleteFactory<'_>>,
        created_at: DateTime<Utc>,
        seed: ParamNameValueMap,
    ) -> Result<Vec<SqlStatement>, QueryError> {
        if instances.is_empty() {
            return Ok(Vec::new());
        }
        let class = self.schema.require_class(class_name)?;
        let table = class.cache_table()?;
        let properties = cached_properties(self.schema, class)?;

        let mut builder = MimicInsertBuilder::with_params(self.dialect, seed);
        builder
            .set_table_name(table)
            .add_key_column_name(class.cache_id_column())
            .add_key_column_name(class.mapping.cache_source_column.as_str());
        for prop in &properties {
            if prop.is_spatial {
                builder
                    .add_spatial_column_name(prop.cache_column_name())
                    .add_column_name(prop.cache_srid_column_name());
            } else if prop.primitive_type == PrimitiveType::Binary {
                builder.add_binary_column_name(prop.cache_column_name());
            } else {
                builder.add_column_name(prop.cache_column_name());
            }
        }
        builder.add_column_name(class.mapping.cache_created_column.as_str());
        for (column, _) in additional_columns {
            builder.add_merge_column_name(column.as_str());
        }
        if delete_factory.is_some() {
            builder.activate_delete_before_insert();
        }
        builder.end_setting_columns();

        for instance in instances {
            let mut row: Vec<RowValue> = vec![
                Value::string(instance.id.as_str()).into(),
                Value::string(source).into(),
            ];
            for prop in &properties {
                let value = instance.get_literal(&prop.name).cloned().unwrap_or(Value::Null);
                if prop.is_spatial {
                    match value {
                        Value::String(text) => {
                            let geometry = SpatialValue::parse(&text, self.default_srid)?;
                            let srid = geometry.srid;
                            row.push(geometry.into());
                            row.push(Value::Int(srid).into());
                        }
                        Value::Null => {
                            row.push(Value::Null.into());
                            row.push(Value::Null.into());
                        }
                        other => {
                            return Err(QueryError::Unsupported(format!(
                                "{}.{} holds {:?}, expected geometry text",
                                class_name, prop.name, other
                            )))
                        }
                    }
                } else if prop.primitive_type == PrimitiveType::Binary
                    && !matches!(value, Value::Binary(_) | Value::Null)
                {
                    return Err(QueryError::Unsupported(format!(
                        "{}.{} holds {:?}, expected bytes",
                        class_name, prop.name, value
                    )));
                } else {
                    row.push(value.into());
                }
            }
            row.push(Value::DateTime(created_at).into());
            row.extend(additional_columns.iter().map(|(_, v)| RowValue::from(v.clone())));

            builder.add_row(row, delete_factory.and_then(|factory| factory(instance)));
        }

        debug!(
            "prepared {} cache rows for {} from {}",
            builder.row_count(),
            class_name,
            source
        );
        Ok(builder.create_statement())
    }

    /// DDL for the cache table of `class_name`, unique on `(source, id)`.
    pub fn create_table_sql(&self, class_name: &str) -> Result<String, QueryError> {
        let class = self.schema.require_class(class_name)?;
        let table = class.cache_table()?;
        let key_type = self.dialect.key_column_type();
        let datetime = self.dialect.column_type(PrimitiveType::DateTime, false);

        let mut columns = vec![
            format!("{} {} NOT NULL", class.cache_id_column(), key_type),
            format!("{} {} NOT NULL", class.mapping.cache_source_column, key_type),
        ];
        for prop in cached_properties(self.schema, class)? {
            columns.push(format!(
                "{} {}",
                prop.cache_column_name(),
                self.dialect.column_type(prop.primitive_type, prop.is_spatial)
            ));
            if prop.is_spatial {
                columns.push(format!(
                    "{} {}",
                    prop.cache_srid_column_name(),
                    self.dialect.column_type(PrimitiveType::Int, false)
                ));
            }
        }
        columns.push(format!("{} {}", class.mapping.cache_created_column, datetime));
        for aspect in &class.mapping.aspects {
            columns.push(format!(
                "{} {}",
                aspect_complete_key(aspect),
                self.dialect.column_type(PrimitiveType::Bool, false)
            ));
            columns.push(format!("{} {}", aspect_created_key(aspect), datetime));
        }
        columns.push(format!(
            "UNIQUE ({}, {})",
            class.mapping.cache_source_column,
            class.cache_id_column()
        ));

        Ok(self
            .dialect
            .create_table_if_missing(table, &columns.iter().join(", ")))
    }
}
