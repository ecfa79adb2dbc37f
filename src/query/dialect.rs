use crate::model::{ParamNameValueMap, PlaceholderStyle, PrimitiveType, SpatialPolygon, SpatialValue};
use std::fmt;
use std::sync::Arc;

/// Everything that differs between the SQL flavours the compiler can target.
pub trait SqlDialect: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn placeholder_style(&self) -> PlaceholderStyle;

    fn new_params(&self) -> ParamNameValueMap {
        ParamNameValueMap::new(self.placeholder_style())
    }

    /// Whether several statements can travel as one batch text sharing a
    /// single parameter list.
    fn batches_statements(&self) -> bool;

    /// Inlined spatial predicate; there is no parameterized geometry literal.
    fn spatial_intersects(&self, column: &str, polygon: &SpatialPolygon) -> String;

    fn spatial_text(&self, column: &str) -> String;

    fn spatial_srid(&self, column: &str) -> String;

    fn geometry_literal(&self, value: &SpatialValue) -> String;

    fn binary_literal(&self, bytes: &[u8]) -> String;

    fn pagination(&self, start: u64, size: u64) -> String;

    fn pagination_requires_order(&self) -> bool;

    /// Wrap a single INSERT (without terminator) so a uniqueness violation is
    /// ignored and every other failure still surfaces.
    fn duplicate_safe_insert(&self, insert: &str) -> String;

    /// Like `duplicate_safe_insert`, except a row already holding `key` gets
    /// the `updates` written onto it. Both pair a column with its rendered value.
    fn merging_insert(&self, insert: &str, table: &str, key: &[(&str, &str)], updates: &[(&str, &str)]) -> String;

    fn column_type(&self, primitive_type: PrimitiveType, spatial: bool) -> &'static str;

    /// Column type for the id and source columns, which form the unique key.
    fn key_column_type(&self) -> &'static str;

    fn create_table_if_missing(&self, table: &str, body: &str) -> String;
}

fn quote_wkt(wkt: &str) -> String {
    wkt.replace('\'', "''")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDialect;

impl SqlDialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Named
    }

    fn batches_statements(&self) -> bool {
        true
    }

    fn spatial_intersects(&self, column: &str, polygon: &SpatialPolygon) -> String {
        format!(
            "{}.STIntersects(geometry::STGeomFromText('{}', {})) = 'true'",
            column,
            quote_wkt(&polygon.to_wkt()),
            polygon.srid
        )
    }

    fn spatial_text(&self, column: &str) -> String {
        format!("{}.STAsText()", column)
    }

    fn spatial_srid(&self, column: &str) -> String {
        format!("{}.STSrid", column)
    }

    fn geometry_literal(&self, value: &SpatialValue) -> String {
        format!(
            "geometry::STGeomFromText('{}', {})",
            quote_wkt(&value.wkt),
            value.srid
        )
    }

    fn binary_literal(&self, bytes: &[u8]) -> String {
        format!("0x{}", hex::encode_upper(bytes))
    }

    fn pagination(&self, start: u64, size: u64) -> String {
        format!("OFFSET {} ROWS FETCH NEXT {} ROWS ONLY", start, size)
    }

    fn pagination_requires_order(&self) -> bool {
        true
    }

    fn duplicate_safe_insert(&self, insert: &str) -> String {
        // 2627: violation of a PRIMARY KEY / UNIQUE constraint
        format!(
            "BEGIN TRY {}; END TRY BEGIN CATCH IF ERROR_NUMBER() <> 2627 THROW; END CATCH;",
            insert
        )
    }

    fn merging_insert(&self, insert: &str, table: &str, key: &[(&str, &str)], updates: &[(&str, &str)]) -> String {
        let set = updates.iter().map(|(c, v)| format!("{} = {}", c, v)).collect::<Vec<_>>();
        let matches = key.iter().map(|(c, v)| format!("{} = {}", c, v)).collect::<Vec<_>>();
        format!(
            "BEGIN TRY {}; END TRY BEGIN CATCH IF ERROR_NUMBER() <> 2627 THROW; UPDATE {} SET {} WHERE {}; END CATCH;",
            insert,
            table,
            set.join(", "),
            matches.join(" AND ")
        )
    }

    fn column_type(&self, primitive_type: PrimitiveType, spatial: bool) -> &'static str {
        if spatial {
            return "GEOMETRY";
        }
        match primitive_type {
            PrimitiveType::String => "NVARCHAR(MAX)",
            PrimitiveType::Int => "INT",
            PrimitiveType::Long => "BIGINT",
            PrimitiveType::Double => "FLOAT",
            PrimitiveType::Bool => "BIT",
            PrimitiveType::DateTime => "DATETIME2",
            PrimitiveType::Binary | PrimitiveType::Stream => "VARBINARY(MAX)",
        }
    }

    fn key_column_type(&self) -> &'static str {
        "NVARCHAR(450)"
    }

    fn create_table_if_missing(&self, table: &str, body: &str) -> String {
        format!(
            "IF OBJECT_ID(N'{}', N'U') IS NULL CREATE TABLE {} ({});",
            table, table, body
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Positional
    }

    // The extended query protocol accepts one statement per prepared query.
    fn batches_statements(&self) -> bool {
        false
    }

    fn spatial_intersects(&self, column: &str, polygon: &SpatialPolygon) -> String {
        format!(
            "ST_Intersects({}, ST_GeomFromText('{}', {}))",
            column,
            quote_wkt(&polygon.to_wkt()),
            polygon.srid
        )
    }

    fn spatial_text(&self, column: &str) -> String {
        format!("ST_AsText({})", column)
    }

    fn spatial_srid(&self, column: &str) -> String {
        format!("ST_SRID({})", column)
    }

    fn geometry_literal(&self, value: &SpatialValue) -> String {
        format!(
            "ST_GeomFromText('{}', {})",
            quote_wkt(&value.wkt),
            value.srid
        )
    }

    fn binary_literal(&self, bytes: &[u8]) -> String {
        format!("decode('{}', 'hex')", hex::encode(bytes))
    }

    fn pagination(&self, start: u64, size: u64) -> String {
        format!("LIMIT {} OFFSET {}", size, start)
    }

    fn pagination_requires_order(&self) -> bool {
        false
    }

    fn duplicate_safe_insert(&self, insert: &str) -> String {
        format!("{} ON CONFLICT DO NOTHING;", insert)
    }

    fn merging_insert(&self, insert: &str, _table: &str, key: &[(&str, &str)], updates: &[(&str, &str)]) -> String {
        let target = key.iter().map(|(c, _)| *c).collect::<Vec<_>>();
        let set = updates
            .iter()
            .map(|(c, _)| format!("{} = EXCLUDED.{}", c, c))
            .collect::<Vec<_>>();
        format!(
            "{} ON CONFLICT ({}) DO UPDATE SET {};",
            insert,
            target.join(", "),
            set.join(", ")
        )
    }

    fn column_type(&self, primitive_type: PrimitiveType, spatial: bool) -> &'static str {
        if spatial {
            return "GEOMETRY";
        }
        match primitive_type {
            PrimitiveType::String => "TEXT",
            PrimitiveType::Int => "INTEGER",
            PrimitiveType::Long => "BIGINT",
            PrimitiveType::Double => "DOUBLE PRECISION",
            PrimitiveType::Bool => "BOOLEAN",
            PrimitiveType::DateTime => "TIMESTAMPTZ",
            PrimitiveType::Binary | PrimitiveType::Stream => "BYTEA",
        }
    }

    fn key_column_type(&self) -> &'static str {
        "TEXT"
    }

    fn create_table_if_missing(&self, table: &str, body: &str) -> String {
        format!("CREATE TABLE IF NOT EXISTS {} ({});", table, body)
    }
}

/// Look up a dialect by its configured name.
pub fn dialect_by_name(name: &str) -> Option<Arc<dyn SqlDialect>> {
    match name.to_ascii_lowercase().as_str() {
        "sqlserver" | "mssql" => Some(Arc::new(SqlServerDialect)),
        "postgres" | "postgresql" => Some(Arc::new(PostgresDialect)),
        _ => None,
    }
}
