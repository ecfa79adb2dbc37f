use crate::model::{ParamNameValueMap, SpatialValue, SqlStatement, Value};
use crate::query::SqlDialect;
use std::collections::HashMap;

/// A free-text condition with `:name` tokens, rendered into the caller's
/// parameter map when the statement is built.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereStatementManager {
    condition: String,
    params: HashMap<String, Value>,
}

impl WhereStatementManager {
    pub fn new(condition: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            params: HashMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Replace every `:name` token with a fresh placeholder of `params`.
    /// `::` (a Postgres cast) is left untouched.
    pub fn render(&self, params: &mut ParamNameValueMap) -> String {
        let mut out = String::with_capacity(self.condition.len());
        let mut chars = self.condition.chars().peekable();

        while let Some(c) = chars.next() {
            if c != ':' {
                out.push(c);
                continue;
            }
            if chars.peek() == Some(&':') {
                chars.next();
                out.push_str("::");
                continue;
            }

            let mut name = String::new();
            while let Some(&next) = chars.peek() {
                if next.is_ascii_alphanumeric() || next == '_' {
                    name.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                out.push(':');
                continue;
            }
            match self.params.get(&name) {
                Some(value) => out.push_str(&params.push_value(value.clone())),
                None => panic!(
                    "programmer error: condition '{}' references unknown parameter :{}",
                    self.condition, name
                ),
            }
        }
        out
    }
}

/// One cell of an insert row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    Value(Value),
    Spatial(SpatialValue),
}

impl From<Value> for RowValue {
    fn from(value: Value) -> Self {
        RowValue::Value(value)
    }
}

impl From<SpatialValue> for RowValue {
    fn from(value: SpatialValue) -> Self {
        RowValue::Spatial(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unnamed,
    DefiningColumns,
    Ready,
    Built,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Plain,
    Spatial,
    Binary,
}

/// Builds duplicate-safe INSERT statements for a cache table.
///
/// Call order is fixed: `set_table_name`, any number of column definitions,
/// `end_setting_columns`, one or more `add_row`, then `create_statement`.
/// Breaking the order is a bug in the caller and panics.
///
/// Merge columns are written onto a row that already exists under the key
/// columns; everything else in such a row stays as it was.
pub struct MimicInsertBuilder<'d> {
    dialect: &'d dyn SqlDialect,
    phase: Phase,
    table: String,
    columns: Vec<(String, ColumnKind)>,
    key: Vec<usize>,
    merge: Vec<usize>,
    delete_before_insert: bool,
    rows: usize,
    params: ParamNameValueMap,
    fragments: Vec<String>,
    statements: Vec<SqlStatement>,
}

impl<'d> MimicInsertBuilder<'d> {
    pub fn new(dialect: &'d dyn SqlDialect) -> Self {
        Self::with_params(dialect, dialect.new_params())
    }

    /// Continue numbering after an existing batch (batching dialects only
    /// share one map across calls).
    pub fn with_params(dialect: &'d dyn SqlDialect, params: ParamNameValueMap) -> Self {
        Self {
            dialect,
            phase: Phase::Unnamed,
            table: String::new(),
            columns: Vec::new(),
            key: Vec::new(),
            merge: Vec::new(),
            delete_before_insert: false,
            rows: 0,
            params,
            fragments: Vec::new(),
            statements: Vec::new(),
        }
    }

    fn expect_phase(&self, expected: Phase, call: &str) {
        if self.phase != expected {
            panic!(
                "programmer error: {} called in state {:?}, expected {:?}",
                call, self.phase, expected
            );
        }
    }

    pub fn set_table_name(&mut self, table: impl Into<String>) -> &mut Self {
        self.expect_phase(Phase::Unnamed, "set_table_name");
        self.table = table.into();
        self.phase = Phase::DefiningColumns;
        self
    }

    fn add_column(&mut self, name: impl Into<String>, kind: ColumnKind, call: &str) -> &mut Self {
        self.expect_phase(Phase::DefiningColumns, call);
        self.columns.push((name.into(), kind));
        self
    }

    pub fn add_column_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.add_column(name, ColumnKind::Plain, "add_column_name")
    }

    pub fn add_spatial_column_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.add_column(name, ColumnKind::Spatial, "add_spatial_column_name")
    }

    pub fn add_binary_column_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.add_column(name, ColumnKind::Binary, "add_binary_column_name")
    }

    /// A plain column that is part of the table's unique key.
    pub fn add_key_column_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.key.push(self.columns.len());
        self.add_column(name, ColumnKind::Plain, "add_key_column_name")
    }

    /// A plain column that is updated when the key already exists.
    pub fn add_merge_column_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.merge.push(self.columns.len());
        self.add_column(name, ColumnKind::Plain, "add_merge_column_name")
    }

    pub fn activate_delete_before_insert(&mut self) -> &mut Self {
        self.expect_phase(Phase::DefiningColumns, "activate_delete_before_insert");
        self.delete_before_insert = true;
        self
    }

    pub fn end_setting_columns(&mut self) -> &mut Self {
        self.expect_phase(Phase::DefiningColumns, "end_setting_columns");
        if self.columns.is_empty() {
            panic!("programmer error: no columns defined for {}", self.table);
        }
        if !self.merge.is_empty() && self.key.is_empty() {
            panic!("programmer error: merge columns on {} without key columns", self.table);
        }
        self.phase = Phase::Ready;
        self
    }

    fn literal(&self, params: &mut ParamNameValueMap, column: usize, value: &RowValue) -> String {
        let (name, kind) = &self.columns[column];
        match (kind, value) {
            (_, RowValue::Value(Value::Null)) => "NULL".to_string(),
            (ColumnKind::Plain, RowValue::Value(v)) => params.push_value(v.clone()),
            (ColumnKind::Binary, RowValue::Value(Value::Binary(bytes))) => self.dialect.binary_literal(bytes),
            (ColumnKind::Spatial, RowValue::Spatial(geometry)) => self.dialect.geometry_literal(geometry),
            (kind, value) => panic!(
                "programmer error: {:?} column {} cannot take {:?}",
                kind, name, value
            ),
        }
    }

    pub fn add_row(&mut self, values: Vec<RowValue>, delete: Option<WhereStatementManager>) -> &mut Self {
        self.expect_phase(Phase::Ready, "add_row");
        if values.len() != self.columns.len() {
            panic!(
                "programmer error: row has {} values but {} declares {} columns",
                values.len(),
                self.table,
                self.columns.len()
            );
        }
        if delete.is_some() && !self.delete_before_insert {
            panic!("programmer error: delete condition given without activate_delete_before_insert");
        }

        let batching = self.dialect.batches_statements();
        let mut params = if batching {
            std::mem::replace(&mut self.params, self.dialect.new_params())
        } else {
            self.dialect.new_params()
        };

        if let Some(delete) = delete {
            let condition = delete.render(&mut params);
            let sql = format!("DELETE FROM {} WHERE {};", self.table, condition);
            if batching {
                self.fragments.push(sql);
            } else {
                self.statements.push(SqlStatement::new(sql, params));
                params = self.dialect.new_params();
            }
        }

        let placeholders: Vec<String> = values
            .iter()
            .enumerate()
            .map(|(i, v)| self.literal(&mut params, i, v))
            .collect();
        let columns: Vec<&str> = self.columns.iter().map(|(c, _)| c.as_str()).collect();
        let insert = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            columns.join(", "),
            placeholders.join(", ")
        );
        let sql = if self.merge.is_empty() {
            self.dialect.duplicate_safe_insert(&insert)
        } else {
            let pairs = |indices: &[usize]| -> Vec<(&str, &str)> {
                indices
                    .iter()
                    .map(|&i| (columns[i], placeholders[i].as_str()))
                    .collect()
            };
            self.dialect
                .merging_insert(&insert, &self.table, &pairs(&self.key), &pairs(&self.merge))
        };

        if batching {
            self.fragments.push(sql);
            self.params = params;
        } else {
            self.statements.push(SqlStatement::new(sql, params));
        }
        self.rows += 1;
        self
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    /// Finish the builder. Batching dialects yield exactly one statement.
    pub fn create_statement(&mut self) -> Vec<SqlStatement> {
        self.expect_phase(Phase::Ready, "create_statement");
        if self.rows == 0 {
            panic!("programmer error: create_statement called with no rows for {}", self.table);
        }
        self.phase = Phase::Built;

        if self.dialect.batches_statements() {
            let params = std::mem::replace(&mut self.params, self.dialect.new_params());
            vec![SqlStatement::new(self.fragments.join("\n"), params)]
        } else {
            std::mem::take(&mut self.statements)
        }
    }
}
