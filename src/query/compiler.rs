use crate::error::QueryError;
use crate::model::{
    ComparisonOperator, CriteriaNode, ExtendedParams, ParamNameValueMap, PrimitiveType, PropertyDef,
    PropertySelection, Query, RelatedClassSpecifier, RelatedInstanceSpec, RelationshipDirection, Schema,
    SchemaClass, SpatialPolygon, SqlStatement, Value,
};
use crate::query::dialect::SqlDialect;
use crate::query::layout::{ColumnCategory, LayoutTarget, RelatedLayout, RowLayout, StreamSource};
use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub(crate) const ROOT_ALIAS: &str = "tab0";

fn default_srid() -> i32 {
    4326
}

fn default_max_page_size() -> u64 {
    1000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySettings {
    /// SRID assumed for polygons and geometry text that do not carry one.
    #[serde(default = "default_srid")]
    pub default_srid: i32,
    /// Sources whose queries honour a polygon in the extended params.
    #[serde(default)]
    pub spatial_sources: Vec<String>,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            default_srid: default_srid(),
            spatial_sources: Vec::new(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl QuerySettings {
    /// An absent source always qualifies.
    pub fn is_spatial_source(&self, source: Option<&str>) -> bool {
        match source {
            None => true,
            Some(source) => self
                .spatial_sources
                .iter()
                .any(|s| s.eq_ignore_ascii_case(source)),
        }
    }
}

/// Explicit spatial restriction. Without a property name the class's first
/// spatial property is used.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialFilter {
    pub property: Option<String>,
    pub polygon: SpatialPolygon,
}

impl SpatialFilter {
    pub fn new(polygon: SpatialPolygon) -> Self {
        Self {
            property: None,
            polygon,
        }
    }

    pub fn on(mut self, property: impl Into<String>) -> Self {
        self.property = Some(property.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub start: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub class_name: String,
    pub sql: String,
    /// `None` when the query was compiled count-only; `sql` is the count then.
    pub count_sql: Option<String>,
    pub layout: RowLayout,
    pub params: ParamNameValueMap,
}

impl CompiledQuery {
    pub fn statement(&self) -> SqlStatement {
        SqlStatement::new(self.sql.clone(), self.params.clone())
    }

    pub fn count_statement(&self) -> Option<SqlStatement> {
        self.count_sql
            .as_ref()
            .map(|sql| SqlStatement::new(sql.clone(), self.params.clone()))
    }
}

/// Which set of tables and columns a statement addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Namespace {
    Primary,
    Cache,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum JoinKey {
    Base,
    Related {
        from: String,
        specifier: RelatedClassSpecifier,
    },
}

#[derive(Debug, Clone)]
struct Join {
    table: String,
    alias: String,
    on: String,
}

#[derive(Debug, Clone)]
struct AliasTarget {
    table: String,
    id_column: String,
}

struct Located<'a> {
    prop: &'a PropertyDef,
    alias: String,
}

/// Incrementally builds one SELECT: aliases, joins, select list, layout,
/// predicates and the parameter map that goes with them.
pub(crate) struct SqlAssembly<'a> {
    schema: &'a Schema,
    dialect: &'a dyn SqlDialect,
    namespace: Namespace,
    root: &'a SchemaClass,
    root_table: String,
    base: Option<(&'a SchemaClass, String)>,
    joins: Vec<Join>,
    join_aliases: HashMap<JoinKey, String>,
    alias_targets: HashMap<String, AliasTarget>,
    columns: Vec<String>,
    layout: RowLayout,
    params: ParamNameValueMap,
    predicates: Vec<String>,
    order_by_id: bool,
}

impl<'a> SqlAssembly<'a> {
    pub(crate) fn new(
        schema: &'a Schema,
        dialect: &'a dyn SqlDialect,
        namespace: Namespace,
        class_name: &str,
        params: ParamNameValueMap,
    ) -> Result<Self, QueryError> {
        let root = schema.require_class(class_name)?;
        let root_table = match namespace {
            Namespace::Primary => root.table()?,
            Namespace::Cache => root.cache_table()?,
        }
        .to_string();

        let mut assembly = Self {
            schema,
            dialect,
            namespace,
            root,
            root_table: root_table.clone(),
            base: None,
            joins: Vec::new(),
            join_aliases: HashMap::new(),
            alias_targets: HashMap::new(),
            columns: Vec::new(),
            layout: RowLayout::default(),
            params,
            predicates: Vec::new(),
            order_by_id: false,
        };
        let id_column = assembly.id_column(root).to_string();
        assembly.columns.push(format!("{}.{}", ROOT_ALIAS, id_column));
        assembly.alias_targets.insert(
            ROOT_ALIAS.to_string(),
            AliasTarget {
                table: root_table,
                id_column,
            },
        );
        Ok(assembly)
    }

    pub(crate) fn root(&self) -> &'a SchemaClass {
        self.root
    }

    fn id_column(&self, class: &'a SchemaClass) -> &'a str {
        match self.namespace {
            Namespace::Primary => class.id_column(),
            Namespace::Cache => class.cache_id_column(),
        }
    }

    pub(crate) fn root_column(&self, column: &str) -> String {
        format!("{}.{}", ROOT_ALIAS, column)
    }

    pub(crate) fn root_id_column(&self) -> String {
        self.root_column(self.id_column(self.root))
    }

    fn next_alias(&self) -> String {
        format!("tab{}", self.joins.len() + 1)
    }

    fn push_join(&mut self, key: JoinKey, table: String, alias: String, id_column: &str, on: String) {
        self.alias_targets.insert(
            alias.clone(),
            AliasTarget {
                table: table.clone(),
                id_column: id_column.to_string(),
            },
        );
        self.join_aliases.insert(key, alias.clone());
        self.joins.push(Join { table, alias, on });
    }

    /// Join the base class table when the base is mapped separately. The
    /// shadow cache is denormalized, so there is nothing to join there.
    pub(crate) fn join_polymorphic_base(&mut self) {
        if self.namespace == Namespace::Cache || self.join_aliases.contains_key(&JoinKey::Base) {
            return;
        }
        let schema = self.schema;
        let Some(base) = schema.base_of(self.root) else {
            return;
        };
        let Some(base_table) = base.mapping.table.as_deref() else {
            return;
        };
        if base_table == self.root_table {
            return;
        }

        let alias = self.next_alias();
        let on = format!(
            "{}.{} = {}.{}",
            ROOT_ALIAS,
            self.root.id_column(),
            alias,
            base.id_column()
        );
        self.push_join(JoinKey::Base, base_table.to_string(), alias.clone(), base.id_column(), on);
        self.base = Some((base, alias));
    }

    fn locate(&self, class: &'a SchemaClass, alias: &str, property: &str) -> Result<Located<'a>, QueryError> {
        let schema = self.schema;
        let (owner, prop) = schema.resolve_property(&class.name, property)?;

        let shares_table = owner.name == class.name
            || owner.mapping.table.is_none()
            || owner.mapping.table == class.mapping.table;
        if self.namespace == Namespace::Cache || shares_table {
            return Ok(Located {
                prop,
                alias: alias.to_string(),
            });
        }

        match &self.base {
            Some((base, base_alias)) if alias == ROOT_ALIAS && base.name == owner.name => Ok(Located {
                prop,
                alias: base_alias.clone(),
            }),
            _ => Err(QueryError::PolymorphismRequired {
                property: property.to_string(),
                base: owner.name.clone(),
            }),
        }
    }

    fn column(&self, located: &Located<'_>) -> String {
        let name = match self.namespace {
            Namespace::Primary => located.prop.column_name(),
            Namespace::Cache => located.prop.cache_column_name(),
        };
        format!("{}.{}", located.alias, name)
    }

    /// Add the selected properties of `class` (reachable through `alias`) to
    /// the select list and the layout.
    pub(crate) fn select(
        &mut self,
        class: &'a SchemaClass,
        alias: &str,
        selection: &PropertySelection,
        target: LayoutTarget,
    ) -> Result<(), QueryError> {
        let located = match selection {
            PropertySelection::All => {
                let schema = self.schema;
                let mut located = Vec::new();
                for (_, prop) in schema.all_properties(&class.name)? {
                    match self.locate(class, alias, &prop.name) {
                        Ok(l) => located.push(l),
                        // base table not joined: those columns are simply not visible
                        Err(QueryError::PolymorphismRequired { .. }) => continue,
                        Err(e) => return Err(e),
                    }
                }
                located
            }
            PropertySelection::Properties(names) => names
                .iter()
                .map(|name| self.locate(class, alias, name))
                .collect::<Result<Vec<_>, _>>()?,
        };

        for l in located {
            self.add_property_column(l, target);
        }
        Ok(())
    }

    fn add_property_column(&mut self, located: Located<'a>, target: LayoutTarget) {
        let prop = located.prop;
        let column = self.column(&located);

        if prop.is_stream() {
            // the shadow cache does not keep stream payloads
            if self.namespace == Namespace::Cache {
                return;
            }
            let Some(alias_target) = self.alias_targets.get(&located.alias) else {
                return;
            };
            let source = StreamSource {
                table: alias_target.table.clone(),
                column: prop.column_name().to_string(),
                id_column: alias_target.id_column.clone(),
            };
            self.layout.push(&prop.name, ColumnCategory::StreamData(source), target);
        } else if prop.is_spatial {
            let srid = match self.namespace {
                Namespace::Primary => self.dialect.spatial_srid(&column),
                Namespace::Cache => format!("{}.{}", located.alias, prop.cache_srid_column_name()),
            };
            self.columns.push(self.dialect.spatial_text(&column));
            self.columns.push(srid);
            self.layout.push(&prop.name, ColumnCategory::SpatialInstanceData, target);
        } else {
            self.columns.push(column);
            self.layout.push(&prop.name, ColumnCategory::InstanceData, target);
        }
    }

    /// Extra trailing column outside the layout (non-instance data).
    pub(crate) fn push_column(&mut self, expression: String) {
        self.columns.push(expression);
    }

    fn join_related(
        &mut self,
        from: &'a SchemaClass,
        from_alias: &str,
        specifier: &RelatedClassSpecifier,
    ) -> Result<(&'a SchemaClass, String), QueryError> {
        if self.namespace == Namespace::Cache {
            return Err(QueryError::Unsupported(format!(
                "relationship '{}' cannot be traversed in the shadow cache",
                specifier.relationship
            )));
        }

        let schema = self.schema;
        let (_, ends) = schema.relationship(&specifier.relationship)?;
        let target = schema.require_class(&specifier.target_class)?;

        if !schema.is_a(&from.name, ends.near_end(specifier.direction)) {
            return Err(QueryError::RelationshipMismatch {
                relationship: specifier.relationship.clone(),
                class: from.name.clone(),
            });
        }
        if !schema.is_a(&target.name, ends.far_end(specifier.direction)) {
            return Err(QueryError::RelationshipMismatch {
                relationship: specifier.relationship.clone(),
                class: target.name.clone(),
            });
        }

        let key = JoinKey::Related {
            from: from_alias.to_string(),
            specifier: specifier.clone(),
        };
        if let Some(alias) = self.join_aliases.get(&key) {
            return Ok((target, alias.clone()));
        }

        let table = target.table()?.to_string();
        let alias = self.next_alias();
        let on = match specifier.direction {
            RelationshipDirection::Forward => format!(
                "{}.{} = {}.{}",
                from_alias, ends.container_key, alias, ends.contained_key
            ),
            RelationshipDirection::Backward => format!(
                "{}.{} = {}.{}",
                alias, ends.container_key, from_alias, ends.contained_key
            ),
        };
        self.push_join(key, table, alias.clone(), target.id_column(), on);
        Ok((target, alias))
    }

    pub(crate) fn select_related(&mut self, spec: &RelatedInstanceSpec) -> Result<(), QueryError> {
        let index = self.layout.related.len();
        let (target, alias) = self.join_related(self.root, ROOT_ALIAS, &spec.specifier)?;

        self.columns.push(format!("{}.{}", alias, target.id_column()));
        self.layout.push(
            &spec.specifier.relationship,
            ColumnCategory::RelatedInstanceId,
            LayoutTarget::Related(index),
        );
        self.layout.related.push(RelatedLayout {
            relationship: spec.specifier.relationship.clone(),
            direction: spec.specifier.direction,
            class_name: target.name.clone(),
        });
        self.select(target, &alias, &spec.selection, LayoutTarget::Related(index))
    }

    /// Render a criteria tree to SQL, registering every literal in the
    /// parameter map in textual order.
    pub(crate) fn render(
        &mut self,
        node: &CriteriaNode,
        class: &'a SchemaClass,
        alias: &str,
    ) -> Result<String, QueryError> {
        match node {
            CriteriaNode::PropertyComparison {
                property,
                operator,
                value,
            } => {
                let located = self.locate(class, alias, property)?;
                if !located.prop.is_filterable() {
                    return Err(QueryError::UnfilterableProperty {
                        class: class.name.clone(),
                        property: property.clone(),
                    });
                }
                let column = self.column(&located);
                match (value, operator) {
                    (Value::Null, ComparisonOperator::Eq) => Ok(format!("{} IS NULL", column)),
                    (Value::Null, ComparisonOperator::Ne) => Ok(format!("{} IS NOT NULL", column)),
                    (Value::Null, op) => Err(QueryError::Unsupported(format!(
                        "'{}' cannot be compared to NULL with {}",
                        property,
                        op.as_sql()
                    ))),
                    _ => {
                        let placeholder = self.params.push(value.clone(), located.prop.primitive_type);
                        Ok(format!("{} {} {}", column, operator.as_sql(), placeholder))
                    }
                }
            }
            CriteriaNode::InstanceIdComparison { id } => {
                let placeholder = self.params.push(Value::string(id.as_str()), PrimitiveType::String);
                if alias == ROOT_ALIAS {
                    self.order_by_id = true;
                }
                Ok(format!("{}.{} = {}", alias, self.id_column(class), placeholder))
            }
            CriteriaNode::RelatedCriterion { specifier, nested } => {
                let (target, related_alias) = self.join_related(class, alias, specifier)?;
                self.render(nested, target, &related_alias)
            }
            CriteriaNode::Composite(composite) => {
                composite.validate()?;
                let mut sql = String::from("(");
                for (i, child) in composite.children.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(&format!(" {} ", composite.operators[i - 1]));
                    }
                    sql.push_str(&self.render(child, class, alias)?);
                }
                sql.push(')');
                Ok(sql)
            }
        }
    }

    pub(crate) fn add_criteria(&mut self, node: &CriteriaNode) -> Result<(), QueryError> {
        let root = self.root;
        let sql = self.render(node, root, ROOT_ALIAS)?;
        self.predicates.push(sql);
        Ok(())
    }

    pub(crate) fn add_predicate(&mut self, predicate: String) {
        self.predicates.push(predicate);
    }

    /// Register a value in the shared map and return its placeholder.
    pub(crate) fn bind(&mut self, value: Value, declared_type: PrimitiveType) -> String {
        self.params.push(value, declared_type)
    }

    pub(crate) fn add_spatial_filter(&mut self, filter: &SpatialFilter) -> Result<(), QueryError> {
        let root = self.root;
        let property = match &filter.property {
            Some(name) => name.clone(),
            None => self
                .schema
                .spatial_property(&root.name)?
                .map(|p| p.name.clone())
                .ok_or_else(|| QueryError::NoSpatialProperty(root.name.clone()))?,
        };

        let located = self.locate(root, ROOT_ALIAS, &property)?;
        if !located.prop.is_spatial {
            return Err(QueryError::NoSpatialProperty(root.name.clone()));
        }
        let column = self.column(&located);
        self.predicates
            .push(self.dialect.spatial_intersects(&column, &filter.polygon));
        Ok(())
    }

    fn from_clause(&self) -> String {
        let joins = self
            .joins
            .iter()
            .map(|j| format!(" LEFT JOIN {} {} ON {}", j.table, j.alias, j.on))
            .join("");
        format!("FROM {} {}{}", self.root_table, ROOT_ALIAS, joins)
    }

    fn where_clause(&self) -> String {
        if self.predicates.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.predicates.join(" AND "))
        }
    }

    pub(crate) fn select_sql(&self, page: Option<Page>) -> String {
        let mut sql = format!(
            "SELECT {} {}{}",
            self.columns.join(", "),
            self.from_clause(),
            self.where_clause()
        );
        if self.order_by_id || (page.is_some() && self.dialect.pagination_requires_order()) {
            sql.push_str(&format!(" ORDER BY {} ASC", self.root_id_column()));
        }
        if let Some(page) = page {
            sql.push(' ');
            sql.push_str(&self.dialect.pagination(page.start, page.size));
        }
        sql.push(';');
        sql
    }

    pub(crate) fn count_sql(&self) -> String {
        format!("SELECT COUNT(*) {}{};", self.from_clause(), self.where_clause())
    }

    pub(crate) fn into_parts(self) -> (RowLayout, ParamNameValueMap) {
        (self.layout, self.params)
    }
}

/// Turns a [`Query`] into dialect SQL plus the row layout needed to read the
/// result back.
pub struct QueryConverter<'a> {
    schema: &'a Schema,
    dialect: &'a dyn SqlDialect,
    settings: &'a QuerySettings,
}

impl<'a> QueryConverter<'a> {
    pub fn new(schema: &'a Schema, dialect: &'a dyn SqlDialect, settings: &'a QuerySettings) -> Self {
        Self {
            schema,
            dialect,
            settings,
        }
    }

    pub fn compile(
        &self,
        query: &Query,
        spatial_filter: Option<&SpatialFilter>,
        count_only: bool,
    ) -> Result<CompiledQuery, QueryError> {
        let mut assembly = SqlAssembly::new(
            self.schema,
            self.dialect,
            Namespace::Primary,
            &query.class,
            self.dialect.new_params(),
        )?;

        if query.polymorphic {
            assembly.join_polymorphic_base();
        }
        let root = assembly.root();
        assembly.select(root, ROOT_ALIAS, &query.selection, LayoutTarget::Instance)?;
        for spec in &query.related {
            assembly.select_related(spec)?;
        }

        let spatial = match spatial_filter {
            Some(filter) => Some(filter.clone()),
            None => self.spatial_filter_from_params(query)?,
        };
        if let Some(filter) = &spatial {
            assembly.add_spatial_filter(filter)?;
        }
        if let Some(criteria) = &query.where_clause {
            assembly.add_criteria(criteria)?;
        }

        let count_sql = assembly.count_sql();
        let (sql, count_sql) = if count_only {
            (count_sql, None)
        } else {
            (assembly.select_sql(self.page(&query.extended)), Some(count_sql))
        };
        debug!("compiled {} query on {}: {}", self.dialect.name(), query.class, sql);

        let (layout, params) = assembly.into_parts();
        Ok(CompiledQuery {
            class_name: query.class.clone(),
            sql,
            count_sql,
            layout,
            params,
        })
    }

    /// A polygon riding in the extended params. It is always validated, but
    /// only applied for spatial-capable sources.
    fn spatial_filter_from_params(&self, query: &Query) -> Result<Option<SpatialFilter>, QueryError> {
        let Some(raw) = query.extended.polygon() else {
            return Ok(None);
        };
        let polygon = SpatialPolygon::from_json(raw, self.settings.default_srid)?;

        let source = query.extended.source();
        if !self.settings.is_spatial_source(source) {
            debug!(
                "ignoring polygon on {}: source {:?} is not spatial",
                query.class, source
            );
            return Ok(None);
        }
        Ok(Some(SpatialFilter::new(polygon)))
    }

    fn page(&self, params: &ExtendedParams) -> Option<Page> {
        let (start, size) = (params.page_start(), params.page_size());
        if start.is_none() && size.is_none() {
            return None;
        }
        Some(Page {
            start: start.unwrap_or(0),
            size: size
                .unwrap_or(self.settings.max_page_size)
                .min(self.settings.max_page_size),
        })
    }
}

/// Free-function form of [`QueryConverter::compile`].
pub fn compile(
    query: &Query,
    settings: &QuerySettings,
    dialect: &dyn SqlDialect,
    spatial_filter: Option<&SpatialFilter>,
    schema: &Schema,
    count_only: bool,
) -> Result<CompiledQuery, QueryError> {
    QueryConverter::new(schema, dialect, settings).compile(query, spatial_filter, count_only)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CompositeCriteria, PARAM_PAGE_SIZE, PARAM_PAGE_START, PARAM_POLYGON, PARAM_SOURCE};
    use crate::query::dialect::{PostgresDialect, SqlServerDialect};
    use crate::test_support::catalog_schema;
    use serde_json::json;

    fn has_source() -> RelatedClassSpecifier {
        RelatedClassSpecifier::new(
            "SpatialEntityHasDataSource",
            RelationshipDirection::Forward,
            "SpatialDataSource",
        )
    }

    #[test]
    fn test_id_round_trip() {
        let schema = catalog_schema();
        let settings = QuerySettings::default();
        let query = Query::new("SpatialEntity")
            .select(["Resolution", "Date"])
            .filter(CriteriaNode::id("1"));

        let compiled = compile(&query, &settings, &SqlServerDialect, None, &schema, false).unwrap();

        assert_eq!(
            compiled.sql,
            "SELECT tab0.Id, tab0.Resolution, tab0.Date FROM SpatialEntities tab0 \
             WHERE tab0.Id = @param0 ORDER BY tab0.Id ASC;"
        );
        assert_eq!(compiled.params.len(), 1);
        assert_eq!(compiled.params.get("@param0").unwrap().value, Value::string("1"));
        assert_eq!(
            compiled.layout.categories(),
            vec![&ColumnCategory::InstanceData, &ColumnCategory::InstanceData]
        );
        assert_eq!(
            compiled.count_sql.as_deref(),
            Some("SELECT COUNT(*) FROM SpatialEntities tab0 WHERE tab0.Id = @param0;")
        );
    }

    #[test]
    fn test_composite_is_fully_parenthesized_in_order() {
        let schema = catalog_schema();
        let settings = QuerySettings::default();
        let inner = CompositeCriteria::start(CriteriaNode::id("a")).or(CriteriaNode::id("b"));
        let tail = CompositeCriteria::start(CriteriaNode::id("c"));
        let criteria = CompositeCriteria::start(inner.into()).and(tail.into());
        let query = Query::new("SpatialEntity").select(["Resolution"]).filter(criteria);

        let compiled = compile(&query, &settings, &SqlServerDialect, None, &schema, false).unwrap();

        assert!(compiled
            .sql
            .contains("WHERE ((tab0.Id = @param0 OR tab0.Id = @param1) AND (tab0.Id = @param2))"));
        let values: Vec<_> = compiled.params.iter().map(|p| p.value.to_string()).collect();
        assert_eq!(values, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_polymorphic_selection_joins_base_once() {
        let schema = catalog_schema();
        let settings = QuerySettings::default();
        let query = Query::new("SpatialEntity")
            .polymorphic()
            .select(["Resolution", "Name"]);

        let compiled = compile(&query, &settings, &SqlServerDialect, None, &schema, false).unwrap();

        assert_eq!(compiled.sql.matches("LEFT JOIN").count(), 1);
        assert!(compiled
            .sql
            .contains("LEFT JOIN SpatialEntityBases tab1 ON tab0.Id = tab1.Id"));
        assert!(compiled.sql.starts_with("SELECT tab0.Id, tab0.Resolution, tab1.Name FROM"));
    }

    #[test]
    fn test_base_property_without_polymorphism_is_rejected() {
        let schema = catalog_schema();
        let settings = QuerySettings::default();
        let query = Query::new("SpatialEntity").select(["Name"]);

        let err = compile(&query, &settings, &SqlServerDialect, None, &schema, false).unwrap_err();
        assert_eq!(
            err,
            QueryError::PolymorphismRequired {
                property: "Name".to_string(),
                base: "SpatialEntityBase".to_string()
            }
        );

        // selecting everything silently skips what is not reachable
        let all = compile(&Query::new("SpatialEntity"), &settings, &SqlServerDialect, None, &schema, false).unwrap();
        assert!(!all.sql.contains("Name"));
    }

    #[test]
    fn test_all_selection_layout_covers_spatial_and_stream() {
        let schema = catalog_schema();
        let settings = QuerySettings::default();

        let compiled = compile(&Query::new("SpatialEntity"), &settings, &SqlServerDialect, None, &schema, false)
            .unwrap();

        assert!(compiled.sql.starts_with(
            "SELECT tab0.Id, tab0.Footprint.STAsText(), tab0.Footprint.STSrid, tab0.Resolution, tab0.Date FROM"
        ));
        assert_eq!(compiled.layout.physical_columns(), 5);
        assert_eq!(
            compiled.layout.entries[3].category,
            ColumnCategory::StreamData(StreamSource {
                table: "SpatialEntities".to_string(),
                column: "ThumbnailData".to_string(),
                id_column: "Id".to_string(),
            })
        );
    }

    #[test]
    fn test_related_spec_and_criterion_share_alias() {
        let schema = catalog_schema();
        let settings = QuerySettings::default();
        let query = Query::new("SpatialEntity")
            .select(["Resolution"])
            .with_related(has_source(), PropertySelection::of(["MainURL"]))
            .filter(CriteriaNode::related(
                has_source(),
                CriteriaNode::property("DataSourceType", ComparisonOperator::Eq, "tif"),
            ));

        let compiled = compile(&query, &settings, &PostgresDialect, None, &schema, false).unwrap();

        assert_eq!(
            compiled.sql,
            "SELECT tab0.Id, tab0.Resolution, tab1.Id, tab1.MainURL FROM SpatialEntities tab0 \
             LEFT JOIN SpatialDataSources tab1 ON tab0.Id = tab1.SpatialEntityId \
             WHERE tab1.DataSourceType = $1;"
        );
        assert_eq!(compiled.layout.related.len(), 1);
        assert_eq!(compiled.layout.entries[1].target, LayoutTarget::Related(0));
        assert_eq!(compiled.layout.entries[1].category, ColumnCategory::RelatedInstanceId);
    }

    #[test]
    fn test_backward_relationship_swaps_keys() {
        let schema = catalog_schema();
        let settings = QuerySettings::default();
        let back = RelatedClassSpecifier::new(
            "SpatialEntityHasDataSource",
            RelationshipDirection::Backward,
            "SpatialEntity",
        );
        let query = Query::new("SpatialDataSource")
            .select(["MainURL"])
            .filter(CriteriaNode::related(
                back,
                CriteriaNode::property("Resolution", ComparisonOperator::Eq, "10m"),
            ));

        let compiled = compile(&query, &settings, &SqlServerDialect, None, &schema, false).unwrap();
        assert!(compiled
            .sql
            .contains("LEFT JOIN SpatialEntities tab1 ON tab1.Id = tab0.SpatialEntityId"));
    }

    #[test]
    fn test_relationship_endpoint_mismatch() {
        let schema = catalog_schema();
        let settings = QuerySettings::default();
        let query = Query::new("SpatialDataSource").with_related(has_source(), PropertySelection::All);

        let err = compile(&query, &settings, &SqlServerDialect, None, &schema, false).unwrap_err();
        assert!(matches!(err, QueryError::RelationshipMismatch { .. }));
    }

    #[test]
    fn test_polygon_param_becomes_spatial_predicate() {
        let schema = catalog_schema();
        let settings = QuerySettings {
            spatial_sources: vec!["USGS".to_string()],
            ..QuerySettings::default()
        };
        let polygon = json!({"points": [[0, 0], [1, 0], [1, 1]], "coordinate_system": "4326"});
        let query = Query::new("SpatialEntity")
            .select(["Resolution"])
            .with_param(PARAM_SOURCE, json!("usgs"))
            .with_param(PARAM_POLYGON, polygon.clone());

        let compiled = compile(&query, &settings, &SqlServerDialect, None, &schema, false).unwrap();
        assert!(compiled.sql.contains(
            "WHERE tab0.Footprint.STIntersects(geometry::STGeomFromText('POLYGON((0 0, 1 0, 1 1, 0 0))', 4326)) = 'true'"
        ));
        assert!(compiled.params.is_empty());

        let other = query.clone().with_param(PARAM_SOURCE, json!("Landsat"));
        let compiled = compile(&other, &settings, &SqlServerDialect, None, &schema, false).unwrap();
        assert!(!compiled.sql.contains("STIntersects"));
    }

    #[test]
    fn test_invalid_polygon_fails_before_execution() {
        let schema = catalog_schema();
        let settings = QuerySettings::default();
        let query = Query::new("SpatialEntity")
            .with_param(PARAM_POLYGON, json!({"points": [[0, 0], [1, 1]], "coordinate_system": "4326"}));

        let err = compile(&query, &settings, &SqlServerDialect, None, &schema, false).unwrap_err();
        assert!(matches!(err, QueryError::InvalidPolygon(_)));
    }

    #[test]
    fn test_explicit_filter_on_postgres() {
        let schema = catalog_schema();
        let settings = QuerySettings::default();
        let polygon = SpatialPolygon::from_ewkt("SRID=4326;POLYGON((0 0, 2 0, 2 2, 0 0))", 4326).unwrap();
        let query = Query::new("SpatialEntity").select(["Footprint"]);

        let compiled = compile(
            &query,
            &settings,
            &PostgresDialect,
            Some(&SpatialFilter::new(polygon).on("Footprint")),
            &schema,
            false,
        )
        .unwrap();

        assert_eq!(
            compiled.sql,
            "SELECT tab0.Id, ST_AsText(tab0.Footprint), ST_SRID(tab0.Footprint) FROM SpatialEntities tab0 \
             WHERE ST_Intersects(tab0.Footprint, ST_GeomFromText('POLYGON((0 0, 2 0, 2 2, 0 0))', 4326));"
        );
    }

    #[test]
    fn test_unfilterable_properties() {
        let schema = catalog_schema();
        let settings = QuerySettings::default();

        for property in ["Footprint", "Thumbnail"] {
            let query = Query::new("SpatialEntity")
                .filter(CriteriaNode::property(property, ComparisonOperator::Eq, "x"));
            let err = compile(&query, &settings, &SqlServerDialect, None, &schema, false).unwrap_err();
            assert!(matches!(err, QueryError::UnfilterableProperty { .. }), "{}", property);
        }
    }

    #[test]
    fn test_unknown_names_are_reported() {
        let schema = catalog_schema();
        let settings = QuerySettings::default();

        let err = compile(&Query::new("Nope"), &settings, &SqlServerDialect, None, &schema, false).unwrap_err();
        assert_eq!(err, QueryError::UnknownClass("Nope".to_string()));

        let query = Query::new("SpatialEntity").select(["Colour"]);
        let err = compile(&query, &settings, &SqlServerDialect, None, &schema, false).unwrap_err();
        assert!(matches!(err, QueryError::UnknownProperty { .. }));
    }

    #[test]
    fn test_paging_and_count_only() {
        let schema = catalog_schema();
        let settings = QuerySettings {
            max_page_size: 50,
            ..QuerySettings::default()
        };
        let query = Query::new("SpatialDataSource")
            .select(["MainURL"])
            .filter(CriteriaNode::property("FileSize", ComparisonOperator::Gt, 10i64))
            .with_param(PARAM_PAGE_START, json!(100))
            .with_param(PARAM_PAGE_SIZE, json!("500"));

        let mssql = compile(&query, &settings, &SqlServerDialect, None, &schema, false).unwrap();
        assert!(mssql
            .sql
            .ends_with("ORDER BY tab0.Id ASC OFFSET 100 ROWS FETCH NEXT 50 ROWS ONLY;"));
        assert_eq!(mssql.params.get("@param0").unwrap().declared_type, PrimitiveType::Long);

        let pg = compile(&query, &settings, &PostgresDialect, None, &schema, false).unwrap();
        assert!(pg.sql.ends_with("WHERE tab0.FileSize > $1 LIMIT 50 OFFSET 100;"));

        let count = compile(&query, &settings, &PostgresDialect, None, &schema, true).unwrap();
        assert_eq!(
            count.sql,
            "SELECT COUNT(*) FROM SpatialDataSources tab0 WHERE tab0.FileSize > $1;"
        );
        assert!(count.count_sql.is_none());
        assert_eq!(count.params.len(), 1);
    }

    #[test]
    fn test_null_comparison_is_not_parameterized() {
        let schema = catalog_schema();
        let settings = QuerySettings::default();
        let query = Query::new("SpatialDataSource")
            .select(["MainURL"])
            .filter(CriteriaNode::property("MainURL", ComparisonOperator::Eq, Value::Null));

        let compiled = compile(&query, &settings, &SqlServerDialect, None, &schema, false).unwrap();
        assert!(compiled.sql.contains("WHERE tab0.MainURL IS NULL"));
        assert!(compiled.params.is_empty());
    }
}
