use crate::error::QueryError;
use crate::model::PrimitiveType;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

fn default_id_column() -> String {
    "Id".to_string()
}

fn default_source_column() -> String {
    "Source".to_string()
}

fn default_created_column() -> String {
    "DateCacheCreated".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    #[serde(rename = "type")]
    pub primitive_type: PrimitiveType,
    /// Spatial properties hold a geometry; they select as two physical
    /// columns (WKT text + SRID).
    #[serde(default)]
    pub is_spatial: bool,
    /// Column in the primary table; defaults to the property name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    /// Column in the shadow-cache table; defaults to the primary column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_srid_column: Option<String>,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, primitive_type: PrimitiveType) -> Self {
        Self {
            name: name.into(),
            primitive_type,
            is_spatial: false,
            column: None,
            cache_column: None,
            cache_srid_column: None,
        }
    }

    pub fn spatial(name: impl Into<String>) -> Self {
        Self {
            is_spatial: true,
            ..Self::new(name, PrimitiveType::String)
        }
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn with_cache_column(mut self, column: impl Into<String>) -> Self {
        self.cache_column = Some(column.into());
        self
    }

    pub fn column_name(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }

    pub fn cache_column_name(&self) -> &str {
        self.cache_column
            .as_deref()
            .unwrap_or_else(|| self.column_name())
    }

    pub fn cache_srid_column_name(&self) -> String {
        self.cache_srid_column
            .clone()
            .unwrap_or_else(|| format!("{}_SRID", self.cache_column_name()))
    }

    pub fn is_stream(&self) -> bool {
        self.primitive_type == PrimitiveType::Stream
    }

    pub fn is_filterable(&self) -> bool {
        !self.is_spatial && self.primitive_type.is_filterable()
    }
}

/// Where a class lives in the primary store and in the shadow cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMapping {
    /// Primary table. A class without a table stores its properties in the
    /// table of the derived class being queried.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_id_column: Option<String>,
    #[serde(default = "default_source_column")]
    pub cache_source_column: String,
    #[serde(default = "default_created_column")]
    pub cache_created_column: String,
    /// Independently cached slices of the class (e.g. "Metadata").
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aspects: Vec<String>,
}

impl Default for ClassMapping {
    fn default() -> Self {
        Self {
            table: None,
            id_column: default_id_column(),
            cache_table: None,
            cache_id_column: None,
            cache_source_column: default_source_column(),
            cache_created_column: default_created_column(),
            aspects: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipDirection {
    #[default]
    Forward,
    Backward,
}

/// Foreign-key description of a relationship class.
///
/// `container_key` is a column of the source class's table, `contained_key`
/// a column of the target class's table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipEnds {
    pub source: String,
    pub target: String,
    pub container_key: String,
    pub contained_key: String,
    #[serde(default)]
    pub direction: RelationshipDirection,
}

impl RelationshipEnds {
    /// The class reached when walking the relationship in `direction`.
    pub fn far_end(&self, direction: RelationshipDirection) -> &str {
        match direction {
            RelationshipDirection::Forward => &self.target,
            RelationshipDirection::Backward => &self.source,
        }
    }

    pub fn near_end(&self, direction: RelationshipDirection) -> &str {
        match direction {
            RelationshipDirection::Forward => &self.source,
            RelationshipDirection::Backward => &self.target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaClass {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_class: Option<String>,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    #[serde(default)]
    pub mapping: ClassMapping,
    /// Present only on relationship classes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<RelationshipEnds>,
    #[serde(skip)]
    property_index: HashMap<String, usize>,
}

impl SchemaClass {
    pub fn new(name: impl Into<String>, properties: Vec<PropertyDef>, mapping: ClassMapping) -> Self {
        let mut class = Self {
            name: name.into(),
            base_class: None,
            properties,
            mapping,
            relationship: None,
            property_index: HashMap::new(),
        };
        class.reindex();
        class
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base_class = Some(base.into());
        self
    }

    fn reindex(&mut self) {
        self.property_index = self
            .properties
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect();
    }

    /// Own (non-inherited) property lookup.
    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.property_index
            .get(name)
            .map(|&i| &self.properties[i])
    }

    pub fn is_relationship(&self) -> bool {
        self.relationship.is_some()
    }

    pub fn table(&self) -> Result<&str, QueryError> {
        self.mapping
            .table
            .as_deref()
            .ok_or_else(|| QueryError::UnmappedClass(self.name.clone()))
    }

    pub fn cache_table(&self) -> Result<&str, QueryError> {
        self.mapping
            .cache_table
            .as_deref()
            .ok_or_else(|| QueryError::UnmappedCacheClass(self.name.clone()))
    }

    pub fn id_column(&self) -> &str {
        &self.mapping.id_column
    }

    pub fn cache_id_column(&self) -> &str {
        self.mapping
            .cache_id_column
            .as_deref()
            .unwrap_or(&self.mapping.id_column)
    }
}

/// Serialized form of a schema; validated into [`Schema`] on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDocument {
    pub name: String,
    pub classes: Vec<SchemaClass>,
}

/// Immutable, shareable description of every class known to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "SchemaDocument", into = "SchemaDocument")]
pub struct Schema {
    pub name: String,
    classes: Vec<SchemaClass>,
    class_index: HashMap<String, usize>,
}

impl TryFrom<SchemaDocument> for Schema {
    type Error = QueryError;

    fn try_from(doc: SchemaDocument) -> Result<Self, Self::Error> {
        Schema::new(doc.name, doc.classes)
    }
}

impl From<Schema> for SchemaDocument {
    fn from(schema: Schema) -> Self {
        SchemaDocument {
            name: schema.name,
            classes: schema.classes,
        }
    }
}

impl Schema {
    pub fn new(name: impl Into<String>, mut classes: Vec<SchemaClass>) -> Result<Self, QueryError> {
        let mut class_index = HashMap::new();
        for (i, class) in classes.iter_mut().enumerate() {
            class.reindex();
            if class_index.insert(class.name.clone(), i).is_some() {
                return Err(QueryError::InvalidSchema(format!(
                    "class '{}' is defined twice",
                    class.name
                )));
            }
        }

        let schema = Self {
            name: name.into(),
            classes,
            class_index,
        };
        schema.validate()?;
        Ok(schema)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn validate(&self) -> Result<(), QueryError> {
        for class in &self.classes {
            // Walk the base chain; a revisit means a cycle.
            let mut seen = HashSet::new();
            let mut current = class;
            while let Some(base) = &current.base_class {
                if !seen.insert(current.name.as_str()) {
                    return Err(QueryError::InvalidSchema(format!(
                        "inheritance cycle through '{}'",
                        class.name
                    )));
                }
                current = self.class(base).ok_or_else(|| {
                    QueryError::InvalidSchema(format!(
                        "base class '{}' of '{}' does not exist",
                        base, current.name
                    ))
                })?;
            }

            if let Some(ends) = &class.relationship {
                for end in [&ends.source, &ends.target] {
                    if self.class(end).is_none() {
                        return Err(QueryError::InvalidSchema(format!(
                            "relationship '{}' references unknown class '{}'",
                            class.name, end
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn classes(&self) -> &[SchemaClass] {
        &self.classes
    }

    pub fn class(&self, name: &str) -> Option<&SchemaClass> {
        self.class_index.get(name).map(|&i| &self.classes[i])
    }

    pub fn require_class(&self, name: &str) -> Result<&SchemaClass, QueryError> {
        self.class(name)
            .ok_or_else(|| QueryError::UnknownClass(name.to_string()))
    }

    pub fn base_of(&self, class: &SchemaClass) -> Option<&SchemaClass> {
        class.base_class.as_deref().and_then(|b| self.class(b))
    }

    /// True when `class` is `ancestor` or derives from it.
    pub fn is_a(&self, class: &str, ancestor: &str) -> bool {
        let mut current = self.class(class);
        while let Some(c) = current {
            if c.name == ancestor {
                return true;
            }
            current = self.base_of(c);
        }
        false
    }

    /// Find a property on the class or anywhere up its base chain, returning
    /// the class that declares it.
    pub fn resolve_property(
        &self,
        class_name: &str,
        property: &str,
    ) -> Result<(&SchemaClass, &PropertyDef), QueryError> {
        let mut current = Some(self.require_class(class_name)?);
        while let Some(class) = current {
            if let Some(prop) = class.property(property) {
                return Ok((class, prop));
            }
            current = self.base_of(class);
        }
        Err(QueryError::UnknownProperty {
            class: class_name.to_string(),
            property: property.to_string(),
        })
    }

    /// Every property visible on the class, inherited ones first.
    pub fn all_properties(
        &self,
        class_name: &str,
    ) -> Result<Vec<(&SchemaClass, &PropertyDef)>, QueryError> {
        let mut chain = Vec::new();
        let mut current = Some(self.require_class(class_name)?);
        while let Some(class) = current {
            chain.push(class);
            current = self.base_of(class);
        }

        Ok(chain
            .into_iter()
            .rev()
            .flat_map(|class| class.properties.iter().map(move |p| (class, p)))
            .collect())
    }

    pub fn spatial_property(&self, class_name: &str) -> Result<Option<&PropertyDef>, QueryError> {
        Ok(self
            .all_properties(class_name)?
            .into_iter()
            .map(|(_, p)| p)
            .find(|p| p.is_spatial))
    }

    pub fn relationship(&self, name: &str) -> Result<(&SchemaClass, &RelationshipEnds), QueryError> {
        let class = self
            .class(name)
            .ok_or_else(|| QueryError::UnknownRelationship(name.to_string()))?;
        let ends = class
            .relationship
            .as_ref()
            .ok_or_else(|| QueryError::UnknownRelationship(name.to_string()))?;
        Ok((class, ends))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::catalog_schema;

    #[test]
    fn test_resolve_inherited_property() {
        let schema = catalog_schema();

        let (owner, prop) = schema.resolve_property("SpatialEntity", "Name").unwrap();
        assert_eq!(owner.name, "SpatialEntityBase");
        assert_eq!(prop.primitive_type, PrimitiveType::String);

        let (owner, prop) = schema.resolve_property("SpatialEntity", "Footprint").unwrap();
        assert_eq!(owner.name, "SpatialEntity");
        assert!(prop.is_spatial);
        assert_eq!(prop.cache_srid_column_name(), "Footprint_SRID");

        let err = schema.resolve_property("SpatialEntity", "Nope").unwrap_err();
        assert!(matches!(err, QueryError::UnknownProperty { .. }));
    }

    #[test]
    fn test_all_properties_lists_base_first() {
        let schema = catalog_schema();
        let names: Vec<_> = schema
            .all_properties("SpatialEntity")
            .unwrap()
            .into_iter()
            .map(|(_, p)| p.name.as_str())
            .collect();

        assert_eq!(names[0], "Name");
        assert!(names.contains(&"Footprint"));
        assert!(schema.is_a("SpatialEntity", "SpatialEntityBase"));
        assert!(!schema.is_a("SpatialEntityBase", "SpatialEntity"));
    }

    #[test]
    fn test_schema_rejects_missing_base_class() {
        let classes = vec![
            SchemaClass::new("Orphan", Vec::new(), ClassMapping::default()).with_base("Ghost"),
        ];
        let err = Schema::new("broken", classes).unwrap_err();
        assert!(matches!(err, QueryError::InvalidSchema(_)));
    }

    #[test]
    fn test_schema_json_round_trip_keeps_index() {
        let schema = catalog_schema();
        let json = serde_json::to_string(&schema).unwrap();
        let reloaded = Schema::from_json(&json).unwrap();

        assert!(reloaded.class("SpatialDataSource").is_some());
        assert!(reloaded
            .class("SpatialDataSource")
            .unwrap()
            .property("MainURL")
            .is_some());
        let (_, ends) = reloaded.relationship("SpatialEntityHasDataSource").unwrap();
        assert_eq!(ends.far_end(RelationshipDirection::Forward), "SpatialDataSource");
    }
}
