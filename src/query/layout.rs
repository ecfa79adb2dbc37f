use crate::model::RelationshipDirection;
use serde::{Deserialize, Serialize};

/// Where a lazily opened stream column lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSource {
    pub table: String,
    pub column: String,
    pub id_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnCategory {
    /// One physical column read straight into the property.
    InstanceData,
    /// Two physical columns: geometry as WKT, then its SRID.
    SpatialInstanceData,
    /// No physical column; the property becomes a stream handle.
    StreamData(StreamSource),
    /// Id of the related instance introduced by this entry.
    RelatedInstanceId,
}

impl ColumnCategory {
    pub fn width(&self) -> usize {
        match self {
            ColumnCategory::InstanceData | ColumnCategory::RelatedInstanceId => 1,
            ColumnCategory::SpatialInstanceData => 2,
            ColumnCategory::StreamData(_) => 0,
        }
    }
}

/// Which instance of the row an entry fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutTarget {
    Instance,
    /// Index into [`RowLayout::related`].
    Related(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutEntry {
    /// Property name, or the relationship name for `RelatedInstanceId`.
    pub name: String,
    pub category: ColumnCategory,
    pub target: LayoutTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedLayout {
    pub relationship: String,
    pub direction: RelationshipDirection,
    pub class_name: String,
}

/// The only contract between the compiler and the row materializer.
///
/// Physical column 0 is always the instance id; the entries follow in
/// emission order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowLayout {
    pub entries: Vec<LayoutEntry>,
    pub related: Vec<RelatedLayout>,
}

impl RowLayout {
    pub fn push(&mut self, name: impl Into<String>, category: ColumnCategory, target: LayoutTarget) {
        self.entries.push(LayoutEntry {
            name: name.into(),
            category,
            target,
        });
    }

    pub fn physical_columns(&self) -> usize {
        1 + self.entries.iter().map(|e| e.category.width()).sum::<usize>()
    }

    pub fn categories(&self) -> Vec<&ColumnCategory> {
        self.entries.iter().map(|e| &e.category).collect()
    }
}

/// A trailing column that lands in the instance's extended data rather than
/// in a property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonInstanceColumn {
    pub column: String,
    pub key: String,
}

impl NonInstanceColumn {
    pub fn new(column: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            key: key.into(),
        }
    }

    /// Column whose extended-data key is the column name itself.
    pub fn same(column: &str) -> Self {
        Self::new(column, column)
    }
}
