use crate::error::QueryError;
use crate::model::{RelationshipDirection, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl ComparisonOperator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ComparisonOperator::Eq => "=",
            ComparisonOperator::Ne => "<>",
            ComparisonOperator::Lt => "<",
            ComparisonOperator::Le => "<=",
            ComparisonOperator::Gt => ">",
            ComparisonOperator::Ge => ">=",
            ComparisonOperator::Like => "LIKE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    And,
    Or,
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalOperator::And => write!(f, "AND"),
            LogicalOperator::Or => write!(f, "OR"),
        }
    }
}

/// Names the relationship class, the direction it is walked in, and the class
/// expected at the far end.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelatedClassSpecifier {
    pub relationship: String,
    #[serde(default)]
    pub direction: RelationshipDirection,
    pub target_class: String,
}

impl RelatedClassSpecifier {
    pub fn new(
        relationship: impl Into<String>,
        direction: RelationshipDirection,
        target_class: impl Into<String>,
    ) -> Self {
        Self {
            relationship: relationship.into(),
            direction,
            target_class: target_class.into(),
        }
    }
}

/// Children joined left to right: `operators[i]` sits between `children[i]`
/// and `children[i + 1]`, so there is no implicit AND/OR precedence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeCriteria {
    pub children: Vec<CriteriaNode>,
    pub operators: Vec<LogicalOperator>,
}

impl CompositeCriteria {
    pub fn new(
        children: Vec<CriteriaNode>,
        operators: Vec<LogicalOperator>,
    ) -> Result<Self, QueryError> {
        let composite = Self {
            children,
            operators,
        };
        composite.validate()?;
        Ok(composite)
    }

    pub fn start(first: CriteriaNode) -> Self {
        Self {
            children: vec![first],
            operators: Vec::new(),
        }
    }

    pub fn and(self, next: CriteriaNode) -> Self {
        self.push(LogicalOperator::And, next)
    }

    pub fn or(self, next: CriteriaNode) -> Self {
        self.push(LogicalOperator::Or, next)
    }

    fn push(mut self, op: LogicalOperator, next: CriteriaNode) -> Self {
        self.operators.push(op);
        self.children.push(next);
        self
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        let expected = self.children.len().saturating_sub(1);
        if self.children.is_empty() || self.operators.len() != expected {
            return Err(QueryError::MalformedComposite {
                children: self.children.len(),
                expected,
                operators: self.operators.len(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CriteriaNode {
    PropertyComparison {
        property: String,
        operator: ComparisonOperator,
        value: Value,
    },
    InstanceIdComparison {
        id: String,
    },
    RelatedCriterion {
        specifier: RelatedClassSpecifier,
        nested: Box<CriteriaNode>,
    },
    Composite(CompositeCriteria),
}

impl CriteriaNode {
    pub fn property(property: impl Into<String>, operator: ComparisonOperator, value: impl Into<Value>) -> Self {
        CriteriaNode::PropertyComparison {
            property: property.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn id(id: impl Into<String>) -> Self {
        CriteriaNode::InstanceIdComparison { id: id.into() }
    }

    pub fn related(specifier: RelatedClassSpecifier, nested: CriteriaNode) -> Self {
        CriteriaNode::RelatedCriterion {
            specifier,
            nested: Box::new(nested),
        }
    }

    /// Ids named by `InstanceIdComparison` nodes at the top level of the tree
    /// (not inside related criteria).
    pub fn instance_ids(&self) -> Vec<&str> {
        match self {
            CriteriaNode::InstanceIdComparison { id } => vec![id.as_str()],
            CriteriaNode::Composite(c) => c.children.iter().flat_map(|n| n.instance_ids()).collect(),
            _ => Vec::new(),
        }
    }
}

impl From<CompositeCriteria> for CriteriaNode {
    fn from(composite: CompositeCriteria) -> Self {
        CriteriaNode::Composite(composite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_requires_n_minus_one_operators() {
        let err = CompositeCriteria::new(
            vec![CriteriaNode::id("1"), CriteriaNode::id("2")],
            vec![],
        )
        .unwrap_err();
        assert_eq!(
            err,
            QueryError::MalformedComposite {
                children: 2,
                expected: 1,
                operators: 0
            }
        );

        let ok = CompositeCriteria::start(CriteriaNode::id("1"))
            .or(CriteriaNode::id("2"))
            .and(CriteriaNode::id("3"));
        assert!(ok.validate().is_ok());
        assert_eq!(ok.operators, vec![LogicalOperator::Or, LogicalOperator::And]);
    }

    #[test]
    fn test_criteria_deserializes_from_tagged_json() {
        let json = r#"{
            "kind": "composite",
            "children": [
                {"kind": "instance_id_comparison", "id": "7"},
                {"kind": "property_comparison", "property": "Name", "operator": "like", "value": "Mont%"}
            ],
            "operators": ["OR"]
        }"#;
        let node: CriteriaNode = serde_json::from_str(json).unwrap();
        assert_eq!(node.instance_ids(), vec!["7"]);
        match node {
            CriteriaNode::Composite(c) => {
                assert_eq!(c.operators, vec![LogicalOperator::Or]);
                assert_eq!(
                    c.children[1],
                    CriteriaNode::property("Name", ComparisonOperator::Like, "Mont%")
                );
            }
            other => panic!("expected composite, got {:?}", other),
        }
    }
}
