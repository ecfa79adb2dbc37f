use crate::model::{PrimitiveType, Value};
use serde::{Deserialize, Serialize};

/// How a dialect spells the placeholder for the n-th bound parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaceholderStyle {
    /// `@param0, @param1, ...`
    Named,
    /// `$1, $2, ...`
    Positional,
}

impl PlaceholderStyle {
    pub fn render(&self, index: usize) -> String {
        match self {
            PlaceholderStyle::Named => format!("@param{}", index),
            PlaceholderStyle::Positional => format!("${}", index + 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedParam {
    pub name: String,
    pub value: Value,
    pub declared_type: PrimitiveType,
}

/// Ordered placeholder → (value, declared type) map. Insertion order is the
/// binding order, so the generated SQL and the parameter list stay aligned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamNameValueMap {
    style: PlaceholderStyle,
    entries: Vec<TypedParam>,
}

impl ParamNameValueMap {
    pub fn new(style: PlaceholderStyle) -> Self {
        Self {
            style,
            entries: Vec::new(),
        }
    }

    pub fn style(&self) -> PlaceholderStyle {
        self.style
    }

    /// Register a value and return the placeholder to put in the SQL text.
    pub fn push(&mut self, value: Value, declared_type: PrimitiveType) -> String {
        let name = self.style.render(self.entries.len());
        self.entries.push(TypedParam {
            name: name.clone(),
            value,
            declared_type,
        });
        name
    }

    /// Register a value using its own type; `Null` binds as a string.
    pub fn push_value(&mut self, value: Value) -> String {
        let declared_type = value.primitive_type().unwrap_or(PrimitiveType::String);
        self.push(value, declared_type)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypedParam> {
        self.entries.iter()
    }

    pub fn get(&self, name: &str) -> Option<&TypedParam> {
        self.entries.iter().find(|p| p.name == name)
    }

    pub fn values(&self) -> Vec<&Value> {
        self.entries.iter().map(|p| &p.value).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlStatement {
    pub sql: String,
    pub params: ParamNameValueMap,
}

impl SqlStatement {
    pub fn new(sql: impl Into<String>, params: ParamNameValueMap) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_follow_insertion_order() {
        let mut named = ParamNameValueMap::new(PlaceholderStyle::Named);
        assert_eq!(named.push_value(Value::string("a")), "@param0");
        assert_eq!(named.push(Value::Long(4), PrimitiveType::Long), "@param1");
        assert_eq!(named.get("@param1").unwrap().declared_type, PrimitiveType::Long);

        let mut positional = ParamNameValueMap::new(PlaceholderStyle::Positional);
        assert_eq!(positional.push_value(Value::Null), "$1");
        assert_eq!(positional.push_value(Value::Bool(true)), "$2");
        assert_eq!(positional.values(), vec![&Value::Null, &Value::Bool(true)]);
    }
}
