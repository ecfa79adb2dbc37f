use crate::model::{Instance, SpatialPolygon, SpatialValue, Value};
use crate::provider::{Extractor, RawRecord};
use log::warn;
use std::sync::Arc;

/// Where a record keeps its footprint and which SRID it is expressed in.
#[derive(Debug, Clone, PartialEq)]
pub struct FootprintMapping {
    pub property: String,
    pub pointer: String,
    pub srid: i32,
}

/// Maps provider records onto instances of one class.
///
/// Properties are read with JSON pointers; an optional [`Extractor`] fills
/// the title, date and resolution properties.
#[derive(Clone)]
pub struct RecordAdapter {
    class_name: String,
    id_pointer: String,
    properties: Vec<(String, String)>,
    footprint: Option<FootprintMapping>,
    extractor: Option<Arc<dyn Extractor>>,
    title_property: String,
    date_property: String,
    resolution_property: String,
}

impl RecordAdapter {
    pub fn new(class_name: impl Into<String>, id_pointer: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            id_pointer: id_pointer.into(),
            properties: Vec::new(),
            footprint: None,
            extractor: None,
            title_property: "Name".to_string(),
            date_property: "Date".to_string(),
            resolution_property: "Resolution".to_string(),
        }
    }

    pub fn map(mut self, property: impl Into<String>, pointer: impl Into<String>) -> Self {
        self.properties.push((property.into(), pointer.into()));
        self
    }

    pub fn footprint(mut self, property: impl Into<String>, pointer: impl Into<String>, srid: i32) -> Self {
        self.footprint = Some(FootprintMapping {
            property: property.into(),
            pointer: pointer.into(),
            srid,
        });
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// `None` when the record has no usable id.
    pub fn adapt(&self, record: &RawRecord) -> Option<Instance> {
        let id = match record.pointer(&self.id_pointer) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => {
                warn!("{} record without id at {}", self.class_name, self.id_pointer);
                return None;
            }
        };
        let mut instance = Instance::new(&self.class_name, id);

        for (property, pointer) in &self.properties {
            let value = record.pointer(pointer).map(json_to_value).unwrap_or(Value::Null);
            instance.set(property, value.into());
        }

        if let Some(mapping) = &self.footprint {
            let footprint = record
                .pointer(&mapping.pointer)
                .and_then(|raw| footprint_value(raw, mapping.srid));
            match footprint {
                Some(geometry) => instance.set(&mapping.property, Value::String(geometry.to_string()).into()),
                None => warn!("{} {} has no readable footprint", self.class_name, instance.id),
            }
        }

        if let Some(extractor) = &self.extractor {
            let fields = extractor.extract_title_date_and_resolution(record);
            if let Some(title) = fields.title {
                instance.set(&self.title_property, Value::String(title).into());
            }
            if let Some(date) = fields.date {
                instance.set(&self.date_property, Value::DateTime(date).into());
            }
            if let Some(resolution) = fields.resolution {
                instance.set(&self.resolution_property, Value::String(resolution).into());
            }
            if let Some(meters) = fields.resolution_in_meters {
                instance.set_extended("ResolutionInMeters", serde_json::json!(meters));
            }
        }
        Some(instance)
    }

    pub fn adapt_all(&self, records: &[RawRecord]) -> Vec<Instance> {
        records.iter().filter_map(|r| self.adapt(r)).collect()
    }
}

fn json_to_value(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Long(i),
            None => n.as_f64().map(Value::Double).unwrap_or(Value::Null),
        },
        serde_json::Value::String(s) => Value::String(s.clone()),
        other => Value::String(other.to_string()),
    }
}

// Either geometry text or a ring of [x, y] points.
fn footprint_value(raw: &serde_json::Value, srid: i32) -> Option<SpatialValue> {
    match raw {
        serde_json::Value::String(text) => SpatialValue::parse(text, srid).ok(),
        serde_json::Value::Array(_) => {
            let polygon = SpatialPolygon::from_json(&serde_json::json!({ "points": raw, "srid": srid }), srid).ok()?;
            Some(SpatialValue::new(polygon.to_wkt(), polygon.srid))
        }
        _ => None,
    }
}
