use crate::provider::RawRecord;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub title: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub resolution: Option<String>,
    pub resolution_in_meters: Option<f64>,
}

/// Pulls the descriptive fields out of a provider record. Malformed values
/// come back as `None` rather than an error.
pub trait Extractor: Send + Sync {
    fn extract_title_date_and_resolution(&self, record: &RawRecord) -> ExtractedFields;

    /// Variant for ScienceBase-style records, which keep their dates in a
    /// typed `dates` array.
    fn extract_date_and_resolution_sb(&self, record: &RawRecord) -> ExtractedFields {
        let mut fields = self.extract_title_date_and_resolution(record);
        fields.title = None;
        if let Some(date) = sciencebase_date(record) {
            fields.date = Some(date);
        }
        fields
    }
}

/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS`, `YYYY-MM-DD` and `YYYYMMDD`.
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.and_utc());
    }
    ["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Ground resolution in meters from text such as `"10m"`, `"0.5 m"`,
/// `"1-meter"` or `"30 cm"`. A bare number is taken as meters.
pub fn resolution_in_meters(text: &str) -> Option<f64> {
    let lower = text.trim().to_ascii_lowercase();
    let number_end = lower
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(lower.len());
    let value: f64 = lower[..number_end].parse().ok()?;
    let unit = lower[number_end..].trim_start_matches(&['-', ' '][..]);

    match unit {
        "" | "m" | "meter" | "meters" | "metre" | "metres" => Some(value),
        "cm" => Some(value / 100.0),
        "km" => Some(value * 1000.0),
        "ft" | "foot" | "feet" => Some(value * 0.3048),
        _ => None,
    }
}

// First token of a title that reads like a resolution, e.g. "NAIP 1m 2019".
fn resolution_from_title(title: &str) -> Option<(String, f64)> {
    let tokens: Vec<&str> = title.split_whitespace().collect();
    for (i, token) in tokens.iter().enumerate() {
        if let Some(meters) = resolution_in_meters(token) {
            if token.chars().any(|c| c.is_ascii_alphabetic()) {
                return Some((token.to_string(), meters));
            }
        }
        // "1 meter", "30 cm"
        if let Some(next) = tokens.get(i + 1) {
            let joined = format!("{} {}", token, next);
            if token.parse::<f64>().is_ok() {
                if let Some(meters) = resolution_in_meters(&joined) {
                    return Some((joined, meters));
                }
            }
        }
    }
    None
}

fn sciencebase_date(record: &RawRecord) -> Option<DateTime<Utc>> {
    let dates = record.get("dates")?.as_array()?;
    let by_type = |wanted: &str| {
        dates.iter().find_map(|entry| {
            let kind = entry.get("type")?.as_str()?;
            if kind.eq_ignore_ascii_case(wanted) {
                parse_date(entry.get("dateString")?.as_str()?)
            } else {
                None
            }
        })
    };
    by_type("Acquisition")
        .or_else(|| by_type("End"))
        .or_else(|| by_type("Publication"))
        .or_else(|| {
            dates
                .iter()
                .find_map(|entry| parse_date(entry.get("dateString")?.as_str()?))
        })
}

/// Extractor driven by JSON pointers into the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerExtractor {
    pub title: String,
    pub date: String,
    /// When absent the resolution is read from the title.
    #[serde(default)]
    pub resolution: Option<String>,
}

impl Default for PointerExtractor {
    fn default() -> Self {
        Self {
            title: "/title".to_string(),
            date: "/date".to_string(),
            resolution: None,
        }
    }
}

impl Extractor for PointerExtractor {
    fn extract_title_date_and_resolution(&self, record: &RawRecord) -> ExtractedFields {
        let title = record
            .pointer(&self.title)
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let date = record
            .pointer(&self.date)
            .and_then(|v| v.as_str())
            .and_then(parse_date);

        let explicit = self
            .resolution
            .as_deref()
            .and_then(|p| record.pointer(p))
            .and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(format!("{}m", n)),
                _ => None,
            });
        let (resolution, resolution_in_meters) = match explicit {
            Some(text) => {
                let meters = resolution_in_meters(&text);
                (Some(text), meters)
            }
            None => match title.as_deref().and_then(resolution_from_title) {
                Some((text, meters)) => (Some(text), Some(meters)),
                None => (None, None),
            },
        };

        ExtractedFields {
            title,
            date,
            resolution,
            resolution_in_meters,
        }
    }
}
