use crate::cache::{CacheManager, CachePolicy};
use crate::error::CacheError;
use crate::model::{Id, Instance, PropertySelection, PropertyValue, Schema, Value};
use crate::query::SqlDialect;
use crate::store::SqlExecutor;
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// How a secondary source's value meets the value already on an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
    /// Any non-null secondary value wins.
    Override,
    /// Text is appended, gaps are filled, everything else stays.
    Complement,
}

/// Joins one source's cached rows onto instances obtained elsewhere.
#[async_trait::async_trait]
pub trait InstanceModifier: Send + Sync {
    async fn modify(
        &self,
        instances: &mut [Instance],
        source: &str,
        executor: Arc<dyn SqlExecutor>,
    ) -> Result<(), CacheError>;
}

/// Everything needed to read a secondary source's cache.
#[derive(Clone)]
pub struct ReconcileContext {
    pub schema: Arc<Schema>,
    pub dialect: Arc<dyn SqlDialect>,
    pub policy: CachePolicy,
    pub default_srid: i32,
}

pub struct Overrider {
    context: ReconcileContext,
}

pub struct Complement {
    context: ReconcileContext,
}

impl Overrider {
    pub fn new(context: ReconcileContext) -> Self {
        Self { context }
    }
}

impl Complement {
    pub fn new(context: ReconcileContext) -> Self {
        Self { context }
    }
}

#[async_trait::async_trait]
impl InstanceModifier for Overrider {
    async fn modify(
        &self,
        instances: &mut [Instance],
        source: &str,
        executor: Arc<dyn SqlExecutor>,
    ) -> Result<(), CacheError> {
        self.context
            .reconcile(instances, source, executor, MergeRule::Override)
            .await
    }
}

#[async_trait::async_trait]
impl InstanceModifier for Complement {
    async fn modify(
        &self,
        instances: &mut [Instance],
        source: &str,
        executor: Arc<dyn SqlExecutor>,
    ) -> Result<(), CacheError> {
        self.context
            .reconcile(instances, source, executor, MergeRule::Complement)
            .await
    }
}

type Secondaries = HashMap<(String, Id), Instance>;

impl ReconcileContext {
    pub async fn reconcile(
        &self,
        instances: &mut [Instance],
        source: &str,
        executor: Arc<dyn SqlExecutor>,
        rule: MergeRule,
    ) -> Result<(), CacheError> {
        let mut ids_by_class: BTreeMap<String, Vec<Id>> = BTreeMap::new();
        for instance in instances.iter() {
            collect_ids(instance, &mut ids_by_class);
        }

        let cache = CacheManager::new(
            executor,
            self.schema.clone(),
            self.dialect.clone(),
            source,
            self.policy,
            self.default_srid,
        );

        let mut secondaries: Secondaries = HashMap::new();
        for (class_name, ids) in &ids_by_class {
            let cached = self.schema.class(class_name).is_some_and(|c| c.mapping.cache_table.is_some());
            if !cached {
                debug!("{} has no cache table, nothing to reconcile from {}", class_name, source);
                continue;
            }
            let rows = cache
                .query_instances_from_cache(ids, class_name, &PropertySelection::All, None)
                .await?;
            secondaries.extend(rows.into_iter().map(|row| ((row.class_name.clone(), row.id.clone()), row)));
        }

        let mut changed = 0;
        for instance in instances.iter_mut() {
            changed += apply(instance, &secondaries, rule);
        }
        info!(
            "{:?} from {}: {} secondary rows, {} values changed",
            rule,
            source,
            secondaries.len(),
            changed
        );
        Ok(())
    }
}

fn collect_ids(instance: &Instance, ids_by_class: &mut BTreeMap<String, Vec<Id>>) {
    let ids = ids_by_class.entry(instance.class_name.clone()).or_default();
    if !ids.contains(&instance.id) {
        ids.push(instance.id.clone());
    }
    for edge in &instance.relationships {
        collect_ids(&edge.target, ids_by_class);
    }
}

fn apply(instance: &mut Instance, secondaries: &Secondaries, rule: MergeRule) -> usize {
    let mut changed = 0;
    if let Some(secondary) = secondaries.get(&(instance.class_name.clone(), instance.id.clone())) {
        for field in &secondary.fields {
            let PropertyValue::Literal(value) = &field.value else {
                continue;
            };
            if let Some(merged) = merge_value(rule, instance.get_literal(&field.name), value) {
                instance.set(&field.name, merged.into());
                changed += 1;
            }
        }
    }
    for edge in &mut instance.relationships {
        changed += apply(&mut edge.target, secondaries, rule);
    }
    changed
}

/// The value to store, or `None` to keep what the instance has.
pub fn merge_value(rule: MergeRule, base: Option<&Value>, secondary: &Value) -> Option<Value> {
    if secondary.is_null() {
        return None;
    }
    match rule {
        MergeRule::Override => Some(secondary.clone()),
        MergeRule::Complement => match (base, secondary) {
            (None | Some(Value::Null), _) => Some(secondary.clone()),
            (Some(Value::String(current)), Value::String(extra)) => {
                if current.is_empty() {
                    return Some(secondary.clone());
                }
                // already appended on an earlier pass
                if extra.is_empty() || current.split(", ").any(|part| part == extra) {
                    return None;
                }
                Some(Value::String(format!("{}, {}", current, extra)))
            }
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RelationshipDirection, DATE_CACHE_CREATED};
    use crate::query::PostgresDialect;
    use crate::test_support::{catalog_schema, ScriptedExecutor};
    use chrono::Utc;

    fn context() -> ReconcileContext {
        ReconcileContext {
            schema: Arc::new(catalog_schema()),
            dialect: Arc::new(PostgresDialect),
            policy: CachePolicy::default(),
            default_srid: 4326,
        }
    }

    fn secondary_row() -> Vec<Value> {
        vec![
            Value::string("ds-1"),
            Value::string("B"),
            Value::string("WMS"),
            Value::Long(9),
            Value::DateTime(Utc::now()),
        ]
    }

    fn base() -> Instance {
        Instance::new("SpatialDataSource", "ds-1")
            .with("MainURL", "A")
            .with("FileSize", 5i64)
    }

    #[tokio::test]
    async fn test_override_replaces_with_secondary() {
        let executor = Arc::new(ScriptedExecutor::returning(vec![vec![secondary_row()]]));
        let mut instances = vec![base()];

        Overrider::new(context())
            .modify(&mut instances, "usgs", executor)
            .await
            .unwrap();

        assert_eq!(instances[0].get_str("MainURL"), Some("B"));
        assert_eq!(instances[0].get_str("DataSourceType"), Some("WMS"));
        assert_eq!(instances[0].get_literal("FileSize"), Some(&Value::Long(9)));
        assert!(instances[0].extended(DATE_CACHE_CREATED).is_none());
    }

    #[tokio::test]
    async fn test_complement_appends_once() {
        let executor = Arc::new(ScriptedExecutor::returning(vec![vec![secondary_row()], vec![secondary_row()]]));
        let mut instances = vec![base()];
        let complement = Complement::new(context());

        complement.modify(&mut instances, "usgs", executor.clone()).await.unwrap();
        complement.modify(&mut instances, "usgs", executor).await.unwrap();

        assert_eq!(instances[0].get_str("MainURL"), Some("A, B"));
        assert_eq!(instances[0].get_str("DataSourceType"), Some("WMS"));
        assert_eq!(instances[0].get_literal("FileSize"), Some(&Value::Long(5)));
    }

    #[tokio::test]
    async fn test_related_instances_are_reconciled() {
        // SpatialDataSource sorts first, then SpatialEntity
        let executor = Arc::new(ScriptedExecutor::returning(vec![vec![secondary_row()], vec![]]));
        let mut entity = Instance::new("SpatialEntity", "e1");
        entity.add_related("SpatialEntityHasDataSource", RelationshipDirection::Forward, base());
        let mut instances = vec![entity];

        Overrider::new(context())
            .modify(&mut instances, "usgs", executor.clone())
            .await
            .unwrap();

        assert_eq!(instances[0].relationships[0].target.get_str("MainURL"), Some("B"));
        let recorded = executor.recorded();
        assert_eq!(recorded.len(), 2);
        assert!(recorded[0].sql.contains("FROM SpatialDataSourceCache tab0"));
        assert!(recorded[1].sql.contains("FROM SpatialEntityCache tab0"));
    }

    #[test]
    fn test_merge_rules() {
        let a = Value::string("A");
        let b = Value::string("B");
        assert_eq!(merge_value(MergeRule::Override, Some(&a), &b), Some(b.clone()));
        assert_eq!(merge_value(MergeRule::Override, Some(&a), &Value::Null), None);
        assert_eq!(merge_value(MergeRule::Complement, Some(&a), &b), Some(Value::string("A, B")));
        assert_eq!(merge_value(MergeRule::Complement, Some(&Value::string("A, B")), &b), None);
        assert_eq!(merge_value(MergeRule::Complement, None, &b), Some(b.clone()));
        assert_eq!(merge_value(MergeRule::Complement, Some(&Value::Long(1)), &Value::Long(2)), None);
    }
}
