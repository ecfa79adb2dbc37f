use crate::cache::freshness::{apply_completeness, retain_fresh, CachePolicy};
use crate::cache::mimic::{replace_condition, CacheScope, DeleteFactory, Mimic};
use crate::error::{CacheError, QueryError};
use crate::model::{
    aspect_complete_key, aspect_created_key, CriteriaNode, Id, Instance, ParamNameValueMap, PropertySelection, Schema,
    SchemaClass, SpatialPolygon, SqlStatement, Value, COMPLETE, DATE_CACHE_CREATED,
};
use crate::provider::{fetch_all, DataProvider, RecordAdapter};
use crate::query::{NonInstanceColumn, SqlDialect};
use crate::store::{DbQuerier, SqlExecutor};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Reads and writes one source's slice of the shadow cache.
///
/// Writes are staged with `prepare_cache_insert` / `prepare_cache_replace`
/// and only reach the database on `flush_prepared_inserts`. A manager belongs
/// to a single session.
///
/// One row may be staged several times before a flush, typically once per
/// aspect. Its delete is staged only the first time, and later stagings add
/// their aspect columns onto the row the first one inserted.
pub struct CacheManager {
    executor: Arc<dyn SqlExecutor>,
    schema: Arc<Schema>,
    dialect: Arc<dyn SqlDialect>,
    source: String,
    policy: CachePolicy,
    default_srid: i32,
    pending: Vec<SqlStatement>,
    // (class, id) rows whose delete is already staged
    replaced: HashSet<(String, Id)>,
    session: Uuid,
}

/// Extended-data columns read alongside every cached row.
fn cache_columns(class: &SchemaClass) -> Vec<NonInstanceColumn> {
    let mut columns = vec![NonInstanceColumn::new(
        class.mapping.cache_created_column.as_str(),
        DATE_CACHE_CREATED,
    )];
    for aspect in &class.mapping.aspects {
        columns.push(NonInstanceColumn::same(&aspect_complete_key(aspect)));
        columns.push(NonInstanceColumn::same(&aspect_created_key(aspect)));
    }
    columns
}

/// The two metadata columns that mark `aspect` as freshly and fully cached.
pub fn aspect_columns(aspect: &str, now: DateTime<Utc>) -> Vec<(String, Value)> {
    vec![
        (aspect_complete_key(aspect), Value::Bool(true)),
        (aspect_created_key(aspect), Value::DateTime(now)),
    ]
}

impl CacheManager {
    pub fn new(
        executor: Arc<dyn SqlExecutor>,
        schema: Arc<Schema>,
        dialect: Arc<dyn SqlDialect>,
        source: impl Into<String>,
        policy: CachePolicy,
        default_srid: i32,
    ) -> Self {
        let session = Uuid::new_v4();
        let source = source.into();
        debug!("cache session {} opened for {}", session, source);
        Self {
            executor,
            schema,
            dialect,
            source,
            policy,
            default_srid,
            pending: Vec::new(),
            replaced: HashSet::new(),
            session,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Statements staged but not yet flushed.
    pub fn pending_statements(&self) -> &[SqlStatement] {
        &self.pending
    }

    fn mimic(&self) -> Mimic<'_> {
        Mimic::new(&self.schema, self.dialect.as_ref(), self.default_srid)
    }

    pub async fn query_instances_from_cache(
        &self,
        ids: &[Id],
        query_class: &str,
        selection: &PropertySelection,
        criteria: Option<&CriteriaNode>,
    ) -> Result<Vec<Instance>, CacheError> {
        self.query(CacheScope::Ids(ids), query_class, selection, criteria)
            .await
    }

    pub async fn query_instances_from_cache_by_polygon(
        &self,
        polygon: &SpatialPolygon,
        query_class: &str,
        selection: &PropertySelection,
        criteria: Option<&CriteriaNode>,
    ) -> Result<Vec<Instance>, CacheError> {
        self.query(CacheScope::Polygon(polygon), query_class, selection, criteria)
            .await
    }

    async fn query(
        &self,
        scope: CacheScope<'_>,
        query_class: &str,
        selection: &PropertySelection,
        criteria: Option<&CriteriaNode>,
    ) -> Result<Vec<Instance>, CacheError> {
        let class = self.schema.require_class(query_class)?;
        let columns = cache_columns(class);
        let select = self
            .mimic()
            .build_select(&self.source, scope, query_class, selection, &columns, criteria)?;

        let querier = DbQuerier::new(self.executor.as_ref(), self.dialect.as_ref());
        let rows = querier
            .execute(&select.statement, &select.layout, query_class, &select.non_instance_columns)
            .await?;
        let read = rows.len();

        let now = Utc::now();
        let mut instances = retain_fresh(rows, &self.policy, now);
        let complete = instances
            .iter_mut()
            .map(|instance| apply_completeness(instance, &class.mapping.aspects, &self.policy, now))
            .filter(|complete| *complete)
            .count();

        info!(
            "[{}] cache {} for {}: {} rows, {} fresh, {} complete",
            self.session,
            query_class,
            self.source,
            read,
            instances.len(),
            complete
        );
        Ok(instances)
    }

    /// Stage plain inserts. A row the cache already holds keeps its values;
    /// only `additional_columns` are written onto it.
    pub fn prepare_cache_insert(
        &mut self,
        instances: &[Instance],
        class_name: &str,
        additional_columns: &[(String, Value)],
    ) -> Result<(), CacheError> {
        self.prepare(instances, class_name, additional_columns, false)
    }

    /// Stage inserts that first delete the row this source holds for each id.
    pub fn prepare_cache_replace(
        &mut self,
        instances: &[Instance],
        class_name: &str,
        additional_columns: &[(String, Value)],
    ) -> Result<(), CacheError> {
        self.prepare(instances, class_name, additional_columns, true)
    }

    fn prepare(
        &mut self,
        instances: &[Instance],
        class_name: &str,
        additional_columns: &[(String, Value)],
        replace: bool,
    ) -> Result<(), CacheError> {
        if instances.is_empty() {
            return Ok(());
        }

        // A batching dialect keeps extending the last staged statement so the
        // whole session flushes as one batch with continuous numbering.
        let carried = if self.dialect.batches_statements() {
            self.pending.pop()
        } else {
            None
        };
        let seed = carried
            .as_ref()
            .map(|statement| statement.params.clone())
            .unwrap_or_else(|| self.dialect.new_params());

        let built = self.build_insert(instances, class_name, additional_columns, replace, seed);
        let mut statements = match built {
            Ok((statements, replaced)) => {
                self.replaced = replaced;
                statements
            }
            Err(e) => {
                self.pending.extend(carried);
                return Err(e.into());
            }
        };

        match (carried, statements.first_mut()) {
            (Some(carried), Some(first)) => first.sql = format!("{}\n{}", carried.sql, first.sql),
            (Some(carried), None) => self.pending.push(carried),
            _ => {}
        }
        debug!(
            "[{}] staged {} {} rows in {} statements",
            self.session,
            instances.len(),
            class_name,
            statements.len()
        );
        self.pending.extend(statements);
        Ok(())
    }

    fn build_insert(
        &self,
        instances: &[Instance],
        class_name: &str,
        additional_columns: &[(String, Value)],
        replace: bool,
        seed: ParamNameValueMap,
    ) -> Result<(Vec<SqlStatement>, HashSet<(String, Id)>), QueryError> {
        let class = self.schema.require_class(class_name)?;
        let source = self.source.as_str();
        let replaced = RefCell::new(self.replaced.clone());
        let condition = |instance: &Instance| {
            let first = replaced
                .borrow_mut()
                .insert((class_name.to_string(), instance.id.clone()));
            first.then(|| replace_condition(class, source, &instance.id))
        };
        let delete_factory: Option<DeleteFactory<'_>> = if replace { Some(&condition) } else { None };

        let statements = self.mimic().build_insert(
            source,
            instances,
            class_name,
            additional_columns,
            delete_factory,
            Utc::now(),
            seed,
        )?;
        Ok((statements, replaced.into_inner()))
    }

    /// Execute everything staged. Duplicate rows are logged and skipped; any
    /// other failure stops the flush and keeps the unexecuted statements.
    pub async fn flush_prepared_inserts(&mut self) -> Result<u64, CacheError> {
        let statements = std::mem::take(&mut self.pending);
        let mut affected = 0;

        for (i, statement) in statements.iter().enumerate() {
            match self.executor.execute(statement).await {
                Ok(rows) => affected += rows,
                Err(e) if e.is_unique_violation() => {
                    warn!("[{}] skipping duplicate cache rows: {}", self.session, e);
                }
                Err(e) => {
                    self.pending = statements[i..].to_vec();
                    return Err(e.into());
                }
            }
        }
        self.replaced.clear();
        info!(
            "[{}] flushed {} cache statements for {} ({} rows)",
            self.session,
            statements.len(),
            self.source,
            affected
        );
        Ok(affected)
    }

    /// Serve `ids` from the cache, fetching whatever is missing or incomplete
    /// from `provider` and writing it back. The result follows the order of
    /// `ids`; ids nobody knows are left out.
    pub async fn fetch_through(
        &mut self,
        ids: &[Id],
        class_name: &str,
        provider: &dyn DataProvider,
        adapter: &RecordAdapter,
        timeout: Duration,
    ) -> Result<Vec<Instance>, CacheError> {
        let cached = self
            .query_instances_from_cache(ids, class_name, &PropertySelection::All, None)
            .await?;

        let mut usable: HashMap<Id, Instance> = HashMap::new();
        let mut incomplete: HashMap<Id, Instance> = HashMap::new();
        for instance in cached {
            if instance.is_complete() {
                usable.insert(instance.id.clone(), instance);
            } else {
                incomplete.insert(instance.id.clone(), instance);
            }
        }

        let mut seen = HashSet::new();
        let missing: Vec<Id> = ids
            .iter()
            .filter(|id| !usable.contains_key(*id) && seen.insert(id.as_str()))
            .cloned()
            .collect();

        if !missing.is_empty() {
            let label = format!("{}/{}", provider.source(), class_name);
            let fetched = match fetch_all(vec![(label, provider.fetch_by_ids(&missing))], timeout).await {
                Ok(batches) => adapter.adapt_all(&batches.concat()),
                Err(e) => {
                    warn!("[{}] falling back to incomplete cache rows: {}", self.session, e);
                    Vec::new()
                }
            };
            let mut fetched: Vec<Instance> = fetched
                .into_iter()
                .filter(|instance| missing.contains(&instance.id))
                .collect();

            if !fetched.is_empty() {
                let now = Utc::now();
                let aspects = self.schema.require_class(class_name)?.mapping.aspects.clone();
                let additional: Vec<(String, Value)> = aspects
                    .iter()
                    .flat_map(|aspect| aspect_columns(aspect, now))
                    .collect();
                self.prepare_cache_replace(&fetched, class_name, &additional)?;
                self.flush_prepared_inserts().await?;

                for instance in &mut fetched {
                    instance.set_extended(DATE_CACHE_CREATED, serde_json::json!(now.to_rfc3339()));
                    instance.set_extended(COMPLETE, serde_json::Value::Bool(true));
                }
            }
            info!(
                "[{}] fetched {} of {} missing {} from {}",
                self.session,
                fetched.len(),
                missing.len(),
                class_name,
                provider.source()
            );
            usable.extend(fetched.into_iter().map(|instance| (instance.id.clone(), instance)));
        }

        Ok(ids
            .iter()
            .filter_map(|id| usable.remove(id).or_else(|| incomplete.remove(id)))
            .collect())
    }
}
