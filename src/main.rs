use anyhow::{anyhow, bail, Context};
use clap::{ArgGroup, Parser};
use spatial_catalog_db::config::AppConfig;
use spatial_catalog_db::{
    compile, dialect_by_name, Complement, DbQuerier, InstanceModifier, Mimic, Overrider, PostgresExecutor, Query,
    ReconcileContext, Schema, SqlExecutor, SqlStatement,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Run a JSON query against the catalog and print the instances.
#[derive(Debug, Parser)]
#[command(name = "spatial-catalog", about = "Query the spatial catalog and its source caches")]
#[command(group(ArgGroup::new("reconcile").args(["override_source", "complement_source"])))]
struct Args {
    /// Path to the JSON query document
    query: PathBuf,

    /// Print the number of matching instances instead of the instances
    #[arg(long)]
    count: bool,

    /// Replace values with a source's cached values (default: cache.source)
    #[arg(long = "override", value_name = "SOURCE", num_args = 0..=1)]
    override_source: Option<Option<String>>,

    /// Append a source's cached values to the existing ones (default: cache.source)
    #[arg(long = "complement", value_name = "SOURCE", num_args = 0..=1)]
    complement_source: Option<Option<String>>,
}

#[derive(Debug, PartialEq)]
enum Reconcile {
    Override(String),
    Complement(String),
}

impl Args {
    fn reconcile(&self, default_source: &str) -> Option<Reconcile> {
        let pick = |source: &Option<String>| source.clone().unwrap_or_else(|| default_source.to_string());
        match (&self.override_source, &self.complement_source) {
            (Some(source), _) => Some(Reconcile::Override(pick(source))),
            (_, Some(source)) => Some(Reconcile::Complement(pick(source))),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    use env_logger::Builder;
    use log::{info, LevelFilter};

    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("sqlx", LevelFilter::Warn)
        .init();

    let args = Args::parse();
    let config = AppConfig::load()?;

    let schema_json = std::fs::read_to_string(config.schema_path())
        .with_context(|| format!("Failed to read schema {}", config.schema_path()))?;
    let schema = Arc::new(Schema::from_json(&schema_json)?);
    info!("Loaded schema {} with {} classes", schema.name, schema.classes().len());

    let dialect = dialect_by_name(&config.database.dialect)
        .ok_or_else(|| anyhow!("Unknown SQL dialect '{}'", config.database.dialect))?;
    if dialect.name() != "postgres" {
        bail!("Only the postgres dialect can be executed, got {}", dialect.name());
    }

    info!("Connecting to PostgreSQL...");
    let database_url = config.database_url()?;
    let executor = Arc::new(
        PostgresExecutor::new(&database_url, config.database.max_connections.unwrap_or(20)).await?,
    );

    if config.cache.create_tables {
        let mimic = Mimic::new(&schema, dialect.as_ref(), config.query.default_srid);
        for class in schema.classes().iter().filter(|c| c.mapping.cache_table.is_some()) {
            let ddl = mimic.create_table_sql(&class.name)?;
            executor.execute(&SqlStatement::new(ddl, dialect.new_params())).await?;
            info!("Cache table ready for {}", class.name);
        }
    }

    let query_json = std::fs::read_to_string(&args.query)
        .with_context(|| format!("Failed to read query {}", args.query.display()))?;
    let query: Query = serde_json::from_str(&query_json)?;
    let compiled = compile(&query, &config.query, dialect.as_ref(), None, &schema, args.count)?;

    let querier = DbQuerier::new(executor.as_ref(), dialect.as_ref());
    if args.count {
        println!("{}", querier.count(&compiled).await?);
        return Ok(());
    }

    let mut instances = querier.execute_compiled(&compiled).await?;
    info!("{} {} instances", instances.len(), compiled.class_name);

    if let Some(reconcile) = args.reconcile(&config.cache.source) {
        let context = ReconcileContext {
            schema: schema.clone(),
            dialect: dialect.clone(),
            policy: config.cache.policy(),
            default_srid: config.query.default_srid,
        };
        let (modifier, source): (Box<dyn InstanceModifier>, String) = match reconcile {
            Reconcile::Override(source) => (Box::new(Overrider::new(context)), source),
            Reconcile::Complement(source) => (Box::new(Complement::new(context)), source),
        };
        modifier.modify(&mut instances, &source, executor.clone()).await?;
    }

    println!("{}", serde_json::to_string_pretty(&instances)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconcile_source_defaults_to_configured_cache_source() {
        let args = Args::try_parse_from(["spatial-catalog", "q.json", "--complement"]).unwrap();
        assert_eq!(args.reconcile("usgs"), Some(Reconcile::Complement("usgs".to_string())));

        let args = Args::try_parse_from(["spatial-catalog", "q.json", "--override", "sciencebase"]).unwrap();
        assert_eq!(args.reconcile("usgs"), Some(Reconcile::Override("sciencebase".to_string())));

        let args = Args::try_parse_from(["spatial-catalog", "q.json", "--count"]).unwrap();
        assert!(args.count);
        assert_eq!(args.reconcile("usgs"), None);
    }

    #[test]
    fn test_override_and_complement_are_exclusive() {
        let err = Args::try_parse_from(["spatial-catalog", "q.json", "--override", "a", "--complement", "b"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
        assert!(Args::try_parse_from(["spatial-catalog"]).is_err());
    }
}
