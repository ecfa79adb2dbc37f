//! Boundary to the remote catalogs that feed the shadow cache.

pub mod adapter;
pub mod extract;
pub mod fetch;

pub use adapter::{FootprintMapping, RecordAdapter};
pub use extract::{ExtractedFields, Extractor, PointerExtractor};
pub use fetch::{fetch_all, fetch_categories, DatasetCategory};

use crate::error::FetchError;
use crate::model::{CriteriaNode, Id};

/// A record exactly as the remote catalog returned it.
pub type RawRecord = serde_json::Value;

#[async_trait::async_trait]
pub trait DataProvider: Send + Sync {
    /// Name under which this provider's rows are cached.
    fn source(&self) -> &str;

    async fn fetch_by_ids(&self, ids: &[Id]) -> Result<Vec<RawRecord>, FetchError>;

    async fn fetch_by_spatial_query(
        &self,
        polygon_wkt: &str,
        criteria: Option<&CriteriaNode>,
    ) -> Result<Vec<RawRecord>, FetchError>;

    async fn fetch_single(&self, id: &str) -> Result<Option<RawRecord>, FetchError>;
}
