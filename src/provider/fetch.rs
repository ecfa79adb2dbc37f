use crate::error::FetchError;
use crate::model::CriteriaNode;
use crate::provider::{DataProvider, RawRecord};
use futures_util::future::join_all;
use itertools::Itertools;
use log::{debug, warn};
use std::future::Future;
use std::time::Duration;

/// One independently fetched slice of a catalog (e.g. "elevation").
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetCategory {
    pub label: String,
    pub criteria: Option<CriteriaNode>,
}

impl DatasetCategory {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            criteria: None,
        }
    }

    pub fn with_criteria(mut self, criteria: CriteriaNode) -> Self {
        self.criteria = Some(criteria);
        self
    }
}

/// Run every request concurrently, each bounded by `timeout`.
///
/// Returns the successes when at least one request succeeded, otherwise every
/// failure grouped in [`FetchError::AllFailed`]. There is no retry.
pub async fn fetch_all<T, F>(requests: Vec<(String, F)>, timeout: Duration) -> Result<Vec<T>, FetchError>
where
    F: Future<Output = Result<T, FetchError>>,
{
    if requests.is_empty() {
        return Ok(Vec::new());
    }

    let bounded = requests.into_iter().map(|(label, request)| async move {
        match tokio::time::timeout(timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout { label, after: timeout }),
        }
    });
    let (succeeded, failed): (Vec<T>, Vec<FetchError>) = join_all(bounded).await.into_iter().partition_result();

    if succeeded.is_empty() {
        return Err(FetchError::AllFailed(failed));
    }
    for failure in &failed {
        warn!("provider request dropped: {}", failure);
    }
    debug!("{} provider requests succeeded, {} failed", succeeded.len(), failed.len());
    Ok(succeeded)
}

/// Query one polygon across several categories in parallel and concatenate
/// whatever came back.
pub async fn fetch_categories(
    provider: &dyn DataProvider,
    polygon_wkt: &str,
    categories: &[DatasetCategory],
    timeout: Duration,
) -> Result<Vec<RawRecord>, FetchError> {
    let requests = categories
        .iter()
        .map(|category| {
            (
                format!("{}/{}", provider.source(), category.label),
                provider.fetch_by_spatial_query(polygon_wkt, category.criteria.as_ref()),
            )
        })
        .collect();

    let batches = fetch_all(requests, timeout).await?;
    Ok(batches.into_iter().flatten().collect())
}
