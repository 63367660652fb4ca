//! The similarity capability and its Euclidean-distance strategy.

use crate::vector::{euclidean_distance, normalize, similarity, SimilarityCoefficients};
use std::cmp::Ordering;
use std::sync::Arc;
use visage_cache::EmbeddingCacheProvider;
use visage_core::{CacheError, EmbeddingId, MatchError, SubjectName, TenantKey, VisageResult};

/// Source of the similarity calibration coefficients, typically the face
/// service's status endpoint. Queried once per matching call so a
/// recalibrated service takes effect without a restart.
pub trait CoefficientsSource: Send + Sync {
    fn similarity_coefficients(&self) -> VisageResult<Vec<f64>>;
}

/// How many results a ranking operation returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCount {
    /// Every scored pair, sorted.
    All,
    /// The best `n` pairs.
    Top(usize),
}

impl ResultCount {
    fn limit(self) -> usize {
        match self {
            ResultCount::All => usize::MAX,
            ResultCount::Top(n) => n,
        }
    }
}

/// The matching capability exposed to request handlers: rank a tenant's
/// subjects against a query, verify a query against one embedding or one
/// subject, and score ad-hoc vector pairs. One concrete strategy exists;
/// the trait keeps it swappable by injection.
pub trait Matcher: Send + Sync {
    /// Score the query against every cached embedding of the tenant and
    /// return `(similarity, subject)` pairs, best first. Ties keep the
    /// collection's deterministic iteration order.
    fn predict(
        &self,
        input: &[f64],
        tenant: &TenantKey,
        count: ResultCount,
    ) -> VisageResult<Vec<(f64, SubjectName)>>;

    /// Similarity of the query against one specific embedding.
    fn verify_by_id(
        &self,
        input: &[f64],
        tenant: &TenantKey,
        embedding_id: EmbeddingId,
    ) -> VisageResult<f64>;

    /// Similarity of the query against each embedding of one subject, best
    /// first. An absent subject yields an empty result, not an error.
    fn verify_subject(
        &self,
        input: &[f64],
        tenant: &TenantKey,
        subject: &str,
        count: ResultCount,
    ) -> VisageResult<Vec<(EmbeddingId, f64)>>;

    /// Similarity of one source vector against each target, cache
    /// independent, preserving input order.
    fn verify_batch(&self, source: &[f64], targets: &[Vec<f64>]) -> VisageResult<Vec<f64>>;
}

/// Euclidean distance between unit vectors, calibrated with the tanh curve.
pub struct EuclideanMatcher {
    cache: Arc<EmbeddingCacheProvider>,
    coefficients: Arc<dyn CoefficientsSource>,
}

impl EuclideanMatcher {
    pub fn new(cache: Arc<EmbeddingCacheProvider>, coefficients: Arc<dyn CoefficientsSource>) -> Self {
        Self {
            cache,
            coefficients,
        }
    }

    fn calibration(&self) -> VisageResult<SimilarityCoefficients> {
        let raw = self.coefficients.similarity_coefficients()?;
        SimilarityCoefficients::from_status(&raw).map_err(Into::into)
    }
}

impl Matcher for EuclideanMatcher {
    fn predict(
        &self,
        input: &[f64],
        tenant: &TenantKey,
        count: ResultCount,
    ) -> VisageResult<Vec<(f64, SubjectName)>> {
        let calibration = self.calibration()?;
        let query = normalize(input);

        let mut scored = self.cache.with_collection(tenant, |collection| {
            collection
                .iter()
                .map(|(subject, _, raw)| {
                    let distance = euclidean_distance(&normalize(raw), &query)?;
                    Ok((similarity(distance, &calibration), subject.clone()))
                })
                .collect::<Result<Vec<_>, MatchError>>()
        })??;

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        scored.truncate(count.limit());
        Ok(scored)
    }

    fn verify_by_id(
        &self,
        input: &[f64],
        tenant: &TenantKey,
        embedding_id: EmbeddingId,
    ) -> VisageResult<f64> {
        let raw = self
            .cache
            .with_collection(tenant, |collection| {
                collection
                    .lookup_by_id(embedding_id)
                    .map(|found| found.map(|(_, vector)| vector.to_vec()))
            })??
            .ok_or(CacheError::EmbeddingNotFound {
                tenant: tenant.clone(),
                id: embedding_id,
            })?;

        let calibration = self.calibration()?;
        let distance = euclidean_distance(&normalize(&raw), &normalize(input))?;
        Ok(similarity(distance, &calibration))
    }

    fn verify_subject(
        &self,
        input: &[f64],
        tenant: &TenantKey,
        subject: &str,
        count: ResultCount,
    ) -> VisageResult<Vec<(EmbeddingId, f64)>> {
        let Some(embeddings) = self.cache.embeddings_by_subject(tenant, subject)? else {
            return Ok(Vec::new());
        };

        let calibration = self.calibration()?;
        let query = normalize(input);
        let mut scored = embeddings
            .iter()
            .map(|(id, raw)| {
                let distance = euclidean_distance(&normalize(raw), &query)?;
                Ok((*id, similarity(distance, &calibration)))
            })
            .collect::<Result<Vec<_>, MatchError>>()?;

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(count.limit());
        Ok(scored)
    }

    fn verify_batch(&self, source: &[f64], targets: &[Vec<f64>]) -> VisageResult<Vec<f64>> {
        let calibration = self.calibration()?;
        let source = normalize(source);
        targets
            .iter()
            .map(|target| {
                let distance = euclidean_distance(&normalize(target), &source)?;
                Ok(similarity(distance, &calibration))
            })
            .collect::<Result<Vec<_>, MatchError>>()
            .map_err(Into::into)
    }
}

// =============================================================================
// TESTS
// =============================================================================
