//! Vector math for embedding comparison. Pure functions, no state.

use visage_core::MatchError;

/// Scale a vector to unit length. A zero-norm vector is returned unchanged
/// rather than producing NaNs; its distance to any unit vector is still
/// well defined.
pub fn normalize(vector: &[f64]) -> Vec<f64> {
    let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm == 0.0 {
        return vector.to_vec();
    }
    vector.iter().map(|v| v / norm).collect()
}

/// Euclidean distance between two vectors of equal dimension.
pub fn euclidean_distance(a: &[f64], b: &[f64]) -> Result<f64, MatchError> {
    if a.len() != b.len() {
        return Err(MatchError::DimensionMismatch {
            expected: a.len(),
            got: b.len(),
        });
    }
    let sum = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>();
    Ok(sum.sqrt())
}

/// The two tenant-independent calibration scalars controlling the
/// distance-to-similarity curve, as reported by the face service's status
/// endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityCoefficients {
    pub coefficient0: f64,
    pub coefficient1: f64,
}

impl SimilarityCoefficients {
    pub fn new(coefficient0: f64, coefficient1: f64) -> Self {
        Self {
            coefficient0,
            coefficient1,
        }
    }

    /// Take the first two coefficients from a status response. Fewer than
    /// two means the face service cannot calibrate similarities right now;
    /// the request fails, nothing is retried internally.
    pub fn from_status(coefficients: &[f64]) -> Result<Self, MatchError> {
        match coefficients {
            [c0, c1, ..] => Ok(Self::new(*c0, *c1)),
            _ => Err(MatchError::CoefficientsUnavailable {
                reason: format!(
                    "expected at least two calibration coefficients, got {}",
                    coefficients.len()
                ),
            }),
        }
    }
}

/// `(tanh((c0 - distance) * c1) + 1) / 2`
///
/// Strictly decreasing in distance for positive `c1`, mapping distance 0
/// near 1.0 and large distances near 0.0.
pub fn similarity(distance: f64, coefficients: &SimilarityCoefficients) -> f64 {
    (((coefficients.coefficient0 - distance) * coefficients.coefficient1).tanh() + 1.0) / 2.0
}

// =============================================================================
// TESTS
// =============================================================================
