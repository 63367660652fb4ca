//! Visage Match - Similarity Engine
//!
//! Scores a query face-embedding against a tenant's cached embeddings by
//! Euclidean distance between unit vectors, calibrated into a similarity in
//! `[0, 1]` with a tanh curve whose two coefficients come from the external
//! face service per call.
//!
//! Tenant vector sets are assumed small, so scanning is a brute-force
//! linear pass over the collection; there is no index.

pub mod matcher;
pub mod vector;

pub use matcher::{CoefficientsSource, EuclideanMatcher, Matcher, ResultCount};
pub use vector::{euclidean_distance, normalize, similarity, SimilarityCoefficients};
