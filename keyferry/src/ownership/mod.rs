//! Ownership matching of keys against the owned catalog.

mod matcher;
pub mod normalize;

pub use matcher::{
    CatalogMatch, MatchResult, OwnershipMatcher, OwnershipMatches, OwnershipVerdict,
};
pub use normalize::{DEFAULT_NOISE_PHRASES, NoiseFilter, NormalizedTitle, fold};
