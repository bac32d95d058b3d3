// Pipeline processing: per-source normalization, then dataset-level consolidation and validation

pub mod schema;
pub mod rating;
pub mod maturity;
pub mod issuer;
pub mod normalize;
pub mod consolidate;
pub mod quality_gate;
