// Holdings pipeline: schema resolution, normalization, consolidation and quality gates

pub mod processing;
