//! Demographic segmentation: maps a visitor's age and sex to the group
//! description that selects a bandit segment.

pub mod resolver;

pub use resolver::SegmentResolver;
