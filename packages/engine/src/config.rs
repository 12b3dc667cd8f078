//! Configuration constants for the machine-law engine
//!
//! Centralized limits used throughout the engine:
//! - document size limits applied when loading specifications
//! - nesting limits applied when parsing expressions and dotted paths
//! - recursion limits applied to cross-law service evaluation
//!
//! These are compile-time constants. Runtime wiring (sources, caches,
//! service providers) is passed explicitly to the engine.

/// Maximum number of rule specifications a registry holds.
///
/// Counts every loaded version, not just distinct laws.
pub const MAX_LOADED_SPECS: usize = 250;

/// Maximum specification document size in bytes (1 MB).
pub const MAX_YAML_SIZE: usize = 1_000_000;

/// Maximum number of elements in any array within a specification.
pub const MAX_ARRAY_SIZE: usize = 1_000;

/// Maximum depth for cross-law service evaluation.
///
/// Laws typically reach 3-5 levels (wet -> regeling -> verordening).
pub const MAX_CROSS_LAW_DEPTH: usize = 20;

/// Maximum nesting depth of operation expressions, checked at parse time.
pub const MAX_OPERATION_DEPTH: usize = 100;

/// Maximum number of segments in a dotted reference like `$a.b.c`.
pub const MAX_PROPERTY_DEPTH: usize = 32;

/// Maximum number of items a single FOREACH may iterate.
pub const MAX_FOREACH_ITEMS: usize = 100_000;
