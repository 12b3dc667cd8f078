//! Machine Law Engine
//!
//! Executes machine-readable Dutch statutory rules (YAML rule specifications)
//! for one citizen and one reference date. This library provides:
//! - Loading versioned rule specifications per service and law
//! - Demand-driven evaluation of only the actions an output needs
//! - Variable resolution through claims, parameters, sources and other laws
//! - Output typing (precision, bounds, eurocent) and an explainable trace
//!
//! # Example
//!
//! ```ignore
//! use machine_law_engine::{Evaluation, LawExecutionService};
//!
//! let service = LawExecutionService::new();
//! service.load_file("laws/zorgtoeslagwet.yaml")?;
//!
//! let request = Evaluation::for_date("2025-01-01")?
//!     .with_parameter("BSN", "999993653")
//!     .requesting("hoogte_toeslag");
//!
//! let result = service.evaluate_law("TOESLAGEN", "zorgtoeslagwet", request)?;
//! println!("{}", result.path.render());
//! ```

pub mod cache;
pub mod claims;
pub mod config;
pub mod context;
pub mod dependencies;
pub mod engine;
pub mod error;
pub mod expression;
pub mod operations;
pub mod resolution;
pub mod resolver;
pub mod rulespec;
pub mod service;
pub mod sources;
pub mod trace;
pub mod types;
pub mod typespec;

// Re-export commonly used items
pub use cache::{cache_key, CacheScope, CachedValue, ValueCache};
pub use claims::{Claim, ClaimStatus, Claims, ExternalClaimResolver};
pub use context::RuleContext;
pub use dependencies::{analyze_dependencies, get_required_actions};
pub use engine::{Evaluation, OverwriteInput, RuleResult, RulesEngine};
pub use error::{EngineError, Result};
pub use expression::{Action, Expr, Requirement};
pub use operations::{evaluate, ValueResolver};
pub use resolver::RuleResolver;
pub use rulespec::{OutputSpec, PropertySpec, RuleSpecification};
pub use service::{LawExecutionService, ServiceCall, ServiceProvider};
pub use sources::{
    DataFrame, ExternalSourceResolver, FilterOp, RecordFrame, SourceDataFrame, SourceFilter,
    SourceTables,
};
pub use trace::{PathNode, TraceBuilder};
pub use types::{Operation, PathNodeType, Record, ResolveType, Value};
pub use typespec::TypeSpec;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
