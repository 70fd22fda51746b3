//! Procurement Risk
//!
//! Links public procurement awards to the ownership networks of the
//! winning firms, overlays sanctions screening and ranks contracts for
//! manual review.
//!
//! ## Stages
//! Data flows strictly forward, each stage producing a new artifact:
//! Tables -> Resolver -> Graph Builder -> Screening -> Propagator -> Urgency Scorer
//!
//! ```rust,no_run
//! use procurement_risk::config::PipelineConfig;
//! use procurement_risk::resolve::Resolver;
//! use procurement_types::EntityRecord;
//!
//! let config = PipelineConfig::default();
//! let resolver = Resolver::new(config.resolver.clone());
//! let base = vec![EntityRecord::new(0, "awards", "ACME Inc")];
//! let register = vec![EntityRecord::new(0, "orbis", "acme").with_identifier("GB1")];
//! let resolution = resolver.resolve(&base, &register);
//! assert_eq!(resolution.matches[0].identifier, "GB1");
//! ```

// Error taxonomy
pub mod error;

// YAML configuration
pub mod config;

// Input tables and column mappings
pub mod tables;

// Exact-then-fuzzy entity resolution
pub mod resolve;

// Ownership graph, builder and snapshots
pub mod graph;

// Sanctions and risk screening collaborator
pub mod screening;

// Shadiness, urgency and verification
pub mod risk;

// Output tables and metrics report
pub mod report;

// Stage orchestration
pub mod pipeline;

pub use config::PipelineConfig;
pub use pipeline::{Pipeline, PipelineInputs, PipelineReport};
