//! Risk scoring
//!
//! Shadiness propagation over the ownership neighbourhood of winners,
//! urgency scoring of procurements, and the verification pass that
//! follows them.

pub mod propagate;
pub mod urgency;
pub mod verify;

pub use propagate::{risk_scores_from, PropagationConfig, PropagationSummary, Propagator, RiskScores};
pub use urgency::{nonlinear_urgency, normal_cdf, UrgencyConfig, UrgencyScorer, ValueDistribution};
pub use verify::{verify, VerificationIssue, VerificationReport, VERIFICATION_FLAG};
