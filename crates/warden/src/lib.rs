//! Warden Policy Engine
//!
//! Attribute-based access control engine. Every access request is evaluated
//! as Subject + Action + Resource + Context against stored policies,
//! producing a boolean decision with deny-override combining.
//!
//! Key features:
//! - Policies match by exact string, fuzzy substring, delimiter-wrapped
//!   regular expression, or attribute rules
//! - Rich rule vocabulary (comparisons, string operators, CIDR, list
//!   membership, logical combinators, inquiry-bound cross-field rules)
//! - Deny-overrides combining: one matching deny policy rejects the inquiry
//! - Fail-closed guard (evaluation failure = deny, not error)
//! - JSON round-trip for inquiries, rules, and policies
//! - Pluggable storage behind a trait, with a bundled in-memory backend

pub mod checker;
pub mod error;
pub mod guard;
pub mod inquiry;
pub mod pattern;
pub mod policy;
pub mod rule;
pub mod storage;

// Re-export primary types for convenience
pub use checker::{
    Checker, MixedChecker, RegexChecker, RulesChecker, StringExactChecker, StringFuzzyChecker,
};
pub use error::{WardenError, WardenResult};
pub use guard::Guard;
pub use inquiry::Inquiry;
pub use pattern::{CompiledPattern, PatternCompiler};
pub use policy::{
    Effect, MatchSpec, Policy, PolicyField, PolicyKind, DEFAULT_END_DELIMITER,
    DEFAULT_START_DELIMITER,
};
pub use rule::{CidrNet, Rule, RulePattern};
pub use storage::{MemoryStorage, Storage};
