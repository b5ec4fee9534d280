use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{WardenError, WardenResult};
use crate::pattern::PatternCompiler;
use crate::policy::{MatchSpec, Policy, PolicyField};

/// A strategy for matching one inquiry field against one policy field.
///
/// Checkers never raise: a value a checker was not designed for, or a
/// match-spec written in another dialect, is simply not a fit.
pub trait Checker: Send + Sync {
    fn fits(&self, policy: &Policy, field: PolicyField, value: &Value) -> bool;
}

/// Strip the policy's delimiters when the spec is wrapped in them.
fn strip_delimiters(spec: &str, start: char, end: char) -> &str {
    spec.strip_prefix(start)
        .and_then(|s| s.strip_suffix(end))
        .unwrap_or(spec)
}

// ---------------------------------------------------------------------------
// String checkers
// ---------------------------------------------------------------------------

/// Exact string equality against literal match-specs.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringExactChecker;

impl Checker for StringExactChecker {
    fn fits(&self, policy: &Policy, field: PolicyField, value: &Value) -> bool {
        let Some(value) = value.as_str() else {
            return false;
        };
        policy.field(field).iter().any(|spec| match spec {
            MatchSpec::Literal(s) => {
                strip_delimiters(s, policy.start_delimiter(), policy.end_delimiter()) == value
            }
            _ => false,
        })
    }
}

/// Substring containment: the match-spec is the haystack, the inquiry value
/// the needle.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringFuzzyChecker;

impl Checker for StringFuzzyChecker {
    fn fits(&self, policy: &Policy, field: PolicyField, value: &Value) -> bool {
        let Some(value) = value.as_str() else {
            return false;
        };
        policy.field(field).iter().any(|spec| match spec {
            MatchSpec::Literal(s) => {
                strip_delimiters(s, policy.start_delimiter(), policy.end_delimiter())
                    .contains(value)
            }
            _ => false,
        })
    }
}

// ---------------------------------------------------------------------------
// Regex checker
// ---------------------------------------------------------------------------

/// Matches literal specs via the pattern compiler: a spec without the start
/// delimiter must equal the value exactly; otherwise it is compiled with
/// the policy's delimiters and regex-matched.
pub struct RegexChecker {
    compiler: Arc<PatternCompiler>,
}

impl RegexChecker {
    pub fn new(compiler: Arc<PatternCompiler>) -> Self {
        Self { compiler }
    }
}

impl Default for RegexChecker {
    fn default() -> Self {
        Self::new(Arc::new(PatternCompiler::default()))
    }
}

impl Checker for RegexChecker {
    fn fits(&self, policy: &Policy, field: PolicyField, value: &Value) -> bool {
        let Some(value) = value.as_str() else {
            return false;
        };
        for spec in policy.field(field) {
            let MatchSpec::Literal(phrase) = spec else {
                continue;
            };
            if !phrase.contains(policy.start_delimiter()) {
                if phrase == value {
                    return true;
                }
                continue;
            }
            match self.compiler.compile(
                phrase,
                policy.start_delimiter(),
                policy.end_delimiter(),
            ) {
                Ok(compiled) => {
                    if compiled.is_match(value) {
                        return true;
                    }
                }
                Err(e) => {
                    // A malformed phrase disqualifies the whole policy, not
                    // just this spec.
                    warn!(
                        policy_uid = policy.uid(),
                        phrase = %phrase,
                        error = %e,
                        "pattern compile failed, policy does not fit"
                    );
                    return false;
                }
            }
        }
        false
    }
}

// ---------------------------------------------------------------------------
// Rules checker
// ---------------------------------------------------------------------------

/// Matches rule and attribute-map specs of rule-based policies.
#[derive(Debug, Default, Clone, Copy)]
pub struct RulesChecker;

impl Checker for RulesChecker {
    fn fits(&self, policy: &Policy, field: PolicyField, value: &Value) -> bool {
        for spec in policy.field(field) {
            match spec {
                MatchSpec::Predicate(rule) => match rule.satisfied(value, None) {
                    Ok(true) => return true,
                    Ok(false) => {}
                    Err(e) => {
                        debug!(
                            policy_uid = policy.uid(),
                            field = field.as_str(),
                            error = %e,
                            "rule evaluation failed, treated as non-match"
                        );
                    }
                },
                MatchSpec::Attributes(attrs) => {
                    // An empty attribute map never matches anything, even an
                    // empty value.
                    if attrs.is_empty() {
                        continue;
                    }
                    let Some(given) = value.as_object() else {
                        continue;
                    };
                    let all_satisfied = attrs.iter().all(|(key, rule)| {
                        given
                            .get(key)
                            .map_or(false, |v| rule.satisfied(v, None).unwrap_or(false))
                    });
                    if all_satisfied {
                        return true;
                    }
                }
                // Literal specs belong to the string dialect.
                MatchSpec::Literal(_) => {}
            }
        }
        false
    }
}

// ---------------------------------------------------------------------------
// Mixed checker
// ---------------------------------------------------------------------------

/// Tries several component checkers in turn, fitting on the first that
/// matches. Used when one evaluation must tolerate policies authored in
/// more than one matching dialect.
pub struct MixedChecker {
    checkers: Vec<Box<dyn Checker>>,
}

impl MixedChecker {
    pub fn new(checkers: Vec<Box<dyn Checker>>) -> WardenResult<Self> {
        if checkers.is_empty() {
            return Err(WardenError::CheckerCreation(
                "MixedChecker requires at least one component checker".to_string(),
            ));
        }
        Ok(Self { checkers })
    }
}

impl Checker for MixedChecker {
    fn fits(&self, policy: &Policy, field: PolicyField, value: &Value) -> bool {
        self.checkers
            .iter()
            .any(|checker| checker.fits(policy, field, value))
    }
}
