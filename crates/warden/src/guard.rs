use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info};

use crate::checker::Checker;
use crate::error::WardenResult;
use crate::inquiry::Inquiry;
use crate::policy::{Effect, PolicyField};
use crate::storage::Storage;

/// The decision point. Fetches candidate policies from storage, matches
/// them against an inquiry with its checker, and combines the matching
/// policies' effects with deny-override.
pub struct Guard {
    storage: Arc<dyn Storage>,
    checker: Box<dyn Checker>,
}

impl Guard {
    pub fn new(storage: Arc<dyn Storage>, checker: Box<dyn Checker>) -> Self {
        Self { storage, checker }
    }

    /// Total decision surface: `true` to allow, `false` to deny. Any
    /// internal failure (storage, context rule evaluation) is logged and
    /// denied rather than propagated.
    pub fn is_allowed(&self, inquiry: &Inquiry) -> bool {
        match self.check(inquiry) {
            Ok(allowed) => {
                info!(
                    subject = %inquiry.subject,
                    action = %inquiry.action,
                    resource = %inquiry.resource,
                    context = ?inquiry.context,
                    allowed,
                    "inquiry decided"
                );
                allowed
            }
            Err(e) => {
                error!(
                    subject = %inquiry.subject,
                    action = %inquiry.action,
                    resource = %inquiry.resource,
                    context = ?inquiry.context,
                    error = %e,
                    "inquiry denied after evaluation failure"
                );
                false
            }
        }
    }

    /// Error-transparent variant of [`is_allowed`](Self::is_allowed) for
    /// callers that need to distinguish a deny from a broken backend.
    pub fn check(&self, inquiry: &Inquiry) -> WardenResult<bool> {
        let candidates = self
            .storage
            .find_for_inquiry(inquiry, Some(self.checker.as_ref()))?;
        if candidates.is_empty() {
            return Ok(false);
        }

        let mut allowed = false;
        'candidates: for policy in &candidates {
            // Action first: the cheapest field to rule a policy out on.
            if !self.fits(policy, PolicyField::Actions, &inquiry.action)
                || !self.fits(policy, PolicyField::Subjects, &inquiry.subject)
                || !self.fits(policy, PolicyField::Resources, &inquiry.resource)
            {
                continue;
            }
            for (key, rule) in policy.context() {
                let Some(value) = inquiry.context.get(key) else {
                    continue 'candidates;
                };
                if !rule.satisfied(value, Some(inquiry))? {
                    continue 'candidates;
                }
            }
            if policy.effect() == Effect::Deny {
                return Ok(false);
            }
            allowed = true;
        }
        Ok(allowed)
    }

    fn fits(&self, policy: &crate::policy::Policy, field: PolicyField, value: &Value) -> bool {
        self.checker.fits(policy, field, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::{RegexChecker, RulesChecker};
    use crate::error::WardenError;
    use crate::policy::Policy;
    use crate::rule::Rule;
    use crate::storage::MemoryStorage;
    use serde_json::json;
    use std::collections::HashMap;

    fn make_guard(policies: Vec<Policy>) -> Guard {
        let storage = MemoryStorage::new();
        for policy in policies {
            storage.add(policy).unwrap();
        }
        Guard::new(Arc::new(storage), Box::new(RegexChecker::default()))
    }

    fn make_policy(uid: &str, effect: Effect) -> Policy {
        Policy::new(
            uid,
            effect,
            vec!["Max".into()],
            vec!["update".into()],
            vec!["<.*>".into()],
        )
        .unwrap()
    }

    #[test]
    fn test_no_candidates_denies() {
        let guard = make_guard(vec![]);
        assert!(!guard.is_allowed(&Inquiry::new("Max", "update", "doc:1")));
    }

    #[test]
    fn test_matching_allow_policy() {
        let guard = make_guard(vec![make_policy("p1", Effect::Allow)]);
        assert!(guard.is_allowed(&Inquiry::new("Max", "update", "doc:1")));
        // Literal subject match is case sensitive.
        assert!(!guard.is_allowed(&Inquiry::new("max", "update", "doc:1")));
        assert!(!guard.is_allowed(&Inquiry::new("Max", "delete", "doc:1")));
    }

    #[test]
    fn test_deny_overrides_allow() {
        let allow = make_policy("p-allow", Effect::Allow);
        let deny = make_policy("z-deny", Effect::Deny);
        let guard = make_guard(vec![allow.clone(), deny.clone()]);
        assert!(!guard.is_allowed(&Inquiry::new("Max", "update", "doc:1")));

        // Same outcome with the deny sorted first.
        let deny_first = {
            let mut early_deny = make_policy("a-deny", Effect::Deny);
            early_deny.set_description(Some("sorts before the allow".to_string()));
            make_guard(vec![allow, early_deny])
        };
        assert!(!deny_first.is_allowed(&Inquiry::new("Max", "update", "doc:1")));
    }

    #[test]
    fn test_context_rule_gates_policy() {
        let mut policy = make_policy("p1", Effect::Allow);
        let mut context = HashMap::new();
        context.insert("ip".to_string(), Rule::cidr("192.168.0.0/24").unwrap());
        policy.set_context(context);
        let guard = make_guard(vec![policy]);

        let inside = Inquiry::new("Max", "update", "doc:1").with_context("ip", "192.168.0.7");
        assert!(guard.is_allowed(&inside));

        let outside = Inquiry::new("Max", "update", "doc:1").with_context("ip", "10.0.0.1");
        assert!(!guard.is_allowed(&outside));

        // A missing context key skips the policy entirely.
        assert!(!guard.is_allowed(&Inquiry::new("Max", "update", "doc:1")));
    }

    #[test]
    fn test_rule_based_policy_via_rules_checker() {
        let policy = Policy::new(
            "p1",
            Effect::Allow,
            vec![Rule::Greater { value: json!(17) }.into()],
            vec![Rule::Equal {
                value: "read".to_string(),
                case_insensitive: true,
            }
            .into()],
            vec![Rule::Any {}.into()],
        )
        .unwrap();
        let storage = MemoryStorage::new();
        storage.add(policy).unwrap();
        let guard = Guard::new(Arc::new(storage), Box::new(RulesChecker));

        assert!(guard.is_allowed(&Inquiry::new(18, "READ", "book")));
        assert!(!guard.is_allowed(&Inquiry::new(17, "READ", "book")));
        assert!(!guard.is_allowed(&Inquiry::new(18, "write", "book")));
    }

    #[test]
    fn test_storage_failure_fails_closed() {
        struct BrokenStorage;
        impl Storage for BrokenStorage {
            fn add(&self, _: Policy) -> WardenResult<()> {
                Ok(())
            }
            fn get(&self, _: &str) -> WardenResult<Option<Policy>> {
                Ok(None)
            }
            fn get_all(&self, _: usize, _: usize) -> WardenResult<Vec<Policy>> {
                Ok(vec![])
            }
            fn find_for_inquiry(
                &self,
                _: &Inquiry,
                _: Option<&dyn Checker>,
            ) -> WardenResult<Vec<Policy>> {
                Err(WardenError::Storage("backend unavailable".to_string()))
            }
            fn update(&self, _: Policy) -> WardenResult<()> {
                Ok(())
            }
            fn delete(&self, _: &str) -> WardenResult<()> {
                Ok(())
            }
        }

        let guard = Guard::new(Arc::new(BrokenStorage), Box::new(RegexChecker::default()));
        let inquiry = Inquiry::new("Max", "update", "doc:1");
        assert!(!guard.is_allowed(&inquiry));
        assert!(matches!(
            guard.check(&inquiry),
            Err(WardenError::Storage(_))
        ));
    }

    mod log_capture {
        use std::fmt;
        use std::sync::{Arc, Mutex};
        use tracing::field::{Field, Visit};
        use tracing::span;
        use tracing::{Event, Metadata, Subscriber};

        #[derive(Clone, Default)]
        struct FieldNames(Arc<Mutex<Vec<String>>>);

        impl Visit for FieldNames {
            fn record_debug(&mut self, field: &Field, _: &dyn fmt::Debug) {
                self.0.lock().unwrap().push(field.name().to_string());
            }
        }

        struct Collector(FieldNames);

        impl Subscriber for Collector {
            fn enabled(&self, _: &Metadata<'_>) -> bool {
                true
            }
            fn new_span(&self, _: &span::Attributes<'_>) -> span::Id {
                span::Id::from_u64(1)
            }
            fn record(&self, _: &span::Id, _: &span::Record<'_>) {}
            fn record_follows_from(&self, _: &span::Id, _: &span::Id) {}
            fn event(&self, event: &Event<'_>) {
                let mut visitor = self.0.clone();
                event.record(&mut visitor);
            }
            fn enter(&self, _: &span::Id) {}
            fn exit(&self, _: &span::Id) {}
        }

        /// Run `f` under a capturing subscriber and return the field names
        /// of every event it emitted.
        pub fn recorded_field_names(f: impl FnOnce()) -> Vec<String> {
            let names = FieldNames::default();
            let recorded = Arc::clone(&names.0);
            tracing::subscriber::with_default(Collector(names), f);
            let recorded = recorded.lock().unwrap();
            recorded.clone()
        }
    }

    #[test]
    fn test_decision_log_carries_inquiry_fields() {
        let guard = make_guard(vec![make_policy("p1", Effect::Allow)]);
        let inquiry = Inquiry::new("Max", "update", "doc:1").with_context("ip", "127.0.0.1");

        let recorded = log_capture::recorded_field_names(|| {
            assert!(guard.is_allowed(&inquiry));
        });
        for name in ["subject", "action", "resource", "context", "allowed"] {
            assert!(
                recorded.iter().any(|f| f == name),
                "decision event is missing field '{}'",
                name
            );
        }
    }

    #[test]
    fn test_failure_log_carries_inquiry_context() {
        // A context rule that errors on its input forces the error! path.
        let mut policy = make_policy("p1", Effect::Allow);
        policy.set_context(HashMap::from([(
            "tags".to_string(),
            Rule::all_in_list(vec![json!("a")]).unwrap(),
        )]));
        let guard = make_guard(vec![policy]);
        let inquiry = Inquiry::new("Max", "update", "doc:1").with_context("tags", "a");

        let recorded = log_capture::recorded_field_names(|| {
            assert!(!guard.is_allowed(&inquiry));
        });
        for name in ["subject", "action", "resource", "context", "error"] {
            assert!(
                recorded.iter().any(|f| f == name),
                "failure event is missing field '{}'",
                name
            );
        }
    }

    #[test]
    fn test_context_rule_error_fails_closed() {
        let mut policy = make_policy("p1", Effect::Allow);
        let mut context = HashMap::new();
        // all_in_list against a non-list inquiry value raises a type error.
        context.insert(
            "tags".to_string(),
            Rule::all_in_list(vec![json!("a")]).unwrap(),
        );
        policy.set_context(context);
        let guard = make_guard(vec![policy]);

        let inquiry = Inquiry::new("Max", "update", "doc:1").with_context("tags", "a");
        assert!(matches!(
            guard.check(&inquiry),
            Err(WardenError::TypeError(_))
        ));
        assert!(!guard.is_allowed(&inquiry));
    }
}
