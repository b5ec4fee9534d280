use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{WardenError, WardenResult};
use crate::rule::Rule;

/// Default delimiters marking compiled-pattern regions inside a string
/// match-spec.
pub const DEFAULT_START_DELIMITER: char = '<';
pub const DEFAULT_END_DELIMITER: char = '>';

/// The outcome a policy attaches to a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

/// Which matching dialect a policy is written in. Derived from the policy's
/// match-specs, never set directly; wire representation is `1` / `2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    StringBased,
    RuleBased,
}

impl PolicyKind {
    fn wire(self) -> u8 {
        match self {
            PolicyKind::StringBased => 1,
            PolicyKind::RuleBased => 2,
        }
    }
}

/// One of the three match fields of a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyField {
    Subjects,
    Actions,
    Resources,
}

impl PolicyField {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyField::Subjects => "subjects",
            PolicyField::Actions => "actions",
            PolicyField::Resources => "resources",
        }
    }
}

/// One element of a policy's subjects/actions/resources list.
///
/// Untagged on the wire: a JSON string is a literal, an object with
/// `type`/`contents` is a predicate, any other object is an attribute map.
/// Anything else fails policy deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatchSpec {
    Literal(String),
    Predicate(Rule),
    Attributes(HashMap<String, Rule>),
}

impl From<&str> for MatchSpec {
    fn from(value: &str) -> Self {
        MatchSpec::Literal(value.to_string())
    }
}

impl From<String> for MatchSpec {
    fn from(value: String) -> Self {
        MatchSpec::Literal(value)
    }
}

impl From<Rule> for MatchSpec {
    fn from(value: Rule) -> Self {
        MatchSpec::Predicate(value)
    }
}

/// One access-control statement: an effect plus match-specs for subjects,
/// actions and resources, and a map of named context rules.
///
/// Invariant: across all three match fields, specs are either all literal
/// strings (`StringBased`) or all rules/attribute maps (`RuleBased`).
/// Mixing the dialects fails construction, and every mutation re-validates,
/// so `kind()` is always consistent with the field contents. An empty
/// policy is `StringBased`.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    uid: String,
    description: Option<String>,
    effect: Effect,
    subjects: Vec<MatchSpec>,
    actions: Vec<MatchSpec>,
    resources: Vec<MatchSpec>,
    context: HashMap<String, Rule>,
    start_delimiter: char,
    end_delimiter: char,
    kind: PolicyKind,
}

impl Policy {
    pub fn new(
        uid: impl Into<String>,
        effect: Effect,
        subjects: Vec<MatchSpec>,
        actions: Vec<MatchSpec>,
        resources: Vec<MatchSpec>,
    ) -> WardenResult<Self> {
        Self::with_details(uid, None, effect, subjects, actions, resources, HashMap::new())
    }

    pub fn with_details(
        uid: impl Into<String>,
        description: Option<String>,
        effect: Effect,
        subjects: Vec<MatchSpec>,
        actions: Vec<MatchSpec>,
        resources: Vec<MatchSpec>,
        context: HashMap<String, Rule>,
    ) -> WardenResult<Self> {
        let kind = derive_kind(&subjects, &actions, &resources)?;
        Ok(Self {
            uid: uid.into(),
            description,
            effect,
            subjects,
            actions,
            resources,
            context,
            start_delimiter: DEFAULT_START_DELIMITER,
            end_delimiter: DEFAULT_END_DELIMITER,
            kind,
        })
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn effect(&self) -> Effect {
        self.effect
    }

    pub fn allow_access(&self) -> bool {
        self.effect == Effect::Allow
    }

    pub fn subjects(&self) -> &[MatchSpec] {
        &self.subjects
    }

    pub fn actions(&self) -> &[MatchSpec] {
        &self.actions
    }

    pub fn resources(&self) -> &[MatchSpec] {
        &self.resources
    }

    pub fn field(&self, field: PolicyField) -> &[MatchSpec] {
        match field {
            PolicyField::Subjects => &self.subjects,
            PolicyField::Actions => &self.actions,
            PolicyField::Resources => &self.resources,
        }
    }

    pub fn context(&self) -> &HashMap<String, Rule> {
        &self.context
    }

    /// The derived matching dialect. Read-only; re-derived on every
    /// mutation and never trusted from the wire.
    pub fn kind(&self) -> PolicyKind {
        self.kind
    }

    pub fn start_delimiter(&self) -> char {
        self.start_delimiter
    }

    pub fn end_delimiter(&self) -> char {
        self.end_delimiter
    }

    pub fn set_description(&mut self, description: Option<String>) {
        self.description = description;
    }

    pub fn set_effect(&mut self, effect: Effect) {
        self.effect = effect;
    }

    pub fn set_delimiters(&mut self, start: char, end: char) {
        self.start_delimiter = start;
        self.end_delimiter = end;
    }

    /// Replace the subjects, re-validating homogeneity. On error the policy
    /// keeps its previous value.
    pub fn set_subjects(&mut self, subjects: Vec<MatchSpec>) -> WardenResult<()> {
        let kind = derive_kind(&subjects, &self.actions, &self.resources)?;
        self.subjects = subjects;
        self.kind = kind;
        Ok(())
    }

    pub fn set_actions(&mut self, actions: Vec<MatchSpec>) -> WardenResult<()> {
        let kind = derive_kind(&self.subjects, &actions, &self.resources)?;
        self.actions = actions;
        self.kind = kind;
        Ok(())
    }

    pub fn set_resources(&mut self, resources: Vec<MatchSpec>) -> WardenResult<()> {
        let kind = derive_kind(&self.subjects, &self.actions, &resources)?;
        self.resources = resources;
        self.kind = kind;
        Ok(())
    }

    pub fn set_context(&mut self, context: HashMap<String, Rule>) {
        self.context = context;
    }

    pub fn from_json(json: &str) -> WardenResult<Self> {
        serde_json::from_str(json).map_err(|e| WardenError::Deserialization(e.to_string()))
    }

    pub fn to_json(&self) -> WardenResult<String> {
        serde_json::to_string(self).map_err(|e| WardenError::Serialization(e.to_string()))
    }
}

/// Derive the policy kind from the three match fields, enforcing per-field
/// and cross-field homogeneity.
fn derive_kind(
    subjects: &[MatchSpec],
    actions: &[MatchSpec],
    resources: &[MatchSpec],
) -> WardenResult<PolicyKind> {
    let mut string_based = false;
    let mut rule_based = false;

    for (name, specs) in [
        ("subjects", subjects),
        ("actions", actions),
        ("resources", resources),
    ] {
        let mut field_strings = false;
        let mut field_rules = false;
        for spec in specs {
            match spec {
                MatchSpec::Literal(_) => field_strings = true,
                MatchSpec::Predicate(_) | MatchSpec::Attributes(_) => field_rules = true,
            }
        }
        if field_strings && field_rules {
            return Err(WardenError::PolicyCreation(format!(
                "field '{}' mixes literal strings with rule match-specs",
                name
            )));
        }
        string_based |= field_strings;
        rule_based |= field_rules;
    }

    if string_based && rule_based {
        return Err(WardenError::PolicyCreation(
            "policy mixes string-based and rule-based match fields".to_string(),
        ));
    }
    if rule_based {
        Ok(PolicyKind::RuleBased)
    } else {
        Ok(PolicyKind::StringBased)
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct PolicyWireOut<'a> {
    uid: &'a str,
    description: &'a Option<String>,
    effect: Effect,
    subjects: &'a [MatchSpec],
    resources: &'a [MatchSpec],
    actions: &'a [MatchSpec],
    context: &'a HashMap<String, Rule>,
    #[serde(rename = "type")]
    kind: u8,
}

impl Serialize for Policy {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        PolicyWireOut {
            uid: &self.uid,
            description: &self.description,
            effect: self.effect,
            subjects: &self.subjects,
            resources: &self.resources,
            actions: &self.actions,
            context: &self.context,
            kind: self.kind.wire(),
        }
        .serialize(serializer)
    }
}

#[derive(Deserialize)]
struct PolicyWireIn {
    uid: String,
    #[serde(default)]
    description: Option<String>,
    effect: Effect,
    #[serde(default)]
    subjects: Vec<MatchSpec>,
    #[serde(default)]
    resources: Vec<MatchSpec>,
    #[serde(default)]
    actions: Vec<MatchSpec>,
    #[serde(default)]
    context: Option<HashMap<String, Rule>>,
    /// Legacy field name for `context`; `context` wins when both appear.
    #[serde(default)]
    rules: Option<HashMap<String, Rule>>,
    // An incoming "type" is deliberately ignored: the kind is re-derived
    // from the deserialized fields, never trusted from the wire.
}

impl<'de> Deserialize<'de> for Policy {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = PolicyWireIn::deserialize(deserializer)?;
        let context = wire.context.or(wire.rules).unwrap_or_default();
        Policy::with_details(
            wire.uid,
            wire.description,
            wire.effect,
            wire.subjects,
            wire.actions,
            wire.resources,
            context,
        )
        .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn make_string_policy() -> Policy {
        Policy::new(
            "p1",
            Effect::Allow,
            vec!["Max".into()],
            vec!["update".into()],
            vec!["<.*>".into()],
        )
        .unwrap()
    }

    fn make_rule_policy() -> Policy {
        Policy::new(
            "p2",
            Effect::Deny,
            vec![Rule::Eq {
                value: json!("Max"),
            }
            .into()],
            vec![Rule::Any {}.into()],
            vec![MatchSpec::Attributes(HashMap::from([(
                "id".to_string(),
                Rule::Greater { value: json!(0) },
            )]))],
        )
        .unwrap()
    }

    #[test]
    fn test_kind_derivation() {
        assert_eq!(make_string_policy().kind(), PolicyKind::StringBased);
        assert_eq!(make_rule_policy().kind(), PolicyKind::RuleBased);
    }

    #[test]
    fn test_empty_policy_defaults_to_string_based() {
        let policy = Policy::new("p", Effect::Allow, vec![], vec![], vec![]).unwrap();
        assert_eq!(policy.kind(), PolicyKind::StringBased);
    }

    #[test]
    fn test_mixed_specs_in_one_field_fail() {
        let err = Policy::new(
            "p",
            Effect::Allow,
            vec![
                "Max".into(),
                Rule::Eq {
                    value: json!("Jane"),
                }
                .into(),
            ],
            vec![],
            vec![],
        )
        .unwrap_err();
        let msg = format!("{}", err);
        assert!(matches!(err, WardenError::PolicyCreation(_)));
        assert!(msg.contains("subjects"));
    }

    #[test]
    fn test_mixed_dialects_across_fields_fail() {
        let err = Policy::new(
            "p",
            Effect::Allow,
            vec!["Max".into()],
            vec![Rule::Any {}.into()],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, WardenError::PolicyCreation(_)));
    }

    #[test]
    fn test_allow_access() {
        assert!(make_string_policy().allow_access());
        assert!(!make_rule_policy().allow_access());
    }

    #[test]
    fn test_default_delimiters() {
        let policy = make_string_policy();
        assert_eq!(policy.start_delimiter(), '<');
        assert_eq!(policy.end_delimiter(), '>');
    }

    #[test]
    fn test_setter_revalidates_and_rolls_back() {
        let mut policy = make_string_policy();
        let before = policy.subjects().to_vec();

        // Assigning rule specs to a string-based policy must fail and leave
        // the old value in place.
        let result = policy.set_subjects(vec![Rule::Any {}.into()]);
        assert!(result.is_err());
        assert_eq!(policy.subjects(), before.as_slice());
        assert_eq!(policy.kind(), PolicyKind::StringBased);
    }

    #[test]
    fn test_setter_can_switch_dialect_when_consistent() {
        let mut policy = Policy::new("p", Effect::Allow, vec![], vec![], vec![]).unwrap();
        policy.set_subjects(vec![Rule::Any {}.into()]).unwrap();
        assert_eq!(policy.kind(), PolicyKind::RuleBased);
    }

    #[test]
    fn test_json_round_trip_string_policy() {
        let policy = make_string_policy();
        let json = policy.to_json().unwrap();
        let back = Policy::from_json(&json).unwrap();
        assert_eq!(back, policy);

        let wire: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(wire["effect"], json!("allow"));
        assert_eq!(wire["type"], json!(1));
    }

    #[test]
    fn test_json_round_trip_rule_policy_with_context() {
        let mut policy = make_rule_policy();
        policy.set_context(HashMap::from([(
            "ip".to_string(),
            Rule::cidr("127.0.0.0/24").unwrap(),
        )]));
        let json = policy.to_json().unwrap();
        let back = Policy::from_json(&json).unwrap();
        assert_eq!(back, policy);

        let wire: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(wire["effect"], json!("deny"));
        assert_eq!(wire["type"], json!(2));
        assert_eq!(wire["context"]["ip"]["type"], json!("CIDR"));
    }

    #[test]
    fn test_wire_type_is_ignored_and_rederived() {
        let json = r#"{"uid": "p", "effect": "allow", "subjects": ["Max"], "type": 2}"#;
        let policy = Policy::from_json(json).unwrap();
        assert_eq!(policy.kind(), PolicyKind::StringBased);
    }

    #[test]
    fn test_legacy_rules_alias_for_context() {
        let json = r#"{
            "uid": "p", "effect": "allow",
            "rules": {"ip": {"type": "CIDR", "contents": {"cidr": "10.0.0.0/8"}}}
        }"#;
        let policy = Policy::from_json(json).unwrap();
        assert!(policy.context().contains_key("ip"));
    }

    #[test]
    fn test_context_wins_over_legacy_alias() {
        let json = r#"{
            "uid": "p", "effect": "allow",
            "context": {"a": {"type": "Any", "contents": {}}},
            "rules": {"b": {"type": "Any", "contents": {}}}
        }"#;
        let policy = Policy::from_json(json).unwrap();
        assert!(policy.context().contains_key("a"));
        assert!(!policy.context().contains_key("b"));
    }

    #[test]
    fn test_missing_uid_fails() {
        let err = Policy::from_json(r#"{"effect": "allow"}"#).unwrap_err();
        assert!(matches!(err, WardenError::Deserialization(_)));
    }

    #[test]
    fn test_mixed_wire_policy_fails() {
        let json = r#"{
            "uid": "p", "effect": "allow",
            "subjects": ["Max", {"type": "Eq", "contents": {"value": "Jane"}}]
        }"#;
        let err = Policy::from_json(json).unwrap_err();
        assert!(matches!(err, WardenError::Deserialization(_)));
    }

    #[test]
    fn test_malformed_json_fails() {
        assert!(Policy::from_json("{oops").is_err());
    }

    #[test]
    fn test_match_spec_wire_shapes() {
        let specs: Vec<MatchSpec> = serde_json::from_str(
            r#"["Max", {"type": "Any", "contents": {}}, {"name": {"type": "Any", "contents": {}}}]"#,
        )
        .unwrap();
        assert!(matches!(specs[0], MatchSpec::Literal(_)));
        assert!(matches!(specs[1], MatchSpec::Predicate(_)));
        assert!(matches!(specs[2], MatchSpec::Attributes(_)));
    }

    #[test]
    fn test_field_accessor() {
        let policy = make_string_policy();
        assert_eq!(policy.field(PolicyField::Subjects), policy.subjects());
        assert_eq!(policy.field(PolicyField::Actions), policy.actions());
        assert_eq!(policy.field(PolicyField::Resources), policy.resources());
        assert_eq!(PolicyField::Subjects.as_str(), "subjects");
    }
}
