use ipnetwork::IpNetwork;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::net::IpAddr;

use crate::error::{WardenError, WardenResult};
use crate::inquiry::Inquiry;

// ---------------------------------------------------------------------------
// Validated carrier types — construction and deserialization both validate
// ---------------------------------------------------------------------------

/// A regex carried by [`Rule::RegexMatch`], compiled eagerly so an invalid
/// pattern fails at rule creation (or deserialization), never at evaluation.
#[derive(Debug, Clone)]
pub struct RulePattern {
    source: String,
    regex: Regex,
}

impl RulePattern {
    pub fn new(source: impl Into<String>) -> WardenResult<Self> {
        let source = source.into();
        let regex = Regex::new(&source).map_err(|e| WardenError::InvalidRegex(e.to_string()))?;
        Ok(Self { source, regex })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

impl PartialEq for RulePattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for RulePattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.source.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RulePattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        RulePattern::new(source).map_err(serde::de::Error::custom)
    }
}

/// A parsed CIDR network carried by [`Rule::Cidr`]. The source notation is
/// kept for lossless serialization.
#[derive(Debug, Clone)]
pub struct CidrNet {
    source: String,
    network: IpNetwork,
}

impl CidrNet {
    pub fn new(source: impl Into<String>) -> WardenResult<Self> {
        let source = source.into();
        let network = source
            .parse::<IpNetwork>()
            .map_err(|e| WardenError::RuleCreation(format!("invalid CIDR '{}': {}", source, e)))?;
        Ok(Self { source, network })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    fn contains(&self, ip: IpAddr) -> bool {
        self.network.contains(ip)
    }
}

impl PartialEq for CidrNet {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for CidrNet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.source.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CidrNet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        CidrNet::new(source).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Rule — the closed predicate union
// ---------------------------------------------------------------------------

/// A named predicate over an inquiry field value.
///
/// Rules form a closed set: new behavior is added by adding a variant here,
/// never by embedding executable code in policies. The wire shape is
/// `{"type": "<variant>", "contents": {field: value, ...}}`; unknown variant
/// names, missing fields and stray fields all fail deserialization, and
/// validated carriers ([`RulePattern`], [`CidrNet`]) re-check themselves on
/// the way in, so a deserialized rule is always in the same valid state a
/// constructed one is.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "contents")]
pub enum Rule {
    // Comparison over arbitrary JSON values. Eq/NotEq are deep equality;
    // ordering is defined for number/number and string/string pairs only.
    Eq { value: Value },
    NotEq { value: Value },
    Greater { value: Value },
    Less { value: Value },
    GreaterOrEqual { value: Value },
    LessOrEqual { value: Value },

    // String predicates. A non-string input is simply not satisfied.
    Equal {
        value: String,
        case_insensitive: bool,
    },
    StartsWith {
        value: String,
        case_insensitive: bool,
    },
    EndsWith {
        value: String,
        case_insensitive: bool,
    },
    Contains {
        value: String,
        case_insensitive: bool,
    },
    RegexMatch { pattern: RulePattern },
    /// Input must be a sequence of 2-element pairs whose two string
    /// elements are equal.
    PairsEqual {},

    /// Input must be an IP-literal string contained in the network.
    /// Non-IP or malformed input is not satisfied, never an error.
    #[serde(rename = "CIDR")]
    Cidr { cidr: CidrNet },

    // List membership. InList/NotInList test the scalar input itself;
    // the All*/Any* forms require the input to be a list and fail with a
    // type error otherwise.
    InList { values: Vec<Value> },
    NotInList { values: Vec<Value> },
    AllInList { values: Vec<Value> },
    AllNotInList { values: Vec<Value> },
    AnyInList { values: Vec<Value> },
    AnyNotInList { values: Vec<Value> },

    // Logical combinators. `And` short-circuits on the first false operand,
    // `Or` on the first true one.
    Not { rule: Box<Rule> },
    And { rules: Vec<Rule> },
    Or { rules: Vec<Rule> },
    /// Always satisfied.
    Any {},

    // Inquiry-bound predicates: compare the input against the inquiry the
    // guard is currently evaluating. Without an inquiry they are not
    // satisfied (fail-closed).
    SubjectEqual {},
    ActionEqual {},
    SubjectMatch {
        attribute: Option<String>,
    },
    ActionMatch {
        attribute: Option<String>,
    },
    ResourceMatch {
        attribute: Option<String>,
    },
    /// Input must be a list containing the inquiry's resource.
    ResourceIn {},
}

impl Rule {
    /// Build a [`Rule::RegexMatch`], failing on an invalid regex.
    pub fn regex_match(pattern: impl Into<String>) -> WardenResult<Self> {
        Ok(Rule::RegexMatch {
            pattern: RulePattern::new(pattern)?,
        })
    }

    /// Build a [`Rule::Cidr`], failing on malformed CIDR notation.
    pub fn cidr(network: impl Into<String>) -> WardenResult<Self> {
        Ok(Rule::Cidr {
            cidr: CidrNet::new(network)?,
        })
    }

    pub fn in_list(values: Vec<Value>) -> WardenResult<Self> {
        ensure_scalars(&values)?;
        Ok(Rule::InList { values })
    }

    pub fn not_in_list(values: Vec<Value>) -> WardenResult<Self> {
        ensure_scalars(&values)?;
        Ok(Rule::NotInList { values })
    }

    pub fn all_in_list(values: Vec<Value>) -> WardenResult<Self> {
        ensure_scalars(&values)?;
        Ok(Rule::AllInList { values })
    }

    pub fn all_not_in_list(values: Vec<Value>) -> WardenResult<Self> {
        ensure_scalars(&values)?;
        Ok(Rule::AllNotInList { values })
    }

    pub fn any_in_list(values: Vec<Value>) -> WardenResult<Self> {
        ensure_scalars(&values)?;
        Ok(Rule::AnyInList { values })
    }

    pub fn any_not_in_list(values: Vec<Value>) -> WardenResult<Self> {
        ensure_scalars(&values)?;
        Ok(Rule::AnyNotInList { values })
    }

    /// Evaluate this rule against a field value, with the surrounding
    /// inquiry available to the inquiry-bound variants.
    ///
    /// Rules designed for a specific input shape return `Ok(false)` on a
    /// mismatching value (string rules, CIDR, comparisons); the list-input
    /// forms (`AllInList` family, `ResourceIn`) demand a list and return a
    /// type error otherwise.
    pub fn satisfied(&self, value: &Value, inquiry: Option<&Inquiry>) -> WardenResult<bool> {
        match self {
            Rule::Eq { value: other } => Ok(value == other),
            Rule::NotEq { value: other } => Ok(value != other),
            Rule::Greater { value: other } => {
                Ok(compare(value, other) == Some(Ordering::Greater))
            }
            Rule::Less { value: other } => Ok(compare(value, other) == Some(Ordering::Less)),
            Rule::GreaterOrEqual { value: other } => Ok(matches!(
                compare(value, other),
                Some(Ordering::Greater) | Some(Ordering::Equal)
            )),
            Rule::LessOrEqual { value: other } => Ok(matches!(
                compare(value, other),
                Some(Ordering::Less) | Some(Ordering::Equal)
            )),

            Rule::Equal {
                value: other,
                case_insensitive,
            } => Ok(str_input(value)
                .map_or(false, |s| str_eq(s, other, *case_insensitive))),
            Rule::StartsWith {
                value: other,
                case_insensitive,
            } => Ok(str_input(value).map_or(false, |s| {
                if *case_insensitive {
                    s.to_lowercase().starts_with(&other.to_lowercase())
                } else {
                    s.starts_with(other.as_str())
                }
            })),
            Rule::EndsWith {
                value: other,
                case_insensitive,
            } => Ok(str_input(value).map_or(false, |s| {
                if *case_insensitive {
                    s.to_lowercase().ends_with(&other.to_lowercase())
                } else {
                    s.ends_with(other.as_str())
                }
            })),
            Rule::Contains {
                value: other,
                case_insensitive,
            } => Ok(str_input(value).map_or(false, |s| {
                if *case_insensitive {
                    s.to_lowercase().contains(&other.to_lowercase())
                } else {
                    s.contains(other.as_str())
                }
            })),
            Rule::RegexMatch { pattern } => {
                Ok(str_input(value).map_or(false, |s| pattern.is_match(s)))
            }
            Rule::PairsEqual {} => Ok(pairs_equal(value)),

            Rule::Cidr { cidr } => Ok(str_input(value)
                .and_then(|s| s.parse::<IpAddr>().ok())
                .map_or(false, |ip| cidr.contains(ip))),

            Rule::InList { values } => Ok(values.contains(value)),
            Rule::NotInList { values } => Ok(!values.contains(value)),
            Rule::AllInList { values } => {
                Ok(list_input(value)?.iter().all(|item| values.contains(item)))
            }
            Rule::AllNotInList { values } => {
                Ok(list_input(value)?.iter().all(|item| !values.contains(item)))
            }
            Rule::AnyInList { values } => {
                Ok(list_input(value)?.iter().any(|item| values.contains(item)))
            }
            Rule::AnyNotInList { values } => {
                Ok(list_input(value)?.iter().any(|item| !values.contains(item)))
            }

            Rule::Not { rule } => Ok(!rule.satisfied(value, inquiry)?),
            Rule::And { rules } => {
                for rule in rules {
                    if !rule.satisfied(value, inquiry)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Rule::Or { rules } => {
                for rule in rules {
                    if rule.satisfied(value, inquiry)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Rule::Any {} => Ok(true),

            Rule::SubjectEqual {} => Ok(inquiry.map_or(false, |i| value == &i.subject)),
            Rule::ActionEqual {} => Ok(inquiry.map_or(false, |i| value == &i.action)),
            Rule::SubjectMatch { attribute } => {
                Ok(inquiry.map_or(false, |i| field_matches(value, &i.subject, attribute)))
            }
            Rule::ActionMatch { attribute } => {
                Ok(inquiry.map_or(false, |i| field_matches(value, &i.action, attribute)))
            }
            Rule::ResourceMatch { attribute } => {
                Ok(inquiry.map_or(false, |i| field_matches(value, &i.resource, attribute)))
            }
            Rule::ResourceIn {} => {
                let items = list_input(value)?;
                Ok(inquiry.map_or(false, |i| items.contains(&i.resource)))
            }
        }
    }

    pub fn to_json(&self) -> WardenResult<String> {
        serde_json::to_string(self).map_err(|e| WardenError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> WardenResult<Self> {
        serde_json::from_str(json).map_err(|e| WardenError::Deserialization(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

// Serialization is derived (adjacently tagged). Deserialization is manual:
// serde's tag/content representation cannot carry `deny_unknown_fields`, and
// a silently dropped contents field would let a misspelled rule pass as a
// weaker one. The contents key set must match the variant's fields exactly,
// optional fields aside.
impl<'de> Deserialize<'de> for Rule {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        let Value::Object(mut outer) = Value::deserialize(deserializer)? else {
            return Err(D::Error::custom("rule must be a JSON object"));
        };
        let name = match outer.remove("type") {
            Some(Value::String(name)) => name,
            Some(_) => return Err(D::Error::custom("rule 'type' must be a string")),
            None => return Err(D::Error::custom("rule is missing 'type'")),
        };
        let contents = match outer.remove("contents") {
            Some(Value::Object(contents)) => contents,
            Some(_) => return Err(D::Error::custom("rule 'contents' must be an object")),
            None => Map::new(),
        };
        if let Some(extra) = outer.keys().next() {
            return Err(D::Error::custom(format!("unknown rule field '{}'", extra)));
        }
        build_rule(&name, contents).map_err(D::Error::custom)
    }
}

fn required<T: DeserializeOwned>(
    contents: &mut Map<String, Value>,
    key: &str,
) -> Result<T, String> {
    let value = contents
        .remove(key)
        .ok_or_else(|| format!("missing field '{}'", key))?;
    serde_json::from_value(value).map_err(|e| format!("field '{}': {}", key, e))
}

fn optional<T: DeserializeOwned + Default>(
    contents: &mut Map<String, Value>,
    key: &str,
) -> Result<T, String> {
    match contents.remove(key) {
        Some(value) => {
            serde_json::from_value(value).map_err(|e| format!("field '{}': {}", key, e))
        }
        None => Ok(T::default()),
    }
}

fn build_rule(name: &str, mut c: Map<String, Value>) -> Result<Rule, String> {
    // The list rules go through their validated constructors, so scalar-only
    // element checks hold for deserialized rules too.
    let rule = match name {
        "Eq" => Rule::Eq {
            value: required(&mut c, "value")?,
        },
        "NotEq" => Rule::NotEq {
            value: required(&mut c, "value")?,
        },
        "Greater" => Rule::Greater {
            value: required(&mut c, "value")?,
        },
        "Less" => Rule::Less {
            value: required(&mut c, "value")?,
        },
        "GreaterOrEqual" => Rule::GreaterOrEqual {
            value: required(&mut c, "value")?,
        },
        "LessOrEqual" => Rule::LessOrEqual {
            value: required(&mut c, "value")?,
        },
        "Equal" => Rule::Equal {
            value: required(&mut c, "value")?,
            case_insensitive: optional(&mut c, "case_insensitive")?,
        },
        "StartsWith" => Rule::StartsWith {
            value: required(&mut c, "value")?,
            case_insensitive: optional(&mut c, "case_insensitive")?,
        },
        "EndsWith" => Rule::EndsWith {
            value: required(&mut c, "value")?,
            case_insensitive: optional(&mut c, "case_insensitive")?,
        },
        "Contains" => Rule::Contains {
            value: required(&mut c, "value")?,
            case_insensitive: optional(&mut c, "case_insensitive")?,
        },
        "RegexMatch" => Rule::RegexMatch {
            pattern: required(&mut c, "pattern")?,
        },
        "PairsEqual" => Rule::PairsEqual {},
        "CIDR" => Rule::Cidr {
            cidr: required(&mut c, "cidr")?,
        },
        "InList" => Rule::in_list(required(&mut c, "values")?).map_err(|e| e.to_string())?,
        "NotInList" => {
            Rule::not_in_list(required(&mut c, "values")?).map_err(|e| e.to_string())?
        }
        "AllInList" => {
            Rule::all_in_list(required(&mut c, "values")?).map_err(|e| e.to_string())?
        }
        "AllNotInList" => {
            Rule::all_not_in_list(required(&mut c, "values")?).map_err(|e| e.to_string())?
        }
        "AnyInList" => {
            Rule::any_in_list(required(&mut c, "values")?).map_err(|e| e.to_string())?
        }
        "AnyNotInList" => {
            Rule::any_not_in_list(required(&mut c, "values")?).map_err(|e| e.to_string())?
        }
        "Not" => Rule::Not {
            rule: required(&mut c, "rule")?,
        },
        "And" => Rule::And {
            rules: required(&mut c, "rules")?,
        },
        "Or" => Rule::Or {
            rules: required(&mut c, "rules")?,
        },
        "Any" => Rule::Any {},
        "SubjectEqual" => Rule::SubjectEqual {},
        "ActionEqual" => Rule::ActionEqual {},
        "SubjectMatch" => Rule::SubjectMatch {
            attribute: optional(&mut c, "attribute")?,
        },
        "ActionMatch" => Rule::ActionMatch {
            attribute: optional(&mut c, "attribute")?,
        },
        "ResourceMatch" => Rule::ResourceMatch {
            attribute: optional(&mut c, "attribute")?,
        },
        "ResourceIn" => Rule::ResourceIn {},
        _ => return Err(format!("unknown rule type '{}'", name)),
    };
    if let Some(extra) = c.keys().next() {
        return Err(format!(
            "unknown field '{}' for rule type '{}'",
            extra, name
        ));
    }
    Ok(rule)
}

// ---------------------------------------------------------------------------
// Evaluation helpers
// ---------------------------------------------------------------------------

/// Partial ordering across JSON values: numbers against numbers, strings
/// against strings. Anything else is unordered.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn str_input(value: &Value) -> Option<&str> {
    value.as_str()
}

fn str_eq(a: &str, b: &str, case_insensitive: bool) -> bool {
    if case_insensitive {
        a.to_lowercase() == b.to_lowercase()
    } else {
        a == b
    }
}

fn pairs_equal(value: &Value) -> bool {
    let Some(items) = value.as_array() else {
        return false;
    };
    items.iter().all(|pair| match pair.as_array() {
        Some(p) if p.len() == 2 => match (p[0].as_str(), p[1].as_str()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        _ => false,
    })
}

fn list_input(value: &Value) -> WardenResult<&Vec<Value>> {
    value.as_array().ok_or_else(|| {
        WardenError::TypeError(format!("expected a list value, got {}", json_type(value)))
    })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Compare an input against an inquiry field, or against one of its named
/// attributes when `attribute` is set. A missing attribute or a non-object
/// field never matches.
fn field_matches(value: &Value, field: &Value, attribute: &Option<String>) -> bool {
    match attribute {
        None => value == field,
        Some(attr) => field
            .as_object()
            .and_then(|map| map.get(attr))
            .map_or(false, |found| found == value),
    }
}

fn ensure_scalars(values: &[Value]) -> WardenResult<()> {
    for value in values {
        if value.is_array() || value.is_object() {
            return Err(WardenError::RuleCreation(format!(
                "list membership rules require scalar elements, got {}",
                json_type(value)
            )));
        }
    }
    Ok(())
}
