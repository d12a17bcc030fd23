//! The rule engine: how should an identifier be virtualized?
//!
//! A [`RuleCollection`] is an ordered list of `(pattern, type)` rules.
//! Patterns are literals with an optional `%` wildcard at either end:
//!
//! | pattern     | matches identifiers that...  |
//! |-------------|------------------------------|
//! | `literal`   | equal the literal            |
//! | `literal%`  | start with the literal       |
//! | `%literal`  | end with the literal         |
//! | `%literal%` | contain the literal          |
//!
//! Matching is case-insensitive. When several rules match, the one with the
//! longest literal wins; among equally long literals the earliest registered
//! rule wins. Resolution is a pure function of the identifier and the
//! collection.

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const WILDCARD: char = '%';

/// How accesses to a matching resource are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VirtualizationType {
    /// Always use the real resource.
    Transparent,
    /// Read unknown resources from the real location, redirect writes.
    TransparentRead,
    /// Copy unknown resources into the virtual store on first access and
    /// redirect everything afterwards.
    #[serde(alias = "CreateAndCopy")]
    VirtualWithFallback,
    /// Always redirect; the real resource is never touched.
    Virtual,
}

impl VirtualizationType {
    /// True if unknown resources may be copied from their real location.
    pub fn copies_on_access(self) -> bool {
        matches!(
            self,
            VirtualizationType::TransparentRead | VirtualizationType::VirtualWithFallback
        )
    }
}

impl fmt::Display for VirtualizationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VirtualizationType::Transparent => "Transparent",
            VirtualizationType::TransparentRead => "TransparentRead",
            VirtualizationType::VirtualWithFallback => "VirtualWithFallback",
            VirtualizationType::Virtual => "Virtual",
        };
        f.write_str(name)
    }
}

impl FromStr for VirtualizationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Transparent" => Ok(VirtualizationType::Transparent),
            "TransparentRead" => Ok(VirtualizationType::TransparentRead),
            "VirtualWithFallback" | "CreateAndCopy" => Ok(VirtualizationType::VirtualWithFallback),
            "Virtual" => Ok(VirtualizationType::Virtual),
            other => Err(Error::InvalidConfig {
                message: format!("unknown virtualization type '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchMode {
    Exact,
    Prefix,
    Suffix,
    Contains,
}

/// A parsed, case-folded rule pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulePattern {
    source: String,
    literal: String,
    mode: MatchMode,
}

impl RulePattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let leading = pattern.starts_with(WILDCARD);
        let trailing = pattern.len() > 1 && pattern.ends_with(WILDCARD);
        let literal = &pattern[usize::from(leading)..pattern.len() - usize::from(trailing)];

        if literal.is_empty() {
            return Err(Error::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "pattern has no literal part".to_string(),
            });
        }
        if literal.contains(WILDCARD) {
            return Err(Error::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "wildcards are only allowed at the start or end".to_string(),
            });
        }

        let mode = match (leading, trailing) {
            (false, false) => MatchMode::Exact,
            (false, true) => MatchMode::Prefix,
            (true, false) => MatchMode::Suffix,
            (true, true) => MatchMode::Contains,
        };

        Ok(Self {
            source: pattern.to_string(),
            literal: literal.to_lowercase(),
            mode,
        })
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Length of the literal part, the precedence weight of the pattern.
    pub fn specificity(&self) -> usize {
        self.literal.len()
    }

    /// Match against an already case-folded identifier.
    fn matches_folded(&self, identifier: &str) -> bool {
        match self.mode {
            MatchMode::Exact => identifier == self.literal,
            MatchMode::Prefix => identifier.starts_with(&self.literal),
            MatchMode::Suffix => identifier.ends_with(&self.literal),
            MatchMode::Contains => identifier.contains(&self.literal),
        }
    }

    pub fn matches(&self, identifier: &str) -> bool {
        self.matches_folded(&identifier.to_lowercase())
    }

    fn same_pattern(&self, other: &RulePattern) -> bool {
        self.mode == other.mode && self.literal == other.literal
    }
}

impl fmt::Display for RulePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[derive(Serialize, Deserialize)]
struct RuleDefinition {
    pattern: String,
    #[serde(rename = "type")]
    virtualization_type: VirtualizationType,
}

/// One `(pattern, type)` rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RuleDefinition", into = "RuleDefinition")]
pub struct VirtualizationRule {
    pattern: RulePattern,
    virtualization_type: VirtualizationType,
}

impl VirtualizationRule {
    pub fn new(pattern: &str, virtualization_type: VirtualizationType) -> Result<Self> {
        Ok(Self {
            pattern: RulePattern::parse(pattern)?,
            virtualization_type,
        })
    }

    pub fn pattern(&self) -> &RulePattern {
        &self.pattern
    }

    pub fn virtualization_type(&self) -> VirtualizationType {
        self.virtualization_type
    }
}

impl TryFrom<RuleDefinition> for VirtualizationRule {
    type Error = Error;

    fn try_from(definition: RuleDefinition) -> Result<Self> {
        Self::new(&definition.pattern, definition.virtualization_type)
    }
}

impl From<VirtualizationRule> for RuleDefinition {
    fn from(rule: VirtualizationRule) -> Self {
        Self {
            pattern: rule.pattern.source,
            virtualization_type: rule.virtualization_type,
        }
    }
}

lazy_static! {
    static ref DEFAULT_REGISTRY_RULES: RuleCollection = {
        let mut rules = RuleCollection::new();
        for (pattern, virtualization_type) in [
            ("HKEY_USERS%", VirtualizationType::VirtualWithFallback),
            ("HKEY_CURRENT_USER%", VirtualizationType::VirtualWithFallback),
            ("HKEY_CURRENT_CONFIG%", VirtualizationType::TransparentRead),
            ("HKEY_LOCAL_MACHINE%", VirtualizationType::TransparentRead),
            ("HKEY_CLASSES_ROOT%", VirtualizationType::TransparentRead),
            ("HKEY_PERFORMANCE_DATA%", VirtualizationType::Transparent),
            ("HKEY_DYN_DATA%", VirtualizationType::Transparent),
        ] {
            rules.rules.push(VirtualizationRule {
                pattern: RulePattern {
                    source: pattern.to_string(),
                    literal: pattern.trim_end_matches(WILDCARD).to_lowercase(),
                    mode: MatchMode::Prefix,
                },
                virtualization_type,
            });
        }
        rules
    };
}

/// An ordered set of virtualization rules with a fallback type.
///
/// The fallback answers identifiers no rule matches; callers that need to
/// tell the two cases apart use [`RuleCollection::has_rule`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCollection {
    rules: Vec<VirtualizationRule>,
    #[serde(default = "default_fallback")]
    fallback: VirtualizationType,
}

fn default_fallback() -> VirtualizationType {
    VirtualizationType::TransparentRead
}

impl Default for RuleCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleCollection {
    /// An empty collection falling back to `TransparentRead`.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            fallback: default_fallback(),
        }
    }

    pub fn from_rules(rules: impl IntoIterator<Item = VirtualizationRule>) -> Self {
        let mut collection = Self::new();
        for rule in rules {
            collection.insert(rule);
        }
        collection
    }

    /// The registry rules every environment starts with.
    pub fn default_registry() -> Self {
        DEFAULT_REGISTRY_RULES.clone()
    }

    pub fn with_fallback(mut self, fallback: VirtualizationType) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn fallback(&self) -> VirtualizationType {
        self.fallback
    }

    /// Add a rule, or change the type of an existing rule with the same
    /// pattern (keeping its registration position).
    pub fn set_rule(&mut self, pattern: &str, virtualization_type: VirtualizationType) -> Result<()> {
        self.insert(VirtualizationRule::new(pattern, virtualization_type)?);
        Ok(())
    }

    fn insert(&mut self, rule: VirtualizationRule) {
        match self
            .rules
            .iter_mut()
            .find(|existing| existing.pattern.same_pattern(&rule.pattern))
        {
            Some(existing) => existing.virtualization_type = rule.virtualization_type,
            None => self.rules.push(rule),
        }
    }

    /// The rule that governs `identifier`, if any.
    pub fn find(&self, identifier: &str) -> Option<&VirtualizationRule> {
        let folded = identifier.to_lowercase();
        let mut best: Option<&VirtualizationRule> = None;
        for rule in &self.rules {
            if !rule.pattern.matches_folded(&folded) {
                continue;
            }
            match best {
                Some(current) if current.pattern.specificity() >= rule.pattern.specificity() => {}
                _ => best = Some(rule),
            }
        }
        best
    }

    pub fn has_rule(&self, identifier: &str) -> bool {
        self.find(identifier).is_some()
    }

    /// The virtualization type for `identifier`, or the fallback.
    pub fn resolve(&self, identifier: &str) -> VirtualizationType {
        self.resolve_or(identifier, self.fallback)
    }

    /// The virtualization type for `identifier`, or a caller-supplied fallback.
    pub fn resolve_or(&self, identifier: &str, fallback: VirtualizationType) -> VirtualizationType {
        self.find(identifier)
            .map(VirtualizationRule::virtualization_type)
            .unwrap_or(fallback)
    }

    pub fn rules(&self) -> &[VirtualizationRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection(rules: &[(&str, VirtualizationType)]) -> RuleCollection {
        let mut collection = RuleCollection::new();
        for (pattern, ty) in rules {
            collection.set_rule(pattern, *ty).unwrap();
        }
        collection
    }

    #[test]
    fn default_registry_rules() {
        let rules = RuleCollection::default_registry();
        assert_eq!(rules.len(), 7);
        assert_eq!(
            rules.resolve("HKEY_CURRENT_USER\\Software\\X"),
            VirtualizationType::VirtualWithFallback
        );
        assert_eq!(
            rules.resolve("HKEY_LOCAL_MACHINE\\Software\\X"),
            VirtualizationType::TransparentRead
        );
        assert_eq!(
            rules.resolve("hkey_users\\s-1-5-18"),
            VirtualizationType::VirtualWithFallback
        );
        assert_eq!(
            rules.resolve("HKEY_PERFORMANCE_DATA"),
            VirtualizationType::Transparent
        );
        assert_eq!(rules.rules()[0].pattern().as_str(), "HKEY_USERS%");
    }

    #[test]
    fn default_rules_match_parsed_rules() {
        let parsed = collection(&[
            ("HKEY_USERS%", VirtualizationType::VirtualWithFallback),
            ("HKEY_CURRENT_USER%", VirtualizationType::VirtualWithFallback),
            ("HKEY_CURRENT_CONFIG%", VirtualizationType::TransparentRead),
            ("HKEY_LOCAL_MACHINE%", VirtualizationType::TransparentRead),
            ("HKEY_CLASSES_ROOT%", VirtualizationType::TransparentRead),
            ("HKEY_PERFORMANCE_DATA%", VirtualizationType::Transparent),
            ("HKEY_DYN_DATA%", VirtualizationType::Transparent),
        ]);
        assert_eq!(parsed, RuleCollection::default_registry());
    }

    #[test]
    fn wildcard_modes() {
        let exact = RulePattern::parse("C:\\Windows").unwrap();
        assert!(exact.matches("c:\\windows"));
        assert!(!exact.matches("c:\\windows\\system32"));

        let prefix = RulePattern::parse("C:\\Windows%").unwrap();
        assert!(prefix.matches("C:\\WINDOWS\\system32"));
        assert!(!prefix.matches("d:\\c:\\windows"));

        let suffix = RulePattern::parse("%.dll").unwrap();
        assert!(suffix.matches("c:\\app\\Lib.DLL"));
        assert!(!suffix.matches("c:\\app\\lib.dll.bak"));

        let contains = RulePattern::parse("%\\temp\\%").unwrap();
        assert!(contains.matches("c:\\users\\me\\temp\\x"));
        assert!(!contains.matches("c:\\tempfiles"));
    }

    #[test]
    fn malformed_patterns_are_rejected() {
        for pattern in ["", "%", "%%", "a%b", "%a%b%"] {
            assert!(
                matches!(RulePattern::parse(pattern), Err(Error::InvalidPattern { .. })),
                "pattern {:?} should be rejected",
                pattern
            );
        }
    }

    #[test]
    fn longest_literal_wins() {
        let rules = collection(&[
            ("C:\\%", VirtualizationType::Virtual),
            ("C:\\Windows%", VirtualizationType::Transparent),
            ("%\\Temp%", VirtualizationType::TransparentRead),
        ]);
        assert_eq!(
            rules.resolve("c:\\windows\\notepad.exe"),
            VirtualizationType::Transparent
        );
        assert_eq!(rules.resolve("c:\\program files"), VirtualizationType::Virtual);
        // "c:\windows" (10) beats "\temp" (5) even though both match
        assert_eq!(
            rules.resolve("c:\\windows\\temp\\x"),
            VirtualizationType::Transparent
        );
    }

    #[test]
    fn equal_length_ties_go_to_earliest_rule() {
        let rules = collection(&[
            ("%abc", VirtualizationType::Virtual),
            ("abc%", VirtualizationType::Transparent),
        ]);
        assert_eq!(rules.resolve("abc"), VirtualizationType::Virtual);
    }

    #[test]
    fn set_rule_replaces_in_place() {
        let mut rules = collection(&[
            ("A%", VirtualizationType::Virtual),
            ("%B", VirtualizationType::Virtual),
        ]);
        rules.set_rule("a%", VirtualizationType::Transparent).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(
            rules.rules()[0].virtualization_type(),
            VirtualizationType::Transparent
        );
    }

    #[test]
    fn fallback_when_no_rule_matches() {
        let rules = RuleCollection::new();
        assert!(!rules.has_rule("c:\\temp\\a.txt"));
        assert_eq!(
            rules.resolve("c:\\temp\\a.txt"),
            VirtualizationType::TransparentRead
        );
        assert_eq!(
            rules.resolve_or("c:\\temp\\a.txt", VirtualizationType::Virtual),
            VirtualizationType::Virtual
        );

        let rules = RuleCollection::new().with_fallback(VirtualizationType::Virtual);
        assert_eq!(rules.resolve("x"), VirtualizationType::Virtual);
    }

    #[test]
    fn resolution_is_pure() {
        let rules = RuleCollection::default_registry();
        let first = rules.resolve("HKEY_CLASSES_ROOT\\.txt");
        for _ in 0..10 {
            assert_eq!(rules.resolve("HKEY_CLASSES_ROOT\\.txt"), first);
        }
    }

    #[test]
    fn rules_deserialize_from_json() {
        let rules: Vec<VirtualizationRule> = serde_json::from_str(
            r#"[{"pattern": "%.log", "type": "Virtual"},
                {"pattern": "C:\\Data%", "type": "CreateAndCopy"}]"#,
        )
        .unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(
            rules[1].virtualization_type(),
            VirtualizationType::VirtualWithFallback
        );

        let bad = serde_json::from_str::<VirtualizationRule>(r#"{"pattern": "a%b", "type": "Virtual"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn type_names_parse() {
        assert_eq!(
            "CreateAndCopy".parse::<VirtualizationType>().unwrap(),
            VirtualizationType::VirtualWithFallback
        );
        assert!("Opaque".parse::<VirtualizationType>().is_err());
        assert!(VirtualizationType::TransparentRead.copies_on_access());
        assert!(!VirtualizationType::Virtual.copies_on_access());
    }
}
