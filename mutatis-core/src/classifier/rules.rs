//! Ordered rule lists used by the classifier.
//!
//! Both lists are evaluated top-down and the first hit wins, so the order of
//! [`RuleBook::standard`] is the priority order: identity, family, medical,
//! beliefs, preferences, life events, then occupation and location.

use crate::error::{Error, Result};
use crate::evolution::naming::validate_identifier;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Broad family a foundational rule belongs to, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Identity,
    Family,
    Medical,
    Belief,
    Preference,
    LifeEvent,
    Occupation,
    Location,
}

/// How the `entity` capture group is turned into a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRule {
    /// A single word, e.g. a first name
    FirstWord,
    /// Up to `max_words` words, cut at the first connective
    Phrase { max_words: usize },
}

/// Words that end a phrase entity.
const PHRASE_BREAKS: &[&str] = &[
    "and", "but", "with", "because", "since", "who", "which", "when", "where", "while", "so",
    "for", "at", "in", "on", "to", "from", "of", "now", "too", "every",
];

/// Words that can open a phrase but are not part of the entity.
const LEADING_ARTICLES: &[&str] = &["a", "an", "the", "my"];

/// Captures that refer to someone without naming them.
const PRONOUNS: &[&str] = &["she", "he", "they", "it", "this", "that", "who", "her", "him"];

impl EntityRule {
    /// Reduce a raw capture to an entity, or `None` if nothing usable is left.
    pub fn extract(self, raw: &str) -> Option<String> {
        let mut words = raw
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|w| !w.is_empty())
            .peekable();

        let entity = match self {
            EntityRule::FirstWord => words.next()?.to_string(),
            EntityRule::Phrase { max_words } => {
                while words.peek().is_some_and(|w| LEADING_ARTICLES.contains(w)) {
                    words.next();
                }
                words
                    .take_while(|w| !PHRASE_BREAKS.contains(w))
                    .take(max_words)
                    .collect::<Vec<_>>()
                    .join(" ")
            }
        };

        if entity.is_empty() || PRONOUNS.contains(&entity.as_str()) {
            None
        } else {
            Some(entity)
        }
    }
}

/// One foundational detection rule.
#[derive(Debug, Clone)]
pub struct PatternRule {
    /// Pattern type recorded in the tracker; also names the evolved relation
    pub label: String,
    pub category: RuleCategory,
    /// Confidence assigned on the first sighting of an entity
    pub base_confidence: f64,
    pub extract: EntityRule,
    matcher: Regex,
}

impl PatternRule {
    /// Build a rule. `pattern` must define a named `entity` group and is
    /// matched against lower-cased text.
    pub fn new(
        label: impl Into<String>,
        category: RuleCategory,
        base_confidence: f64,
        extract: EntityRule,
        pattern: &str,
    ) -> Result<Self> {
        let label = label.into();
        validate_identifier(&label)?;
        if !(0.0..=1.0).contains(&base_confidence) {
            return Err(Error::validation(format!(
                "base confidence {} for '{}' is outside 0..1",
                base_confidence, label
            )));
        }
        let matcher = Regex::new(pattern)
            .map_err(|e| Error::validation(format!("rule '{}': {}", label, e)))?;
        if !matcher.capture_names().any(|name| name == Some("entity")) {
            return Err(Error::validation(format!(
                "rule '{}' has no 'entity' capture group",
                label
            )));
        }
        Ok(Self {
            label,
            category,
            base_confidence,
            extract,
            matcher,
        })
    }

    /// Match normalized text, returning the extracted entity on a hit.
    ///
    /// `Some(None)` means the rule matched but no entity could be extracted.
    pub fn apply(&self, text: &str) -> Option<Option<String>> {
        let captures = self.matcher.captures(text)?;
        Some(
            captures
                .name("entity")
                .and_then(|m| self.extract.extract(m.as_str())),
        )
    }
}

/// Ordered list of foundational rules.
#[derive(Debug, Clone)]
pub struct RuleBook {
    rules: Vec<PatternRule>,
}

impl RuleBook {
    pub fn new(rules: Vec<PatternRule>) -> Self {
        Self { rules }
    }

    /// The built-in rule list.
    pub fn standard() -> Self {
        STANDARD_RULES.clone()
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    /// First rule that matches, with its extracted entity.
    pub fn first_match(&self, text: &str) -> Option<(&PatternRule, Option<String>)> {
        self.rules
            .iter()
            .find_map(|rule| rule.apply(text).map(|entity| (rule, entity)))
    }
}

impl Default for RuleBook {
    fn default() -> Self {
        Self::standard()
    }
}

fn rule(
    label: &str,
    category: RuleCategory,
    base_confidence: f64,
    extract: EntityRule,
    pattern: &str,
) -> PatternRule {
    PatternRule::new(label, category, base_confidence, extract, pattern).expect("invalid rule")
}

const NAME: &str = r"\p{L}[\p{L}'\-]*\b";

static STANDARD_RULES: LazyLock<RuleBook> = LazyLock::new(|| {
    use EntityRule::*;
    use RuleCategory::*;
    let phrase = Phrase { max_words: 3 };
    RuleBook::new(vec![
        rule(
            "identity_name",
            Identity,
            0.90,
            FirstWord,
            &format!(r"\b(?:my name is|my name's|i am called|i'm called|people call me|you can call me|everyone calls me)\s+(?P<entity>{NAME})"),
        ),
        rule(
            "family_spouse",
            Family,
            0.85,
            FirstWord,
            &format!(r"\bmy (?:wife|husband|spouse|partner|fiancee|fiance)(?:'s name)? (?:is|was) (?:named |called )?(?P<entity>{NAME})"),
        ),
        rule(
            "family_spouse",
            Family,
            0.85,
            FirstWord,
            &format!(r"\b(?P<entity>{NAME}) is my (?:wife|husband|spouse|partner|fiancee|fiance)\b"),
        ),
        rule(
            "family_child",
            Family,
            0.85,
            FirstWord,
            &format!(r"\bmy (?:son|daughter|child|kid|baby)(?:'s name)? (?:is|was) (?:named |called )?(?P<entity>{NAME})"),
        ),
        rule(
            "family_parent",
            Family,
            0.85,
            FirstWord,
            &format!(r"\bmy (?:mother|father|mom|mum|dad|stepmother|stepfather)(?:'s name)? (?:is|was) (?:named |called )?(?P<entity>{NAME})"),
        ),
        rule(
            "family_sibling",
            Family,
            0.85,
            FirstWord,
            &format!(r"\bmy (?:brother|sister|sibling)(?:'s name)? (?:is|was) (?:named |called )?(?P<entity>{NAME})"),
        ),
        rule(
            "medical_allergy",
            Medical,
            0.90,
            phrase,
            r"\bi(?:'m| am) (?:severely |very |deathly |highly )?allergic to (?P<entity>\p{L}[\p{L}' \-]*\b)",
        ),
        rule(
            "medical_condition",
            Medical,
            0.90,
            phrase,
            r"\bi (?:have|suffer from|was diagnosed with|live with) (?P<entity>(?:type [12] )?diabetes|asthma|epilepsy|hypertension|celiac(?: disease)?|crohn's(?: disease)?|adhd|migraines|a heart condition|a pacemaker)\b",
        ),
        rule(
            "medical_medication",
            Medical,
            0.85,
            FirstWord,
            r"\bi take (?P<entity>\p{L}[\p{L}\-]*) (?:daily|every day|every morning|every night|twice a day|for my)\b",
        ),
        rule(
            "belief_religion",
            Belief,
            0.80,
            FirstWord,
            r"\bi(?:'m| am) (?:a |an )?(?:devout |practicing |practising )?(?P<entity>christian|muslim|jewish|hindu|buddhist|sikh|atheist|agnostic|catholic|protestant)\b",
        ),
        rule(
            "belief_value",
            Belief,
            0.80,
            phrase,
            r"\bi (?:strongly |firmly |really )?believe in (?P<entity>\p{L}[\p{L}' \-]*\b)",
        ),
        rule(
            "preference_diet",
            Preference,
            0.80,
            FirstWord,
            r"\bi(?:'m| am) (?:a |an )?(?:strict )?(?P<entity>vegan|vegetarian|pescatarian|teetotaler|teetotal)\b",
        ),
        rule(
            "preference_favorite",
            Preference,
            0.75,
            phrase,
            r"\bmy (?:favorite|favourite) \p{L}+ is (?P<entity>[\p{L}\p{N}][\p{L}\p{N}' \-]*\b)",
        ),
        rule(
            "preference_like",
            Preference,
            0.75,
            phrase,
            r"\bi (?:really |absolutely |truly )?(?:love|like|enjoy|prefer|adore|hate|dislike|can't stand) (?P<entity>\p{L}[\p{L}' \-]*\b)",
        ),
        rule(
            "life_event",
            LifeEvent,
            0.80,
            phrase,
            r"\bi (?:got married|got divorced|graduated|was born|moved|retired) (?:in|on|at|to|from) (?P<entity>[\p{L}\p{N}][\p{L}\p{N}' \-]*\b)",
        ),
        rule(
            "occupation_employer",
            Occupation,
            0.80,
            phrase,
            r"\bi (?:work|am employed|intern) (?:at|for) (?P<entity>[\p{L}\p{N}][\p{L}\p{N}' \-]*\b)",
        ),
        rule(
            "occupation_role",
            Occupation,
            0.80,
            phrase,
            r"\bi work as (?P<entity>\p{L}[\p{L}' \-]*\b)",
        ),
        rule(
            "location",
            Location,
            0.80,
            phrase,
            r"\bi (?:live|reside|grew up|am based) in (?P<entity>\p{L}[\p{L}' \-]*\b)",
        ),
    ])
});

/// One transient-intent rule.
#[derive(Debug)]
pub struct TransientRule {
    pub label: &'static str,
    matcher: Regex,
}

impl TransientRule {
    pub fn is_match(&self, text: &str) -> bool {
        self.matcher.is_match(text)
    }
}

static TRANSIENT_RULES: LazyLock<Vec<TransientRule>> = LazyLock::new(|| {
    let transient = |label: &'static str, pattern: &str| TransientRule {
        label,
        matcher: Regex::new(pattern).expect("invalid regex"),
    };
    vec![
        transient(
            "request",
            r"^\s*(?:please|can you|could you|would you|will you|help me|tell me|show me|let me know|find me|call me|text me|email me|message me|ping me)\b",
        ),
        transient(
            "reminder",
            r"\b(?:remind me|reminder|don't forget|do not forget|set an? (?:alarm|timer))\b",
        ),
        transient(
            "weather",
            r"\b(?:weather|forecast|raining|snowing|sunny outside|rain today)\b",
        ),
        transient(
            "ephemeral_state",
            r"\bi(?:'m| am| feel|'m feeling| am feeling)\s+(?:so |really |very |a bit |kind of |pretty )?(?:hungry|thirsty|tired|sleepy|bored|cold|hot|sick|stressed|anxious|sad|happy|excited|angry|busy|exhausted|grumpy)\b",
        ),
        transient(
            "yes_no_question",
            r"^\s*(?:is|are|am|do|does|did|can|could|will|would|should|shall|have|has|had|was|were)\b[^?]*\?\s*$",
        ),
    ]
});

/// The transient rules, in evaluation order.
pub fn transient_rules() -> &'static [TransientRule] {
    &TRANSIENT_RULES
}

/// First transient rule matching normalized text.
pub fn match_transient(text: &str) -> Option<&'static TransientRule> {
    TRANSIENT_RULES.iter().find(|rule| rule.is_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_rules_follow_priority_order() {
        let book = RuleBook::standard();
        let categories: Vec<RuleCategory> = book.rules().iter().map(|r| r.category).collect();

        let mut sorted = categories.clone();
        sorted.sort();
        assert_eq!(categories, sorted);
        assert_eq!(categories.first(), Some(&RuleCategory::Identity));
    }

    #[test]
    fn test_first_match_wins() {
        let book = RuleBook::standard();
        // Matches both the spouse rule and the "like" preference rule
        let (rule, entity) = book
            .first_match("my wife is sara and i like hiking")
            .unwrap();
        assert_eq!(rule.label, "family_spouse");
        assert_eq!(entity.as_deref(), Some("sara"));
    }

    #[test]
    fn test_inverted_spouse_form() {
        let book = RuleBook::standard();
        let (rule, entity) = book.first_match("sara is my wife").unwrap();
        assert_eq!(rule.label, "family_spouse");
        assert_eq!(entity.as_deref(), Some("sara"));
    }

    #[test]
    fn test_pronoun_is_not_an_entity() {
        let book = RuleBook::standard();
        let (rule, entity) = book.first_match("she is my wife").unwrap();
        assert_eq!(rule.label, "family_spouse");
        assert_eq!(entity, None);
    }

    #[test]
    fn test_phrase_extraction() {
        let book = RuleBook::standard();

        let (rule, entity) = book.first_match("i live in new york city now").unwrap();
        assert_eq!(rule.label, "location");
        assert_eq!(entity.as_deref(), Some("new york city"));

        let (rule, entity) = book
            .first_match("i'm severely allergic to peanuts and shellfish")
            .unwrap();
        assert_eq!(rule.label, "medical_allergy");
        assert_eq!(entity.as_deref(), Some("peanuts"));

        let (rule, entity) = book.first_match("i work at the acme corp office").unwrap();
        assert_eq!(rule.label, "occupation_employer");
        assert_eq!(entity.as_deref(), Some("acme corp office"));
    }

    #[test]
    fn test_no_match_for_plain_statement() {
        assert!(RuleBook::standard()
            .first_match("we watched a film yesterday")
            .is_none());
    }

    #[test]
    fn test_transient_rules() {
        let cases = [
            ("remind me to buy milk", "reminder"),
            ("can you summarize this", "request"),
            ("what's the weather like", "weather"),
            ("i'm so hungry", "ephemeral_state"),
            ("is the shop open?", "yes_no_question"),
        ];
        for (text, label) in cases {
            let rule = match_transient(text).unwrap_or_else(|| panic!("no rule for {}", text));
            assert_eq!(rule.label, label, "{}", text);
        }
        assert!(match_transient("my wife is sara").is_none());
        assert_eq!(transient_rules().len(), 5);
    }

    #[test]
    fn test_custom_rule_validation() {
        let pet = |label: &str, confidence: f64, pattern: &str| {
            PatternRule::new(
                label,
                RuleCategory::Family,
                confidence,
                EntityRule::FirstWord,
                pattern,
            )
        };

        assert!(pet("pet", 0.8, r"my dog is (?P<entity>\w+)").is_ok());
        assert!(pet("pet", 0.8, r"my dog is (\w+)").is_err());
        assert!(pet("Pet Rule", 0.8, r"(?P<entity>\w+)").is_err());
        assert!(pet("pet", 1.5, r"(?P<entity>\w+)").is_err());
    }

    #[test]
    fn test_call_me_requests_are_transient() {
        for text in ["call me tomorrow", "text me when you land", "please call me back"] {
            assert_eq!(match_transient(text).map(|r| r.label), Some("request"), "{}", text);
        }
        let book = RuleBook::standard();
        assert!(book.first_match("call me tomorrow").is_none());

        let (rule, entity) = book.first_match("you can call me ada").unwrap();
        assert_eq!(rule.label, "identity_name");
        assert_eq!(entity.as_deref(), Some("ada"));
    }

    #[test]
    fn test_non_ascii_entities_are_captured_whole() {
        let book = RuleBook::standard();

        let (_, entity) = book.first_match("my wife is zoë").unwrap();
        assert_eq!(entity.as_deref(), Some("zoë"));

        let (_, entity) = book.first_match("zoë is my wife").unwrap();
        assert_eq!(entity.as_deref(), Some("zoë"));

        let (rule, entity) = book.first_match("i live in zürich").unwrap();
        assert_eq!(rule.label, "location");
        assert_eq!(entity.as_deref(), Some("zürich"));

        let (_, entity) = book.first_match("my son is josé").unwrap();
        assert_eq!(entity.as_deref(), Some("josé"));
    }
}
