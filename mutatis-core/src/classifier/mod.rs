//! Fact classification and confidence accumulation.
//!
//! The classifier decides a fact's tier and whether the entity it mentions
//! has become eligible for schema evolution. It runs four steps in order:
//!
//! 1. **Transient short-circuit**: requests, reminders, weather, passing
//!    states and yes/no questions are transient, whatever else they say.
//! 2. **Foundational rules**: the first matching [`PatternRule`] sets the
//!    pattern type; its entity's tracker entry gains a mention.
//! 3. **Known entity**: text naming an already tracked entity is episodic and
//!    still counts as a mention of that entity.
//! 4. **Default**: everything else is episodic at 0.50.
//!
//! Confidence for a tracked entity depends only on the base confidence of its
//! first sighting and its mention count, see [`cumulative_confidence`].

mod rules;
mod tracker;

pub use rules::{
    match_transient, transient_rules, EntityRule, PatternRule, RuleBook, RuleCategory,
    TransientRule,
};
pub use tracker::{InMemoryTracker, PatternTracker};
pub(crate) use tracker::ConnectionTracker;

use crate::error::Result;
use crate::evolution::naming::validate_entity;
use crate::memory::{PatternEntry, Tier};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Confidence gained per repeated mention.
pub const CONFIDENCE_STEP: f64 = 0.08;
/// Upper bound on accumulated confidence.
pub const CONFIDENCE_CAP: f64 = 0.99;
/// Accumulated confidence at which a fact is schema eligible.
pub const SCHEMA_ELIGIBLE_THRESHOLD: f64 = 0.80;
/// Accumulated confidence at which an entity is evolved.
pub const EVOLUTION_THRESHOLD: f64 = 0.95;
/// Confidence of transient facts.
pub const TRANSIENT_CONFIDENCE: f64 = 0.30;
/// Confidence of facts no rule recognises.
pub const DEFAULT_CONFIDENCE: f64 = 0.50;

/// Accumulated confidence after `mentions` sightings.
pub fn cumulative_confidence(base_confidence: f64, mentions: u32) -> f64 {
    let grown = base_confidence + f64::from(mentions.saturating_sub(1)) * CONFIDENCE_STEP;
    grown.min(CONFIDENCE_CAP).max(0.0)
}

/// Lower-case text and fold typographic apostrophes.
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

/// Whether normalized `text` names `entity` as a whole word.
pub fn mentions_entity(text: &str, entity: &str) -> bool {
    if entity.is_empty() {
        return false;
    }
    text.match_indices(entity).any(|(start, found)| {
        let before = text[..start].chars().next_back();
        let after = text[start + found.len()..].chars().next();
        !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
    })
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Why a fact landed in its tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reason {
    /// Matched a transient-intent rule
    TransientIntent { rule: String },
    /// Matched a foundational rule
    Pattern { rule: String },
    /// Named an entity the tracker already knows
    KnownEntity,
    /// Nothing recognised
    Default,
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransientIntent { rule } => write!(f, "transient intent ({})", rule),
            Self::Pattern { rule } => write!(f, "foundational pattern ({})", rule),
            Self::KnownEntity => write!(f, "mentions a known entity"),
            Self::Default => write!(f, "no pattern matched"),
        }
    }
}

/// Outcome of classifying one input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub tier: Tier,
    pub confidence: f64,
    pub pattern_type: Option<String>,
    pub entity: Option<String>,
    /// Mentions of the entity so far, this one included
    pub mention_count: Option<u32>,
    pub schema_eligible: bool,
    pub should_evolve: bool,
    /// The pair had already been evolved before this input
    pub already_evolved: bool,
    pub reason: Reason,
}

impl Classification {
    fn transient(rule: &str) -> Self {
        Self {
            tier: Tier::Transient,
            confidence: TRANSIENT_CONFIDENCE,
            pattern_type: None,
            entity: None,
            mention_count: None,
            schema_eligible: false,
            should_evolve: false,
            already_evolved: false,
            reason: Reason::TransientIntent {
                rule: rule.to_string(),
            },
        }
    }

    fn default_episodic() -> Self {
        Self {
            tier: Tier::Episodic,
            confidence: DEFAULT_CONFIDENCE,
            pattern_type: None,
            entity: None,
            mention_count: None,
            schema_eligible: false,
            should_evolve: false,
            already_evolved: false,
            reason: Reason::Default,
        }
    }

    fn tracked(tier: Tier, entry: &PatternEntry, reason: Reason) -> Self {
        let confidence = cumulative_confidence(entry.base_confidence, entry.mention_count);
        Self {
            tier,
            confidence,
            pattern_type: Some(entry.pattern_type.clone()),
            entity: Some(entry.entity.clone()),
            mention_count: Some(entry.mention_count),
            schema_eligible: confidence >= SCHEMA_ELIGIBLE_THRESHOLD,
            should_evolve: confidence >= EVOLUTION_THRESHOLD && !entry.evolved,
            already_evolved: entry.evolved,
            reason,
        }
    }
}

/// Rule-driven fact classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: RuleBook,
    max_entity_len: usize,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Classifier {
    /// Classifier with the standard rule book.
    pub fn new(max_entity_len: usize) -> Self {
        Self {
            rules: RuleBook::standard(),
            max_entity_len,
        }
    }

    /// Classifier with a custom rule book.
    pub fn with_rules(rules: RuleBook, max_entity_len: usize) -> Self {
        Self {
            rules,
            max_entity_len,
        }
    }

    pub fn rules(&self) -> &RuleBook {
        &self.rules
    }

    /// Classify `input`, updating `tracker` when an entity is recognised.
    ///
    /// Fails only if the tracker does.
    pub fn classify(
        &self,
        input: &str,
        tracker: &mut impl PatternTracker,
    ) -> Result<Classification> {
        let text = normalize(input);

        if let Some(rule) = match_transient(&text) {
            debug!(rule = rule.label, "transient intent");
            return Ok(Classification::transient(rule.label));
        }

        if let Some((rule, entity)) = self.rules.first_match(&text) {
            let entity = entity.filter(|e| validate_entity(e, self.max_entity_len).is_ok());
            let reason = Reason::Pattern {
                rule: rule.label.clone(),
            };
            return match entity {
                Some(entity) => {
                    let entry = tracker.record_mention(&rule.label, &entity, rule.base_confidence)?;
                    let classification =
                        Classification::tracked(Tier::Foundational, &entry, reason);
                    debug!(
                        pattern = %rule.label,
                        entity = %entity,
                        mentions = entry.mention_count,
                        confidence = classification.confidence,
                        "foundational pattern"
                    );
                    Ok(classification)
                }
                None => {
                    debug!(pattern = %rule.label, "foundational pattern without entity");
                    Ok(Classification {
                        tier: Tier::Foundational,
                        confidence: rule.base_confidence,
                        pattern_type: Some(rule.label.clone()),
                        reason,
                        ..Classification::default_episodic()
                    })
                }
            };
        }

        let known = tracker
            .tracked()?
            .into_iter()
            .find(|entry| mentions_entity(&text, &entry.entity));
        if let Some(known) = known {
            let entry =
                tracker.record_mention(&known.pattern_type, &known.entity, known.base_confidence)?;
            debug!(pattern = %entry.pattern_type, entity = %entry.entity, "known entity");
            return Ok(Classification::tracked(
                Tier::Episodic,
                &entry,
                Reason::KnownEntity,
            ));
        }

        Ok(Classification::default_episodic())
    }
}
