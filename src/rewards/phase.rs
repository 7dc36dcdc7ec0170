use serde::{Deserialize, Serialize};
use std::fmt;

/// A reward-collection stage.
///
/// The four canonical phases have a fixed relative order. Any other token a
/// caller introduces (through hints or `skip_to`) is carried as `Custom` and
/// sorts after them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RewardPhase {
    Drops,
    Cards,
    Relics,
    BattleReview,
    Custom(String),
}

/// Canonical phase order used for sorting and as the empty-input fallback.
pub const DEFAULT_SEQUENCE: [RewardPhase; 4] = [
    RewardPhase::Drops,
    RewardPhase::Cards,
    RewardPhase::Relics,
    RewardPhase::BattleReview,
];

const ALIASES: &[(&str, RewardPhase)] = &[
    ("drop", RewardPhase::Drops),
    ("drops", RewardPhase::Drops),
    ("loot", RewardPhase::Drops),
    ("items", RewardPhase::Drops),
    ("gold", RewardPhase::Drops),
    ("card", RewardPhase::Cards),
    ("cards", RewardPhase::Cards),
    ("card_choice", RewardPhase::Cards),
    ("card_choices", RewardPhase::Cards),
    ("relic", RewardPhase::Relics),
    ("relics", RewardPhase::Relics),
    ("relic_choice", RewardPhase::Relics),
    ("relic_choices", RewardPhase::Relics),
    ("review", RewardPhase::BattleReview),
    ("battle_review", RewardPhase::BattleReview),
    ("summary", RewardPhase::BattleReview),
];

/// Trim, lower-case, and fold `-` and spaces into `_`.
pub fn canonical_token(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '-' || c.is_whitespace() { '_' } else { c })
        .collect()
}

impl RewardPhase {
    /// Resolve a server token through the alias table. `None` for tokens that
    /// name no known phase.
    pub fn parse(raw: &str) -> Option<Self> {
        let token = canonical_token(raw);
        ALIASES
            .iter()
            .find(|(alias, _)| *alias == token)
            .map(|(_, phase)| phase.clone())
    }

    /// Resolve `raw`, falling back to a custom phase for unknown tokens.
    pub fn from_token(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_else(|| Self::Custom(canonical_token(raw)))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Drops => "drops",
            Self::Cards => "cards",
            Self::Relics => "relics",
            Self::BattleReview => "battle_review",
            Self::Custom(name) => name,
        }
    }

    /// Position in [`DEFAULT_SEQUENCE`], `None` for custom phases.
    pub fn canonical_rank(&self) -> Option<usize> {
        DEFAULT_SEQUENCE.iter().position(|p| p == self)
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }
}

impl fmt::Display for RewardPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for RewardPhase {
    fn from(raw: String) -> Self {
        Self::from_token(&raw)
    }
}

impl From<RewardPhase> for String {
    fn from(phase: RewardPhase) -> Self {
        phase.as_str().to_string()
    }
}

/// Order phases: canonical phases in canonical order, then the rest in the
/// order they were first seen. Duplicates are dropped.
pub fn order_phases(phases: impl IntoIterator<Item = RewardPhase>) -> Vec<RewardPhase> {
    let mut seen: Vec<RewardPhase> = Vec::new();
    for phase in phases {
        if !seen.contains(&phase) {
            seen.push(phase);
        }
    }
    let (mut canonical, custom): (Vec<_>, Vec<_>) =
        seen.into_iter().partition(|p| p.canonical_rank().is_some());
    canonical.sort_by_key(|p| p.canonical_rank());
    canonical.extend(custom);
    canonical
}

/// Anomaly recorded while normalizing a progression payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Diagnostic {
    UnknownPhase(String),
    EmptyAvailableFallback,
    NoActivePhase,
    CurrentWasCompleted,
    CompletedBackfilled,
}

impl Diagnostic {
    pub fn tag(&self) -> String {
        match self {
            Self::UnknownPhase(token) => format!("unknown-phase:{token}"),
            Self::EmptyAvailableFallback => "empty-available-fallback".to_string(),
            Self::NoActivePhase => "no-active-phase".to_string(),
            Self::CurrentWasCompleted => "current-was-completed".to_string(),
            Self::CompletedBackfilled => "completed-backfilled".to_string(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

impl TryFrom<String> for Diagnostic {
    type Error = String;

    fn try_from(tag: String) -> Result<Self, Self::Error> {
        if let Some(token) = tag.strip_prefix("unknown-phase:") {
            return Ok(Self::UnknownPhase(token.to_string()));
        }
        match tag.as_str() {
            "empty-available-fallback" => Ok(Self::EmptyAvailableFallback),
            "no-active-phase" => Ok(Self::NoActivePhase),
            "current-was-completed" => Ok(Self::CurrentWasCompleted),
            "completed-backfilled" => Ok(Self::CompletedBackfilled),
            _ => Err(format!("unknown diagnostic tag: {tag}")),
        }
    }
}

impl From<Diagnostic> for String {
    fn from(diagnostic: Diagnostic) -> Self {
        diagnostic.tag()
    }
}
