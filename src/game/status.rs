use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::definitions::DefinitionError;

/// Duration value meaning "never expires".
pub const PERMANENT_DURATION: u32 = 0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusKind {
    Strength,
    Defense,
    LuckyDraw,
    Combo,
    Crippled,
    Catastrophe,
    DoubleTake,
    Regeneration,
}

/// How a re-applied status combines with the one already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPolicy {
    Accumulate,
    Replace,
}

impl StatusKind {
    pub const ALL: [StatusKind; 8] = [
        StatusKind::Strength,
        StatusKind::Defense,
        StatusKind::LuckyDraw,
        StatusKind::Combo,
        StatusKind::Crippled,
        StatusKind::Catastrophe,
        StatusKind::DoubleTake,
        StatusKind::Regeneration,
    ];

    pub fn stack_policy(self) -> StackPolicy {
        match self {
            StatusKind::Combo | StatusKind::DoubleTake => StackPolicy::Replace,
            _ => StackPolicy::Accumulate,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            StatusKind::Strength => "STRENGTH",
            StatusKind::Defense => "DEFENSE",
            StatusKind::LuckyDraw => "LUCKY_DRAW",
            StatusKind::Combo => "COMBO",
            StatusKind::Crippled => "CRIPPLED",
            StatusKind::Catastrophe => "CATASTROPHE",
            StatusKind::DoubleTake => "DOUBLE_TAKE",
            StatusKind::Regeneration => "REGENERATION",
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for StatusKind {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        StatusKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.key() == normalized)
            .ok_or_else(|| DefinitionError::StatusNotFound { key: s.to_string() })
    }
}

/// A status attached to a combatant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusEffect {
    pub kind: StatusKind,
    pub amplifier: i32,
    #[serde(default)]
    pub duration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl StatusEffect {
    pub fn new(kind: StatusKind, amplifier: i32, duration: u32) -> Self {
        Self {
            kind,
            amplifier,
            duration,
            tag: None,
        }
    }

    pub fn permanent(kind: StatusKind, amplifier: i32) -> Self {
        Self::new(kind, amplifier, PERMANENT_DURATION)
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn is_permanent(&self) -> bool {
        self.duration == PERMANENT_DURATION
    }

    /// Folds `incoming` into `self` following the kind's stack policy.
    pub fn merge(&mut self, incoming: &StatusEffect) {
        debug_assert_eq!(self.kind, incoming.kind);
        match self.kind.stack_policy() {
            StackPolicy::Accumulate => {
                self.amplifier += incoming.amplifier;
                self.duration = if self.is_permanent() || incoming.is_permanent() {
                    PERMANENT_DURATION
                } else {
                    self.duration.max(incoming.duration)
                };
            }
            StackPolicy::Replace => {
                self.amplifier = incoming.amplifier;
                self.duration = incoming.duration;
                if incoming.tag.is_some() {
                    self.tag = incoming.tag.clone();
                }
            }
        }
    }

    /// Advances one turn. Returns `true` when the effect has run out.
    pub fn tick(&mut self) -> bool {
        if self.is_permanent() {
            return false;
        }
        self.duration -= 1;
        self.duration == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strength_accumulates_and_keeps_longest_duration() {
        let mut current = StatusEffect::new(StatusKind::Strength, 2, 1);
        current.merge(&StatusEffect::new(StatusKind::Strength, 3, 4));
        assert_eq!(current.amplifier, 5);
        assert_eq!(current.duration, 4);
    }

    #[test]
    fn permanent_wins_when_accumulating() {
        let mut current = StatusEffect::new(StatusKind::Defense, 1, 3);
        current.merge(&StatusEffect::permanent(StatusKind::Defense, 1));
        assert!(current.is_permanent());
        assert_eq!(current.amplifier, 2);
    }

    #[test]
    fn combo_replaces_but_keeps_tag() {
        let mut current = StatusEffect::permanent(StatusKind::Combo, 2).with_tag("Strike");
        current.merge(&StatusEffect::permanent(StatusKind::Combo, 5));
        assert_eq!(current.amplifier, 5);
        assert_eq!(current.tag.as_deref(), Some("Strike"));
    }

    #[test]
    fn tick_expires_timed_effects_only() {
        let mut timed = StatusEffect::new(StatusKind::Crippled, 1, 2);
        assert!(!timed.tick());
        assert!(timed.tick());

        let mut forever = StatusEffect::permanent(StatusKind::Strength, 1);
        for _ in 0..10 {
            assert!(!forever.tick());
        }
    }

    #[test]
    fn parses_kind_names_loosely() {
        assert_eq!("lucky-draw".parse::<StatusKind>().ok(), Some(StatusKind::LuckyDraw));
        assert_eq!("Double Take".parse::<StatusKind>().ok(), Some(StatusKind::DoubleTake));
        assert!(matches!(
            "haste".parse::<StatusKind>(),
            Err(DefinitionError::StatusNotFound { .. })
        ));
    }
}
