use std::str::FromStr;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::game::{
    Battle, Card, CardType, DefinitionError, Enemy, RuleError, StatusKind,
};

/// How an enemy picks its next move from its behavior pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntentAlgorithm {
    /// Walks the pool in order, one move per turn.
    Sequential,
    /// Uniform pick every turn.
    Random,
    /// Uniform pick that never repeats the previous move.
    NoRepeat,
    /// Cycles through explicit pool indices.
    Scripted { sequence: Vec<usize> },
}

impl Default for IntentAlgorithm {
    fn default() -> Self {
        IntentAlgorithm::Sequential
    }
}

impl FromStr for IntentAlgorithm {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" | "cycle" => Ok(IntentAlgorithm::Sequential),
            "random" => Ok(IntentAlgorithm::Random),
            "no_repeat" | "norepeat" | "shuffle" => Ok(IntentAlgorithm::NoRepeat),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntentDecision {
    pub enemy: usize,
    pub index: usize,
    pub card: Card,
}

/// What the presentation layer shows above an enemy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntentPreview {
    pub enemy: usize,
    pub key: String,
    pub name: String,
    pub card_type: CardType,
    pub damage: i32,
    pub repeat: u32,
    pub total_damage: i32,
    pub block: i32,
    pub tooltip: String,
}

impl IntentPreview {
    pub fn from_card(enemy_index: usize, enemy: &Enemy, card: &Card) -> Self {
        let caster = &enemy.combatant;
        let (damage, repeat) = if card.card_type.is_attack() {
            let mut repeat = u32::from(card.attack_repeat_count.max(1));
            if caster.status_effect(StatusKind::DoubleTake).is_some() {
                repeat *= 2;
            }
            (caster.calculate_damage_modifiers(card), repeat)
        } else {
            (0, 0)
        };
        let block = if card.card_type.is_block() {
            caster.calculate_defense_modifiers(card)
        } else {
            0
        };
        let total_damage = damage * repeat as i32;

        let tooltip = match (card.card_type.is_attack(), card.card_type.is_block()) {
            (true, _) if repeat > 1 => format!("{} intends to attack for {damage} x{repeat}", caster.name),
            (true, _) => format!("{} intends to attack for {damage}", caster.name),
            (_, true) => format!("{} intends to block for {block}", caster.name),
            _ if !card.description.is_empty() => {
                format!("{} intends to use {}: {}", caster.name, card.name, card.description)
            }
            _ => format!("{} intends to use {}", caster.name, card.name),
        };

        Self {
            enemy: enemy_index,
            key: card.key.clone(),
            name: card.name.clone(),
            card_type: card.card_type,
            damage,
            repeat,
            total_damage,
            block,
            tooltip,
        }
    }
}

/// Pure query over a stored intent.
pub fn preview_intent(state: &Battle, enemy_index: usize) -> Result<IntentPreview, RuleError> {
    let enemy = state
        .enemy(enemy_index)
        .ok_or(RuleError::EnemyNotFound { index: enemy_index })?;
    let card = enemy
        .intent
        .as_ref()
        .ok_or(RuleError::NoIntent { index: enemy_index })?;
    Ok(IntentPreview::from_card(enemy_index, enemy, card))
}

pub struct IntentAgent {
    rng: SmallRng,
}

impl IntentAgent {
    pub fn new() -> Self {
        Self {
            rng: SmallRng::from_entropy(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Picks a pool index for `enemy` on `turn` (1-based).
    pub fn choose_index(&mut self, enemy: &Enemy, turn: u32) -> Result<usize, DefinitionError> {
        let len = enemy.behavior.len();
        if len == 0 {
            return Err(DefinitionError::EmptyBehaviorPool {
                enemy: enemy.key.clone(),
            });
        }
        let step = turn.saturating_sub(1) as usize;

        let index = match &enemy.algorithm {
            IntentAlgorithm::Sequential => step % len,
            IntentAlgorithm::Random => self.rng.gen_range(0..len),
            IntentAlgorithm::NoRepeat => {
                let choices: Vec<usize> = (0..len)
                    .filter(|idx| len == 1 || Some(*idx) != enemy.last_intent)
                    .collect();
                choices.choose(&mut self.rng).copied().unwrap_or(0)
            }
            IntentAlgorithm::Scripted { sequence } => {
                let index = sequence
                    .get(step % sequence.len().max(1))
                    .copied()
                    .ok_or_else(|| DefinitionError::InvalidScript {
                        enemy: enemy.key.clone(),
                        index: 0,
                    })?;
                if index >= len {
                    return Err(DefinitionError::InvalidScript {
                        enemy: enemy.key.clone(),
                        index,
                    });
                }
                index
            }
        };
        Ok(index)
    }

    pub fn decide_intent(
        &mut self,
        state: &Battle,
        enemy_index: usize,
    ) -> Result<IntentDecision, RuleError> {
        let enemy = state
            .enemy(enemy_index)
            .ok_or(RuleError::EnemyNotFound { index: enemy_index })?;
        let index = self.choose_index(enemy, state.turn)?;
        let card = enemy.behavior[index].clone();
        debug!(enemy = enemy_index, turn = state.turn, card = %card.key, "intent selected");
        Ok(IntentDecision {
            enemy: enemy_index,
            index,
            card,
        })
    }
}

impl Default for IntentAgent {
    fn default() -> Self {
        Self::new()
    }
}
