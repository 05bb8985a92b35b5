//! Content definitions: cards, enemies, relics and heroes, looked up by key.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::card::{Card, CardTrait, CardType};
use super::combatant::Combatant;
use super::effects::{EffectKind, EffectTarget};
use super::relics::{CardFilter, RelicDefinition, RelicHook, RelicTrigger};
use super::state::Enemy;
use super::status::{StatusEffect, StatusKind};
use crate::ai::IntentAlgorithm;

/// Built-in content used when no library is supplied.
pub static SAMPLE_LIBRARY: Lazy<DefinitionLibrary> = Lazy::new(DefinitionLibrary::sample);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[serde(tag = "type")]
pub enum DefinitionError {
    #[error("card definition not found: {key}")]
    CardNotFound { key: String },
    #[error("enemy definition not found: {key}")]
    EnemyNotFound { key: String },
    #[error("relic definition not found: {key}")]
    RelicNotFound { key: String },
    #[error("hero definition not found: {key}")]
    HeroNotFound { key: String },
    #[error("status definition not found: {key}")]
    StatusNotFound { key: String },
    #[error("enemy {enemy} has an empty behavior pool")]
    EmptyBehaviorPool { enemy: String },
    #[error("enemy {enemy} script points at missing move {index}")]
    InvalidScript { enemy: String, index: usize },
    #[error("could not parse definitions: {message}")]
    Parse { message: String },
}

fn default_max_energy() -> u8 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeroDefinition {
    pub key: String,
    pub name: String,
    pub max_health: i32,
    /// Health carried over from earlier fights; full health when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<i32>,
    #[serde(default = "default_max_energy")]
    pub max_energy: u8,
    pub deck: Vec<String>,
    #[serde(default)]
    pub relics: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statuses: Vec<StatusEffect>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnemyDefinition {
    pub key: String,
    pub name: String,
    pub max_health: i32,
    pub behavior: Vec<String>,
    #[serde(default)]
    pub algorithm: IntentAlgorithm,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statuses: Vec<StatusEffect>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LibraryFile {
    #[serde(default)]
    cards: Vec<Card>,
    #[serde(default)]
    enemies: Vec<EnemyDefinition>,
    #[serde(default)]
    relics: Vec<RelicDefinition>,
    #[serde(default)]
    heroes: Vec<HeroDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefinitionLibrary {
    cards: BTreeMap<String, Card>,
    enemies: BTreeMap<String, EnemyDefinition>,
    relics: BTreeMap<String, RelicDefinition>,
    heroes: BTreeMap<String, HeroDefinition>,
}

impl DefinitionLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_card(mut self, card: Card) -> Self {
        self.cards.insert(card.key.clone(), card);
        self
    }

    pub fn with_enemy(mut self, enemy: EnemyDefinition) -> Self {
        self.enemies.insert(enemy.key.clone(), enemy);
        self
    }

    pub fn with_relic(mut self, relic: RelicDefinition) -> Self {
        self.relics.insert(relic.key.clone(), relic);
        self
    }

    pub fn with_hero(mut self, hero: HeroDefinition) -> Self {
        self.heroes.insert(hero.key.clone(), hero);
        self
    }

    /// Parses and validates a JSON library with `cards`, `enemies`, `relics`
    /// and `heroes` arrays.
    pub fn from_json(json: &str) -> Result<Self, DefinitionError> {
        let file: LibraryFile = serde_json::from_str(json).map_err(|err| DefinitionError::Parse {
            message: err.to_string(),
        })?;
        let library = file.cards.into_iter().fold(Self::new(), Self::with_card);
        let library = file.enemies.into_iter().fold(library, Self::with_enemy);
        let library = file.relics.into_iter().fold(library, Self::with_relic);
        let library = file.heroes.into_iter().fold(library, Self::with_hero);
        library.validate()?;
        Ok(library)
    }

    pub fn to_json(&self) -> Result<String, DefinitionError> {
        let file = LibraryFile {
            cards: self.cards.values().cloned().collect(),
            enemies: self.enemies.values().cloned().collect(),
            relics: self.relics.values().cloned().collect(),
            heroes: self.heroes.values().cloned().collect(),
        };
        serde_json::to_string(&file).map_err(|err| DefinitionError::Parse {
            message: err.to_string(),
        })
    }

    /// Checks every cross reference so that nothing is missing mid-battle.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let effects = self
            .cards
            .values()
            .flat_map(|card| card.effects.iter())
            .chain(
                self.relics
                    .values()
                    .flat_map(|relic| relic.triggers.iter())
                    .flat_map(|trigger| trigger.effects.iter()),
            );
        for effect in effects {
            if let Some(key) = effect.referenced_card() {
                self.card(key)?;
            }
            if let Some(key) = effect.referenced_enemy() {
                self.enemy(key)?;
            }
        }

        for enemy in self.enemies.values() {
            self.validate_enemy(enemy)?;
        }

        for hero in self.heroes.values() {
            for key in &hero.deck {
                self.card(key)?;
            }
            for key in &hero.relics {
                self.relic(key)?;
            }
        }
        Ok(())
    }

    pub fn validate_enemy(&self, enemy: &EnemyDefinition) -> Result<(), DefinitionError> {
        if enemy.behavior.is_empty() {
            return Err(DefinitionError::EmptyBehaviorPool {
                enemy: enemy.key.clone(),
            });
        }
        for key in &enemy.behavior {
            self.card(key)?;
        }
        if let IntentAlgorithm::Scripted { sequence } = &enemy.algorithm {
            if sequence.is_empty() {
                return Err(DefinitionError::InvalidScript {
                    enemy: enemy.key.clone(),
                    index: 0,
                });
            }
            if let Some(&index) = sequence.iter().find(|&&idx| idx >= enemy.behavior.len()) {
                return Err(DefinitionError::InvalidScript {
                    enemy: enemy.key.clone(),
                    index,
                });
            }
        }
        Ok(())
    }

    pub fn card(&self, key: &str) -> Result<&Card, DefinitionError> {
        self.cards
            .get(key)
            .ok_or_else(|| DefinitionError::CardNotFound { key: key.to_string() })
    }

    pub fn enemy(&self, key: &str) -> Result<&EnemyDefinition, DefinitionError> {
        self.enemies
            .get(key)
            .ok_or_else(|| DefinitionError::EnemyNotFound { key: key.to_string() })
    }

    pub fn relic(&self, key: &str) -> Result<&RelicDefinition, DefinitionError> {
        self.relics
            .get(key)
            .ok_or_else(|| DefinitionError::RelicNotFound { key: key.to_string() })
    }

    pub fn hero(&self, key: &str) -> Result<&HeroDefinition, DefinitionError> {
        self.heroes
            .get(key)
            .ok_or_else(|| DefinitionError::HeroNotFound { key: key.to_string() })
    }

    pub fn build_deck(&self, hero: &HeroDefinition) -> Result<Vec<Card>, DefinitionError> {
        hero.deck.iter().map(|key| self.card(key).cloned()).collect()
    }

    pub fn build_hero(&self, hero: &HeroDefinition) -> Combatant {
        let mut combatant = Combatant::new(hero.name.clone(), hero.max_health);
        if let Some(health) = hero.health {
            combatant = combatant.with_health(health);
        }
        for status in &hero.statuses {
            combatant.add_status_effect(status.clone());
        }
        combatant
    }

    pub fn spawn_enemy(&self, definition: &EnemyDefinition) -> Result<Enemy, DefinitionError> {
        self.validate_enemy(definition)?;
        let behavior = definition
            .behavior
            .iter()
            .enumerate()
            .map(|(idx, key)| self.card(key).map(|card| card.instantiate(idx as u32 + 1)))
            .collect::<Result<Vec<_>, _>>()?;
        let mut combatant = Combatant::new(definition.name.clone(), definition.max_health);
        for status in &definition.statuses {
            combatant.add_status_effect(status.clone());
        }
        Ok(Enemy::new(
            definition.key.clone(),
            combatant,
            behavior,
            definition.algorithm.clone(),
        ))
    }

    pub fn spawn_enemy_by_key(&self, key: &str) -> Result<Enemy, DefinitionError> {
        self.spawn_enemy(self.enemy(key)?)
    }

    pub fn sample() -> Self {
        let apply = |target, kind, amplifier, duration| EffectKind::ApplyStatus {
            target,
            status: StatusEffect::new(kind, amplifier, duration),
        };

        let cards = vec![
            Card::attacker("strike", "Strike", 1, 6).with_description("Deal 6 damage."),
            Card::blocker("defend", "Defend", 1, 5).with_description("Gain 5 block."),
            Card::attacker("flurry", "Flurry", 2, 4)
                .with_repeat(3)
                .with_description("Deal 4 damage three times."),
            {
                let mut bash = Card::new("bash", "Bash", 2, CardType::SpecialAttacker)
                    .with_effect(apply(EffectTarget::ContextTargets, StatusKind::Crippled, 2, 2))
                    .with_description("Deal 8 damage and cripple for 2 turns.");
                bash.damage = 8;
                bash
            },
            {
                let mut bulwark = Card::new("bulwark", "Bulwark", 1, CardType::SpecialBlocker)
                    .with_effect(apply(EffectTarget::Caster, StatusKind::Defense, 1, 0))
                    .with_description("Gain 4 block and 1 defense.");
                bulwark.block = 4;
                bulwark
            },
            Card::new("war_cry", "War Cry", 1, CardType::SpecialMisc)
                .with_trait(CardTrait::Exhaust)
                .with_effect(apply(EffectTarget::Caster, StatusKind::Strength, 2, 0))
                .with_description("Gain 2 strength. Exhaust."),
            Card::new("ace_in_the_hole", "Ace in the Hole", 0, CardType::SpecialMisc)
                .with_trait(CardTrait::CheatCard)
                .with_trait(CardTrait::Exhaust)
                .with_effect(EffectKind::DrawCards { count: 1 })
                .with_effect(EffectKind::GainEnergy { amount: 1 })
                .with_description("Always in the opening hand. Draw 1, gain 1 energy. Exhaust."),
            Card::new("rhythm", "Rhythm", 1, CardType::SpecialMisc)
                .with_effect(apply(EffectTarget::Caster, StatusKind::Combo, 3, 0))
                .with_description("Repeating the same attack deals 3 extra damage."),
            Card::new("echo", "Echo", 1, CardType::SpecialMisc)
                .with_effect(apply(EffectTarget::Caster, StatusKind::DoubleTake, 1, 0))
                .with_description("Your next attack hits twice as often."),
            Card::new("doom_mark", "Doom Mark", 1, CardType::SpecialMisc)
                .with_effect(apply(EffectTarget::ContextTargets, StatusKind::Catastrophe, 3, 3))
                .with_description("Target loses 3 health at the end of the next 3 turns."),
            Card::new("lucky_coin", "Lucky Coin", 1, CardType::SpecialMisc)
                .with_trait(CardTrait::Exhaust)
                .with_effect(apply(EffectTarget::Caster, StatusKind::LuckyDraw, 1, 2))
                .with_description("Draw 1 extra card for 2 turns. Exhaust."),
            Card::new("metamorph", "Metamorph", 0, CardType::SpecialMisc)
                .with_effect(EffectKind::Transform { into: "strike".into() })
                .with_description("Becomes a Strike."),
            Card::new("second_wind", "Second Wind", 1, CardType::SpecialMisc)
                .with_trait(CardTrait::Exhaust)
                .with_effect(apply(EffectTarget::Caster, StatusKind::Regeneration, 2, 3))
                .with_description("Heal 2 at the start of the next 3 turns. Exhaust."),
            Card::attacker("bite", "Bite", 0, 5),
            Card::attacker("gnaw", "Gnaw", 0, 3).with_repeat(2),
            Card::blocker("harden", "Harden", 0, 6),
            Card::new("roar", "Roar", 0, CardType::SpecialMisc)
                .with_effect(apply(EffectTarget::Caster, StatusKind::Strength, 2, 0))
                .with_description("Gains 2 strength."),
            Card::new("hex", "Hex", 0, CardType::SpecialMisc)
                .with_effect(apply(EffectTarget::ContextTargets, StatusKind::Crippled, 1, 2))
                .with_description("Cripples you for 2 turns."),
            Card::new("call_help", "Call for Help", 0, CardType::SpecialMisc)
                .with_effect(EffectKind::Summon { enemy: "slime".into() })
                .with_description("Summons a slime."),
        ];

        let enemies = vec![
            EnemyDefinition {
                key: "slime".into(),
                name: "Slime".into(),
                max_health: 14,
                behavior: vec!["bite".into(), "harden".into()],
                algorithm: IntentAlgorithm::Sequential,
                statuses: Vec::new(),
            },
            EnemyDefinition {
                key: "bandit".into(),
                name: "Bandit".into(),
                max_health: 22,
                behavior: vec!["gnaw".into(), "bite".into(), "roar".into()],
                algorithm: IntentAlgorithm::NoRepeat,
                statuses: Vec::new(),
            },
            EnemyDefinition {
                key: "cultist".into(),
                name: "Cultist".into(),
                max_health: 30,
                behavior: vec!["roar".into(), "hex".into(), "bite".into()],
                algorithm: IntentAlgorithm::Scripted {
                    sequence: vec![0, 2, 1, 2],
                },
                statuses: Vec::new(),
            },
            EnemyDefinition {
                key: "matriarch".into(),
                name: "Slime Matriarch".into(),
                max_health: 40,
                behavior: vec!["call_help".into(), "gnaw".into(), "harden".into()],
                algorithm: IntentAlgorithm::Random,
                statuses: vec![StatusEffect::permanent(StatusKind::Regeneration, 1)],
            },
        ];

        let relics = vec![
            RelicDefinition::new("whetstone", "Whetstone")
                .with_description("Start each battle with 1 strength.")
                .with_trigger(RelicTrigger::new(
                    RelicHook::BattleStart,
                    vec![apply(EffectTarget::Caster, StatusKind::Strength, 1, 0)],
                )),
            RelicDefinition::new("pen_nib", "Pen Nib")
                .with_description("Every third attack refunds 1 energy.")
                .with_trigger(
                    RelicTrigger::new(RelicHook::CardPlayed, vec![EffectKind::GainEnergy { amount: 1 }])
                        .with_filter(CardFilter::Attacks)
                        .every(3),
                ),
            RelicDefinition::new("thorn_bracer", "Thorn Bracer")
                .with_description("Block cards deal 2 damage to every enemy.")
                .with_priority(1)
                .with_trigger(
                    RelicTrigger::new(
                        RelicHook::CardResolved,
                        vec![EffectKind::Damage {
                            target: EffectTarget::AllEnemies,
                            amount: 2,
                        }],
                    )
                    .with_filter(CardFilter::Blocks),
                ),
            RelicDefinition::new("anchor", "Anchor")
                .with_description("Start each battle with 8 block.")
                .with_trigger(RelicTrigger::new(
                    RelicHook::BattleStart,
                    vec![EffectKind::GainBlock {
                        target: EffectTarget::Caster,
                        amount: 8,
                    }],
                )),
        ];

        let mut deck: Vec<String> = Vec::new();
        deck.extend(std::iter::repeat("strike".to_string()).take(4));
        deck.extend(std::iter::repeat("defend".to_string()).take(4));
        deck.extend(
            ["bash", "flurry", "war_cry", "ace_in_the_hole"]
                .iter()
                .map(|key| key.to_string()),
        );
        let heroes = vec![HeroDefinition {
            key: "wanderer".into(),
            name: "Wanderer".into(),
            max_health: 70,
            health: None,
            max_energy: 3,
            deck,
            relics: vec!["whetstone".into(), "pen_nib".into()],
            statuses: Vec::new(),
        }];

        let library = cards.into_iter().fold(Self::new(), Self::with_card);
        let library = enemies.into_iter().fold(library, Self::with_enemy);
        let library = relics.into_iter().fold(library, Self::with_relic);
        heroes.into_iter().fold(library, Self::with_hero)
    }
}
