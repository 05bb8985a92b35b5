//! Relics as battle listeners.
//!
//! Every owned relic becomes one [`BattleListener`] when the battle begins.
//! Listeners are asked for side effects in acquisition order; the effects they
//! return are queued on the effect stack under the listener's priority.

use serde::{Deserialize, Serialize};

use super::card::{Card, CardType};
use super::effects::EffectKind;
use super::state::Battle;

/// Observer of the card flow inside a battle.
pub trait BattleListener {
    fn name(&self) -> &str;

    fn priority(&self) -> i8 {
        0
    }

    fn on_battle_start(&mut self, _state: &Battle) -> Vec<EffectKind> {
        Vec::new()
    }

    /// Called after the cost is paid and before the card resolves.
    fn on_card_played(&mut self, _card: &Card, _state: &Battle) -> Vec<EffectKind> {
        Vec::new()
    }

    /// Called once the card has resolved and left the hand.
    fn on_card_resolved(&mut self, _card: &Card, _state: &Battle) -> Vec<EffectKind> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RelicHook {
    BattleStart,
    CardPlayed,
    CardResolved,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CardFilter {
    Any,
    Attacks,
    Blocks,
    OfType { card_type: CardType },
    Key { key: String },
}

impl Default for CardFilter {
    fn default() -> Self {
        CardFilter::Any
    }
}

impl CardFilter {
    pub fn matches(&self, card: &Card) -> bool {
        match self {
            CardFilter::Any => true,
            CardFilter::Attacks => card.card_type.is_attack(),
            CardFilter::Blocks => card.card_type.is_block(),
            CardFilter::OfType { card_type } => card.card_type == *card_type,
            CardFilter::Key { key } => card.key == *key,
        }
    }
}

fn default_every() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelicTrigger {
    pub on: RelicHook,
    #[serde(default)]
    pub filter: CardFilter,
    /// Fires on every n-th matching card.
    #[serde(default = "default_every")]
    pub every: u32,
    pub effects: Vec<EffectKind>,
}

impl RelicTrigger {
    pub fn new(on: RelicHook, effects: Vec<EffectKind>) -> Self {
        Self {
            on,
            filter: CardFilter::Any,
            every: 1,
            effects,
        }
    }

    pub fn with_filter(mut self, filter: CardFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn every(mut self, every: u32) -> Self {
        self.every = every.max(1);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelicDefinition {
    pub key: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub priority: i8,
    #[serde(default)]
    pub triggers: Vec<RelicTrigger>,
}

impl RelicDefinition {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            description: String::new(),
            priority: 0,
            triggers: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_trigger(mut self, trigger: RelicTrigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A relic bound to one battle, with its per-trigger counters.
#[derive(Debug, Clone)]
pub struct RelicListener {
    relic: RelicDefinition,
    counters: Vec<u32>,
}

impl RelicListener {
    pub fn new(relic: RelicDefinition) -> Self {
        let counters = vec![0; relic.triggers.len()];
        Self { relic, counters }
    }

    fn fire(&mut self, hook: RelicHook, card: Option<&Card>) -> Vec<EffectKind> {
        let mut effects = Vec::new();
        for (trigger, counter) in self.relic.triggers.iter().zip(self.counters.iter_mut()) {
            if trigger.on != hook {
                continue;
            }
            if let Some(card) = card {
                if !trigger.filter.matches(card) {
                    continue;
                }
            }
            *counter += 1;
            if *counter % trigger.every.max(1) == 0 {
                effects.extend(trigger.effects.iter().cloned());
            }
        }
        effects
    }
}

impl BattleListener for RelicListener {
    fn name(&self) -> &str {
        &self.relic.name
    }

    fn priority(&self) -> i8 {
        self.relic.priority
    }

    fn on_battle_start(&mut self, _state: &Battle) -> Vec<EffectKind> {
        self.fire(RelicHook::BattleStart, None)
    }

    fn on_card_played(&mut self, card: &Card, _state: &Battle) -> Vec<EffectKind> {
        self.fire(RelicHook::CardPlayed, Some(card))
    }

    fn on_card_resolved(&mut self, card: &Card, _state: &Battle) -> Vec<EffectKind> {
        self.fire(RelicHook::CardResolved, Some(card))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::combatant::Combatant;

    fn empty_battle() -> Battle {
        Battle::new(Combatant::new("Hero", 10), Vec::new(), Vec::new(), 3, Vec::new())
    }

    #[test]
    fn every_nth_matching_card_fires() {
        let relic = RelicDefinition::new("pen_nib", "Pen Nib").with_trigger(
            RelicTrigger::new(RelicHook::CardPlayed, vec![EffectKind::GainEnergy { amount: 1 }])
                .with_filter(CardFilter::Attacks)
                .every(3),
        );
        let mut listener = RelicListener::new(relic);
        let state = empty_battle();
        let strike = Card::attacker("strike", "Strike", 1, 6);
        let defend = Card::blocker("defend", "Defend", 1, 5);

        assert!(listener.on_card_played(&strike, &state).is_empty());
        assert!(listener.on_card_played(&defend, &state).is_empty());
        assert!(listener.on_card_played(&strike, &state).is_empty());
        assert_eq!(listener.on_card_played(&strike, &state).len(), 1);
        assert!(listener.on_card_resolved(&strike, &state).is_empty());
    }

    #[test]
    fn battle_start_ignores_card_filters() {
        let relic = RelicDefinition::new("anchor", "Anchor").with_trigger(
            RelicTrigger::new(
                RelicHook::BattleStart,
                vec![EffectKind::GainEnergy { amount: 1 }],
            )
            .with_filter(CardFilter::Blocks),
        );
        let mut listener = RelicListener::new(relic);
        assert_eq!(listener.on_battle_start(&empty_battle()).len(), 1);
    }

    #[test]
    fn relic_parses_from_json() {
        let json = r#"{
            "key": "thorns",
            "name": "Thorn Bracer",
            "priority": 2,
            "triggers": [{
                "on": "card_resolved",
                "filter": { "type": "blocks" },
                "effects": [{ "type": "Damage", "target": "all_enemies", "amount": 2 }]
            }]
        }"#;
        let relic: RelicDefinition = serde_json::from_str(json).expect("relic parses");
        assert_eq!(relic.priority, 2);
        assert_eq!(relic.triggers[0].every, 1);
        assert_eq!(relic.triggers[0].filter, CardFilter::Blocks);
    }
}
