use serde::{Deserialize, Serialize};

use super::effects::EffectKind;

/// Per-battle card instance identifier.
pub type CardId = u32;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardType {
    Attacker,
    Blocker,
    SpecialAttacker,
    SpecialBlocker,
    SpecialMisc,
}

impl Default for CardType {
    fn default() -> Self {
        CardType::SpecialMisc
    }
}

impl CardType {
    pub fn is_attack(self) -> bool {
        matches!(self, CardType::Attacker | CardType::SpecialAttacker)
    }

    pub fn is_block(self) -> bool {
        matches!(self, CardType::Blocker | CardType::SpecialBlocker)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardTrait {
    /// Removed from play after resolving instead of going to discard.
    Exhaust,
    /// Drawn ahead of everything else on the first turn.
    CheatCard,
}

fn default_repeat() -> u8 {
    1
}

/// A card definition, or an instance of one once it carries a battle id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Card {
    #[serde(default)]
    pub id: CardId,
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub cost: u8,
    #[serde(default)]
    pub damage: i32,
    #[serde(default)]
    pub block: i32,
    #[serde(default = "default_repeat")]
    pub attack_repeat_count: u8,
    #[serde(default)]
    pub card_type: CardType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traits: Vec<CardTrait>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<EffectKind>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Card {
    pub fn new(key: impl Into<String>, name: impl Into<String>, cost: u8, card_type: CardType) -> Self {
        Self {
            id: 0,
            key: key.into(),
            name: name.into(),
            cost,
            damage: 0,
            block: 0,
            attack_repeat_count: 1,
            card_type,
            traits: Vec::new(),
            effects: Vec::new(),
            description: String::new(),
        }
    }

    pub fn attacker(key: impl Into<String>, name: impl Into<String>, cost: u8, damage: i32) -> Self {
        let mut card = Self::new(key, name, cost, CardType::Attacker);
        card.damage = damage;
        card
    }

    pub fn blocker(key: impl Into<String>, name: impl Into<String>, cost: u8, block: i32) -> Self {
        let mut card = Self::new(key, name, cost, CardType::Blocker);
        card.block = block;
        card
    }

    pub fn with_repeat(mut self, repeat: u8) -> Self {
        self.attack_repeat_count = repeat.max(1);
        self
    }

    pub fn with_trait(mut self, card_trait: CardTrait) -> Self {
        if !self.traits.contains(&card_trait) {
            self.traits.push(card_trait);
        }
        self
    }

    pub fn with_effect(mut self, effect: EffectKind) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn has_trait(&self, card_trait: CardTrait) -> bool {
        self.traits.contains(&card_trait)
    }

    pub fn is_exhaust(&self) -> bool {
        self.has_trait(CardTrait::Exhaust)
    }

    pub fn is_cheat_card(&self) -> bool {
        self.has_trait(CardTrait::CheatCard)
    }

    /// Copies the definition into a battle instance.
    pub fn instantiate(&self, id: CardId) -> Card {
        let mut card = self.clone();
        card.id = id;
        card
    }
}
