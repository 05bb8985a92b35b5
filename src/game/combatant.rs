use serde::{Deserialize, Serialize};
use std::fmt;

use super::card::Card;
use super::status::{StatusEffect, StatusKind};

/// Addresses one participant of a battle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CombatantId {
    Hero,
    Enemy(usize),
}

impl fmt::Display for CombatantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CombatantId::Hero => f.write_str("hero"),
            CombatantId::Enemy(index) => write!(f, "enemy#{index}"),
        }
    }
}

/// Outcome of a single `change_health` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthChange {
    /// Damage soaked by block.
    pub absorbed: i32,
    /// Signed change actually applied to health.
    pub applied: i32,
    /// Set only on the call that brought health to zero.
    pub died: bool,
}

/// What the end-of-turn tick did to a combatant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnEndOutcome {
    pub catastrophe: Option<HealthChange>,
    pub expired: Vec<StatusKind>,
}

/// Health, block and statuses shared by the hero and every enemy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Combatant {
    pub name: String,
    pub health: i32,
    pub max_health: i32,
    #[serde(default)]
    pub block: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statuses: Vec<StatusEffect>,
    #[serde(default)]
    pub death_handled: bool,
}

impl Combatant {
    pub fn new(name: impl Into<String>, max_health: i32) -> Self {
        let max_health = max_health.max(1);
        Self {
            name: name.into(),
            health: max_health,
            max_health,
            block: 0,
            statuses: Vec::new(),
            death_handled: false,
        }
    }

    pub fn with_health(mut self, health: i32) -> Self {
        self.health = health.clamp(0, self.max_health);
        self.death_handled = self.health == 0;
        self
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0
    }

    pub fn change_health(&mut self, delta: i32) -> HealthChange {
        let mut change = HealthChange::default();
        let mut delta = delta;

        if delta < 0 {
            let incoming = -delta;
            let absorbed = incoming.min(self.block);
            self.block -= absorbed;
            change.absorbed = absorbed;
            delta = -(incoming - absorbed);
        }

        let before = self.health;
        self.health = (self.health + delta).clamp(0, self.max_health);
        change.applied = self.health - before;

        if self.health == 0 && !self.death_handled {
            self.death_handled = true;
            change.died = true;
        }
        change
    }

    /// Returns the block actually gained (or lost).
    pub fn change_block(&mut self, delta: i32) -> i32 {
        let before = self.block;
        self.block = (self.block + delta).max(0);
        self.block - before
    }

    pub fn clear_block(&mut self) -> i32 {
        std::mem::take(&mut self.block)
    }

    /// Adds or merges a status and returns the resulting entry.
    pub fn add_status_effect(&mut self, effect: StatusEffect) -> StatusEffect {
        if let Some(existing) = self.status_effect_mut(effect.kind) {
            existing.merge(&effect);
            return existing.clone();
        }
        self.statuses.push(effect.clone());
        effect
    }

    pub fn status_effect(&self, kind: StatusKind) -> Option<&StatusEffect> {
        self.statuses.iter().find(|status| status.kind == kind)
    }

    pub fn status_effect_mut(&mut self, kind: StatusKind) -> Option<&mut StatusEffect> {
        self.statuses.iter_mut().find(|status| status.kind == kind)
    }

    pub fn remove_status_effect(&mut self, kind: StatusKind) -> Option<StatusEffect> {
        let idx = self.statuses.iter().position(|status| status.kind == kind)?;
        Some(self.statuses.remove(idx))
    }

    pub fn amplifier(&self, kind: StatusKind) -> i32 {
        self.status_effect(kind)
            .map(|status| status.amplifier)
            .unwrap_or(0)
    }

    /// Start-of-turn triggers. Durations are left alone here.
    pub fn turn_start_logic(&mut self, _turn: u32) -> Option<HealthChange> {
        let regeneration = self.amplifier(StatusKind::Regeneration);
        if regeneration > 0 && self.is_alive() {
            return Some(self.change_health(regeneration));
        }
        None
    }

    /// End-of-turn triggers, then one turn of duration off every timed status.
    pub fn turn_end_logic(&mut self) -> TurnEndOutcome {
        let mut outcome = TurnEndOutcome::default();

        let catastrophe = self.amplifier(StatusKind::Catastrophe);
        if catastrophe > 0 && self.is_alive() {
            outcome.catastrophe = Some(self.change_health(-catastrophe));
        }

        let mut kept = Vec::with_capacity(self.statuses.len());
        for mut status in self.statuses.drain(..) {
            if status.tick() {
                outcome.expired.push(status.kind);
            } else {
                kept.push(status);
            }
        }
        self.statuses = kept;
        outcome
    }

    pub fn calculate_damage_modifiers(&self, card: &Card) -> i32 {
        if !card.card_type.is_attack() {
            return card.damage;
        }
        let damage = card.damage + self.amplifier(StatusKind::Strength)
            - self.amplifier(StatusKind::Crippled);
        damage.max(0)
    }

    pub fn calculate_defense_modifiers(&self, card: &Card) -> i32 {
        if !card.card_type.is_block() {
            return card.block;
        }
        (card.block + self.amplifier(StatusKind::Defense)).max(0)
    }
}
