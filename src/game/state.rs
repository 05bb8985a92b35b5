use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use super::card::{Card, CardId};
use super::combatant::{Combatant, CombatantId, HealthChange};
use super::status::{StatusEffect, StatusKind};
use crate::ai::IntentAlgorithm;

/// Phases of the battle state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BattlePhase {
    Begin,
    PlayerTurn,
    EnemyTurn,
    Won,
    Lost,
}

impl Default for BattlePhase {
    fn default() -> Self {
        Self::Begin
    }
}

impl BattlePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, BattlePhase::Won | BattlePhase::Lost)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum BattleOutcome {
    Won { turn: u32 },
    Lost { turn: u32 },
}

/// Everything observable that happens during a battle, in order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum BattleEvent {
    BattleStarted {
        hero: String,
        enemies: Vec<String>,
    },
    PhaseChanged {
        from: BattlePhase,
        to: BattlePhase,
    },
    TurnStarted {
        turn: u32,
    },
    EnergyChanged {
        energy: u8,
    },
    CardDrawn {
        card_id: CardId,
        key: String,
    },
    DeckReshuffled {
        cards: usize,
    },
    IntentSelected {
        enemy: usize,
        card_key: String,
    },
    CardPlayed {
        card_id: CardId,
        key: String,
        targets: Vec<CombatantId>,
    },
    CardResolved {
        card_id: CardId,
        key: String,
    },
    CardDiscarded {
        card_id: CardId,
    },
    CardExhausted {
        card_id: CardId,
    },
    CardTransformed {
        from: CardId,
        into: CardId,
        key: String,
    },
    HealthChanged {
        target: CombatantId,
        amount: i32,
        absorbed: i32,
        health: i32,
    },
    BlockChanged {
        target: CombatantId,
        amount: i32,
        block: i32,
    },
    StatusAdded {
        target: CombatantId,
        status: StatusEffect,
    },
    StatusRemoved {
        target: CombatantId,
        kind: StatusKind,
    },
    CombatantDied {
        target: CombatantId,
    },
    EnemySummoned {
        enemy: usize,
        key: String,
    },
    EnemyActed {
        enemy: usize,
        card_key: String,
    },
    RelicTriggered {
        relic: String,
    },
    TurnEnded {
        turn: u32,
    },
    BattleWon {
        turn: u32,
    },
    BattleLost {
        turn: u32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[serde(tag = "type")]
pub enum IntegrityError {
    #[error("card count drifted: expected {expected}, found {actual}")]
    CardConservation { expected: usize, actual: usize },
    #[error("card id {card_id} is held by more than one pile")]
    DuplicateCardId { card_id: CardId },
    #[error("{target} health {value} is outside its bounds")]
    HealthOutOfRange { target: CombatantId, value: i32 },
    #[error("{target} carries more than one {kind} status")]
    DuplicateStatus { target: CombatantId, kind: StatusKind },
}

/// An enemy combatant plus its behavior pool and stored intent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Enemy {
    pub key: String,
    pub combatant: Combatant,
    pub behavior: Vec<Card>,
    #[serde(default)]
    pub algorithm: IntentAlgorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Card>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_intent: Option<usize>,
    #[serde(default)]
    pub summoned: bool,
}

impl Enemy {
    pub fn new(
        key: impl Into<String>,
        combatant: Combatant,
        behavior: Vec<Card>,
        algorithm: IntentAlgorithm,
    ) -> Self {
        Self {
            key: key.into(),
            combatant,
            behavior,
            algorithm,
            intent: None,
            last_intent: None,
            summoned: false,
        }
    }

    /// Alive enemies from the starting encounter act. Summoned ones never do.
    pub fn acts(&self) -> bool {
        self.combatant.is_alive() && !self.summoned
    }
}

/// The battle aggregate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Battle {
    pub hero: Combatant,
    #[serde(default)]
    pub enemies: Vec<Enemy>,
    #[serde(default)]
    pub draw_pile: Vec<Card>,
    #[serde(default)]
    pub hand: Vec<Card>,
    #[serde(default)]
    pub discard_pile: Vec<Card>,
    #[serde(default)]
    pub exhaust_pile: Vec<Card>,
    pub energy: u8,
    pub max_energy: u8,
    pub turn: u32,
    #[serde(default)]
    pub phase: BattlePhase,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relics: Vec<String>,
    pub deck_size: usize,
    pub next_card_id: CardId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_log: Vec<BattleEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<BattleOutcome>,
}

impl Battle {
    /// Builds a battle in `Begin`. Card ids are (re)assigned from 1.
    pub fn new(
        hero: Combatant,
        enemies: Vec<Enemy>,
        deck: Vec<Card>,
        max_energy: u8,
        relics: Vec<String>,
    ) -> Self {
        let draw_pile: Vec<Card> = deck
            .iter()
            .enumerate()
            .map(|(idx, card)| card.instantiate(idx as CardId + 1))
            .collect();
        let deck_size = draw_pile.len();
        Self {
            hero,
            enemies,
            draw_pile,
            hand: Vec::new(),
            discard_pile: Vec::new(),
            exhaust_pile: Vec::new(),
            energy: 0,
            max_energy,
            turn: 0,
            phase: BattlePhase::Begin,
            relics,
            deck_size,
            next_card_id: deck_size as CardId + 1,
            event_log: Vec::new(),
            outcome: None,
        }
    }

    pub fn record_event(&mut self, event: BattleEvent) {
        self.event_log.push(event);
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn combatant(&self, id: CombatantId) -> Option<&Combatant> {
        match id {
            CombatantId::Hero => Some(&self.hero),
            CombatantId::Enemy(index) => self.enemies.get(index).map(|enemy| &enemy.combatant),
        }
    }

    pub fn combatant_mut(&mut self, id: CombatantId) -> Option<&mut Combatant> {
        match id {
            CombatantId::Hero => Some(&mut self.hero),
            CombatantId::Enemy(index) => self
                .enemies
                .get_mut(index)
                .map(|enemy| &mut enemy.combatant),
        }
    }

    pub fn enemy(&self, index: usize) -> Option<&Enemy> {
        self.enemies.get(index)
    }

    pub fn hero_alive(&self) -> bool {
        self.hero.is_alive()
    }

    pub fn all_enemies_defeated(&self) -> bool {
        self.enemies.iter().all(|enemy| !enemy.combatant.is_alive())
    }

    pub fn alive_enemy_ids(&self) -> Vec<CombatantId> {
        self.enemies
            .iter()
            .enumerate()
            .filter(|(_, enemy)| enemy.combatant.is_alive())
            .map(|(idx, _)| CombatantId::Enemy(idx))
            .collect()
    }

    /// Indices of enemies that take an action this round, in encounter order.
    pub fn acting_enemies(&self) -> Vec<usize> {
        self.enemies
            .iter()
            .enumerate()
            .filter(|(_, enemy)| enemy.acts())
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn cards_in_play(&self) -> usize {
        self.hand.len() + self.draw_pile.len() + self.discard_pile.len() + self.exhaust_pile.len()
    }

    pub fn find_card_in_hand_index(&self, card_id: CardId) -> Option<usize> {
        self.hand.iter().position(|card| card.id == card_id)
    }

    pub fn allocate_card_id(&mut self) -> CardId {
        let id = self.next_card_id;
        self.next_card_id += 1;
        id
    }

    pub fn change_health(&mut self, target: CombatantId, delta: i32) -> Vec<BattleEvent> {
        let mut events = Vec::new();
        let Some(combatant) = self.combatant_mut(target) else {
            return events;
        };
        let change: HealthChange = combatant.change_health(delta);
        let health = combatant.health;
        if change.absorbed > 0 {
            events.push(BattleEvent::BlockChanged {
                target,
                amount: -change.absorbed,
                block: combatant.block,
            });
        }
        events.push(BattleEvent::HealthChanged {
            target,
            amount: change.applied,
            absorbed: change.absorbed,
            health,
        });
        if change.died {
            events.push(BattleEvent::CombatantDied { target });
            self.forget_intent(target);
        }
        events
    }

    fn forget_intent(&mut self, target: CombatantId) {
        if let CombatantId::Enemy(index) = target {
            if let Some(enemy) = self.enemies.get_mut(index) {
                enemy.intent = None;
            }
        }
    }

    pub fn change_block(&mut self, target: CombatantId, delta: i32) -> Option<BattleEvent> {
        let combatant = self.combatant_mut(target)?;
        let amount = combatant.change_block(delta);
        Some(BattleEvent::BlockChanged {
            target,
            amount,
            block: combatant.block,
        })
    }

    pub fn clear_block(&mut self, target: CombatantId) -> Option<BattleEvent> {
        let combatant = self.combatant_mut(target)?;
        let cleared = combatant.clear_block();
        if cleared == 0 {
            return None;
        }
        Some(BattleEvent::BlockChanged {
            target,
            amount: -cleared,
            block: 0,
        })
    }

    pub fn add_status(&mut self, target: CombatantId, effect: StatusEffect) -> Option<BattleEvent> {
        let combatant = self.combatant_mut(target)?;
        let status = combatant.add_status_effect(effect);
        Some(BattleEvent::StatusAdded { target, status })
    }

    pub fn remove_status(&mut self, target: CombatantId, kind: StatusKind) -> Option<BattleEvent> {
        let combatant = self.combatant_mut(target)?;
        combatant.remove_status_effect(kind)?;
        Some(BattleEvent::StatusRemoved { target, kind })
    }

    pub fn change_energy(&mut self, delta: i32) -> BattleEvent {
        let energy = (self.energy as i32 + delta).clamp(0, u8::MAX as i32);
        self.energy = energy as u8;
        BattleEvent::EnergyChanged {
            energy: self.energy,
        }
    }

    pub fn run_turn_start(&mut self, target: CombatantId) -> Vec<BattleEvent> {
        let turn = self.turn;
        let healed = match self.combatant_mut(target) {
            Some(combatant) => combatant.turn_start_logic(turn),
            None => return Vec::new(),
        };
        match (healed, self.combatant(target)) {
            (Some(change), Some(combatant)) if change.applied != 0 => {
                vec![BattleEvent::HealthChanged {
                    target,
                    amount: change.applied,
                    absorbed: 0,
                    health: combatant.health,
                }]
            }
            _ => Vec::new(),
        }
    }

    pub fn run_turn_end(&mut self, target: CombatantId) -> Vec<BattleEvent> {
        let mut events = Vec::new();
        let Some(combatant) = self.combatant_mut(target) else {
            return events;
        };
        let outcome = combatant.turn_end_logic();
        let health = combatant.health;
        if let Some(change) = outcome.catastrophe {
            events.push(BattleEvent::HealthChanged {
                target,
                amount: change.applied,
                absorbed: change.absorbed,
                health,
            });
            if change.died {
                events.push(BattleEvent::CombatantDied { target });
                self.forget_intent(target);
            }
        }
        events.extend(
            outcome
                .expired
                .into_iter()
                .map(|kind| BattleEvent::StatusRemoved { target, kind }),
        );
        events
    }

    /// Moves the discard pile into the draw pile in random order.
    pub fn reshuffle_discard<R: Rng + ?Sized>(&mut self, rng: &mut R) -> BattleEvent {
        let cards = self.discard_pile.len();
        self.draw_pile.append(&mut self.discard_pile);
        self.draw_pile.shuffle(rng);
        BattleEvent::DeckReshuffled { cards }
    }

    fn take_from_draw(&mut self, idx: usize) -> BattleEvent {
        let card = self.draw_pile.swap_remove(idx);
        let event = BattleEvent::CardDrawn {
            card_id: card.id,
            key: card.key.clone(),
        };
        self.hand.push(card);
        event
    }

    /// Draws up to `count` cards uniformly at random. When the draw pile runs
    /// dry mid-sequence the discard pile is shuffled back in; if both are
    /// empty the draw stops short.
    pub fn draw_cards<R: Rng + ?Sized>(&mut self, count: usize, rng: &mut R) -> Vec<BattleEvent> {
        let mut events = Vec::new();
        for _ in 0..count {
            if self.draw_pile.is_empty() {
                if self.discard_pile.is_empty() {
                    break;
                }
                events.push(self.reshuffle_discard(rng));
            }
            let idx = rng.gen_range(0..self.draw_pile.len());
            events.push(self.take_from_draw(idx));
        }
        events
    }

    /// Cheat cards first, each costing one draw, then regular random draws.
    pub fn draw_opening_hand<R: Rng + ?Sized>(
        &mut self,
        count: usize,
        rng: &mut R,
    ) -> Vec<BattleEvent> {
        let mut events = Vec::new();
        let mut remaining = count;
        while remaining > 0 {
            let cheat_indices: Vec<usize> = self
                .draw_pile
                .iter()
                .enumerate()
                .filter(|(_, card)| card.is_cheat_card())
                .map(|(idx, _)| idx)
                .collect();
            let Some(&idx) = cheat_indices.choose(rng) else {
                break;
            };
            events.push(self.take_from_draw(idx));
            remaining -= 1;
        }
        events.extend(self.draw_cards(remaining, rng));
        events
    }

    pub fn discard_hand(&mut self) -> Vec<BattleEvent> {
        let events = self
            .hand
            .iter()
            .map(|card| BattleEvent::CardDiscarded { card_id: card.id })
            .collect();
        self.discard_pile.append(&mut self.hand);
        events
    }

    /// Moves a played card out of the hand. `None` when something already took it.
    pub fn settle_played_card(&mut self, card_id: CardId) -> Option<BattleEvent> {
        let idx = self.find_card_in_hand_index(card_id)?;
        let card = self.hand.remove(idx);
        if card.is_exhaust() {
            self.exhaust_pile.push(card);
            Some(BattleEvent::CardExhausted { card_id })
        } else {
            self.discard_pile.push(card);
            Some(BattleEvent::CardDiscarded { card_id })
        }
    }

    pub fn evaluate_outcome(&mut self) -> Option<BattleOutcome> {
        if let Some(outcome) = self.outcome {
            return Some(outcome);
        }
        let outcome = if !self.hero_alive() {
            BattleOutcome::Lost { turn: self.turn }
        } else if self.all_enemies_defeated() {
            BattleOutcome::Won { turn: self.turn }
        } else {
            return None;
        };
        self.outcome = Some(outcome);
        Some(outcome)
    }

    pub fn integrity_check(&self) -> Result<(), IntegrityError> {
        let actual = self.cards_in_play();
        if actual != self.deck_size {
            return Err(IntegrityError::CardConservation {
                expected: self.deck_size,
                actual,
            });
        }

        let mut seen = HashSet::new();
        for card in self
            .hand
            .iter()
            .chain(self.draw_pile.iter())
            .chain(self.discard_pile.iter())
            .chain(self.exhaust_pile.iter())
        {
            if !seen.insert(card.id) {
                return Err(IntegrityError::DuplicateCardId { card_id: card.id });
            }
        }

        let combatants = std::iter::once((CombatantId::Hero, &self.hero)).chain(
            self.enemies
                .iter()
                .enumerate()
                .map(|(idx, enemy)| (CombatantId::Enemy(idx), &enemy.combatant)),
        );
        for (id, combatant) in combatants {
            if combatant.health < 0 || combatant.health > combatant.max_health {
                return Err(IntegrityError::HealthOutOfRange {
                    target: id,
                    value: combatant.health,
                });
            }
            let mut kinds = HashSet::new();
            for status in &combatant.statuses {
                if !kinds.insert(status.kind) {
                    return Err(IntegrityError::DuplicateStatus {
                        target: id,
                        kind: status.kind,
                    });
                }
            }
        }

        Ok(())
    }
}
