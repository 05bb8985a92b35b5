use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::card::{Card, CardId};
use super::combatant::CombatantId;
use super::definitions::{DefinitionError, DefinitionLibrary};
use super::state::{Battle, BattleEvent};
use super::status::{StatusEffect, StatusKind};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EffectTarget {
    Caster,
    ContextTargets,
    Hero,
    AllEnemies,
}

/// A scripted side effect carried by a card or emitted by a listener.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum EffectKind {
    ApplyStatus {
        target: EffectTarget,
        status: StatusEffect,
    },
    RemoveStatus {
        target: EffectTarget,
        kind: StatusKind,
    },
    Damage {
        target: EffectTarget,
        amount: i32,
    },
    Heal {
        target: EffectTarget,
        amount: i32,
    },
    GainBlock {
        target: EffectTarget,
        amount: i32,
    },
    DrawCards {
        count: u8,
    },
    GainEnergy {
        amount: u8,
    },
    /// Replaces the source card in hand with a fresh instance of `into`.
    Transform {
        into: String,
    },
    /// Adds an enemy that stays on the field but never acts.
    Summon {
        enemy: String,
    },
}

impl EffectKind {
    /// Definition keys this effect needs at resolution time.
    pub fn referenced_card(&self) -> Option<&str> {
        match self {
            EffectKind::Transform { into } => Some(into),
            _ => None,
        }
    }

    pub fn referenced_enemy(&self) -> Option<&str> {
        match self {
            EffectKind::Summon { enemy } => Some(enemy),
            _ => None,
        }
    }

    pub fn apply(
        &self,
        ctx: &EffectContext,
        state: &mut Battle,
        env: &mut ResolveEnv<'_>,
    ) -> Result<EffectResolution, DefinitionError> {
        let mut events = Vec::new();
        match self {
            EffectKind::ApplyStatus { target, status } => {
                for id in target.resolve(ctx, state) {
                    events.extend(state.add_status(id, status.clone()));
                }
            }
            EffectKind::RemoveStatus { target, kind } => {
                for id in target.resolve(ctx, state) {
                    events.extend(state.remove_status(id, *kind));
                }
            }
            EffectKind::Damage { target, amount } => {
                for id in target.resolve(ctx, state) {
                    events.extend(state.change_health(id, -amount.abs()));
                }
            }
            EffectKind::Heal { target, amount } => {
                for id in target.resolve(ctx, state) {
                    events.extend(state.change_health(id, amount.abs()));
                }
            }
            EffectKind::GainBlock { target, amount } => {
                for id in target.resolve(ctx, state) {
                    events.extend(state.change_block(id, *amount));
                }
            }
            EffectKind::DrawCards { count } => {
                if ctx.caster == CombatantId::Hero {
                    events.extend(state.draw_cards(*count as usize, &mut *env.rng));
                }
            }
            EffectKind::GainEnergy { amount } => {
                if ctx.caster == CombatantId::Hero {
                    events.push(state.change_energy(*amount as i32));
                }
            }
            EffectKind::Transform { into } => {
                let definition = env.library.card(into)?;
                let source = ctx
                    .source_card
                    .and_then(|card_id| state.find_card_in_hand_index(card_id).map(|idx| (card_id, idx)));
                if let Some((from, idx)) = source {
                    let new_id = state.allocate_card_id();
                    state.hand[idx] = definition.instantiate(new_id);
                    events.push(BattleEvent::CardTransformed {
                        from,
                        into: new_id,
                        key: into.clone(),
                    });
                } else {
                    debug!(card = ?ctx.source_card, "transform source is not in hand");
                }
            }
            EffectKind::Summon { enemy } => {
                let mut summoned = env.library.spawn_enemy_by_key(enemy)?;
                summoned.summoned = true;
                state.enemies.push(summoned);
                events.push(BattleEvent::EnemySummoned {
                    enemy: state.enemies.len() - 1,
                    key: enemy.clone(),
                });
            }
        }
        Ok(EffectResolution { events })
    }
}

impl EffectTarget {
    /// Living combatants addressed by this target in the given context.
    pub fn resolve(&self, ctx: &EffectContext, state: &Battle) -> Vec<CombatantId> {
        let candidates: Vec<CombatantId> = match self {
            EffectTarget::Caster => vec![ctx.caster],
            EffectTarget::ContextTargets => ctx.targets.clone(),
            EffectTarget::Hero => vec![CombatantId::Hero],
            EffectTarget::AllEnemies => state.alive_enemy_ids(),
        };
        candidates
            .into_iter()
            .filter(|id| state.combatant(*id).is_some_and(|c| c.is_alive()))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EffectContext {
    pub caster: CombatantId,
    pub source_card: Option<CardId>,
    #[serde(default)]
    pub targets: Vec<CombatantId>,
}

impl EffectContext {
    pub fn new(caster: CombatantId) -> Self {
        Self {
            caster,
            source_card: None,
            targets: Vec::new(),
        }
    }

    pub fn with_source_card(mut self, card_id: CardId) -> Self {
        self.source_card = Some(card_id);
        self
    }

    pub fn with_targets(mut self, targets: Vec<CombatantId>) -> Self {
        self.targets = targets;
        self
    }
}

/// Collaborators an effect may need beyond the battle itself.
pub struct ResolveEnv<'a> {
    pub library: &'a DefinitionLibrary,
    pub rng: &'a mut SmallRng,
}

#[derive(Default, Debug, Clone)]
pub struct EffectResolution {
    pub events: Vec<BattleEvent>,
}

impl EffectResolution {
    pub fn extend(&mut self, mut other: EffectResolution) {
        self.events.append(&mut other.events);
    }
}

#[derive(Debug, Clone)]
struct StackItem {
    priority: i8,
    order: u64,
    source: String,
    effect: EffectKind,
    context: EffectContext,
}

impl PartialEq for StackItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.order == other.order
    }
}

impl Eq for StackItem {}

impl PartialOrd for StackItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StackItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// Pending side effects: highest priority first, then first queued.
#[derive(Default)]
pub struct EffectStack {
    heap: BinaryHeap<StackItem>,
    order: u64,
}

impl EffectStack {
    pub fn push(&mut self, effect: EffectKind, priority: i8, source: String, context: EffectContext) {
        self.order += 1;
        self.heap.push(StackItem {
            priority,
            order: self.order,
            source,
            effect,
            context,
        });
    }

    fn pop(&mut self) -> Option<StackItem> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[derive(Default)]
pub struct EffectEngine {
    stack: EffectStack,
}

impl EffectEngine {
    pub fn queue_effect(
        &mut self,
        effect: EffectKind,
        priority: i8,
        source: impl Into<String>,
        context: EffectContext,
    ) {
        self.stack.push(effect, priority, source.into(), context);
    }

    pub fn resolve_all(
        &mut self,
        state: &mut Battle,
        env: &mut ResolveEnv<'_>,
    ) -> Result<Vec<BattleEvent>, DefinitionError> {
        let mut events = Vec::new();
        while let Some(item) = self.stack.pop() {
            debug!(source = %item.source, effect = ?item.effect, "resolving queued effect");
            let resolution = item.effect.apply(&item.context, state, env)?;
            events.extend(resolution.events);
        }
        Ok(events)
    }

    /// Applies a card's typed effect, then its scripted effects, in that order.
    pub fn resolve_card(
        &mut self,
        card: &Card,
        ctx: &EffectContext,
        bonus_damage: i32,
        state: &mut Battle,
        env: &mut ResolveEnv<'_>,
    ) -> Result<Vec<BattleEvent>, DefinitionError> {
        let mut resolution = EffectResolution::default();
        let Some(caster) = state.combatant(ctx.caster) else {
            return Ok(resolution.events);
        };

        if card.card_type.is_attack() {
            let mut repeat = u32::from(card.attack_repeat_count.max(1));
            if caster.status_effect(StatusKind::DoubleTake).is_some() {
                repeat *= 2;
                resolution
                    .events
                    .extend(state.remove_status(ctx.caster, StatusKind::DoubleTake));
            }
            for &target in &ctx.targets {
                for _ in 0..repeat {
                    let alive = state.combatant(target).is_some_and(|c| c.is_alive());
                    if !alive {
                        break;
                    }
                    let damage = state
                        .combatant(ctx.caster)
                        .map(|caster| caster.calculate_damage_modifiers(card))
                        .unwrap_or(0)
                        + bonus_damage;
                    resolution
                        .events
                        .extend(state.change_health(target, -damage.max(0)));
                }
            }
        } else if card.card_type.is_block() {
            let block = caster.calculate_defense_modifiers(card);
            resolution.events.extend(state.change_block(ctx.caster, block));
        }

        for effect in &card.effects {
            resolution.extend(effect.apply(ctx, state, env)?);
        }
        Ok(resolution.events)
    }

    pub fn stack(&self) -> &EffectStack {
        &self.stack
    }

    /// Drops everything still queued, e.g. after a failed resolution.
    pub fn clear(&mut self) {
        self.stack.clear();
    }
}
