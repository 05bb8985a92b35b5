use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{
    card::{Card, CardId},
    combatant::CombatantId,
    config::BattleConfig,
    definitions::{DefinitionError, DefinitionLibrary, EnemyDefinition, HeroDefinition},
    effects::{EffectContext, EffectEngine, EffectKind, ResolveEnv},
    relics::{BattleListener, RelicListener},
    state::{Battle, BattleEvent, BattleOutcome, BattlePhase, IntegrityError},
    status::StatusKind,
};
use crate::ai::{preview_intent, IntentAgent, IntentPreview};

const INTENT_SEED_SALT: u64 = 0x9E37_79B9_7F4A_7C15;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayCardAction {
    pub card_id: CardId,
    #[serde(default)]
    pub targets: Vec<CombatantId>,
}

impl PlayCardAction {
    pub fn new(card_id: CardId, targets: Vec<CombatantId>) -> Self {
        Self { card_id, targets }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[serde(tag = "type")]
pub enum RuleError {
    #[error("the battle is already over")]
    BattleFinished,
    #[error("expected phase {expected:?}, battle is in {actual:?}")]
    InvalidPhase {
        expected: BattlePhase,
        actual: BattlePhase,
    },
    #[error("card {card_id} is not in hand")]
    CardNotInHand { card_id: CardId },
    #[error("card needs {required} energy, {available} available")]
    InsufficientEnergy { required: u8, available: u8 },
    #[error("{target} cannot be targeted")]
    InvalidTarget { target: CombatantId },
    #[error("card {card_id} needs at least one target")]
    MissingTarget { card_id: CardId },
    #[error("no enemy at index {index}")]
    EnemyNotFound { index: usize },
    #[error("enemy {index} has no intent")]
    NoIntent { index: usize },
    #[error("{error}")]
    Definition {
        #[from]
        error: DefinitionError,
    },
    #[error("integrity violation: {error}")]
    IntegrityViolation { error: IntegrityError },
}

/// A snapshot handed back to callers after a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleResolution {
    pub state: Battle,
    pub events: Vec<BattleEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<BattleOutcome>,
}

impl BattleResolution {
    pub fn new(state: Battle, events: Vec<BattleEvent>) -> Self {
        let outcome = state.outcome;
        Self {
            state,
            events,
            outcome,
        }
    }
}

/// Receives every event as it is published.
pub trait BattleObserver {
    fn notify(&mut self, event: &BattleEvent);
}

impl<F> BattleObserver for F
where
    F: FnMut(&BattleEvent),
{
    fn notify(&mut self, event: &BattleEvent) {
        self(event)
    }
}

#[derive(Clone, Copy)]
enum ListenerHook {
    BattleStart,
    CardPlayed,
    CardResolved,
}

/// Drives a battle through its phases.
pub struct RuleEngine {
    library: DefinitionLibrary,
    config: BattleConfig,
    rng: SmallRng,
    intent_agent: IntentAgent,
    effect_engine: EffectEngine,
    relic_listeners: Vec<Box<dyn BattleListener>>,
    listeners: Vec<Box<dyn BattleListener>>,
    observers: Vec<Box<dyn BattleObserver>>,
}

impl RuleEngine {
    /// Validates every cross reference in `library` before accepting it.
    pub fn new(library: DefinitionLibrary, config: BattleConfig) -> Result<Self, DefinitionError> {
        library.validate()?;
        let (rng, intent_agent) = match config.seed {
            Some(seed) => (
                SmallRng::seed_from_u64(seed),
                IntentAgent::with_seed(seed ^ INTENT_SEED_SALT),
            ),
            None => (SmallRng::from_entropy(), IntentAgent::new()),
        };
        Ok(Self {
            library,
            config,
            rng,
            intent_agent,
            effect_engine: EffectEngine::default(),
            relic_listeners: Vec::new(),
            listeners: Vec::new(),
            observers: Vec::new(),
        })
    }

    pub fn library(&self) -> &DefinitionLibrary {
        &self.library
    }

    pub fn config(&self) -> &BattleConfig {
        &self.config
    }

    /// Extra listeners run after the relic listeners, in registration order.
    pub fn register_listener(&mut self, listener: Box<dyn BattleListener>) {
        self.listeners.push(listener);
    }

    pub fn subscribe(&mut self, observer: Box<dyn BattleObserver>) {
        self.observers.push(observer);
    }

    fn ensure_phase(state: &Battle, expected: BattlePhase) -> Result<(), RuleError> {
        if state.is_finished() {
            return Err(RuleError::BattleFinished);
        }
        if state.phase != expected {
            return Err(RuleError::InvalidPhase {
                expected,
                actual: state.phase,
            });
        }
        Ok(())
    }

    pub fn ensure_integrity(state: &Battle) -> Result<(), RuleError> {
        state
            .integrity_check()
            .map_err(|error| RuleError::IntegrityViolation { error })
    }

    fn publish(&mut self, state: &mut Battle, events: &[BattleEvent]) {
        for event in events {
            state.record_event(event.clone());
            for observer in &mut self.observers {
                observer.notify(event);
            }
        }
    }

    /// Runs `command` against a working copy of the battle. The copy replaces
    /// `state` and its events are published only when the command succeeds.
    fn commit<F>(&mut self, state: &mut Battle, command: F) -> Result<Vec<BattleEvent>, RuleError>
    where
        F: FnOnce(&mut Self, &mut Battle) -> Result<Vec<BattleEvent>, RuleError>,
    {
        let mut working = state.clone();
        match command(self, &mut working) {
            Ok(events) => {
                *state = working;
                self.publish(state, &events);
                Ok(events)
            }
            Err(error) => {
                self.effect_engine.clear();
                warn!(%error, turn = state.turn, "command rolled back");
                Err(error)
            }
        }
    }

    fn set_phase(state: &mut Battle, to: BattlePhase) -> BattleEvent {
        let from = state.phase;
        state.phase = to;
        BattleEvent::PhaseChanged { from, to }
    }

    pub fn start_battle(
        &mut self,
        hero: &HeroDefinition,
        enemies: &[EnemyDefinition],
    ) -> Result<Battle, RuleError> {
        let deck = self.library.build_deck(hero)?;
        for key in &hero.relics {
            self.library.relic(key)?;
        }
        let spawned = enemies
            .iter()
            .map(|definition| self.library.spawn_enemy(definition))
            .collect::<Result<Vec<_>, _>>()?;

        let mut state = Battle::new(
            self.library.build_hero(hero),
            spawned,
            deck,
            hero.max_energy,
            hero.relics.clone(),
        );
        let event = BattleEvent::BattleStarted {
            hero: hero.key.clone(),
            enemies: enemies.iter().map(|enemy| enemy.key.clone()).collect(),
        };
        self.publish(&mut state, &[event]);
        info!(
            hero = %hero.key,
            enemies = enemies.len(),
            deck = state.deck_size,
            "battle created"
        );
        Ok(state)
    }

    pub fn start_battle_by_keys<S: AsRef<str>>(
        &mut self,
        hero_key: &str,
        enemy_keys: &[S],
    ) -> Result<Battle, RuleError> {
        let hero = self.library.hero(hero_key)?.clone();
        let enemies = enemy_keys
            .iter()
            .map(|key| self.library.enemy(key.as_ref()).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        self.start_battle(&hero, &enemies)
    }

    /// Leaves `Begin`: binds relic listeners, applies battle-start effects
    /// and enters the first player turn.
    pub fn begin(&mut self, state: &mut Battle) -> Result<Vec<BattleEvent>, RuleError> {
        Self::ensure_phase(state, BattlePhase::Begin)?;

        let mut relic_listeners: Vec<Box<dyn BattleListener>> = Vec::new();
        for key in &state.relics {
            let relic = self.library.relic(key)?.clone();
            relic_listeners.push(Box::new(RelicListener::new(relic)));
        }
        self.relic_listeners = relic_listeners;

        self.commit(state, |engine, state| {
            let mut events = Vec::new();
            let ctx = EffectContext::new(CombatantId::Hero).with_targets(state.alive_enemy_ids());
            events.extend(engine.fire_listeners(state, ListenerHook::BattleStart, None, &ctx));
            events.extend(engine.resolve_queued(state)?);

            if let Some(outcome) = state.evaluate_outcome() {
                events.extend(Self::finish(state, outcome));
            } else {
                events.extend(engine.enter_player_turn(state)?);
            }
            Ok(events)
        })
    }

    fn enter_player_turn(&mut self, state: &mut Battle) -> Result<Vec<BattleEvent>, RuleError> {
        let mut events = vec![Self::set_phase(state, BattlePhase::PlayerTurn)];

        state.turn += 1;
        events.push(BattleEvent::TurnStarted { turn: state.turn });

        state.energy = state.max_energy;
        events.push(BattleEvent::EnergyChanged {
            energy: state.energy,
        });

        // Battle-start block carries into the first turn.
        if self.config.block_decays && state.turn > 1 {
            events.extend(state.clear_block(CombatantId::Hero));
        }

        events.extend(state.run_turn_start(CombatantId::Hero));
        for id in state.alive_enemy_ids() {
            events.extend(state.run_turn_start(id));
        }

        for enemy_index in state.acting_enemies() {
            let decision = self.intent_agent.decide_intent(state, enemy_index)?;
            let enemy = &mut state.enemies[enemy_index];
            enemy.last_intent = Some(decision.index);
            events.push(BattleEvent::IntentSelected {
                enemy: enemy_index,
                card_key: decision.card.key.clone(),
            });
            enemy.intent = Some(decision.card);
        }

        let lucky = state.hero.amplifier(StatusKind::LuckyDraw).max(0) as usize;
        let to_draw = self.config.base_draw + lucky;
        if state.turn == 1 {
            events.extend(state.draw_opening_hand(to_draw, &mut self.rng));
        } else {
            events.extend(state.draw_cards(to_draw, &mut self.rng));
        }

        debug!(
            turn = state.turn,
            hand = state.hand.len(),
            draw = state.draw_pile.len(),
            discard = state.discard_pile.len(),
            "player turn started"
        );
        Ok(events)
    }

    fn validate_targets(state: &Battle, card: &Card, targets: &[CombatantId]) -> Result<(), RuleError> {
        for &target in targets {
            let alive = state.combatant(target).is_some_and(|c| c.is_alive());
            if !alive {
                return Err(RuleError::InvalidTarget { target });
            }
        }
        if card.card_type.is_attack() && targets.is_empty() {
            return Err(RuleError::MissingTarget { card_id: card.id });
        }
        Ok(())
    }

    /// Combo bookkeeping for a card about to be played. Returns bonus damage.
    fn apply_combo(state: &mut Battle, card: &Card) -> i32 {
        let Some(combo) = state.hero.status_effect_mut(StatusKind::Combo) else {
            return 0;
        };
        let streak = combo.tag.as_deref() == Some(card.name.as_str());
        combo.tag = Some(card.name.clone());
        if streak && card.card_type.is_attack() {
            combo.amplifier
        } else {
            0
        }
    }

    fn fire_listeners(
        &mut self,
        state: &Battle,
        hook: ListenerHook,
        card: Option<&Card>,
        ctx: &EffectContext,
    ) -> Vec<BattleEvent> {
        let mut events = Vec::new();
        let listeners = self
            .relic_listeners
            .iter_mut()
            .chain(self.listeners.iter_mut());
        for listener in listeners {
            let effects: Vec<EffectKind> = match (hook, card) {
                (ListenerHook::BattleStart, _) => listener.on_battle_start(state),
                (ListenerHook::CardPlayed, Some(card)) => listener.on_card_played(card, state),
                (ListenerHook::CardResolved, Some(card)) => listener.on_card_resolved(card, state),
                _ => Vec::new(),
            };
            if effects.is_empty() {
                continue;
            }
            let name = listener.name().to_string();
            let priority = listener.priority();
            debug!(listener = %name, effects = effects.len(), "listener triggered");
            events.push(BattleEvent::RelicTriggered { relic: name.clone() });
            for effect in effects {
                self.effect_engine
                    .queue_effect(effect, priority, name.clone(), ctx.clone());
            }
        }
        events
    }

    fn resolve_queued(&mut self, state: &mut Battle) -> Result<Vec<BattleEvent>, RuleError> {
        let mut env = ResolveEnv {
            library: &self.library,
            rng: &mut self.rng,
        };
        Ok(self.effect_engine.resolve_all(state, &mut env)?)
    }

    fn resolve_card(
        &mut self,
        state: &mut Battle,
        card: &Card,
        ctx: &EffectContext,
        bonus_damage: i32,
    ) -> Result<Vec<BattleEvent>, RuleError> {
        let mut env = ResolveEnv {
            library: &self.library,
            rng: &mut self.rng,
        };
        Ok(self
            .effect_engine
            .resolve_card(card, ctx, bonus_damage, state, &mut env)?)
    }

    fn finish(state: &mut Battle, outcome: BattleOutcome) -> Vec<BattleEvent> {
        match outcome {
            BattleOutcome::Won { turn } => {
                info!(turn, "battle won");
                vec![
                    Self::set_phase(state, BattlePhase::Won),
                    BattleEvent::BattleWon { turn },
                ]
            }
            BattleOutcome::Lost { turn } => {
                info!(turn, "battle lost");
                vec![
                    Self::set_phase(state, BattlePhase::Lost),
                    BattleEvent::BattleLost { turn },
                ]
            }
        }
    }

    pub fn play_card(
        &mut self,
        state: &mut Battle,
        action: PlayCardAction,
    ) -> Result<Vec<BattleEvent>, RuleError> {
        if let Err(error) = Self::ensure_phase(state, BattlePhase::PlayerTurn) {
            warn!(card = action.card_id, %error, "play rejected");
            return Err(error);
        }

        let hand_index = state
            .find_card_in_hand_index(action.card_id)
            .ok_or(RuleError::CardNotInHand {
                card_id: action.card_id,
            })?;
        let card = state.hand[hand_index].clone();

        Self::validate_targets(state, &card, &action.targets)?;
        if card.cost > state.energy {
            warn!(card = card.id, cost = card.cost, energy = state.energy, "not enough energy");
            return Err(RuleError::InsufficientEnergy {
                required: card.cost,
                available: state.energy,
            });
        }

        self.commit(state, |engine, state| engine.resolve_play(state, card, action.targets))
    }

    fn resolve_play(
        &mut self,
        state: &mut Battle,
        card: Card,
        targets: Vec<CombatantId>,
    ) -> Result<Vec<BattleEvent>, RuleError> {
        let mut events = Vec::new();
        if card.cost > 0 {
            events.push(state.change_energy(-i32::from(card.cost)));
        }
        events.push(BattleEvent::CardPlayed {
            card_id: card.id,
            key: card.key.clone(),
            targets: targets.clone(),
        });

        let ctx = EffectContext::new(CombatantId::Hero)
            .with_source_card(card.id)
            .with_targets(targets);

        let bonus_damage = Self::apply_combo(state, &card);
        events.extend(self.fire_listeners(state, ListenerHook::CardPlayed, Some(&card), &ctx));
        events.extend(self.resolve_queued(state)?);

        events.extend(self.resolve_card(state, &card, &ctx, bonus_damage)?);

        match state.settle_played_card(card.id) {
            Some(event) => events.push(event),
            None => debug!(card = card.id, "played card already left the hand"),
        }
        events.push(BattleEvent::CardResolved {
            card_id: card.id,
            key: card.key.clone(),
        });

        events.extend(self.fire_listeners(state, ListenerHook::CardResolved, Some(&card), &ctx));
        events.extend(self.resolve_queued(state)?);

        if let Some(outcome) = state.evaluate_outcome() {
            events.extend(Self::finish(state, outcome));
        }

        debug!(card = %card.key, energy = state.energy, "card played");
        Ok(events)
    }

    /// Ends the player turn, runs the enemy turn and either finishes the
    /// battle or opens the next player turn.
    pub fn end_turn(&mut self, state: &mut Battle) -> Result<Vec<BattleEvent>, RuleError> {
        Self::ensure_phase(state, BattlePhase::PlayerTurn)?;
        self.commit(state, Self::resolve_enemy_turn)
    }

    fn resolve_enemy_turn(&mut self, state: &mut Battle) -> Result<Vec<BattleEvent>, RuleError> {
        let mut events = vec![Self::set_phase(state, BattlePhase::EnemyTurn)];
        events.extend(state.discard_hand());

        for enemy_index in state.acting_enemies() {
            if !state.hero_alive() {
                break;
            }
            if !state.enemies[enemy_index].acts() {
                continue;
            }
            let Some(card) = state.enemies[enemy_index].intent.take() else {
                warn!(enemy = enemy_index, "enemy has no stored intent");
                continue;
            };
            let caster = CombatantId::Enemy(enemy_index);
            if self.config.block_decays {
                events.extend(state.clear_block(caster));
            }
            events.push(BattleEvent::EnemyActed {
                enemy: enemy_index,
                card_key: card.key.clone(),
            });
            let ctx = EffectContext::new(caster)
                .with_source_card(card.id)
                .with_targets(vec![CombatantId::Hero]);
            events.extend(self.resolve_card(state, &card, &ctx, 0)?);
        }

        events.push(BattleEvent::TurnEnded { turn: state.turn });
        events.extend(state.run_turn_end(CombatantId::Hero));
        for id in state.alive_enemy_ids() {
            events.extend(state.run_turn_end(id));
        }

        if let Some(outcome) = state.evaluate_outcome() {
            events.extend(Self::finish(state, outcome));
        } else {
            events.extend(self.enter_player_turn(state)?);
        }
        Ok(events)
    }

    pub fn enemy_intent(state: &Battle, enemy_index: usize) -> Result<IntentPreview, RuleError> {
        preview_intent(state, enemy_index)
    }

    pub fn enemy_intents(state: &Battle) -> Vec<IntentPreview> {
        (0..state.enemies.len())
            .filter_map(|idx| preview_intent(state, idx).ok())
            .collect()
    }

    pub fn check_victory(state: &mut Battle) -> Option<BattleOutcome> {
        state.evaluate_outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::IntentAlgorithm;
    use crate::game::card::{CardTrait, CardType};
    use crate::game::definitions::SAMPLE_LIBRARY;
    use crate::game::effects::EffectTarget;
    use crate::game::relics::{CardFilter, RelicDefinition, RelicHook, RelicTrigger};
    use crate::game::status::StatusEffect;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn hero(deck: &[&str], relics: &[&str]) -> HeroDefinition {
        HeroDefinition {
            key: "tester".into(),
            name: "Tester".into(),
            max_health: 50,
            health: None,
            max_energy: 3,
            deck: deck.iter().map(|key| key.to_string()).collect(),
            relics: relics.iter().map(|key| key.to_string()).collect(),
            statuses: Vec::new(),
        }
    }

    fn dummy(key: &str, health: i32, behavior: &[&str]) -> EnemyDefinition {
        EnemyDefinition {
            key: key.into(),
            name: key.into(),
            max_health: health,
            behavior: behavior.iter().map(|key| key.to_string()).collect(),
            algorithm: IntentAlgorithm::Sequential,
            statuses: Vec::new(),
        }
    }

    fn engine() -> RuleEngine {
        RuleEngine::new(SAMPLE_LIBRARY.clone(), BattleConfig::seeded(17))
            .expect("sample library is valid")
    }

    fn started(engine: &mut RuleEngine, hero: &HeroDefinition, enemies: &[EnemyDefinition]) -> Battle {
        let mut state = engine.start_battle(hero, enemies).expect("battle starts");
        engine.begin(&mut state).expect("battle begins");
        state
    }

    fn hand_card(state: &Battle, key: &str) -> CardId {
        state
            .hand
            .iter()
            .find(|card| card.key == key)
            .map(|card| card.id)
            .expect("card in hand")
    }

    #[test]
    fn begin_enters_first_player_turn() {
        let mut engine = engine();
        let state = started(&mut engine, &hero(&["strike"; 10], &[]), &[dummy("slime", 20, &["bite"])]);

        assert_eq!(state.phase, BattlePhase::PlayerTurn);
        assert_eq!(state.turn, 1);
        assert_eq!(state.energy, 3);
        assert_eq!(state.hand.len(), 5);
        assert_eq!(state.enemies[0].intent.as_ref().map(|c| c.key.as_str()), Some("bite"));
        assert!(state.integrity_check().is_ok());
    }

    #[test]
    fn opening_hand_draws_every_cheat_card() {
        let library = SAMPLE_LIBRARY.clone().with_card(
            Card::attacker("loaded_die", "Loaded Die", 0, 1).with_trait(CardTrait::CheatCard),
        );
        let mut engine =
            RuleEngine::new(library, BattleConfig::seeded(4)).expect("library is valid");
        let mut deck = vec!["strike"; 8];
        deck.push("ace_in_the_hole");
        deck.push("loaded_die");

        let state = started(&mut engine, &hero(&deck, &[]), &[dummy("slime", 20, &["bite"])]);

        assert_eq!(state.hand.len(), 5);
        assert_eq!(state.hand.iter().filter(|card| card.is_cheat_card()).count(), 2);
        assert_eq!(state.hand.iter().filter(|card| !card.is_cheat_card()).count(), 3);
    }

    #[test]
    fn lucky_draw_adds_cards() {
        let mut engine = engine();
        let mut definition = hero(&["strike"; 10], &[]);
        definition
            .statuses
            .push(StatusEffect::permanent(StatusKind::LuckyDraw, 2));
        let state = started(&mut engine, &definition, &[dummy("slime", 20, &["bite"])]);
        assert_eq!(state.hand.len(), 7);
    }

    #[test]
    fn playing_an_attack_spends_energy_and_discards() {
        let mut engine = engine();
        let mut state = started(&mut engine, &hero(&["flurry"; 6], &[]), &[dummy("slime", 20, &["bite"])]);
        let card_id = hand_card(&state, "flurry");

        engine
            .play_card(&mut state, PlayCardAction::new(card_id, vec![CombatantId::Enemy(0)]))
            .expect("play succeeds");

        assert_eq!(state.enemies[0].combatant.health, 8);
        assert_eq!(state.energy, 1);
        assert_eq!(state.discard_pile.len(), 1);
        assert!(state.integrity_check().is_ok());
    }

    #[test]
    fn rejected_commands_leave_the_state_alone() {
        let mut engine = engine();
        let mut state = started(&mut engine, &hero(&["bash"; 6], &[]), &[dummy("slime", 20, &["bite"])]);
        let card_id = hand_card(&state, "bash");
        let target = vec![CombatantId::Enemy(0)];

        engine
            .play_card(&mut state, PlayCardAction::new(card_id, target.clone()))
            .expect("first bash");
        let second = hand_card(&state, "bash");
        let before = state.clone();

        assert_eq!(
            engine.play_card(&mut state, PlayCardAction::new(second, target.clone())),
            Err(RuleError::InsufficientEnergy {
                required: 2,
                available: 1
            })
        );
        assert_eq!(
            engine.play_card(&mut state, PlayCardAction::new(999, target)),
            Err(RuleError::CardNotInHand { card_id: 999 })
        );
        assert_eq!(
            engine.play_card(&mut state, PlayCardAction::new(second, Vec::new())),
            Err(RuleError::MissingTarget { card_id: second })
        );
        assert_eq!(state, before);
    }

    #[test]
    fn commands_outside_player_turn_are_rejected() {
        let mut engine = engine();
        let mut state = engine
            .start_battle(&hero(&["strike"; 6], &[]), &[dummy("slime", 20, &["bite"])])
            .expect("battle starts");

        assert_eq!(
            engine.end_turn(&mut state),
            Err(RuleError::InvalidPhase {
                expected: BattlePhase::PlayerTurn,
                actual: BattlePhase::Begin
            })
        );
        assert_eq!(state.phase, BattlePhase::Begin);
    }

    #[test]
    fn end_turn_runs_enemies_and_starts_next_turn() {
        let mut engine = engine();
        let mut state = started(&mut engine, &hero(&["strike"; 12], &[]), &[dummy("slime", 20, &["bite"])]);

        engine.end_turn(&mut state).expect("turn ends");

        assert_eq!(state.phase, BattlePhase::PlayerTurn);
        assert_eq!(state.turn, 2);
        assert_eq!(state.hero.health, 45);
        assert_eq!(state.hand.len(), 5);
        assert_eq!(state.discard_pile.len(), 5);
        assert!(state.integrity_check().is_ok());
    }

    #[test]
    fn hero_death_on_enemy_turn_loses() {
        let mut engine = engine();
        let mut definition = hero(&["strike"; 6], &[]);
        definition.health = Some(4);
        let mut state = started(&mut engine, &definition, &[dummy("slime", 20, &["bite"])]);

        let events = engine.end_turn(&mut state).expect("turn ends");

        assert_eq!(state.phase, BattlePhase::Lost);
        assert_eq!(state.outcome, Some(BattleOutcome::Lost { turn: 1 }));
        assert!(events.contains(&BattleEvent::BattleLost { turn: 1 }));
        assert_eq!(
            engine.end_turn(&mut state),
            Err(RuleError::BattleFinished)
        );
    }

    #[test]
    fn killing_the_last_enemy_wins() {
        let mut engine = engine();
        let mut state = started(&mut engine, &hero(&["strike"; 6], &[]), &[dummy("slime", 6, &["bite"])]);
        let card_id = hand_card(&state, "strike");

        let events = engine
            .play_card(&mut state, PlayCardAction::new(card_id, vec![CombatantId::Enemy(0)]))
            .expect("strike lands");

        assert_eq!(state.phase, BattlePhase::Won);
        assert!(events.contains(&BattleEvent::CombatantDied {
            target: CombatantId::Enemy(0)
        }));
        assert!(events.contains(&BattleEvent::BattleWon { turn: 1 }));
    }

    #[test]
    fn exhaust_cards_go_to_the_exhaust_pile() {
        let mut engine = engine();
        let mut state = started(&mut engine, &hero(&["war_cry"; 6], &[]), &[dummy("slime", 20, &["bite"])]);
        let card_id = hand_card(&state, "war_cry");

        engine
            .play_card(&mut state, PlayCardAction::new(card_id, Vec::new()))
            .expect("war cry");

        assert_eq!(state.exhaust_pile.len(), 1);
        assert!(state.discard_pile.is_empty());
        assert_eq!(state.hero.amplifier(StatusKind::Strength), 2);
        assert!(state.integrity_check().is_ok());
    }

    #[test]
    fn transformed_card_skips_the_discard_step() {
        let mut engine = engine();
        let mut state = started(&mut engine, &hero(&["metamorph"; 5], &[]), &[dummy("slime", 20, &["bite"])]);
        let card_id = hand_card(&state, "metamorph");

        let events = engine
            .play_card(&mut state, PlayCardAction::new(card_id, Vec::new()))
            .expect("metamorph");

        assert!(state.discard_pile.is_empty());
        assert_eq!(state.hand.iter().filter(|card| card.key == "strike").count(), 1);
        assert!(!events
            .iter()
            .any(|event| matches!(event, BattleEvent::CardDiscarded { .. })));
        assert!(state.integrity_check().is_ok());
    }

    #[test]
    fn combo_rewards_repeating_the_same_attack() {
        let mut engine = engine();
        let mut definition = hero(&["strike"; 6], &[]);
        definition.max_energy = 5;
        definition
            .statuses
            .push(StatusEffect::permanent(StatusKind::Combo, 3));
        let mut state = started(&mut engine, &definition, &[dummy("golem", 60, &["bite"])]);
        let target = vec![CombatantId::Enemy(0)];

        let first = hand_card(&state, "strike");
        engine
            .play_card(&mut state, PlayCardAction::new(first, target.clone()))
            .expect("first strike");
        assert_eq!(state.enemies[0].combatant.health, 54);

        let second = hand_card(&state, "strike");
        engine
            .play_card(&mut state, PlayCardAction::new(second, target))
            .expect("second strike");
        assert_eq!(state.enemies[0].combatant.health, 45);
    }

    #[test]
    fn relics_fire_in_priority_then_acquisition_order() {
        let gain = |amount| EffectKind::ApplyStatus {
            target: EffectTarget::Caster,
            status: StatusEffect::new(StatusKind::Strength, amount, 0),
        };
        let library = SAMPLE_LIBRARY
            .clone()
            .with_relic(RelicDefinition::new("first", "First").with_trigger(RelicTrigger::new(
                RelicHook::BattleStart,
                vec![gain(1)],
            )))
            .with_relic(RelicDefinition::new("second", "Second").with_trigger(RelicTrigger::new(
                RelicHook::BattleStart,
                vec![gain(10)],
            )))
            .with_relic(
                RelicDefinition::new("eager", "Eager")
                    .with_priority(3)
                    .with_trigger(RelicTrigger::new(RelicHook::BattleStart, vec![gain(100)])),
            );
        let mut engine =
            RuleEngine::new(library, BattleConfig::seeded(2)).expect("library is valid");
        let state = started(
            &mut engine,
            &hero(&["strike"; 6], &["first", "second", "eager"]),
            &[dummy("slime", 20, &["bite"])],
        );

        let strength: Vec<i32> = state
            .event_log
            .iter()
            .filter_map(|event| match event {
                BattleEvent::StatusAdded { status, .. } if status.kind == StatusKind::Strength => {
                    Some(status.amplifier)
                }
                _ => None,
            })
            .collect();
        assert_eq!(strength, vec![100, 101, 111]);
    }

    #[test]
    fn card_resolved_relics_see_the_finished_card() {
        let library = SAMPLE_LIBRARY.clone().with_relic(
            RelicDefinition::new("spiky", "Spiky").with_trigger(
                RelicTrigger::new(
                    RelicHook::CardResolved,
                    vec![EffectKind::Damage {
                        target: EffectTarget::AllEnemies,
                        amount: 2,
                    }],
                )
                .with_filter(CardFilter::OfType {
                    card_type: CardType::Blocker,
                }),
            ),
        );
        let mut engine =
            RuleEngine::new(library, BattleConfig::seeded(9)).expect("library is valid");
        let mut state = started(
            &mut engine,
            &hero(&["defend"; 6], &["spiky"]),
            &[dummy("a", 10, &["bite"]), dummy("b", 10, &["bite"])],
        );
        let card_id = hand_card(&state, "defend");

        engine
            .play_card(&mut state, PlayCardAction::new(card_id, Vec::new()))
            .expect("defend");

        assert_eq!(state.hero.block, 5);
        assert_eq!(state.enemies[0].combatant.health, 8);
        assert_eq!(state.enemies[1].combatant.health, 8);
    }

    #[test]
    fn custom_listeners_and_observers_are_notified() {
        struct Tithe;
        impl BattleListener for Tithe {
            fn name(&self) -> &str {
                "Tithe"
            }
            fn on_card_played(&mut self, _card: &Card, _state: &Battle) -> Vec<EffectKind> {
                vec![EffectKind::Heal {
                    target: EffectTarget::Hero,
                    amount: 1,
                }]
            }
        }

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut engine = engine();
        engine.register_listener(Box::new(Tithe));
        engine.subscribe(Box::new(move |event: &BattleEvent| {
            sink.borrow_mut().push(event.clone());
        }));

        let mut definition = hero(&["defend"; 6], &[]);
        definition.health = Some(10);
        let mut state = started(&mut engine, &definition, &[dummy("slime", 20, &["bite"])]);
        let card_id = hand_card(&state, "defend");
        engine
            .play_card(&mut state, PlayCardAction::new(card_id, Vec::new()))
            .expect("defend");

        assert_eq!(state.hero.health, 11);
        assert_eq!(*seen.borrow(), state.event_log);
        assert!(seen
            .borrow()
            .contains(&BattleEvent::RelicTriggered { relic: "Tithe".into() }));
    }

    #[test]
    fn summoned_enemies_never_act_but_must_die() {
        let mut engine = engine();
        let mut state = started(
            &mut engine,
            &hero(&["strike"; 10], &[]),
            &[dummy("caller", 10, &["call_help", "harden"])],
        );

        engine.end_turn(&mut state).expect("caller summons");
        assert_eq!(state.enemies.len(), 2);
        assert!(state.enemies[1].summoned);
        assert!(state.enemies[1].intent.is_none());
        assert_eq!(state.acting_enemies(), vec![0]);

        state.enemies[0].combatant.change_health(-100);
        assert_eq!(RuleEngine::check_victory(&mut state), None);
    }

    #[test]
    fn block_decays_each_turn_when_enabled() {
        let mut engine = engine();
        let mut state = started(&mut engine, &hero(&["defend"; 10], &[]), &[dummy("slime", 20, &["harden", "bite"])]);
        let card_id = hand_card(&state, "defend");
        engine
            .play_card(&mut state, PlayCardAction::new(card_id, Vec::new()))
            .expect("defend");
        assert_eq!(state.hero.block, 5);

        engine.end_turn(&mut state).expect("turn ends");
        assert_eq!(state.hero.block, 0);
        assert_eq!(state.enemies[0].combatant.block, 6);
    }

    #[test]
    fn intent_preview_reports_stored_move() {
        let mut engine = engine();
        let state = started(&mut engine, &hero(&["strike"; 6], &[]), &[dummy("bandit", 20, &["gnaw"])]);

        let preview = RuleEngine::enemy_intent(&state, 0).expect("intent");
        assert_eq!(preview.key, "gnaw");
        assert_eq!(preview.total_damage, 6);
        assert_eq!(
            RuleEngine::enemy_intent(&state, 3),
            Err(RuleError::EnemyNotFound { index: 3 })
        );
    }

    #[test]
    fn unknown_keys_fail_before_the_battle_exists() {
        let mut engine = engine();
        assert!(matches!(
            engine.start_battle_by_keys("wanderer", &["dragon"]),
            Err(RuleError::Definition {
                error: DefinitionError::EnemyNotFound { .. }
            })
        ));
    }

    #[test]
    fn cards_are_conserved_over_many_turns() {
        let mut engine = engine();
        let mut state = engine
            .start_battle_by_keys("wanderer", &["slime", "bandit"])
            .expect("sample battle");
        engine.begin(&mut state).expect("begins");

        for _ in 0..6 {
            if state.is_finished() {
                break;
            }
            while let Some(card) = state
                .hand
                .iter()
                .find(|card| card.cost <= state.energy)
                .cloned()
            {
                let targets = match state.alive_enemy_ids().first() {
                    Some(&target) => vec![target],
                    None => break,
                };
                engine
                    .play_card(&mut state, PlayCardAction::new(card.id, targets))
                    .expect("affordable card plays");
                RuleEngine::ensure_integrity(&state).expect("conserved after play");
                if state.is_finished() {
                    break;
                }
            }
            if state.is_finished() {
                break;
            }
            engine.end_turn(&mut state).expect("turn ends");
            RuleEngine::ensure_integrity(&state).expect("conserved after turn");
        }
    }

    #[test]
    fn engine_rejects_dangling_definitions() {
        let bad_transform = SAMPLE_LIBRARY.clone().with_card(
            Card::new("bad", "Bad", 0, CardType::SpecialMisc).with_effect(EffectKind::Transform {
                into: "missing".into(),
            }),
        );
        assert_eq!(
            RuleEngine::new(bad_transform, BattleConfig::seeded(1)).err(),
            Some(DefinitionError::CardNotFound {
                key: "missing".into()
            })
        );

        let bad_summon = SAMPLE_LIBRARY.clone().with_card(
            Card::new("haunt", "Haunt", 0, CardType::SpecialMisc).with_effect(EffectKind::Summon {
                enemy: "ghost".into(),
            }),
        );
        assert_eq!(
            RuleEngine::new(bad_summon, BattleConfig::seeded(1)).err(),
            Some(DefinitionError::EnemyNotFound {
                key: "ghost".into()
            })
        );
    }

    #[test]
    fn failed_play_rolls_the_battle_back() {
        struct Haunted;
        impl BattleListener for Haunted {
            fn name(&self) -> &str {
                "Haunted"
            }
            fn on_card_played(&mut self, _card: &Card, _state: &Battle) -> Vec<EffectKind> {
                vec![EffectKind::Summon {
                    enemy: "ghost".into(),
                }]
            }
        }

        let mut engine = engine();
        engine.register_listener(Box::new(Haunted));
        let mut state = started(&mut engine, &hero(&["strike"; 6], &[]), &[dummy("slime", 20, &["bite"])]);
        let card_id = hand_card(&state, "strike");
        let before = state.clone();

        assert_eq!(
            engine.play_card(&mut state, PlayCardAction::new(card_id, vec![CombatantId::Enemy(0)])),
            Err(RuleError::Definition {
                error: DefinitionError::EnemyNotFound {
                    key: "ghost".into()
                }
            })
        );
        assert_eq!(state, before);
        assert!(engine.effect_engine.stack().is_empty());

        engine.end_turn(&mut state).expect("battle is still playable");
        assert_eq!(state.turn, 2);
    }

    #[test]
    fn failed_enemy_turn_rolls_the_battle_back() {
        let mut engine = engine();
        let mut state = started(&mut engine, &hero(&["strike"; 10], &[]), &[dummy("slime", 20, &["bite"])]);
        let bite = state.enemies[0].intent.clone();
        state.enemies[0].intent = Some(
            Card::new("haunt", "Haunt", 0, CardType::SpecialMisc).with_effect(EffectKind::Summon {
                enemy: "ghost".into(),
            }),
        );
        let before = state.clone();

        assert!(matches!(
            engine.end_turn(&mut state),
            Err(RuleError::Definition {
                error: DefinitionError::EnemyNotFound { .. }
            })
        ));
        assert_eq!(state, before);
        assert_eq!(state.phase, BattlePhase::PlayerTurn);
        assert_eq!(state.hand.len(), 5);

        state.enemies[0].intent = bite;
        engine.end_turn(&mut state).expect("turn ends");
        assert_eq!(state.phase, BattlePhase::PlayerTurn);
        assert_eq!(state.turn, 2);
    }

    #[test]
    fn battle_start_block_lasts_through_the_first_turn() {
        let mut engine = engine();
        let mut state = started(&mut engine, &hero(&["strike"; 10], &["anchor"]), &[dummy("slime", 20, &["bite"])]);
        assert_eq!(state.hero.block, 8);

        engine.end_turn(&mut state).expect("turn ends");
        assert_eq!(state.hero.health, 50);
        assert_eq!(state.hero.block, 0);
    }

    #[test]
    fn block_carries_over_when_decay_is_off() {
        let mut engine = RuleEngine::new(
            SAMPLE_LIBRARY.clone(),
            BattleConfig::seeded(5).with_block_decay(false),
        )
        .expect("sample library is valid");
        let mut state = started(&mut engine, &hero(&["defend"; 10], &[]), &[dummy("turtle", 20, &["harden"])]);
        let card_id = hand_card(&state, "defend");
        engine
            .play_card(&mut state, PlayCardAction::new(card_id, Vec::new()))
            .expect("defend");

        engine.end_turn(&mut state).expect("first turn ends");
        assert_eq!(state.hero.block, 5);
        assert_eq!(state.enemies[0].combatant.block, 6);

        engine.end_turn(&mut state).expect("second turn ends");
        assert_eq!(state.hero.block, 5);
        assert_eq!(state.enemies[0].combatant.block, 12);
    }

    #[test]
    fn dead_enemies_show_no_intent() {
        let mut engine = engine();
        let mut state = started(
            &mut engine,
            &hero(&["strike"; 6], &[]),
            &[dummy("weak", 6, &["bite"]), dummy("tough", 30, &["gnaw"])],
        );
        let card_id = hand_card(&state, "strike");
        engine
            .play_card(&mut state, PlayCardAction::new(card_id, vec![CombatantId::Enemy(0)]))
            .expect("strike lands");

        assert_eq!(
            RuleEngine::enemy_intent(&state, 0),
            Err(RuleError::NoIntent { index: 0 })
        );
        let previews = RuleEngine::enemy_intents(&state);
        assert_eq!(previews.len(), 1);
        assert_eq!(previews[0].enemy, 1);
    }
}
