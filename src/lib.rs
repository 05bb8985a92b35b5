pub mod ai;
pub mod game;

use gloo_timers::future::TimeoutFuture;
use serde_wasm_bindgen::{from_value, to_value};
use std::str::FromStr;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;
use web_sys::js_sys::Promise;

pub use ai::{IntentAgent, IntentAlgorithm, IntentDecision, IntentPreview};
pub use game::{
    Battle, BattleConfig, BattleEvent, BattleListener, BattleObserver, BattleOutcome, BattlePhase,
    BattleResolution, Card, CardId, CardTrait, CardType, Combatant, CombatantId, DefinitionError,
    DefinitionLibrary, EffectContext, EffectEngine, EffectKind, EffectTarget, Enemy, EnemyDefinition,
    HeroDefinition, IntegrityError, PlayCardAction, RelicDefinition, RuleEngine, RuleError,
    StatusEffect, StatusKind, SAMPLE_LIBRARY,
};

#[cfg(feature = "wee_alloc")]
#[global_allocator]
static ALLOC: wee_alloc::WeeAlloc = wee_alloc::WeeAlloc::INIT;

#[wasm_bindgen(start)]
pub fn start() {
    set_panic_hook();
}

fn to_js_error(error: RuleError) -> JsValue {
    to_value(&error).unwrap_or_else(|serialize_err| JsValue::from_str(&serialize_err.to_string()))
}

fn serde_to_js_error<E: std::fmt::Display>(error: E) -> JsValue {
    JsValue::from_str(&error.to_string())
}

fn make_resolution_json(resolution: BattleResolution) -> Result<String, JsValue> {
    serde_json::to_string(&resolution).map_err(serde_to_js_error)
}

/// Mirrors battle events to the browser console.
struct ConsoleObserver;

impl BattleObserver for ConsoleObserver {
    fn notify(&mut self, event: &BattleEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            web_sys::console::debug_1(&JsValue::from_str(&json));
        }
    }
}

fn make_engine(library_json: Option<String>, config_json: Option<String>) -> Result<RuleEngine, JsValue> {
    let library = match library_json {
        Some(json) => DefinitionLibrary::from_json(&json)
            .map_err(|error| to_js_error(RuleError::from(error)))?,
        None => SAMPLE_LIBRARY.clone(),
    };
    let config = match config_json {
        Some(json) => {
            BattleConfig::from_json(&json).map_err(|error| to_js_error(RuleError::from(error)))?
        }
        None => BattleConfig::default(),
    };
    RuleEngine::new(library, config).map_err(|error| to_js_error(RuleError::from(error)))
}

/// One battle plus the engine that drives it.
#[wasm_bindgen]
pub struct BattleSession {
    engine: RuleEngine,
    battle: Battle,
}

#[wasm_bindgen]
impl BattleSession {
    /// Starts a battle and runs it into the first player turn.
    /// `enemy_keys_json` is a JSON array of enemy keys.
    #[wasm_bindgen(constructor)]
    pub fn new(
        hero_key: &str,
        enemy_keys_json: &str,
        library_json: Option<String>,
        config_json: Option<String>,
    ) -> Result<BattleSession, JsValue> {
        let enemy_keys: Vec<String> =
            serde_json::from_str(enemy_keys_json).map_err(serde_to_js_error)?;
        let mut engine = make_engine(library_json, config_json)?;
        engine.subscribe(Box::new(ConsoleObserver));

        let mut battle = engine
            .start_battle_by_keys(hero_key, &enemy_keys)
            .map_err(to_js_error)?;
        engine.begin(&mut battle).map_err(to_js_error)?;
        Ok(BattleSession { engine, battle })
    }

    #[wasm_bindgen(js_name = "stateJson")]
    pub fn state_json(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.battle).map_err(serde_to_js_error)
    }

    #[wasm_bindgen(js_name = "playCardJson")]
    pub fn play_card_json(&mut self, action_json: &str) -> Result<String, JsValue> {
        let action: PlayCardAction = serde_json::from_str(action_json).map_err(serde_to_js_error)?;
        let events = self
            .engine
            .play_card(&mut self.battle, action)
            .map_err(to_js_error)?;
        make_resolution_json(BattleResolution::new(self.battle.clone(), events))
    }

    #[wasm_bindgen(js_name = "endTurn")]
    pub fn end_turn(&mut self) -> Result<String, JsValue> {
        let events = self.engine.end_turn(&mut self.battle).map_err(to_js_error)?;
        make_resolution_json(BattleResolution::new(self.battle.clone(), events))
    }

    #[wasm_bindgen(js_name = "enemyIntentJson")]
    pub fn enemy_intent_json(&self, enemy_index: usize) -> Result<String, JsValue> {
        let preview = RuleEngine::enemy_intent(&self.battle, enemy_index).map_err(to_js_error)?;
        serde_json::to_string(&preview).map_err(serde_to_js_error)
    }

    /// Resolves to a JSON array of every stored intent after an optional delay.
    #[wasm_bindgen(js_name = "previewIntents")]
    pub fn preview_intents(&self, delay_ms: Option<u32>) -> Promise {
        let battle = self.battle.clone();
        let delay = delay_ms.unwrap_or(0);

        future_to_promise(async move {
            if delay > 0 {
                TimeoutFuture::new(delay).await;
            }
            let previews = RuleEngine::enemy_intents(&battle);
            let json = serde_json::to_string(&previews).map_err(serde_to_js_error)?;
            Ok(JsValue::from_str(&json))
        })
    }
}

/// A sample battle already in its first player turn. `algorithm` (e.g.
/// `"random"`, `"no_repeat"`) overrides how every enemy picks its intent.
#[wasm_bindgen(js_name = "createSampleBattle")]
pub fn create_sample_battle(seed: Option<u32>, algorithm: Option<String>) -> Result<JsValue, JsValue> {
    let config = match seed {
        Some(seed) => BattleConfig::seeded(u64::from(seed)),
        None => BattleConfig::default(),
    };
    let algorithm = algorithm
        .as_deref()
        .and_then(|value| IntentAlgorithm::from_str(value).ok());

    let mut engine = RuleEngine::new(SAMPLE_LIBRARY.clone(), config)
        .map_err(|error| to_js_error(RuleError::from(error)))?;
    let hero = engine
        .library()
        .hero("wanderer")
        .cloned()
        .map_err(|error| to_js_error(RuleError::from(error)))?;
    let mut enemies = ["slime", "bandit"]
        .iter()
        .map(|key| engine.library().enemy(key).cloned())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| to_js_error(RuleError::from(error)))?;
    if let Some(algorithm) = algorithm {
        for enemy in &mut enemies {
            enemy.algorithm = algorithm.clone();
        }
    }

    let mut battle = engine.start_battle(&hero, &enemies).map_err(to_js_error)?;
    engine.begin(&mut battle).map_err(to_js_error)?;
    to_value(&battle).map_err(JsValue::from)
}

#[wasm_bindgen(js_name = "validateBattle")]
pub fn validate_battle(state: JsValue) -> Result<(), JsValue> {
    let battle: Battle = from_value(state).map_err(JsValue::from)?;
    RuleEngine::ensure_integrity(&battle).map_err(to_js_error)
}

#[wasm_bindgen(js_name = "enemyIntent")]
pub fn enemy_intent(state: JsValue, enemy_index: usize) -> Result<JsValue, JsValue> {
    let battle: Battle = from_value(state).map_err(JsValue::from)?;
    match RuleEngine::enemy_intent(&battle, enemy_index) {
        Ok(preview) => to_value(&preview).map_err(JsValue::from),
        Err(error) => Err(to_js_error(error)),
    }
}

#[cfg(feature = "console_error_panic_hook")]
fn set_panic_hook() {
    console_error_panic_hook::set_once();
}

#[cfg(not(feature = "console_error_panic_hook"))]
fn set_panic_hook() {}
