//! Battle core: combatants, statuses, card resolution and the turn state machine.

pub mod card;
pub mod combatant;
pub mod config;
pub mod definitions;
pub mod effects;
pub mod relics;
pub mod rules;
pub mod state;
pub mod status;

pub use card::{Card, CardId, CardTrait, CardType};
pub use combatant::{Combatant, CombatantId, HealthChange, TurnEndOutcome};
pub use config::BattleConfig;
pub use definitions::{
    DefinitionError,
    DefinitionLibrary,
    EnemyDefinition,
    HeroDefinition,
    SAMPLE_LIBRARY,
};
pub use effects::{
    EffectContext,
    EffectEngine,
    EffectKind,
    EffectResolution,
    EffectStack,
    EffectTarget,
    ResolveEnv,
};
pub use relics::{BattleListener, CardFilter, RelicDefinition, RelicHook, RelicListener, RelicTrigger};
pub use rules::{BattleObserver, BattleResolution, PlayCardAction, RuleEngine, RuleError};
pub use state::{Battle, BattleEvent, BattleOutcome, BattlePhase, Enemy, IntegrityError};
pub use status::{StackPolicy, StatusEffect, StatusKind, PERMANENT_DURATION};
