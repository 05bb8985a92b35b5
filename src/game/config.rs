use serde::{Deserialize, Serialize};

use super::definitions::DefinitionError;

pub const DEFAULT_BASE_DRAW: usize = 5;

fn default_base_draw() -> usize {
    DEFAULT_BASE_DRAW
}

fn default_block_decays() -> bool {
    true
}

/// Tunables for one rule engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BattleConfig {
    /// Cards drawn per turn before LUCKY_DRAW is added.
    #[serde(default = "default_base_draw")]
    pub base_draw: usize,
    /// Seed for draws and random intents. `None` pulls from entropy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Clear block at the start of each side's turn.
    #[serde(default = "default_block_decays")]
    pub block_decays: bool,
}

impl BattleConfig {
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }

    pub fn with_block_decay(mut self, block_decays: bool) -> Self {
        self.block_decays = block_decays;
        self
    }

    pub fn from_json(json: &str) -> Result<Self, DefinitionError> {
        serde_json::from_str(json).map_err(|err| DefinitionError::Parse {
            message: err.to_string(),
        })
    }
}

impl Default for BattleConfig {
    fn default() -> Self {
        Self {
            base_draw: DEFAULT_BASE_DRAW,
            seed: None,
            block_decays: true,
        }
    }
}
