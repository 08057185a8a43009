// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! The catalog of chaos actions.

use std::sync::Arc;

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use testagent_core::config::MAX_CHAOS_LEVEL;
use testagent_core::ChaosConfig;
use tracing::{debug, info};

use crate::action::{ActionKind, ActionSnapshot, ChaosAction};
use crate::error::{ChaosError, Result};

/// Holds every [`ChaosAction`] with its enabled flag and counters.
///
/// Actions are created once and live as long as the registry. Toggling an
/// action only affects future selection.
#[derive(Debug)]
pub struct ActionRegistry {
    actions: Vec<Arc<ChaosAction>>,
}

impl ActionRegistry {
    /// Creates the full catalog, applying `config`'s level, weights and disabled list.
    ///
    /// Weights and disabled entries may name an action by name or id. Unknown
    /// entries are ignored with a log line.
    pub fn new(config: &ChaosConfig) -> Self {
        let actions = ActionKind::catalog()
            .into_iter()
            .map(|kind| {
                let name = kind.name();
                let id = crate::action::action_id(&name);
                let weight = config
                    .weights
                    .get(&name)
                    .or_else(|| config.weights.get(&id))
                    .copied()
                    .unwrap_or(1);
                Arc::new(ChaosAction::new(kind, weight))
            })
            .collect();

        let registry = Self { actions };
        registry.apply_level(config.level.min(MAX_CHAOS_LEVEL));
        for entry in &config.disabled {
            if registry.disable(entry).is_err() {
                info!(action = %entry, "Ignoring unknown action in disabled list");
            }
        }
        registry
    }

    /// Enables exactly the actions whose minimum level is at most `level`.
    ///
    /// # Errors
    ///
    /// Returns [`ChaosError::InvalidLevel`] above the maximum level.
    pub fn set_level(&self, level: u8) -> Result<()> {
        if level > MAX_CHAOS_LEVEL {
            return Err(ChaosError::InvalidLevel { level, max: MAX_CHAOS_LEVEL });
        }
        self.apply_level(level);
        Ok(())
    }

    fn apply_level(&self, level: u8) {
        for action in &self.actions {
            action.set_enabled(level > 0 && action.kind().min_level() <= level);
        }
        debug!(level, enabled = self.enabled_count(), "Applied chaos level");
    }

    /// Looks up an action by id or name.
    pub fn find(&self, id_or_name: &str) -> Option<Arc<ChaosAction>> {
        self.actions.iter().find(|a| a.id() == id_or_name || a.name() == id_or_name).cloned()
    }

    /// Enables an action by id or name.
    pub fn enable(&self, id_or_name: &str) -> Result<()> {
        self.toggle(id_or_name, true)
    }

    /// Disables an action by id or name.
    pub fn disable(&self, id_or_name: &str) -> Result<()> {
        self.toggle(id_or_name, false)
    }

    fn toggle(&self, id_or_name: &str, enabled: bool) -> Result<()> {
        let action =
            self.find(id_or_name).ok_or_else(|| ChaosError::UnknownAction(id_or_name.to_string()))?;
        action.set_enabled(enabled);
        info!(action = %action.name(), id = %action.id(), enabled, "Chaos action toggled");
        Ok(())
    }

    /// Returns snapshots of every action in catalog order.
    pub fn list(&self) -> Vec<ActionSnapshot> {
        self.actions.iter().map(|a| a.snapshot()).collect()
    }

    /// Returns the number of enabled actions.
    pub fn enabled_count(&self) -> usize {
        self.actions.iter().filter(|a| a.enabled()).count()
    }

    /// Picks an enabled action, weighted by each action's weight.
    ///
    /// Returns `None` when nothing is enabled or every enabled action weighs zero.
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Arc<ChaosAction>> {
        let enabled: Vec<&Arc<ChaosAction>> = self.actions.iter().filter(|a| a.enabled()).collect();
        let index = WeightedIndex::new(enabled.iter().map(|a| a.weight())).ok()?;
        Some(Arc::clone(enabled[index.sample(rng)]))
    }
}
