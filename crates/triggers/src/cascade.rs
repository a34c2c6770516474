use common::{BattleCard, Error, Result};

/// Activation/deactivation set computed for one fired scenario.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cascade {
    pub activate: Vec<String>,
    pub deactivate: Vec<String>,
}

/// Resolve an entry fire: the fired scenario becomes the single active
/// one, every other active sibling is deactivated. Children of the fired
/// scenario are not auto-activated — their own triggers merely become
/// evaluable (the parent gate opens).
pub fn resolve_entry(card: &BattleCard, fired_id: &str) -> Cascade {
    let deactivate = card
        .scenarios
        .iter()
        .filter(|s| s.is_active && s.id != fired_id)
        .map(|s| s.id.clone())
        .collect();
    Cascade {
        activate: vec![fired_id.to_string()],
        deactivate,
    }
}

/// Resolve a stop breach: deactivate the breached scenario only. No
/// sibling is auto-promoted.
pub fn resolve_stop(_card: &BattleCard, breached_id: &str) -> Cascade {
    Cascade {
        activate: Vec::new(),
        deactivate: vec![breached_id.to_string()],
    }
}

/// Apply a cascade to the card and enforce the single-active
/// post-condition. A violation means internal state was already
/// inconsistent — the caller discards the operation and rolls back.
pub fn apply(card: &mut BattleCard, cascade: &Cascade) -> Result<()> {
    for id in &cascade.deactivate {
        match card.scenario_mut(id) {
            Some(s) => s.is_active = false,
            None => {
                return Err(Error::UnknownScenario {
                    card_id: card.id.clone(),
                    scenario_id: id.clone(),
                })
            }
        }
    }

    for id in &cascade.activate {
        match card.scenario_mut(id) {
            Some(s) => s.is_active = true,
            None => {
                return Err(Error::UnknownScenario {
                    card_id: card.id.clone(),
                    scenario_id: id.clone(),
                })
            }
        }
    }

    card.active_scenario = match cascade.activate.first() {
        Some(id) => Some(id.clone()),
        None => match &card.active_scenario {
            // the active scenario was the one deactivated — clear the mirror
            Some(id) if cascade.deactivate.contains(id) => None,
            other => other.clone(),
        },
    };

    card.check_single_active()
}
