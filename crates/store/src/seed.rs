use serde::Deserialize;
use tracing::info;

use common::{BattleCard, CardStatus, Scenario, ScenarioKind, Timeframe};

/// TOML seed file used to bootstrap an empty database with battle cards.
///
/// Example `config/cards.toml`:
/// ```toml
/// [[card]]
/// symbol = "BTCUSDT"
/// timeframe = "4h"
/// thesis = "Range break continuation"
///
/// [[card.scenario]]
/// type = "primary"
/// trigger = 65000.0
/// condition = "break above range high"
/// entry = 65100.0
/// stop = 63800.0
/// targets = [66500.0, 68000.0]
/// probability = 55
///
/// [[card.scenario]]
/// type = "secondary"
/// trigger = 66500.0
/// entry = 66600.0
/// stop = 64900.0
/// parent = "primary"
///
/// [[card.scenario]]
/// type = "invalidation"
/// trigger = 61500.0
/// entry = 61400.0
/// stop = 62800.0
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CardSeedFile {
    #[serde(rename = "card")]
    pub cards: Vec<CardSeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CardSeed {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub thesis: String,
    #[serde(rename = "scenario", default)]
    pub scenarios: Vec<ScenarioSeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioSeed {
    #[serde(rename = "type")]
    pub kind: ScenarioKind,
    pub trigger: f64,
    #[serde(default)]
    pub condition: String,
    pub entry: f64,
    pub stop: f64,
    #[serde(default)]
    pub targets: Vec<f64>,
    #[serde(default)]
    pub probability: u8,
    /// Sibling reference by scenario type; resolved to an id when the
    /// card is built.
    #[serde(default)]
    pub parent: Option<ScenarioKind>,
}

impl CardSeedFile {
    /// Load from a TOML file. Exits process on error.
    pub fn load(path: &str) -> Self {
        let content = std::fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("Failed to read card seed file at '{path}': {e}"));
        toml::from_str(&content)
            .unwrap_or_else(|e| panic!("Failed to parse card seed file at '{path}': {e}"))
    }

    /// Build the seeded cards. Seed cards start out committed (`active`)
    /// so the monitor watches them immediately.
    pub fn into_cards(self) -> Vec<BattleCard> {
        let mut cards = Vec::with_capacity(self.cards.len());
        for seed in self.cards {
            if seed.scenarios.len() > 4 {
                panic!(
                    "Seed card for {} declares {} scenarios; a battle card holds at most four",
                    seed.symbol,
                    seed.scenarios.len()
                );
            }

            let mut card = BattleCard::new(&seed.symbol, seed.timeframe, &seed.thesis);
            card.status = CardStatus::Active;

            for s in &seed.scenarios {
                let mut scenario = Scenario::new(s.kind, s.trigger, s.entry, s.stop);
                scenario.trigger_condition = s.condition.clone();
                scenario.targets = s.targets.clone();
                scenario.probability = s.probability;
                card.scenarios.push(scenario);
            }

            // second pass: resolve parent references (by type) to ids
            for (idx, s) in seed.scenarios.iter().enumerate() {
                if let Some(parent_kind) = s.parent {
                    let parent_id = card
                        .scenarios
                        .iter()
                        .find(|p| p.kind == parent_kind)
                        .map(|p| p.id.clone())
                        .unwrap_or_else(|| {
                            panic!(
                                "Seed card for {} links a scenario to missing parent '{parent_kind}'",
                                seed.symbol
                            )
                        });
                    card.scenarios[idx].parent_id = Some(parent_id);
                }
            }

            info!(symbol = %card.symbol, scenarios = card.scenarios.len(), "seed card built");
            cards.push(card);
        }
        cards
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[card]]
        symbol = "BTCUSDT"
        timeframe = "4h"
        thesis = "Range break continuation"

        [[card.scenario]]
        type = "primary"
        trigger = 65000.0
        condition = "break above range high"
        entry = 65100.0
        stop = 63800.0
        targets = [66500.0, 68000.0]
        probability = 55

        [[card.scenario]]
        type = "secondary"
        trigger = 66500.0
        entry = 66600.0
        stop = 64900.0
        parent = "primary"

        [[card.scenario]]
        type = "invalidation"
        trigger = 61500.0
        entry = 61400.0
        stop = 62800.0
    "#;

    #[test]
    fn sample_file_builds_watched_cards_with_parent_links() {
        let file: CardSeedFile = toml::from_str(SAMPLE).unwrap();
        let cards = file.into_cards();
        assert_eq!(cards.len(), 1);

        let card = &cards[0];
        assert_eq!(card.status, CardStatus::Active);
        assert!(card.is_watched());
        assert_eq!(card.scenarios.len(), 3);

        let primary = card
            .scenarios
            .iter()
            .find(|s| s.kind == ScenarioKind::Primary)
            .unwrap();
        let secondary = card
            .scenarios
            .iter()
            .find(|s| s.kind == ScenarioKind::Secondary)
            .unwrap();
        assert_eq!(secondary.parent_id.as_deref(), Some(primary.id.as_str()));
        assert_eq!(card.children_of(&primary.id).len(), 1);
        assert_eq!(primary.targets, vec![66500.0, 68000.0]);
    }
}
