use proptest::prelude::*;

use common::{BattleCard, CardStatus, Scenario, ScenarioKind, Timeframe};
use triggers::apply_tick;

proptest! {
    /// Tick application on randomized price paths must never panic, must
    /// keep the single-active invariant, and must never rewrite a
    /// triggered_at once set.
    #[test]
    fn random_price_paths_preserve_invariants(
        trigger in 0.0001f64..1_000_000.0f64,
        entry in 0.0001f64..1_000_000.0f64,
        stop in 0.0001f64..1_000_000.0f64,
        prices in proptest::collection::vec(0.0001f64..1_000_000.0f64, 2..24),
    ) {
        let mut card = BattleCard::new("TESTUSDT", Timeframe::H1, "prop");
        card.status = CardStatus::Active;
        let mut a = Scenario::new(ScenarioKind::Primary, trigger, entry, stop);
        a.targets = vec![entry * 1.05, entry * 1.1];
        let d = Scenario::new(ScenarioKind::Invalidation, stop * 0.9, stop * 0.95, entry);
        let (a_id, d_id) = (a.id.clone(), d.id.clone());
        card.scenarios = vec![a, d];

        let now = chrono::Utc::now();
        let mut seen_triggered: std::collections::HashMap<String, chrono::DateTime<chrono::Utc>> =
            std::collections::HashMap::new();

        for pair in prices.windows(2) {
            // Rollback on a detected inconsistency is acceptable; a panic
            // or a surviving violation is not.
            let _ = apply_tick(&mut card, pair[0], pair[1], now);

            prop_assert!(card.check_single_active().is_ok());
            prop_assert!(card.scenarios.iter().filter(|s| s.is_active).count() <= 1);

            for id in [&a_id, &d_id] {
                if let Some(at) = card.scenario(id).and_then(|s| s.triggered_at) {
                    match seen_triggered.get(id) {
                        None => { seen_triggered.insert(id.clone(), at); }
                        Some(first) => prop_assert_eq!(*first, at, "triggered_at must never change"),
                    }
                }
            }
        }
    }
}
