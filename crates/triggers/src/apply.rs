use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use common::{AlertCandidate, AlertEvent, AlertSeverity, BattleCard, Result, ScenarioKind};

use crate::cascade;
use crate::evaluator::{self, FireKind, Fired};
use crate::state;

/// Result of applying one tick to one card.
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// Whether the card was mutated (and therefore needs a write-back and
    /// a change notification).
    pub changed: bool,
    /// Crossings applied this pass, in path order.
    pub fired: Vec<Fired>,
    pub alerts: Vec<AlertCandidate>,
}

/// Apply one validated tick to one card.
///
/// Gathers crossings from every eligible scenario, walks them in price
/// order along the tick's path, and drives the cascade resolver and the
/// status state machine. On an invariant violation the card is rolled
/// back to its pre-tick snapshot and the whole operation is discarded —
/// the error is an operator-facing defect, never a trading signal.
pub fn apply_tick(
    card: &mut BattleCard,
    prev: f64,
    cur: f64,
    now: DateTime<Utc>,
) -> Result<TickOutcome> {
    if !card.is_watched() {
        return Ok(TickOutcome::default());
    }

    let mut fired: Vec<Fired> = Vec::new();
    for scenario in &card.scenarios {
        // A child's trigger is ignored until its parent has fired.
        if !card.parent_triggered(scenario) {
            continue;
        }
        fired.extend(evaluator::evaluate(scenario, prev, cur));
    }
    evaluator::sort_along_path(&mut fired, prev);

    if fired.is_empty() {
        return Ok(TickOutcome::default());
    }

    let snapshot = card.clone();
    match apply_fired(card, fired, now) {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            warn!(card_id = %snapshot.id, error = %e, "tick application rolled back");
            *card = snapshot;
            Err(e)
        }
    }
}

fn apply_fired(card: &mut BattleCard, fired: Vec<Fired>, now: DateTime<Utc>) -> Result<TickOutcome> {
    let mut outcome = TickOutcome::default();

    for fire in fired {
        // A fire earlier in the pass may have closed the card; the
        // remaining crossings are no longer evaluable against it.
        if !card.is_watched() {
            break;
        }
        match fire.kind {
            FireKind::Entry => {
                let Some(scenario) = card.scenario(&fire.scenario_id) else {
                    continue;
                };
                // Re-check: an earlier event in this same pass may have
                // consumed the trigger already.
                if scenario.is_triggered() {
                    continue;
                }
                let kind = scenario.kind;
                let condition = scenario.trigger_condition.clone();

                let cascade = cascade::resolve_entry(card, &fire.scenario_id);
                cascade::apply(card, &cascade)?;
                if let Some(s) = card.scenario_mut(&fire.scenario_id) {
                    s.triggered_at = Some(now);
                }
                state::enter_monitoring(card)?;

                let unlocked = card.children_of(&fire.scenario_id).len();
                debug!(
                    card_id = %card.id,
                    scenario = %kind,
                    threshold = fire.threshold,
                    direction = %fire.direction,
                    unlocked_children = unlocked,
                    "scenario triggered"
                );

                if kind == ScenarioKind::Invalidation {
                    state::close_card(card)?;
                    outcome.alerts.push(AlertCandidate {
                        card_id: card.id.clone(),
                        scenario_id: Some(fire.scenario_id.clone()),
                        event: AlertEvent::Invalidated,
                        severity: AlertSeverity::Danger,
                        title: format!("{} thesis invalidated", card.symbol),
                        message: format!(
                            "Scenario D fired at {} ({}). Card closed.",
                            fire.threshold, condition
                        ),
                    });
                } else {
                    outcome.alerts.push(AlertCandidate {
                        card_id: card.id.clone(),
                        scenario_id: Some(fire.scenario_id.clone()),
                        event: AlertEvent::Triggered,
                        severity: AlertSeverity::Success,
                        title: format!("{} scenario {} triggered", card.symbol, kind.letter()),
                        message: format!(
                            "Price crossed {} {} ({}). Card is now monitoring.",
                            fire.threshold, fire.direction, condition
                        ),
                    });
                }
                outcome.changed = true;
            }

            FireKind::Stop => {
                let Some(scenario) = card.scenario(&fire.scenario_id) else {
                    continue;
                };
                // The scenario may have been deactivated earlier in this
                // pass by a sibling's entry fire — a breach only applies
                // to a still-active scenario.
                if !scenario.is_active {
                    continue;
                }
                let kind = scenario.kind;

                let cascade = cascade::resolve_stop(card, &fire.scenario_id);
                cascade::apply(card, &cascade)?;

                // A breach that leaves no viable non-invalidation path
                // closes the card in the same pass.
                let any_viable = card
                    .scenarios
                    .iter()
                    .any(|s| {
                        s.kind != ScenarioKind::Invalidation && (s.is_active || !s.is_triggered())
                    });

                let closed = if any_viable {
                    false
                } else {
                    state::close_card(card)?
                };

                debug!(
                    card_id = %card.id,
                    scenario = %kind,
                    threshold = fire.threshold,
                    closed,
                    "stop-loss breached"
                );

                outcome.alerts.push(AlertCandidate {
                    card_id: card.id.clone(),
                    scenario_id: Some(fire.scenario_id.clone()),
                    event: AlertEvent::StopBreached,
                    severity: AlertSeverity::Danger,
                    title: format!("{} stop breached", card.symbol),
                    message: if closed {
                        format!(
                            "Scenario {} stopped out at {}. No path remains — card closed.",
                            kind.letter(),
                            fire.threshold
                        )
                    } else {
                        format!(
                            "Scenario {} stopped out at {}. Scenario invalidated.",
                            kind.letter(),
                            fire.threshold
                        )
                    },
                });
                outcome.changed = true;
            }

            FireKind::Target(idx) => {
                let Some(scenario) = card.scenario(&fire.scenario_id) else {
                    continue;
                };
                if !scenario.is_active {
                    continue;
                }
                // Informational only: no activation change, no write-back.
                debug!(
                    card_id = %card.id,
                    scenario = %scenario.kind,
                    target = idx + 1,
                    threshold = fire.threshold,
                    "target reached"
                );
                outcome.alerts.push(AlertCandidate {
                    card_id: card.id.clone(),
                    scenario_id: Some(fire.scenario_id.clone()),
                    event: AlertEvent::TargetHit(idx),
                    severity: AlertSeverity::Info,
                    title: format!("{} target {} reached", card.symbol, idx + 1),
                    message: format!(
                        "Scenario {} crossed target {} at {}.",
                        scenario.kind.letter(),
                        idx + 1,
                        fire.threshold
                    ),
                });
            }
        }

        outcome.fired.push(fire);
    }

    if outcome.changed {
        card.updated_at = now;
        card.check_single_active()?;
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CardStatus, Error, Scenario, Timeframe};

    fn breakout_card() -> (BattleCard, String) {
        let mut card = BattleCard::new("BTCUSDT", Timeframe::H4, "breakout over range high");
        card.status = CardStatus::Active;
        let mut a = Scenario::new(ScenarioKind::Primary, 100.0, 100.0, 95.0);
        a.trigger_condition = "break above range high".into();
        a.targets = vec![105.0];
        let a_id = a.id.clone();
        card.scenarios = vec![a];
        (card, a_id)
    }

    fn card_with_invalidation() -> (BattleCard, String, String) {
        let (mut card, a_id) = breakout_card();
        let mut d = Scenario::new(ScenarioKind::Invalidation, 90.0, 92.0, 96.0);
        d.trigger_condition = "lose range low".into();
        let d_id = d.id.clone();
        card.scenarios.push(d);
        (card, a_id, d_id)
    }

    #[test]
    fn breakout_fire_activates_and_starts_monitoring() {
        let (mut card, a_id) = breakout_card();
        let outcome = apply_tick(&mut card, 99.0, 101.0, Utc::now()).unwrap();

        assert!(outcome.changed);
        assert_eq!(outcome.alerts.len(), 1, "exactly one alert per fire");
        assert_eq!(outcome.alerts[0].event, AlertEvent::Triggered);
        let a = card.scenario(&a_id).unwrap();
        assert!(a.is_active);
        assert!(a.triggered_at.is_some());
        assert_eq!(card.status, CardStatus::Monitoring);
        assert_eq!(card.active_scenario.as_deref(), Some(a_id.as_str()));
        assert_eq!(card.active().unwrap().id, a_id);
    }

    #[test]
    fn reapplying_the_same_pair_is_a_no_op() {
        let (mut card, _a_id) = breakout_card();
        apply_tick(&mut card, 99.0, 101.0, Utc::now()).unwrap();
        let triggered_at = card.scenarios[0].triggered_at;

        let outcome = apply_tick(&mut card, 99.0, 101.0, Utc::now()).unwrap();
        assert!(!outcome.changed);
        assert!(outcome.alerts.is_empty());
        assert_eq!(card.scenarios[0].triggered_at, triggered_at, "triggeredAt is immutable");
    }

    #[test]
    fn stop_breach_deactivates_without_closing_while_paths_remain() {
        let (mut card, a_id, _d_id) = card_with_invalidation();
        // add a second untriggered path so the card stays open
        card.scenarios
            .push(Scenario::new(ScenarioKind::Secondary, 110.0, 110.0, 104.0));

        apply_tick(&mut card, 99.0, 101.0, Utc::now()).unwrap();
        assert_eq!(card.status, CardStatus::Monitoring);

        let outcome = apply_tick(&mut card, 96.0, 94.0, Utc::now()).unwrap();
        assert_eq!(outcome.alerts.len(), 1);
        assert_eq!(outcome.alerts[0].event, AlertEvent::StopBreached);
        assert!(!card.scenario(&a_id).unwrap().is_active);
        assert_eq!(card.active_scenario, None);
        assert_eq!(card.status, CardStatus::Monitoring, "not auto-closed");
    }

    #[test]
    fn breach_of_last_path_closes_the_card() {
        let (mut card, a_id, _d_id) = card_with_invalidation();
        apply_tick(&mut card, 99.0, 101.0, Utc::now()).unwrap();

        // Only scenario A (now active) and the invalidation remain; the
        // breach leaves no viable non-invalidation path.
        let outcome = apply_tick(&mut card, 96.0, 94.0, Utc::now()).unwrap();
        assert_eq!(card.status, CardStatus::Closed);
        assert!(!card.scenario(&a_id).unwrap().is_active);
        assert_eq!(outcome.alerts.len(), 1, "breach alert doubles as the close alert");
    }

    #[test]
    fn invalidation_fire_closes_the_card() {
        let (mut card, _a_id, d_id) = card_with_invalidation();
        // D is a short-style branch: trigger 90 below entry 92, stop 96
        let outcome = apply_tick(&mut card, 91.0, 89.5, Utc::now()).unwrap();

        assert_eq!(card.status, CardStatus::Closed);
        assert_eq!(outcome.alerts.len(), 1);
        assert_eq!(outcome.alerts[0].event, AlertEvent::Invalidated);
        assert!(card.scenario(&d_id).unwrap().is_triggered());
    }

    #[test]
    fn gap_through_trigger_and_stop_reports_trigger_then_breach() {
        let mut card = BattleCard::new("SOLUSDT", Timeframe::H1, "pullback long");
        card.status = CardStatus::Active;
        let mut a = Scenario::new(ScenarioKind::Primary, 98.0, 100.0, 95.0);
        a.targets = vec![108.0];
        card.scenarios = vec![a];

        let outcome = apply_tick(&mut card, 99.0, 94.0, Utc::now()).unwrap();

        assert_eq!(outcome.fired.len(), 2);
        assert_eq!(outcome.fired[0].kind, FireKind::Entry);
        assert_eq!(outcome.fired[1].kind, FireKind::Stop);
        assert_eq!(outcome.alerts.len(), 2);
        assert_eq!(outcome.alerts[0].event, AlertEvent::Triggered);
        assert_eq!(outcome.alerts[1].event, AlertEvent::StopBreached);
        assert_eq!(card.active_scenario, None);
    }

    #[test]
    fn child_trigger_ignored_until_parent_fires() {
        let (mut card, a_id) = breakout_card();
        let mut child = Scenario::new(ScenarioKind::Secondary, 103.0, 103.0, 99.0);
        child.parent_id = Some(a_id.clone());
        let child_id = child.id.clone();
        card.scenarios.push(child);

        // Crossing the child's trigger before the parent fires does nothing.
        let outcome = apply_tick(&mut card, 102.0, 104.0, Utc::now()).unwrap();
        assert!(!outcome.changed);
        assert!(!card.scenario(&child_id).unwrap().is_triggered());

        // Parent fires; the child is unlocked but not auto-activated.
        apply_tick(&mut card, 99.0, 101.0, Utc::now()).unwrap();
        assert!(!card.scenario(&child_id).unwrap().is_active);
        assert_eq!(card.children_of(&a_id).len(), 1);

        // Now the child's own trigger is evaluable.
        let outcome = apply_tick(&mut card, 102.0, 104.0, Utc::now()).unwrap();
        assert!(outcome.changed);
        let child = card.scenario(&child_id).unwrap();
        assert!(child.is_triggered());
        assert!(child.is_active);
        assert_eq!(card.active_scenario.as_deref(), Some(child_id.as_str()));
    }

    #[test]
    fn target_hit_is_informational_only() {
        let (mut card, a_id) = breakout_card();
        apply_tick(&mut card, 99.0, 101.0, Utc::now()).unwrap();

        let outcome = apply_tick(&mut card, 104.0, 106.0, Utc::now()).unwrap();
        assert!(!outcome.changed, "targets never mutate the card");
        assert_eq!(outcome.alerts.len(), 1);
        assert_eq!(outcome.alerts[0].event, AlertEvent::TargetHit(0));
        assert!(card.scenario(&a_id).unwrap().is_active);
    }

    #[test]
    fn invariant_violation_rolls_back_to_pre_tick_snapshot() {
        let (mut card, a_id) = breakout_card();
        let mut b = Scenario::new(ScenarioKind::Secondary, 120.0, 120.0, 115.0);
        b.is_active = true; // corrupt: two active scenarios
        b.triggered_at = Some(Utc::now());
        card.scenario_mut(&a_id).unwrap().is_active = true;
        card.scenario_mut(&a_id).unwrap().triggered_at = Some(Utc::now());
        card.active_scenario = Some(a_id.clone());
        card.status = CardStatus::Monitoring;
        card.scenarios.push(b);

        let before = card.clone();
        let result = apply_tick(&mut card, 96.0, 94.0, Utc::now());
        assert!(matches!(result, Err(Error::InvariantViolation(_))));
        assert_eq!(card.status, before.status);
        assert_eq!(card.active_scenario, before.active_scenario);
        assert_eq!(
            card.scenarios.iter().filter(|s| s.is_active).count(),
            before.scenarios.iter().filter(|s| s.is_active).count(),
            "rolled-back card must match the pre-tick snapshot"
        );
    }

    #[test]
    fn draft_and_terminal_cards_are_never_evaluated() {
        let (mut card, _a_id) = breakout_card();
        card.status = CardStatus::Draft;
        let outcome = apply_tick(&mut card, 99.0, 101.0, Utc::now()).unwrap();
        assert!(!outcome.changed);

        card.status = CardStatus::Closed;
        let outcome = apply_tick(&mut card, 99.0, 101.0, Utc::now()).unwrap();
        assert!(!outcome.changed);
        assert!(card.scenarios.iter().all(|s| !s.is_triggered()));
    }
}
