use common::{Direction, Scenario};

/// A threshold crossing detected between two consecutive ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct Fired {
    pub scenario_id: String,
    pub kind: FireKind,
    pub direction: Direction,
    /// The price level that was crossed.
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireKind {
    /// Entry trigger crossed — the scenario fires.
    Entry,
    /// Stop-loss crossed on an active scenario.
    Stop,
    /// N-th target crossed on an active scenario (informational).
    Target(u8),
}

/// Strict crossing between two consecutive prices. A tick landing exactly
/// on the threshold counts as crossed, so large single-tick moves cannot
/// step over a trigger unnoticed.
fn crossed(prev: f64, cur: f64, threshold: f64, direction: Direction) -> bool {
    match direction {
        Direction::Up => prev < threshold && cur >= threshold,
        Direction::Down => prev > threshold && cur <= threshold,
    }
}

/// Evaluate one scenario against a (previous, current) price pair.
///
/// Pure: never mutates the scenario. Entry evaluation is a no-op once
/// `triggered_at` is set. Stop and targets are only consulted while the
/// scenario is active — or in the same call as its own entry fire, so a
/// tick that jumps through both the trigger and the stop reports both.
/// Parent gating (a child is ignored until its parent fires) is the
/// caller's responsibility; the card owns that relationship.
///
/// Comparisons use the feed's last price only — no averaging, no derived
/// indicator.
pub fn evaluate(scenario: &Scenario, prev: f64, cur: f64) -> Vec<Fired> {
    let mut fired = Vec::new();

    let mut entered_now = false;
    if !scenario.is_triggered() {
        let dir = scenario.entry_direction();
        if crossed(prev, cur, scenario.trigger_price, dir) {
            fired.push(Fired {
                scenario_id: scenario.id.clone(),
                kind: FireKind::Entry,
                direction: dir,
                threshold: scenario.trigger_price,
            });
            entered_now = true;
        }
    }

    if scenario.is_active || entered_now {
        let dir = scenario.stop_direction();
        if crossed(prev, cur, scenario.stop_loss, dir) {
            fired.push(Fired {
                scenario_id: scenario.id.clone(),
                kind: FireKind::Stop,
                direction: dir,
                threshold: scenario.stop_loss,
            });
        }

        let dir = scenario.target_direction();
        for (idx, target) in scenario.targets.iter().enumerate() {
            if crossed(prev, cur, *target, dir) {
                fired.push(Fired {
                    scenario_id: scenario.id.clone(),
                    kind: FireKind::Target(idx as u8),
                    direction: dir,
                    threshold: *target,
                });
            }
        }
    }

    sort_along_path(&mut fired, prev);
    fired
}

/// Order crossings along the tick's path: the threshold closer to the
/// previous price is reported first.
pub fn sort_along_path(fired: &mut [Fired], prev: f64) {
    fired.sort_by(|a, b| {
        let da = (a.threshold - prev).abs();
        let db = (b.threshold - prev).abs();
        da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
    });
}
