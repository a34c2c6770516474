use chrono::Utc;

use common::{BattleCard, CardStatus, Error, Result, UserAction};

/// Battle-card status transitions.
///
/// The engine itself only ever drives two edges: `active → monitoring`
/// (the instant any scenario first fires) and `monitoring → closed`
/// (invalidation, or the last viable path stopped out). Everything else
/// is a user action. A card in a terminal state rejects every transition.

/// Engine edge: first trigger fire moves the card into `monitoring`.
/// Returns whether the status actually changed.
pub fn enter_monitoring(card: &mut BattleCard) -> Result<bool> {
    if card.status.is_terminal() {
        return Err(Error::TerminalCard {
            card_id: card.id.clone(),
            status: card.status,
        });
    }
    if card.status == CardStatus::Active {
        card.status = CardStatus::Monitoring;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Engine edge: invalidation closes the card.
/// Returns whether the status actually changed.
pub fn close_card(card: &mut BattleCard) -> Result<bool> {
    if card.status.is_terminal() {
        return Err(Error::TerminalCard {
            card_id: card.id.clone(),
            status: card.status,
        });
    }
    if card.status == CardStatus::Monitoring {
        card.status = CardStatus::Closed;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Apply an explicit user action. Rejected actions leave the card
/// untouched; the caller reports and drops them.
pub fn apply_user_action(card: &mut BattleCard, action: UserAction) -> Result<CardStatus> {
    if card.status.is_terminal() {
        return Err(Error::TerminalCard {
            card_id: card.id.clone(),
            status: card.status,
        });
    }

    let next = match (card.status, action) {
        (CardStatus::Draft, UserAction::Activate) => CardStatus::Active,
        (CardStatus::Active | CardStatus::Monitoring, UserAction::Close) => CardStatus::Closed,
        (CardStatus::Active | CardStatus::Monitoring, UserAction::Complete) => {
            CardStatus::Completed
        }
        (_, UserAction::Archive) => CardStatus::Archived,
        (status, action) => {
            return Err(Error::IllegalAction {
                card_id: card.id.clone(),
                status,
                action,
            })
        }
    };

    card.status = next;
    card.updated_at = Utc::now();
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Timeframe;

    fn card(status: CardStatus) -> BattleCard {
        let mut c = BattleCard::new("ETHUSDT", Timeframe::H1, "test");
        c.status = status;
        c
    }

    #[test]
    fn first_fire_moves_active_to_monitoring() {
        let mut c = card(CardStatus::Active);
        assert!(enter_monitoring(&mut c).unwrap());
        assert_eq!(c.status, CardStatus::Monitoring);
        // second fire is a no-op transition
        assert!(!enter_monitoring(&mut c).unwrap());
    }

    #[test]
    fn invalidation_closes_only_from_monitoring() {
        let mut c = card(CardStatus::Monitoring);
        assert!(close_card(&mut c).unwrap());
        assert_eq!(c.status, CardStatus::Closed);

        let mut c = card(CardStatus::Draft);
        assert!(!close_card(&mut c).unwrap());
        assert_eq!(c.status, CardStatus::Draft);
    }

    #[test]
    fn terminal_card_rejects_engine_transitions() {
        for status in [CardStatus::Closed, CardStatus::Completed, CardStatus::Archived] {
            let mut c = card(status);
            assert!(matches!(
                enter_monitoring(&mut c),
                Err(Error::TerminalCard { .. })
            ));
            assert!(matches!(close_card(&mut c), Err(Error::TerminalCard { .. })));
            assert_eq!(c.status, status, "rejection must be a no-op");
        }
    }

    #[test]
    fn terminal_card_rejects_user_actions() {
        let mut c = card(CardStatus::Archived);
        assert!(matches!(
            apply_user_action(&mut c, UserAction::Close),
            Err(Error::TerminalCard { .. })
        ));
    }

    #[test]
    fn user_lifecycle_paths() {
        let mut c = card(CardStatus::Draft);
        assert_eq!(
            apply_user_action(&mut c, UserAction::Activate).unwrap(),
            CardStatus::Active
        );
        assert_eq!(
            apply_user_action(&mut c, UserAction::Complete).unwrap(),
            CardStatus::Completed
        );

        let mut c = card(CardStatus::Monitoring);
        assert_eq!(
            apply_user_action(&mut c, UserAction::Close).unwrap(),
            CardStatus::Closed
        );

        let mut c = card(CardStatus::Draft);
        assert_eq!(
            apply_user_action(&mut c, UserAction::Archive).unwrap(),
            CardStatus::Archived
        );
    }

    #[test]
    fn activate_is_only_valid_from_draft() {
        let mut c = card(CardStatus::Monitoring);
        assert!(matches!(
            apply_user_action(&mut c, UserAction::Activate),
            Err(Error::IllegalAction { .. })
        ));
        assert_eq!(c.status, CardStatus::Monitoring);
    }
}
