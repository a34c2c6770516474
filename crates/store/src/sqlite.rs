use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use common::{
    Alert, AlertEvent, AlertSeverity, BattleCard, CardStatus, Error, Result, Scenario, Store,
    Timeframe,
};

/// SQLite-backed persistence collaborator.
///
/// Cards are one row each with the scenario list as a JSON document —
/// scenarios never exist outside their card, so there is nothing to
/// join. Alerts are snapshot-written: the alert book is capacity-bounded,
/// so replacing the table stays cheap.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn load_cards(&self) -> Result<Vec<BattleCard>> {
        let rows = sqlx::query("SELECT * FROM battle_cards ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        let mut cards = Vec::with_capacity(rows.len());
        for row in rows {
            let timeframe_raw: String = row.try_get("timeframe")?;
            let timeframe = Timeframe::parse(&timeframe_raw).ok_or_else(|| {
                Error::Other(format!("unknown timeframe in database: {timeframe_raw}"))
            })?;
            let scenarios_json: String = row.try_get("scenarios")?;
            let scenarios: Vec<Scenario> = serde_json::from_str(&scenarios_json)?;

            cards.push(BattleCard {
                id: row.try_get("id")?,
                symbol: row.try_get("symbol")?,
                timeframe,
                thesis: row.try_get("thesis")?,
                scenarios,
                status: row.try_get::<CardStatus, _>("status")?,
                active_scenario: row.try_get("active_scenario")?,
                reassessment: row.try_get("reassessment")?,
                created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
                updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?)?,
            });
        }
        debug!(count = cards.len(), "cards loaded from sqlite");
        Ok(cards)
    }

    async fn save_card(&self, card: &BattleCard) -> Result<()> {
        let scenarios = serde_json::to_string(&card.scenarios)?;
        sqlx::query(
            r#"
            INSERT INTO battle_cards
                (id, symbol, timeframe, thesis, status, active_scenario,
                 scenarios, reassessment, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                symbol = excluded.symbol,
                timeframe = excluded.timeframe,
                thesis = excluded.thesis,
                status = excluded.status,
                active_scenario = excluded.active_scenario,
                scenarios = excluded.scenarios,
                reassessment = excluded.reassessment,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&card.id)
        .bind(&card.symbol)
        .bind(card.timeframe.as_str())
        .bind(&card.thesis)
        .bind(card.status)
        .bind(&card.active_scenario)
        .bind(scenarios)
        .bind(&card.reassessment)
        .bind(card.created_at.to_rfc3339())
        .bind(card.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_alerts(&self) -> Result<Vec<Alert>> {
        let rows = sqlx::query("SELECT * FROM alerts ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        let mut alerts = Vec::with_capacity(rows.len());
        for row in rows {
            let event_json: String = row.try_get("event")?;
            let event: AlertEvent = serde_json::from_str(&event_json)?;

            alerts.push(Alert {
                id: row.try_get("id")?,
                card_id: row.try_get("card_id")?,
                scenario_id: row.try_get("scenario_id")?,
                event,
                severity: row.try_get::<AlertSeverity, _>("severity")?,
                title: row.try_get("title")?,
                message: row.try_get("message")?,
                created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
                read: row.try_get("read")?,
            });
        }
        Ok(alerts)
    }

    async fn save_alerts(&self, alerts: &[Alert]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM alerts").execute(&mut *tx).await?;
        for alert in alerts {
            let event = serde_json::to_string(&alert.event)?;
            sqlx::query(
                r#"
                INSERT INTO alerts
                    (id, card_id, scenario_id, event, severity, title,
                     message, created_at, read)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(&alert.id)
            .bind(&alert.card_id)
            .bind(&alert.scenario_id)
            .bind(event)
            .bind(alert.severity)
            .bind(&alert.title)
            .bind(&alert.message)
            .bind(alert.created_at.to_rfc3339())
            .bind(alert.read)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("bad timestamp '{raw}': {e}")))
}
