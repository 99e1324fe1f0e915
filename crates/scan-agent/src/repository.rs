use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use risk_manager::{Direction, ExitReason, TradeClosedEvent, TradeRecord, TradeStatus};
use signal_engine::{FinalSignal, RecentSignal, SignalRepository};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;

/// Sqlite persistence for signals, paper trades, and the agent log.
#[derive(Clone)]
pub struct SignalDb {
    pool: SqlitePool,
}

impl SignalDb {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.init_tables().await?;
        Ok(db)
    }

    async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                strategy_id TEXT NOT NULL,
                stars INTEGER NOT NULL,
                rank INTEGER NOT NULL,
                score_total REAL NOT NULL,
                confirmation TEXT NOT NULL,
                entry_price REAL NOT NULL,
                stop_price REAL NOT NULL,
                target_1 REAL NOT NULL,
                target_2 REAL NOT NULL,
                quantity INTEGER NOT NULL,
                capital_committed REAL NOT NULL,
                rationale TEXT,
                generated_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                strategy_id TEXT NOT NULL,
                entry_price REAL NOT NULL,
                quantity INTEGER NOT NULL,
                stop_price REAL NOT NULL,
                target_1 REAL NOT NULL,
                target_2 REAL NOT NULL,
                opened_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'OPEN',
                exit_price REAL,
                exit_reason TEXT,
                pnl REAL,
                closed_at TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS agent_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                level TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_signals_symbol ON signals(symbol)")
            .execute(&self.pool)
            .await
            .ok();
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_signals_generated ON signals(generated_at)")
            .execute(&self.pool)
            .await
            .ok();
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_status ON trades(status)")
            .execute(&self.pool)
            .await
            .ok();
        Ok(())
    }

    fn parse_direction(raw: &str) -> Direction {
        match raw {
            "SHORT" => Direction::Short,
            _ => Direction::Long,
        }
    }

    fn parse_ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }
}

#[async_trait]
impl SignalRepository for SignalDb {
    async fn insert_signal(&self, signal: &FinalSignal) -> Result<i64> {
        let c = &signal.ranked.candidate;
        let result = sqlx::query(
            "INSERT INTO signals (symbol, direction, strategy_id, stars, rank, score_total,
                confirmation, entry_price, stop_price, target_1, target_2, quantity,
                capital_committed, rationale, generated_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&c.symbol)
        .bind(c.direction.as_str())
        .bind(&c.strategy_id)
        .bind(signal.ranked.stars as i64)
        .bind(signal.ranked.rank as i64)
        .bind(signal.ranked.score.total)
        .bind(signal.ranked.confirmation.as_str())
        .bind(c.entry_price)
        .bind(c.stop_price)
        .bind(c.target_1)
        .bind(c.target_2)
        .bind(signal.quantity)
        .bind(signal.capital_committed)
        .bind(&c.rationale)
        .bind(c.generated_at.to_rfc3339())
        .bind(signal.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn insert_trade(&self, trade: &TradeRecord) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO trades (symbol, direction, strategy_id, entry_price, quantity,
                stop_price, target_1, target_2, opened_at, status)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'OPEN')",
        )
        .bind(&trade.symbol)
        .bind(trade.direction.as_str())
        .bind(&trade.strategy_id)
        .bind(trade.entry_price)
        .bind(trade.quantity)
        .bind(trade.stop_price)
        .bind(trade.target_1)
        .bind(trade.target_2)
        .bind(trade.opened_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn record_trade_close(&self, event: &TradeClosedEvent) -> Result<()> {
        sqlx::query(
            "UPDATE trades
             SET status = 'CLOSED', exit_price = ?, exit_reason = ?, pnl = ?, closed_at = ?
             WHERE id = ?",
        )
        .bind(event.exit_price)
        .bind(event.reason.as_str())
        .bind(event.pnl)
        .bind(event.closed_at.to_rfc3339())
        .bind(event.trade_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_log(&self, level: &str, message: &str) -> Result<()> {
        sqlx::query("INSERT INTO agent_log (level, message) VALUES (?, ?)")
            .bind(level)
            .bind(message)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn active_trades(&self) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            "SELECT id, symbol, direction, strategy_id, entry_price, quantity,
                    stop_price, target_1, target_2, opened_at
             FROM trades WHERE status = 'OPEN' ORDER BY opened_at",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| TradeRecord {
                id: row.get("id"),
                symbol: row.get("symbol"),
                direction: Self::parse_direction(row.get("direction")),
                strategy_id: row.get("strategy_id"),
                entry_price: row.get("entry_price"),
                quantity: row.get("quantity"),
                stop_price: row.get("stop_price"),
                target_1: row.get("target_1"),
                target_2: row.get("target_2"),
                opened_at: Self::parse_ts(row.get("opened_at")),
                status: TradeStatus::Open,
                exit_price: None,
                exit_reason: None,
                closed_at: None,
            })
            .collect())
    }

    async fn recent_signals(&self, since: DateTime<Utc>) -> Result<Vec<RecentSignal>> {
        let rows = sqlx::query(
            "SELECT symbol, strategy_id, generated_at
             FROM signals WHERE generated_at >= ? ORDER BY generated_at",
        )
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| RecentSignal {
                symbol: row.get("symbol"),
                strategy_id: row.get("strategy_id"),
                generated_at: Self::parse_ts(row.get("generated_at")),
            })
            .collect())
    }

    async fn strategy_win_rate(&self, strategy_id: &str, days: i64) -> Result<Option<f64>> {
        let since = (Utc::now() - chrono::Duration::days(days)).to_rfc3339();
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, SUM(CASE WHEN pnl > 0 THEN 1 ELSE 0 END) AS wins
             FROM trades
             WHERE status = 'CLOSED' AND strategy_id = ? AND closed_at >= ?",
        )
        .bind(strategy_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.get("total");
        if total == 0 {
            return Ok(None);
        }
        let wins: i64 = row.try_get("wins").unwrap_or(0);
        Ok(Some(wins as f64 / total as f64))
    }
}
