use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::debug;

use strikebot_core::{
    Database, Order, OrderId, OrderRecord, OrderStatus, Position, PositionEffect, PositionRecord,
    PositionStatus, PutCall, StrategyId,
};

type PositionRow = (
    i64,
    i64,
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    i64,
    String,
    NaiveDate,
);

/// `SQLite` store for strategies, orders, and positions.
///
/// Orders are keyed by the broker order id and written with an upsert, so
/// re-persisting an order never duplicates it. Decimals are stored as TEXT.
#[derive(Clone)]
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    /// Opens the pool and runs the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns error if connection fails or migrations fail.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .with_context(|| format!("Failed to connect to {database_url}"))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;

        Ok(Self { pool })
    }

    /// In-memory database; a single connection so every query sees the same data.
    ///
    /// # Errors
    ///
    /// Returns error if connection fails.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", 1).await
    }
}

fn parse<T>(value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Unexpected stored value {value:?}"))
}

fn position_from_row(row: PositionRow) -> Result<PositionRecord> {
    let (
        id,
        strategy_id,
        order_id,
        status,
        symbol,
        underlying_symbol,
        put_or_call,
        strike_price,
        short_quantity,
        long_quantity,
        average_price,
        expiration_date,
    ) = row;
    Ok(PositionRecord {
        id: Some(id),
        strategy_id,
        order_id,
        status: parse::<PositionStatus>(&status)?,
        position: Position {
            symbol,
            underlying_symbol,
            put_or_call: parse::<PutCall>(&put_or_call)?,
            strike_price: parse::<Decimal>(&strike_price)?,
            short_quantity: u32::try_from(short_quantity).context("short_quantity out of range")?,
            long_quantity: u32::try_from(long_quantity).context("long_quantity out of range")?,
            average_price: parse::<Decimal>(&average_price)?,
            expiration_date,
        },
    })
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn create_strategy(&self, name: &str) -> Result<StrategyId> {
        let now = chrono::Utc::now().timestamp();
        let id = sqlx::query("INSERT INTO strategies (name, created_at) VALUES (?1, ?2)")
            .bind(name)
            .bind(now)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to create strategy {name}"))?
            .last_insert_rowid();
        debug!(strategy = name, strategy_id = id, "Strategy created");
        Ok(id)
    }

    async fn read_strategy_by_name(&self, name: &str) -> Result<Option<StrategyId>> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT id FROM strategies WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(id,)| id))
    }

    async fn create_order(&self, record: &OrderRecord) -> Result<OrderId> {
        let order_json = serde_json::to_string(&record.order)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r"
            INSERT INTO orders (order_id, strategy_id, status, position_effect, order_json, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            ON CONFLICT(order_id) DO UPDATE SET
                status = excluded.status,
                order_json = excluded.order_json,
                updated_at = excluded.updated_at
            ",
        )
        .bind(record.order_id)
        .bind(record.strategy_id)
        .bind(record.status.as_str())
        .bind(record.position_effect.as_str())
        .bind(order_json)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to persist order {}", record.order_id))?;

        Ok(record.order_id)
    }

    async fn update_order_status(&self, order_id: OrderId, status: OrderStatus) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE orders SET status = ?2, updated_at = ?3 WHERE order_id = ?1")
            .bind(order_id)
            .bind(status.as_str())
            .bind(now)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to update order {order_id}"))?;
        Ok(())
    }

    async fn create_position(&self, record: &PositionRecord) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let p = &record.position;
        let id = sqlx::query(
            r"
            INSERT INTO positions (
                strategy_id, order_id, status, symbol, underlying_symbol, put_or_call,
                strike_price, short_quantity, long_quantity, average_price, expiration_date,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
            ",
        )
        .bind(record.strategy_id)
        .bind(record.order_id)
        .bind(record.status.as_str())
        .bind(&p.symbol)
        .bind(&p.underlying_symbol)
        .bind(p.put_or_call.as_str())
        .bind(p.strike_price.to_string())
        .bind(i64::from(p.short_quantity))
        .bind(i64::from(p.long_quantity))
        .bind(p.average_price.to_string())
        .bind(p.expiration_date)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to persist position {}", p.symbol))?
        .last_insert_rowid();
        Ok(id)
    }

    async fn close_position(&self, position_id: i64, status: PositionStatus) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE positions SET status = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(position_id)
            .bind(status.as_str())
            .bind(now)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to close position {position_id}"))?;
        Ok(())
    }

    async fn read_open_orders_by_strategy(
        &self,
        strategy_id: StrategyId,
    ) -> Result<Vec<OrderRecord>> {
        let rows = sqlx::query_as::<_, (i64, i64, String, String, String)>(
            r"
            SELECT order_id, strategy_id, status, position_effect, order_json
            FROM orders WHERE strategy_id = ?1 ORDER BY order_id
            ",
        )
        .bind(strategy_id)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::new();
        for (order_id, strategy_id, status, effect, order_json) in rows {
            let status: OrderStatus = parse(&status)?;
            if !status.is_working() {
                continue;
            }
            let mut order: Order = serde_json::from_str(&order_json)
                .with_context(|| format!("Malformed stored order {order_id}"))?;
            order.status = status;
            records.push(OrderRecord {
                order_id,
                strategy_id,
                status,
                position_effect: parse::<PositionEffect>(&effect)?,
                order,
            });
        }
        Ok(records)
    }

    async fn read_open_positions_by_strategy(
        &self,
        strategy_id: StrategyId,
    ) -> Result<Vec<PositionRecord>> {
        let rows = sqlx::query_as::<_, PositionRow>(
            r"
            SELECT id, strategy_id, order_id, status, symbol, underlying_symbol, put_or_call,
                   strike_price, short_quantity, long_quantity, average_price, expiration_date
            FROM positions WHERE strategy_id = ?1 AND status = ?2 ORDER BY id
            ",
        )
        .bind(strategy_id)
        .bind(PositionStatus::Open.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(position_from_row).collect()
    }
}
