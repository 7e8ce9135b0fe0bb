//! PostgreSQL ledger store
//!
//! Row locks are `SELECT ... FOR UPDATE`; the isolation level is set as the
//! first statement of every transaction. A `sqlx::Transaction` that is
//! dropped without commit issues ROLLBACK on its connection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row};
use tracing::debug;

use super::error::LedgerError;
use super::models::{
    LockedOrder, Order, OrderInsert, OrderStatus, Transaction, TransactionKind, User,
};
use super::store::{IsolationLevel, LedgerStore, LedgerTx};
use crate::core_types::{OrderId, UserId};

const ORDER_COLUMNS: &str = "id, external_id, user_id, status, accrual, created_at";
const ENTRY_COLUMNS: &str = "id, type_id, user_id, order_id, external_order_id, amount, created_at";

/// Ledger store backed by a Postgres pool
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_status(raw: &str) -> Result<OrderStatus, LedgerError> {
    raw.parse()
        .map_err(|e: String| LedgerError::Database(format!("corrupt orders.status: {e}")))
}

fn order_from_row(row: &PgRow) -> Result<Order, LedgerError> {
    let status: String = row.try_get("status")?;
    Ok(Order {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        user_id: row.try_get("user_id")?,
        status: parse_status(&status)?,
        accrual: row.try_get("accrual")?,
        created_at: row.try_get("created_at")?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<Transaction, LedgerError> {
    let type_id: i16 = row.try_get("type_id")?;
    let kind = TransactionKind::from_id(type_id).ok_or_else(|| {
        LedgerError::Database(format!("corrupt transactions.type_id: {type_id}"))
    })?;
    Ok(Transaction {
        id: row.try_get("id")?,
        kind,
        user_id: row.try_get("user_id")?,
        order_id: row.try_get("order_id")?,
        external_order_id: row.try_get("external_order_id")?,
        amount: row.try_get("amount")?,
        created_at: row.try_get("created_at")?,
    })
}

fn user_from_row(row: &PgRow) -> Result<User, LedgerError> {
    Ok(User {
        id: row.try_get("id")?,
        login: row.try_get("login")?,
        balance: row.try_get("balance")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn LedgerTx>, LedgerError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "SET TRANSACTION ISOLATION LEVEL {}",
            isolation.as_sql()
        ))
        .execute(&mut *tx)
        .await?;
        Ok(Box::new(PgLedgerTx { tx }))
    }

    async fn create_user(&self, login: &str) -> Result<User, LedgerError> {
        let row = sqlx::query(
            r#"INSERT INTO users (id, login) VALUES ($1, $2)
               ON CONFLICT (login) DO NOTHING
               RETURNING id, login, balance, created_at"#,
        )
        .bind(UserId::new_v4())
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => user_from_row(&row),
            None => Err(LedgerError::LoginTaken(login.to_string())),
        }
    }

    async fn user(&self, id: UserId) -> Result<Option<User>, LedgerError> {
        let row = sqlx::query("SELECT id, login, balance, created_at FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>, LedgerError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn order_by_number(&self, external_id: &str) -> Result<Option<Order>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn orders_by_user(&self, user_id: UserId) -> Result<Vec<Order>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn entries_by_user(
        &self,
        user_id: UserId,
        kind: TransactionKind,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM transactions
             WHERE user_id = $1 AND type_id = $2
             ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .bind(kind.id())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn entry_sum(
        &self,
        user_id: UserId,
        kind: TransactionKind,
    ) -> Result<Decimal, LedgerError> {
        let sum: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM transactions WHERE user_id = $1 AND type_id = $2",
        )
        .bind(user_id)
        .bind(kind.id())
        .fetch_one(&self.pool)
        .await?;
        Ok(sum)
    }
}

/// One open Postgres transaction
pub struct PgLedgerTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn unsettled_order_ids(&mut self) -> Result<Vec<OrderId>, LedgerError> {
        let [registered, processing] = OrderStatus::UNSETTLED;
        let ids: Vec<OrderId> = sqlx::query_scalar(
            "SELECT id FROM orders WHERE status IN ($1, $2) ORDER BY created_at",
        )
        .bind(registered.as_str())
        .bind(processing.as_str())
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(ids)
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<LockedOrder>, LedgerError> {
        let row = sqlx::query(
            "SELECT id, external_id, user_id, status FROM orders WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let status: String = row.try_get("status")?;
        Ok(Some(LockedOrder {
            id: row.try_get("id")?,
            external_id: row.try_get("external_id")?,
            user_id: row.try_get("user_id")?,
            status: parse_status(&status)?,
        }))
    }

    async fn update_order(
        &mut self,
        id: OrderId,
        status: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<(), LedgerError> {
        sqlx::query("UPDATE orders SET status = $1, accrual = $2 WHERE id = $3")
            .bind(status.as_str())
            .bind(accrual)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<OrderInsert, LedgerError> {
        let created: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"INSERT INTO orders (id, external_id, user_id, status)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (external_id) DO NOTHING
               RETURNING created_at"#,
        )
        .bind(order.id)
        .bind(&order.external_id)
        .bind(order.user_id)
        .bind(order.status.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;

        if let Some(created_at) = created {
            return Ok(OrderInsert::Created(Order {
                created_at,
                ..order.clone()
            }));
        }

        let row = sqlx::query("SELECT id, user_id FROM orders WHERE external_id = $1")
            .bind(&order.external_id)
            .fetch_one(&mut *self.tx)
            .await?;
        debug!(external_id = %order.external_id, "Order number already taken");
        Ok(OrderInsert::Existing {
            order_id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
        })
    }

    async fn lock_user_balance(&mut self, user_id: UserId) -> Result<Decimal, LedgerError> {
        let balance: Option<Decimal> =
            sqlx::query_scalar("SELECT balance FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *self.tx)
                .await?;
        balance.ok_or_else(|| LedgerError::NotFound(format!("user {user_id}")))
    }

    async fn append_entry(&mut self, entry: &Transaction) -> Result<(), LedgerError> {
        sqlx::query(
            r#"INSERT INTO transactions (id, type_id, user_id, order_id, external_order_id, amount, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(entry.id)
        .bind(entry.kind.id())
        .bind(entry.user_id)
        .bind(entry.order_id)
        .bind(&entry.external_order_id)
        .bind(entry.amount)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await?;

        let updated = sqlx::query("UPDATE users SET balance = balance + $1 WHERE id = $2")
            .bind(entry.balance_delta())
            .bind(entry.user_id)
            .execute(&mut *self.tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(LedgerError::NotFound(format!("user {}", entry.user_id)));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
