//! In-memory ledger store
//!
//! Same locking discipline as the Postgres store: one async mutex per order
//! row and per user row, held by the transaction until commit or drop.
//! Writes are staged in the transaction and applied to the tables in one
//! critical section at commit, so readers only ever see committed state.
//!
//! Inserting an external number takes a per-number lock as well. A second
//! inserter of the same number waits for the first transaction to end, then
//! sees either the committed row or a free number, like a unique index.
//! Lock entries are pruned once no transaction holds or waits on them.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::error::LedgerError;
use super::models::{
    LockedOrder, Order, OrderInsert, OrderStatus, Transaction, TransactionKind, User,
};
use super::store::{IsolationLevel, LedgerStore, LedgerTx};
use crate::core_types::{OrderId, UserId};

type RowLocks<K> = DashMap<K, Arc<AsyncMutex<()>>>;

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    /// Orders in insertion order
    orders: Vec<Order>,
    order_index: HashMap<OrderId, usize>,
    order_numbers: HashMap<String, OrderId>,
    /// Append-only, in commit order
    entries: Vec<Transaction>,
}

impl Tables {
    fn order(&self, id: &OrderId) -> Option<&Order> {
        self.order_index.get(id).map(|&i| &self.orders[i])
    }

    fn apply(&mut self, write: StagedWrite) {
        match write {
            StagedWrite::InsertOrder(order) => {
                self.order_numbers
                    .insert(order.external_id.clone(), order.id);
                self.order_index.insert(order.id, self.orders.len());
                self.orders.push(order);
            }
            StagedWrite::UpdateOrder {
                id,
                status,
                accrual,
            } => {
                if let Some(&i) = self.order_index.get(&id) {
                    self.orders[i].status = status;
                    self.orders[i].accrual = accrual;
                }
            }
            StagedWrite::AppendEntry(entry) => {
                if let Some(user) = self.users.get_mut(&entry.user_id) {
                    user.balance += entry.balance_delta();
                }
                self.entries.push(entry);
            }
        }
    }
}

#[derive(Default)]
struct Inner {
    tables: Mutex<Tables>,
    order_locks: RowLocks<OrderId>,
    user_locks: RowLocks<UserId>,
    number_locks: RowLocks<String>,
}

impl Inner {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn row_lock<K: Eq + Hash>(locks: &RowLocks<K>, key: K) -> Arc<AsyncMutex<()>> {
    Arc::clone(&locks.entry(key).or_default())
}

/// Drop held guards and forget locks nobody else holds or waits on
fn release_locks<K: Eq + Hash>(locks: &RowLocks<K>, guards: &mut HashMap<K, OwnedMutexGuard<()>>) {
    for (key, guard) in guards.drain() {
        drop(guard);
        locks.remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Ledger store held entirely in process memory
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    inner: Arc<Inner>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self, _isolation: IsolationLevel) -> Result<Box<dyn LedgerTx>, LedgerError> {
        // Row locks plus commit-time application already give every
        // transaction serializable behavior for the operations it exposes.
        Ok(Box::new(MemoryLedgerTx {
            inner: Arc::clone(&self.inner),
            order_guards: HashMap::new(),
            user_guards: HashMap::new(),
            number_guards: HashMap::new(),
            staged: Vec::new(),
        }))
    }

    async fn create_user(&self, login: &str) -> Result<User, LedgerError> {
        let mut tables = self.inner.tables();
        if tables.users.values().any(|u| u.login == login) {
            return Err(LedgerError::LoginTaken(login.to_string()));
        }
        let user = User {
            id: UserId::new_v4(),
            login: login.to_string(),
            balance: Decimal::ZERO,
            created_at: Utc::now(),
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn user(&self, id: UserId) -> Result<Option<User>, LedgerError> {
        Ok(self.inner.tables().users.get(&id).cloned())
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>, LedgerError> {
        Ok(self.inner.tables().order(&id).cloned())
    }

    async fn order_by_number(&self, external_id: &str) -> Result<Option<Order>, LedgerError> {
        let tables = self.inner.tables();
        Ok(tables
            .order_numbers
            .get(external_id)
            .and_then(|id| tables.order(id))
            .cloned())
    }

    async fn orders_by_user(&self, user_id: UserId) -> Result<Vec<Order>, LedgerError> {
        let tables = self.inner.tables();
        let mut orders: Vec<Order> = tables
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn entries_by_user(
        &self,
        user_id: UserId,
        kind: TransactionKind,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let tables = self.inner.tables();
        Ok(tables
            .entries
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id && e.kind == kind)
            .cloned()
            .collect())
    }

    async fn entry_sum(
        &self,
        user_id: UserId,
        kind: TransactionKind,
    ) -> Result<Decimal, LedgerError> {
        let tables = self.inner.tables();
        Ok(tables
            .entries
            .iter()
            .filter(|e| e.user_id == user_id && e.kind == kind)
            .map(|e| e.amount)
            .sum())
    }
}

enum StagedWrite {
    InsertOrder(Order),
    UpdateOrder {
        id: OrderId,
        status: OrderStatus,
        accrual: Option<Decimal>,
    },
    AppendEntry(Transaction),
}

/// One open in-memory transaction
pub struct MemoryLedgerTx {
    inner: Arc<Inner>,
    order_guards: HashMap<OrderId, OwnedMutexGuard<()>>,
    user_guards: HashMap<UserId, OwnedMutexGuard<()>>,
    number_guards: HashMap<String, OwnedMutexGuard<()>>,
    staged: Vec<StagedWrite>,
}

impl MemoryLedgerTx {
    async fn acquire_order(&mut self, id: OrderId) {
        if !self.order_guards.contains_key(&id) {
            let lock = row_lock(&self.inner.order_locks, id);
            let guard = lock.lock_owned().await;
            self.order_guards.insert(id, guard);
        }
    }

    async fn acquire_user(&mut self, id: UserId) {
        if !self.user_guards.contains_key(&id) {
            let lock = row_lock(&self.inner.user_locks, id);
            let guard = lock.lock_owned().await;
            self.user_guards.insert(id, guard);
        }
    }

    /// Order as this transaction sees it: committed row or own insert,
    /// with own updates applied.
    fn visible_order(&self, id: OrderId) -> Option<Order> {
        let mut order = self.inner.tables().order(&id).cloned().or_else(|| {
            self.staged.iter().find_map(|w| match w {
                StagedWrite::InsertOrder(o) if o.id == id => Some(o.clone()),
                _ => None,
            })
        })?;
        for write in &self.staged {
            if let StagedWrite::UpdateOrder {
                id: target,
                status,
                accrual,
            } = write
                && *target == id
            {
                order.status = *status;
                order.accrual = *accrual;
            }
        }
        Some(order)
    }

    /// Balance as this transaction sees it
    fn visible_balance(&self, user_id: UserId) -> Result<Decimal, LedgerError> {
        let committed = self
            .inner
            .tables()
            .users
            .get(&user_id)
            .map(|u| u.balance)
            .ok_or_else(|| LedgerError::NotFound(format!("user {user_id}")))?;
        let pending: Decimal = self
            .staged
            .iter()
            .filter_map(|w| match w {
                StagedWrite::AppendEntry(e) if e.user_id == user_id => Some(e.balance_delta()),
                _ => None,
            })
            .sum();
        Ok(committed + pending)
    }

    /// Owner of `number` as this transaction sees it
    fn visible_number(&self, number: &str) -> Option<(OrderId, UserId)> {
        let tables = self.inner.tables();
        tables
            .order_numbers
            .get(number)
            .and_then(|id| tables.order(id))
            .map(|o| (o.id, o.user_id))
            .or_else(|| {
                self.staged.iter().find_map(|w| match w {
                    StagedWrite::InsertOrder(o) if o.external_id == number => {
                        Some((o.id, o.user_id))
                    }
                    _ => None,
                })
            })
    }
}

impl Drop for MemoryLedgerTx {
    fn drop(&mut self) {
        release_locks(&self.inner.number_locks, &mut self.number_guards);
        release_locks(&self.inner.order_locks, &mut self.order_guards);
        release_locks(&self.inner.user_locks, &mut self.user_guards);
    }
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn unsettled_order_ids(&mut self) -> Result<Vec<OrderId>, LedgerError> {
        let tables = self.inner.tables();
        let mut unsettled: Vec<&Order> = tables
            .orders
            .iter()
            .filter(|o| !o.status.is_terminal())
            .collect();
        unsettled.sort_by_key(|o| o.created_at);
        Ok(unsettled.into_iter().map(|o| o.id).collect())
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<LockedOrder>, LedgerError> {
        self.acquire_order(id).await;
        Ok(self.visible_order(id).as_ref().map(LockedOrder::from))
    }

    async fn update_order(
        &mut self,
        id: OrderId,
        status: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<(), LedgerError> {
        self.acquire_order(id).await;
        if self.visible_order(id).is_none() {
            return Err(LedgerError::NotFound(format!("order {id}")));
        }
        self.staged.push(StagedWrite::UpdateOrder {
            id,
            status,
            accrual,
        });
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<OrderInsert, LedgerError> {
        let number = &order.external_id;
        if let Some((order_id, user_id)) = self.visible_number(number) {
            return Ok(OrderInsert::Existing { order_id, user_id });
        }

        // Waits while another transaction has an uncommitted insert of it
        if !self.number_guards.contains_key(number) {
            let lock = row_lock(&self.inner.number_locks, number.clone());
            let guard = lock.lock_owned().await;
            self.number_guards.insert(number.clone(), guard);
        }
        if let Some((order_id, user_id)) = self.visible_number(number) {
            return Ok(OrderInsert::Existing { order_id, user_id });
        }

        self.staged.push(StagedWrite::InsertOrder(order.clone()));
        Ok(OrderInsert::Created(order.clone()))
    }

    async fn lock_user_balance(&mut self, user_id: UserId) -> Result<Decimal, LedgerError> {
        self.acquire_user(user_id).await;
        self.visible_balance(user_id)
    }

    async fn append_entry(&mut self, entry: &Transaction) -> Result<(), LedgerError> {
        self.acquire_user(entry.user_id).await;
        let available = self.visible_balance(entry.user_id)?;

        // Mirrors CHECK (balance >= 0) on users
        if available + entry.balance_delta() < Decimal::ZERO {
            return Err(LedgerError::InsufficientFunds {
                requested: entry.amount,
                available,
            });
        }
        self.staged.push(StagedWrite::AppendEntry(entry.clone()));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), LedgerError> {
        let staged = std::mem::take(&mut self.staged);
        {
            let mut tables = self.inner.tables();
            for write in staged {
                tables.apply(write);
            }
        }
        // Row and number guards are released when `self` drops here
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        Ok(())
    }
}
