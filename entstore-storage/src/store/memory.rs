//! In-memory store with queries, cursors and optimistic transactions.

use super::traits::{Lookup, QueryIterator, QueryRow, Store, Transaction, TransactionBody};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use entstore_core::{
    CallContext, Cursor, Direction, EntResult, Filter, Key, Order, Properties, QuerySpec,
    StoreError, StoreResult,
};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// Settings of a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryStoreConfig {
    /// Commits retried on conflict before giving up.
    pub max_transaction_attempts: u32,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_transaction_attempts: 3,
        }
    }
}

impl MemoryStoreConfig {
    pub fn with_max_transaction_attempts(mut self, attempts: u32) -> Self {
        self.max_transaction_attempts = attempts.max(1);
        self
    }
}

#[derive(Debug, Clone)]
struct Record {
    properties: Properties,
    version: u64,
}

#[derive(Debug, Default)]
struct Records {
    by_key: BTreeMap<Key, Record>,
    next_version: u64,
}

impl Records {
    fn version_of(&self, key: &Key) -> u64 {
        self.by_key.get(key).map_or(0, |r| r.version)
    }

    fn write(&mut self, key: Key, properties: Properties) {
        self.next_version += 1;
        let version = self.next_version;
        self.by_key.insert(key, Record { properties, version });
    }
}

/// Store backed by an ordered in-process map.
///
/// Transactions run one at a time and commit only if nothing they read was
/// changed by a non-transactional write in the meantime.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<Records>>,
    tx_gate: Arc<AsyncMutex<()>>,
    config: MemoryStoreConfig,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: MemoryStoreConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.by_key.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.records
            .read()
            .map(|r| r.by_key.contains_key(key))
            .unwrap_or(false)
    }

    /// Stored properties of `key`, bypassing the Store contract.
    pub fn properties(&self, key: &Key) -> Option<Properties> {
        self.records
            .read()
            .ok()?
            .by_key
            .get(key)
            .map(|r| r.properties.clone())
    }

    fn commit(&self, tx: MemoryTransaction) -> StoreResult<bool> {
        let reads = tx.reads.into_inner().map_err(|_| StoreError::LockPoisoned)?;
        let writes = tx.writes.into_inner().map_err(|_| StoreError::LockPoisoned)?;
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;

        if reads
            .iter()
            .any(|(key, version)| records.version_of(key) != *version)
        {
            return Ok(false);
        }
        for (key, write) in writes {
            match write {
                Some(properties) => records.write(key, properties),
                None => {
                    records.by_key.remove(&key);
                }
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_multi(&self, ctx: &CallContext, keys: &[Key]) -> StoreResult<Vec<Lookup>> {
        ctx.check()?;
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(keys
            .iter()
            .map(|key| match records.by_key.get(key) {
                Some(record) => Lookup::Found(record.properties.clone()),
                None => Lookup::Absent,
            })
            .collect())
    }

    async fn put_multi(
        &self,
        ctx: &CallContext,
        keys: &[Key],
        properties: Vec<Properties>,
    ) -> StoreResult<()> {
        ctx.check()?;
        if keys.len() != properties.len() {
            return Err(StoreError::InvalidRequest {
                reason: format!("{} keys but {} entities", keys.len(), properties.len()),
            });
        }
        if let Some(key) = keys.iter().find(|k| !k.is_complete()) {
            return Err(StoreError::InvalidRequest {
                reason: format!("incomplete key {}", key),
            });
        }
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        for (key, props) in keys.iter().zip(properties) {
            records.write(key.clone(), props);
        }
        Ok(())
    }

    async fn delete_multi(&self, ctx: &CallContext, keys: &[Key]) -> StoreResult<()> {
        ctx.check()?;
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        for key in keys {
            records.by_key.remove(key);
        }
        Ok(())
    }

    async fn run_query(
        &self,
        ctx: &CallContext,
        spec: &QuerySpec,
    ) -> StoreResult<Box<dyn QueryIterator>> {
        ctx.check()?;
        let start = spec.start.as_ref().map(decode_cursor).transpose()?.flatten();
        let end = spec.end.as_ref().map(decode_cursor).transpose()?.flatten();

        let mut rows: Vec<(Position, QueryRow)> = {
            let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
            records
                .by_key
                .iter()
                .filter(|(key, _)| {
                    key.kind() == spec.kind
                        && key.namespace() == spec.namespace.as_deref()
                        && spec.ancestor.as_ref().map_or(true, |a| key.has_ancestor(a))
                })
                .filter(|(_, record)| matches_filters(&record.properties, &spec.filters))
                .filter_map(|(key, record)| {
                    let values = order_values(&record.properties, &spec.orders)?;
                    let row = QueryRow {
                        key: key.clone(),
                        properties: (!spec.keys_only).then(|| record.properties.clone()),
                    };
                    Some((
                        Position {
                            values,
                            key: key.clone(),
                        },
                        row,
                    ))
                })
                .collect()
        };

        rows.sort_by(|a, b| compare_positions(&spec.orders, &a.0, &b.0));
        if let Some(start) = &start {
            rows.retain(|(pos, _)| compare_positions(&spec.orders, pos, start) == Ordering::Greater);
        }
        if let Some(end) = &end {
            rows.retain(|(pos, _)| compare_positions(&spec.orders, pos, end) != Ordering::Greater);
        }
        if let Some(limit) = spec.limit {
            rows.truncate(limit);
        }

        debug!(target: "entstore::query", query = %spec, rows = rows.len(), "memory query evaluated");
        Ok(Box::new(MemoryQueryIterator {
            rows: rows.into_iter(),
            position: start,
        }))
    }

    async fn transaction(&self, ctx: &CallContext, body: &dyn TransactionBody) -> EntResult<()> {
        ctx.check().map_err(StoreError::from)?;
        let _gate = self.tx_gate.lock().await;
        let attempts = self.config.max_transaction_attempts.max(1);

        for attempt in 1..=attempts {
            ctx.check().map_err(StoreError::from)?;
            let tx = MemoryTransaction::new(Arc::clone(&self.records));
            body.run(&tx).await?;
            if self.commit(tx)? {
                return Ok(());
            }
            debug!(target: "entstore::store", attempt, "transaction conflict, retrying");
        }
        Err(StoreError::ConcurrentTransaction { attempts }.into())
    }

    async fn namespaces(&self, ctx: &CallContext) -> StoreResult<Vec<Option<String>>> {
        ctx.check()?;
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        let namespaces: BTreeSet<Option<String>> = records
            .by_key
            .keys()
            .map(|k| k.namespace().map(str::to_string))
            .collect();
        Ok(namespaces.into_iter().collect())
    }

    async fn kinds(&self, ctx: &CallContext, namespace: Option<&str>) -> StoreResult<Vec<String>> {
        ctx.check()?;
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        let kinds: BTreeSet<String> = records
            .by_key
            .keys()
            .filter(|k| k.namespace() == namespace)
            .map(|k| k.kind().to_string())
            .collect();
        Ok(kinds.into_iter().collect())
    }
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

struct MemoryTransaction {
    records: Arc<RwLock<Records>>,
    /// Version observed at first read of each key. Zero for absent.
    reads: Mutex<HashMap<Key, u64>>,
    /// Buffered writes. `None` deletes.
    writes: Mutex<BTreeMap<Key, Option<Properties>>>,
}

impl MemoryTransaction {
    fn new(records: Arc<RwLock<Records>>) -> Self {
        Self {
            records,
            reads: Mutex::new(HashMap::new()),
            writes: Mutex::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&self, key: &Key) -> StoreResult<Option<Properties>> {
        {
            let writes = self.writes.lock().map_err(|_| StoreError::LockPoisoned)?;
            if let Some(pending) = writes.get(key) {
                return Ok(pending.clone());
            }
        }
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut reads = self.reads.lock().map_err(|_| StoreError::LockPoisoned)?;
        reads
            .entry(key.clone())
            .or_insert_with(|| records.version_of(key));
        Ok(records.by_key.get(key).map(|r| r.properties.clone()))
    }

    async fn put(&self, key: Key, properties: Properties) -> StoreResult<()> {
        if !key.is_complete() {
            return Err(StoreError::InvalidRequest {
                reason: format!("incomplete key {}", key),
            });
        }
        let mut writes = self.writes.lock().map_err(|_| StoreError::LockPoisoned)?;
        writes.insert(key, Some(properties));
        Ok(())
    }

    async fn delete(&self, key: &Key) -> StoreResult<()> {
        let mut writes = self.writes.lock().map_err(|_| StoreError::LockPoisoned)?;
        writes.insert(key.clone(), None);
        Ok(())
    }
}

// ============================================================================
// QUERY EVALUATION
// ============================================================================

/// Sort position of one row: its order-by values, then its key.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Position {
    values: Vec<Value>,
    key: Key,
}

struct MemoryQueryIterator {
    rows: std::vec::IntoIter<(Position, QueryRow)>,
    position: Option<Position>,
}

#[async_trait]
impl QueryIterator for MemoryQueryIterator {
    async fn next(&mut self, ctx: &CallContext) -> StoreResult<Option<QueryRow>> {
        ctx.check()?;
        Ok(self.rows.next().map(|(position, row)| {
            self.position = Some(position);
            row
        }))
    }

    fn cursor(&self) -> StoreResult<Cursor> {
        encode_cursor(self.position.as_ref())
    }
}

fn encode_cursor(position: Option<&Position>) -> StoreResult<Cursor> {
    let json = serde_json::to_vec(&position).map_err(|e| StoreError::InvalidCursor {
        reason: e.to_string(),
    })?;
    Ok(Cursor::new(URL_SAFE_NO_PAD.encode(json)))
}

fn decode_cursor(cursor: &Cursor) -> StoreResult<Option<Position>> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor.as_str())
        .map_err(|e| StoreError::InvalidCursor {
            reason: e.to_string(),
        })?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::InvalidCursor {
        reason: e.to_string(),
    })
}

fn matches_filters(properties: &Properties, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| {
        properties
            .get(&filter.field)
            .is_some_and(|value| filter.op.accepts(compare_values(value, &filter.value)))
    })
}

/// Values of the order-by fields. Rows lacking one are excluded.
fn order_values(properties: &Properties, orders: &[Order]) -> Option<Vec<Value>> {
    orders
        .iter()
        .map(|order| properties.get(&order.field).cloned())
        .collect()
}

fn compare_positions(orders: &[Order], a: &Position, b: &Position) -> Ordering {
    for (i, order) in orders.iter().enumerate() {
        let (Some(left), Some(right)) = (a.values.get(i), b.values.get(i)) else {
            break;
        };
        let ordering = match order.direction {
            Direction::Ascending => compare_values(left, right),
            Direction::Descending => compare_values(right, left),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.key.cmp(&b.key)
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over property values: null, bool, number, string, then the rest.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ if type_rank(a) == type_rank(b) => a.to_string().cmp(&b.to_string()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn compare_numbers(x: &Number, y: &Number) -> Ordering {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        return a.cmp(&b);
    }
    let a = x.as_f64().unwrap_or(f64::NAN);
    let b = y.as_f64().unwrap_or(f64::NAN);
    a.total_cmp(&b)
}

// ============================================================================
// TESTS
// ============================================================================
