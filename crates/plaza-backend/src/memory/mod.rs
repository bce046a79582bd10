//! In-process implementation of [`Backend`]
//!
//! Keeps tables as JSON rows, resolves embedded selects through a [`Schema`],
//! publishes row changes to subscribed feeds and stores uploaded objects in a
//! map. Row ids are assigned from a per-table counter and `created_at` from a
//! strictly increasing clock, so ordering by either is deterministic.

mod schema;
mod select;

pub use schema::{Relation, Schema};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::{AuthUser, Credentials};
use crate::error::BackendError;
use crate::query::{values_equal, Delete, Direction, Filter, Insert, Query, Update};
use crate::realtime::{ChangeEvent, ChangeFilter, ChangeKind, ChangeSubscription};
use crate::storage::{self, Upload};
use crate::Backend;

/// Minimum password length accepted by the auth service
const MIN_PASSWORD_LEN: usize = 6;

/// Table contents plus id / timestamp generators
#[derive(Debug, Default)]
pub(crate) struct Tables {
    data: HashMap<String, Vec<Value>>,
    next_ids: HashMap<String, i64>,
    last_stamp: Option<DateTime<Utc>>,
}

impl Tables {
    pub(crate) fn rows(&self, table: &str) -> &[Value] {
        self.data.get(table).map_or(&[], Vec::as_slice)
    }

    fn stamp(&mut self) -> String {
        let mut now = Utc::now();
        if let Some(last) = self.last_stamp {
            if now <= last {
                now = last + chrono::Duration::milliseconds(1);
            }
        }
        self.last_stamp = Some(now);
        now.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// Fill in `id` and `created_at`, rejecting duplicate ids
    fn prepare(&mut self, table: &str, row: &Value) -> Result<Value, BackendError> {
        let Value::Object(map) = row else {
            return Err(BackendError::Api {
                status: 400,
                message: format!("row for `{table}` must be a JSON object"),
            });
        };
        let mut map = map.clone();

        match map.get("id") {
            None | Some(Value::Null) => {
                let next = self.next_ids.entry(table.to_string()).or_insert(1);
                map.insert("id".to_string(), Value::from(*next));
                *next += 1;
            }
            Some(id) => {
                let duplicate = self
                    .rows(table)
                    .iter()
                    .any(|existing| existing.get("id").is_some_and(|e| values_equal(e, id)));
                if duplicate {
                    return Err(BackendError::Api {
                        status: 409,
                        message: format!(
                            "duplicate key value violates unique constraint \"{table}_pkey\""
                        ),
                    });
                }
                if let Some(n) = id.as_i64() {
                    let next = self.next_ids.entry(table.to_string()).or_insert(1);
                    *next = (*next).max(n + 1);
                }
            }
        }

        if !map.contains_key("created_at") {
            let stamp = self.stamp();
            map.insert("created_at".to_string(), Value::String(stamp));
        }
        Ok(Value::Object(map))
    }
}

struct StoredUser {
    user: AuthUser,
    password: String,
}

struct Feed {
    channel: String,
    filters: Vec<ChangeFilter>,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

/// In-memory stand-in for the hosted backend
pub struct MemoryBackend {
    base_url: String,
    schema: Schema,
    tables: RwLock<Tables>,
    users: DashMap<String, StoredUser>,
    session: RwLock<Option<AuthUser>>,
    objects: DashMap<(String, String), Upload>,
    feeds: Arc<DashMap<u64, Feed>>,
    next_feed: AtomicU64,
}

impl MemoryBackend {
    /// Empty backend with no relations
    #[must_use]
    pub fn new() -> Self {
        Self::with_schema(Schema::new())
    }

    /// Empty backend resolving embeds through `schema`
    #[must_use]
    pub fn with_schema(schema: Schema) -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            schema,
            tables: RwLock::new(Tables::default()),
            users: DashMap::new(),
            session: RwLock::new(None),
            objects: DashMap::new(),
            feeds: Arc::new(DashMap::new()),
            next_feed: AtomicU64::new(1),
        }
    }

    /// Base URL used for public object URLs
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Insert rows directly, without publishing change events
    pub fn seed(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>, BackendError> {
        let mut tables = self.tables.write();
        let mut seeded = Vec::with_capacity(rows.len());
        for row in &rows {
            let row = tables.prepare(table, row)?;
            tables
                .data
                .entry(table.to_string())
                .or_default()
                .push(row.clone());
            seeded.push(row);
        }
        Ok(seeded)
    }

    /// Snapshot of a table's rows
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables.read().rows(table).to_vec()
    }

    /// Create an account without signing in
    pub fn register_user(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthUser, BackendError> {
        let key = email.to_ascii_lowercase();
        if self.users.contains_key(&key) {
            return Err(BackendError::Auth("User already registered".to_string()));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(BackendError::Auth(format!(
                "Password should be at least {MIN_PASSWORD_LEN} characters."
            )));
        }
        let user = AuthUser {
            id: Uuid::new_v4(),
            email: Some(email.to_string()),
        };
        self.users.insert(
            key,
            StoredUser {
                user: user.clone(),
                password: password.to_string(),
            },
        );
        Ok(user)
    }

    /// Sign `user` in directly (restoring a session at startup)
    pub fn set_session(&self, user: Option<AuthUser>) {
        *self.session.write() = user;
    }

    /// Stored object, if any
    #[must_use]
    pub fn object(&self, bucket: &str, path: &str) -> Option<Upload> {
        self.objects
            .get(&(bucket.to_string(), path.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Paths of every object in `bucket`, sorted
    #[must_use]
    pub fn object_paths(&self, bucket: &str) -> Vec<String> {
        let mut paths: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().0 == bucket)
            .map(|entry| entry.key().1.clone())
            .collect();
        paths.sort();
        paths
    }

    /// Number of live feed subscriptions
    #[must_use]
    pub fn feed_count(&self) -> usize {
        self.feeds.len()
    }

    /// Channel names of live feeds, sorted
    #[must_use]
    pub fn feed_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self
            .feeds
            .iter()
            .map(|entry| entry.value().channel.clone())
            .collect();
        channels.sort();
        channels
    }

    /// Publish an event to matching feeds
    pub fn publish(&self, event: &ChangeEvent) {
        let mut closed = Vec::new();
        for entry in self.feeds.iter() {
            let feed = entry.value();
            if feed.filters.iter().any(|f| f.matches(event))
                && feed.sender.send(event.clone()).is_err()
            {
                closed.push(*entry.key());
            }
        }
        for id in closed {
            self.feeds.remove(&id);
        }
    }

    fn require_session(&self) -> Result<AuthUser, BackendError> {
        self.session
            .read()
            .clone()
            .ok_or(BackendError::Unauthenticated)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("users", &self.users.len())
            .field("objects", &self.objects.len())
            .field("feeds", &self.feeds.len())
            .finish_non_exhaustive()
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn matches_all(filters: &[Filter], row: &Value) -> bool {
    filters.iter().all(|filter| filter.matches(row))
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn sign_up(&self, credentials: &Credentials) -> Result<AuthUser, BackendError> {
        let user = self.register_user(&credentials.email, &credentials.password)?;
        self.set_session(Some(user.clone()));
        Ok(user)
    }

    async fn sign_in_with_password(
        &self,
        credentials: &Credentials,
    ) -> Result<AuthUser, BackendError> {
        let key = credentials.email.to_ascii_lowercase();
        let user = match self.users.get(&key) {
            Some(stored) if stored.password == credentials.password => stored.user.clone(),
            _ => return Err(BackendError::Auth("Invalid login credentials".to_string())),
        };
        self.set_session(Some(user.clone()));
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.set_session(None);
        Ok(())
    }

    async fn get_user(&self) -> Result<Option<AuthUser>, BackendError> {
        Ok(self.session.read().clone())
    }

    async fn update_password(&self, new_password: &str) -> Result<(), BackendError> {
        let user = self.require_session()?;
        if new_password.len() < MIN_PASSWORD_LEN {
            return Err(BackendError::Auth(format!(
                "Password should be at least {MIN_PASSWORD_LEN} characters."
            )));
        }
        let key = user.email.unwrap_or_default().to_ascii_lowercase();
        if let Some(mut stored) = self.users.get_mut(&key) {
            stored.password = new_password.to_string();
        }
        Ok(())
    }

    async fn select(&self, query: &Query) -> Result<Vec<Value>, BackendError> {
        let items = select::parse(query.columns())?;
        let tables = self.tables.read();

        let mut rows: Vec<&Value> = tables
            .rows(query.table_name())
            .iter()
            .filter(|row| matches_all(query.filters(), row))
            .collect();

        rows.sort_by(|a, b| {
            query
                .ordering()
                .iter()
                .map(|order| {
                    let x = a.get(&order.column).unwrap_or(&Value::Null);
                    let y = b.get(&order.column).unwrap_or(&Value::Null);
                    match order.direction {
                        Direction::Ascending => compare_values(x, y),
                        Direction::Descending => compare_values(x, y).reverse(),
                    }
                })
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });

        if let Some(limit) = query.row_limit() {
            rows.truncate(limit);
        }

        if query.is_single() && rows.len() != 1 {
            if rows.is_empty() {
                return Err(BackendError::not_found(query.table_name()));
            }
            return Err(BackendError::Api {
                status: 406,
                message: "JSON object requested, multiple (or no) rows returned".to_string(),
            });
        }

        rows.into_iter()
            .map(|row| select::project(row, query.table_name(), &items, &tables, &self.schema))
            .collect()
    }

    async fn insert(&self, insert: &Insert) -> Result<Vec<Value>, BackendError> {
        let table = insert.table_name();
        let (events, returned) = {
            let mut tables = self.tables.write();
            let mut prepared = Vec::with_capacity(insert.rows().len());
            for row in insert.rows() {
                prepared.push(tables.prepare(table, row)?);
            }
            tables
                .data
                .entry(table.to_string())
                .or_default()
                .extend(prepared.iter().cloned());

            let returned = match insert.returning_columns() {
                Some(columns) => {
                    let items = select::parse(columns)?;
                    prepared
                        .iter()
                        .map(|row| select::project(row, table, &items, &tables, &self.schema))
                        .collect::<Result<Vec<_>, _>>()?
                }
                None => Vec::new(),
            };
            let events: Vec<ChangeEvent> = prepared
                .into_iter()
                .map(|row| ChangeEvent::new(ChangeKind::Insert, table, row))
                .collect();
            (events, returned)
        };

        for event in &events {
            self.publish(event);
        }
        Ok(returned)
    }

    async fn update(&self, update: &Update) -> Result<(), BackendError> {
        let table = update.table_name();
        let events = {
            let mut tables = self.tables.write();
            let mut events = Vec::new();
            if let Some(rows) = tables.data.get_mut(table) {
                for row in rows.iter_mut() {
                    if !matches_all(update.filters(), row) {
                        continue;
                    }
                    let old = row.clone();
                    if let Value::Object(map) = row {
                        for (column, value) in update.values() {
                            map.insert(column.clone(), value.clone());
                        }
                    }
                    events.push(
                        ChangeEvent::new(ChangeKind::Update, table, row.clone()).with_old_record(old),
                    );
                }
            }
            events
        };

        for event in &events {
            self.publish(event);
        }
        Ok(())
    }

    async fn delete(&self, delete: &Delete) -> Result<(), BackendError> {
        let table = delete.table_name();
        let events = {
            let mut tables = self.tables.write();
            let mut removed = Vec::new();
            if let Some(rows) = tables.data.get_mut(table) {
                rows.retain(|row| {
                    if matches_all(delete.filters(), row) {
                        removed.push(row.clone());
                        false
                    } else {
                        true
                    }
                });
            }
            removed
                .into_iter()
                .map(|old| {
                    ChangeEvent::new(ChangeKind::Delete, table, Value::Object(Map::new()))
                        .with_old_record(old)
                })
                .collect::<Vec<_>>()
        };

        for event in &events {
            self.publish(event);
        }
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        upload: &Upload,
    ) -> Result<(), BackendError> {
        let key = (bucket.to_string(), path.to_string());
        if self.objects.contains_key(&key) {
            return Err(BackendError::Api {
                status: 400,
                message: "The resource already exists".to_string(),
            });
        }
        self.objects.insert(key, upload.clone());
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        storage::public_url(&self.base_url, bucket, path)
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), BackendError> {
        for path in paths {
            self.objects.remove(&(bucket.to_string(), path.clone()));
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
        filters: &[ChangeFilter],
    ) -> Result<ChangeSubscription, BackendError> {
        let id = self.next_feed.fetch_add(1, AtomicOrdering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.feeds.insert(
            id,
            Feed {
                channel: channel.to_string(),
                filters: filters.to_vec(),
                sender,
            },
        );

        let feeds = Arc::clone(&self.feeds);
        Ok(ChangeSubscription::new(channel, receiver, move || {
            feeds.remove(&id);
        }))
    }
}
