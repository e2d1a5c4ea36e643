// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of cinerank.
//
// cinerank is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// cinerank is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with cinerank.  If not,
// see <http://www.gnu.org/licenses/>.

//! # memory
//!
//! An in-memory [Backend] implementation.
//!
//! This is not a mock: the watch/exec semantics are real. Every key carries a version counter;
//! [watch] snapshots the versions of the watched keys and [exec] re-checks them under the same
//! lock that applies the mutations, so two racing transactions interleave exactly the way they
//! would against Redis (one applies, the other reports a conflict). The test suites lean on this,
//! and `cinerankd --memory` will happily serve from it for local hacking.
//!
//! [Backend]: crate::storage::Backend
//! [watch]: crate::storage::Backend::watch
//! [exec]: crate::storage::Transaction::exec

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use snafu::{prelude::*, Backtrace};
use tokio::sync::Mutex;
use tracing::debug;

use crate::storage::{self, Op};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{key}/{field} holds {value}, which is not an integer"))]
    NotAnInteger {
        key: String,
        field: String,
        value: String,
        backtrace: Backtrace,
    },
}

type StdResult<T, E> = std::result::Result<T, E>;

type Result<T> = std::result::Result<T, storage::Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Default)]
struct Inner {
    strings: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    /// Monotonic per-key write counters backing the optimistic-lock check. Keys never leave this
    /// map, even when the value itself is deleted -- a deletion is a change, too.
    versions: HashMap<String, u64>,
}

impl Inner {
    fn bump(&mut self, key: &str) {
        *self.versions.entry(key.to_owned()).or_insert(0) += 1;
    }
    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }
    fn increment(&mut self, key: &str, field: &str, delta: i64) -> StdResult<i64, Error> {
        let entry = self
            .hashes
            .entry(key.to_owned())
            .or_default()
            .entry(field.to_owned())
            .or_insert_with(|| "0".to_owned());
        let current = entry.parse::<i64>().ok().context(NotAnIntegerSnafu {
            key: key.to_owned(),
            field: field.to_owned(),
            value: entry.clone(),
        })?;
        let next = current + delta;
        *entry = next.to_string();
        Ok(next)
    }
    fn delete(&mut self, key: &str, fields: &[String]) {
        if let Some(hash) = self.hashes.get_mut(key) {
            for field in fields {
                hash.remove(field);
            }
            // Redis drops a hash once its last field goes; mirror that so "no record" reads
            // identically against either backend.
            if hash.is_empty() {
                self.hashes.remove(key);
            }
        }
    }
    fn apply(&mut self, op: &Op) -> StdResult<(), Error> {
        match op {
            Op::HashSet { key, field, value } => {
                self.hashes
                    .entry(key.clone())
                    .or_default()
                    .insert(field.clone(), value.clone());
                self.bump(key);
            }
            Op::HashIncrementBy { key, field, delta } => {
                self.increment(key, field, *delta)?;
                self.bump(key);
            }
            Op::HashDelete { key, fields } => {
                self.delete(key, fields.as_slice());
                self.bump(key);
            }
        }
        Ok(())
    }
}

/// An in-memory counter store. Cheaply clonable; clones share state.
#[derive(Clone, Debug, Default)]
pub struct Store {
    inner: Arc<Mutex<Inner>>,
}

impl Store {
    pub fn new() -> Store {
        Store::default()
    }
}

struct Transaction {
    inner: Arc<Mutex<Inner>>,
    watched: Vec<(String, u64)>,
    ops: Vec<Op>,
}

#[async_trait]
impl storage::Transaction for Transaction {
    async fn hash_get(&mut self, key: &str, field: &str) -> Result<Option<String>> {
        let inner = self.inner.lock().await;
        Ok(inner.hashes.get(key).and_then(|h| h.get(field)).cloned())
    }
    fn hash_set(&mut self, key: &str, field: &str, value: &str) {
        self.ops.push(Op::HashSet {
            key: key.to_owned(),
            field: field.to_owned(),
            value: value.to_owned(),
        });
    }
    fn hash_increment_by(&mut self, key: &str, field: &str, delta: i64) {
        self.ops.push(Op::HashIncrementBy {
            key: key.to_owned(),
            field: field.to_owned(),
            delta,
        });
    }
    fn hash_delete(&mut self, key: &str, fields: &[&str]) {
        self.ops.push(Op::HashDelete {
            key: key.to_owned(),
            fields: fields.iter().map(|f| (*f).to_owned()).collect(),
        });
    }
    async fn exec(self: Box<Self>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for (key, version) in &self.watched {
            if inner.version(key) != *version {
                debug!("transaction conflict on {key}");
                return Err(storage::Error::conflict());
            }
        }
        for op in &self.ops {
            inner.apply(op).map_err(storage::Error::store)?;
        }
        Ok(())
    }
    async fn abort(self: Box<Self>) {}
}

#[async_trait]
impl storage::Backend for Store {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().await.strings.get(key).cloned())
    }
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.strings.insert(key.to_owned(), value.to_owned());
        inner.bump(key);
        Ok(())
    }
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let inner = self.inner.lock().await;
        Ok(inner.hashes.get(key).and_then(|h| h.get(field)).cloned())
    }
    async fn hash_multi_get(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>> {
        let inner = self.inner.lock().await;
        let hash = inner.hashes.get(key);
        Ok(fields
            .iter()
            .map(|field| hash.and_then(|h| h.get(*field)).cloned())
            .collect())
    }
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .hashes
            .entry(key.to_owned())
            .or_default()
            .insert(field.to_owned(), value.to_owned());
        inner.bump(key);
        Ok(())
    }
    async fn hash_increment_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut inner = self.inner.lock().await;
        let next = inner
            .increment(key, field, delta)
            .map_err(storage::Error::store)?;
        inner.bump(key);
        Ok(next)
    }
    async fn hash_delete(&self, key: &str, fields: &[&str]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let owned: Vec<String> = fields.iter().map(|f| (*f).to_owned()).collect();
        inner.delete(key, owned.as_slice());
        inner.bump(key);
        Ok(())
    }
    async fn watch(&self, keys: &[&str]) -> Result<Box<dyn storage::Transaction>> {
        let inner = self.inner.lock().await;
        let watched = keys
            .iter()
            .map(|key| ((*key).to_owned(), inner.version(key)))
            .collect();
        Ok(Box::new(Transaction {
            inner: self.inner.clone(),
            watched,
            ops: Vec::new(),
        }))
    }
}
