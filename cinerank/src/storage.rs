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

//! # storage
//!
//! Abstractions for the cinerank counter store.
//!
//! The engine needs very little from its store: string get/set (configuration), a handful of hash
//! operations (vote records & histogram increments), and an optimistic watch/queue/exec
//! transaction. [Backend] captures exactly that, so the production Redis implementation and the
//! in-memory implementation used by the test suites are interchangeable.

use async_trait::async_trait;
use snafu::{prelude::*, Backtrace};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("The transaction was discarded; a watched key changed underneath it"))]
    Conflict { backtrace: Backtrace },
    #[snafu(display("Counter store error: {source}"))]
    Store {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl Error {
    /// Wrap a backend-specific failure. The protocol layer only ever needs to distinguish
    /// "conflict" from "store trouble"; the details stay with the source for logging.
    pub fn store(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::Store {
            source: Box::new(err),
        }
    }
    pub fn conflict() -> Error {
        ConflictSnafu.build()
    }
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////

/// A mutation queued inside a [Transaction].
///
/// Implementations buffer these between `watch` & `exec` rather than sending them piecemeal; the
/// whole batch applies atomically or not at all.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Op {
    HashSet {
        key: String,
        field: String,
        value: String,
    },
    /// `delta` may be negative; an absent field reads as zero.
    HashIncrementBy {
        key: String,
        field: String,
        delta: i64,
    },
    HashDelete {
        key: String,
        fields: Vec<String>,
    },
}

/// An optimistic transaction over watched keys
///
/// Obtained from [Backend::watch]. Reads made through the transaction happen on the watching
/// connection and so are at least as fresh as the watch point; mutations are queued and applied
/// by [exec] only if none of the watched keys changed since the watch began. A failed [exec]
/// reports [Error::Conflict] -- the engine never retries internally (that's the integrating
/// layer's policy call).
///
/// [exec]: Transaction::exec
#[async_trait]
pub trait Transaction: Send {
    /// Read a hash field on the watching connection.
    async fn hash_get(&mut self, key: &str, field: &str) -> Result<Option<String>>;
    /// Queue a field write.
    fn hash_set(&mut self, key: &str, field: &str, value: &str);
    /// Queue a field increment (`delta` may be negative).
    fn hash_increment_by(&mut self, key: &str, field: &str, delta: i64);
    /// Queue a field deletion.
    fn hash_delete(&mut self, key: &str, fields: &[&str]);
    /// Apply the queued mutations atomically iff no watched key has changed.
    async fn exec(self: Box<Self>) -> Result<()>;
    /// Discard the transaction without applying anything (the no-op paths).
    async fn abort(self: Box<Self>);
}

/// Object-safe trait abstracting over the cinerank counter store
#[async_trait]
pub trait Backend {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>>;
    /// Fetch several fields at once; absent fields come back as [None], input order preserved.
    async fn hash_multi_get(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>>;
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()>;
    async fn hash_increment_by(&self, key: &str, field: &str, delta: i64) -> Result<i64>;
    async fn hash_delete(&self, key: &str, fields: &[&str]) -> Result<()>;
    /// Begin an optimistic transaction over `keys`.
    async fn watch(&self, keys: &[&str]) -> Result<Box<dyn Transaction>>;
}
