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

//! # redis
//!
//! [Backend] implementation for Redis.
//!
//! [Backend]: crate::storage::Backend
//!
//! Plain operations go through a [ConnectionManager] (shared, multiplexed, reconnecting). The one
//! place that can't ride the shared connection is `WATCH`: its guard is scoped to the connection
//! that issued it, and a multiplexed connection interleaves everyone's commands. So every
//! [watch](crate::storage::Backend::watch) opens a dedicated connection that lives exactly as long
//! as the transaction: `WATCH`, any point-in-time reads, then one atomic `MULTI`/`EXEC` pipeline.
//! A nil `EXEC` reply is Redis telling us a watched key changed; that surfaces as
//! [Conflict](crate::storage::Error::Conflict).

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use snafu::{prelude::*, Backtrace, IntoError};
use tracing::debug;

use crate::storage::{self, Op};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to open a Redis client for {url}: {source}"))]
    Client {
        url: String,
        source: redis::RedisError,
        backtrace: Backtrace,
    },
    #[snafu(display("{cmd} failed: {source}"))]
    Cmd {
        cmd: &'static str,
        source: redis::RedisError,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to connect to Redis: {source}"))]
    Connect {
        source: redis::RedisError,
        backtrace: Backtrace,
    },
    #[snafu(display("EXEC failed: {source}"))]
    Exec {
        source: redis::RedisError,
        backtrace: Backtrace,
    },
}

type StdResult<T, E> = std::result::Result<T, E>;

type Result<T> = std::result::Result<T, storage::Error>;

fn cmd_err(cmd: &'static str) -> impl FnOnce(redis::RedisError) -> storage::Error {
    move |err| storage::Error::store(CmdSnafu { cmd }.into_error(err))
}

////////////////////////////////////////////////////////////////////////////////////////////////////

/// A Redis-backed counter store. Cheaply clonable.
#[derive(Clone)]
pub struct Store {
    client: Client,
    manager: ConnectionManager,
}

impl Store {
    /// Open a client for `url` & establish the shared connection.
    pub async fn new(url: &str) -> StdResult<Store, Error> {
        let client = Client::open(url).context(ClientSnafu {
            url: url.to_owned(),
        })?;
        let manager = client
            .get_connection_manager()
            .await
            .context(ConnectSnafu)?;
        Ok(Store { client, manager })
    }
}

struct Transaction {
    con: redis::aio::MultiplexedConnection,
    ops: Vec<Op>,
}

#[async_trait]
impl storage::Transaction for Transaction {
    async fn hash_get(&mut self, key: &str, field: &str) -> Result<Option<String>> {
        redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut self.con)
            .await
            .map_err(cmd_err("HGET"))
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
    async fn exec(mut self: Box<Self>) -> Result<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &self.ops {
            match op {
                Op::HashSet { key, field, value } => {
                    pipe.hset(key, field, value).ignore();
                }
                Op::HashIncrementBy { key, field, delta } => {
                    pipe.hincr(key, field, *delta).ignore();
                }
                Op::HashDelete { key, fields } => {
                    pipe.hdel(key, fields.clone()).ignore();
                }
            }
        }
        // A nil reply to EXEC means the transaction was discarded; redis-rs surfaces that as
        // `None` for an atomic pipeline.
        let reply: Option<redis::Value> = pipe
            .query_async(&mut self.con)
            .await
            .map_err(|err| storage::Error::store(ExecSnafu.into_error(err)))?;
        match reply {
            Some(_) => Ok(()),
            None => {
                debug!("EXEC returned nil; a watched key was modified");
                Err(storage::Error::conflict())
            }
        }
    }
    async fn abort(mut self: Box<Self>) {
        // Best-effort; dropping the dedicated connection releases the watch anyway.
        if let Err(err) = redis::cmd("UNWATCH")
            .query_async::<()>(&mut self.con)
            .await
        {
            debug!("UNWATCH failed (ignored): {err}");
        }
    }
}

#[async_trait]
impl storage::Backend for Store {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.manager
            .clone()
            .get(key)
            .await
            .map_err(cmd_err("GET"))
    }
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.manager
            .clone()
            .set::<_, _, ()>(key, value)
            .await
            .map_err(cmd_err("SET"))
    }
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.manager
            .clone()
            .hget(key, field)
            .await
            .map_err(cmd_err("HGET"))
    }
    async fn hash_multi_get(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>> {
        redis::cmd("HMGET")
            .arg(key)
            .arg(fields)
            .query_async(&mut self.manager.clone())
            .await
            .map_err(cmd_err("HMGET"))
    }
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.manager
            .clone()
            .hset::<_, _, _, ()>(key, field, value)
            .await
            .map_err(cmd_err("HSET"))
    }
    async fn hash_increment_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.manager
            .clone()
            .hincr(key, field, delta)
            .await
            .map_err(cmd_err("HINCRBY"))
    }
    async fn hash_delete(&self, key: &str, fields: &[&str]) -> Result<()> {
        self.manager
            .clone()
            .hdel::<_, _, ()>(key, fields.to_vec())
            .await
            .map_err(cmd_err("HDEL"))
    }
    async fn watch(&self, keys: &[&str]) -> Result<Box<dyn storage::Transaction>> {
        let mut con = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| storage::Error::store(ConnectSnafu.into_error(err)))?;
        redis::cmd("WATCH")
            .arg(keys)
            .query_async::<()>(&mut con)
            .await
            .map_err(cmd_err("WATCH"))?;
        Ok(Box::new(Transaction {
            con,
            ops: Vec::new(),
        }))
    }
}
