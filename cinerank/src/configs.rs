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

//! # configs
//!
//! The configuration collaborator's boundary.
//!
//! A post's configuration -- its moderator list, its movies (baselines included) & its
//! image-reference map -- lives as a JSON blob under `P|configs`. Moderators edit it through
//! machinery that is somebody else's problem; the engine only ever *reads* it, validating on load
//! the same things the editing side's schema enforces (no unknown fields, at least one moderator &
//! one movie), plus the one thing a schema can't: movie ids must be unique, because they name
//! counter-store keys.

use std::collections::HashMap;

use serde::Deserialize;
use snafu::{prelude::*, Backtrace};

use crate::{
    entities::{Movie, MovieId, PostId, UserId},
    storage,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Movie id {id} appears more than once"))]
    DuplicateMovie { id: MovieId, backtrace: Backtrace },
    #[snafu(display("Configuration doesn't parse: {source}"))]
    Json {
        source: serde_json::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("No configuration found for {post}"))]
    Missing { post: PostId, backtrace: Backtrace },
    #[snafu(display("A configuration needs at least one movie"))]
    NoMovies { backtrace: Backtrace },
    #[snafu(display("A configuration needs at least one moderator"))]
    NoMods { backtrace: Backtrace },
    #[snafu(display("Failed to read configuration: {source}"))]
    Store { source: storage::Error },
}

type Result<T> = std::result::Result<T, Error>;

/// The key under which post `post`'s configuration lives.
pub fn configs_key(post: &PostId) -> String {
    format!("{post}|configs")
}

/// A post's configuration, as loaded (& validated) from the store.
///
/// Immutable from the engine's point of view: when a moderator edits, the collaborator replaces
/// the blob wholesale & the service reloads.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Configs {
    pub mods: Vec<UserId>,
    pub movies: Vec<Movie>,
    /// image uri -> resolved (uploaded) URL
    #[serde(default)]
    pub refs: HashMap<String, String>,
}

impl Configs {
    pub fn from_json(text: &str) -> Result<Configs> {
        serde_json::from_str::<Configs>(text)
            .context(JsonSnafu)?
            .validate()
    }
    /// Fetch & parse the configuration for `post`.
    pub async fn load(
        storage: &(dyn storage::Backend + Send + Sync),
        post: &PostId,
    ) -> Result<Configs> {
        let text = storage
            .get(&configs_key(post))
            .await
            .context(StoreSnafu)?
            .context(MissingSnafu { post: post.clone() })?;
        Configs::from_json(&text)
    }
    fn validate(self) -> Result<Configs> {
        ensure!(!self.mods.is_empty(), NoModsSnafu);
        ensure!(!self.movies.is_empty(), NoMoviesSnafu);
        let mut seen = std::collections::HashSet::new();
        for movie in &self.movies {
            ensure!(
                seen.insert(&movie.id),
                DuplicateMovieSnafu {
                    id: movie.id.clone()
                }
            );
        }
        Ok(self)
    }
    pub fn movie(&self, id: &MovieId) -> Option<&Movie> {
        self.movies.iter().find(|movie| &movie.id == id)
    }
    pub fn is_mod(&self, user: &UserId) -> bool {
        self.mods.contains(user)
    }
}
