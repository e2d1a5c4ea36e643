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

//! # cinerank-test
//!
//! Shared fixtures for the cross-component test suites. The in-memory fixture is the workhorse;
//! the live-Redis suite builds its own store & borrows the configuration from here.

use std::{sync::Arc, time::Duration};

use cinerank::{
    cache::FakeClock,
    configs::{configs_key, Configs},
    entities::{Ballot, Movie, PostId, Rating, Recommendation, UserId},
    memory,
    storage::Backend,
    votes::Votes,
};

/// Three movies: one with baselines & a date, one dated, one dateless.
pub const CONFIGS: &str = r#"{
    "mods": ["t2_mod"],
    "movies": [
        {"id": "m1", "title": "Manichitrathazhu", "original_title": "മണിച്ചിത്രത്താഴ്",
         "release_date": "1993-12-25", "seven": 2, "ten": 1, "recommend_yes": 3},
        {"id": "m2", "title": "Kireedam", "release_date": "2024-03-10"},
        {"id": "m3", "title": "Drishyam"}
    ],
    "refs": {}
}"#;

pub const TTL: Duration = Duration::from_secs(4);

pub fn post() -> PostId {
    PostId::new("t3_test").unwrap()
}

pub fn user(name: &str) -> UserId {
    UserId::new(name).unwrap()
}

pub fn rating(value: u8) -> Rating {
    Rating::new(value).unwrap()
}

pub fn ballot(rating: Option<u8>, recommendation: Option<Recommendation>) -> Ballot {
    Ballot::new(rating.map(|r| Rating::new(r).unwrap()), recommendation).unwrap()
}

/// An engine wired to a fresh in-memory store, configuration seeded, clock under test control.
pub struct Fixture {
    pub store: memory::Store,
    pub post: PostId,
    pub configs: Configs,
    pub votes: Arc<Votes>,
    pub clock: Arc<FakeClock>,
}

impl Fixture {
    pub fn movie(&self, id: &str) -> &Movie {
        self.configs
            .movie(&cinerank::entities::MovieId::new(id).unwrap())
            .unwrap()
    }
}

pub async fn fixture() -> Fixture {
    let store = memory::Store::new();
    let post = post();
    store.set(&configs_key(&post), CONFIGS).await.unwrap();
    let configs = Configs::load(&store, &post).await.unwrap();
    let clock = Arc::new(FakeClock::new());
    let votes = Arc::new(Votes::with_clock(
        Arc::new(store.clone()),
        TTL,
        clock.clone(),
    ));
    Fixture {
        store,
        post,
        configs,
        votes,
        clock,
    }
}
