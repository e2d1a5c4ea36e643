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

//! The protocol suite again, this time against a live Redis.
//!
//! Gated on `CINERANK_TEST_REDIS` (a Redis URL, e.g. `redis://127.0.0.1/`); absent that, every
//! test here is a silent pass. Each run works in its own keyspace (a fresh post id), so suites
//! can share a Redis without tripping over one another.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use cinerank::{
    configs::{configs_key, Configs},
    entities::{PostId, RatingBucket, Recommendation},
    redis::Store,
    storage::Backend,
    votes::Votes,
};

use cinerank_test::{ballot, user, CONFIGS, TTL};

fn redis_url() -> Option<String> {
    let url = std::env::var("CINERANK_TEST_REDIS").ok();
    if url.is_none() {
        eprintln!("set CINERANK_TEST_REDIS to run the live-Redis suite");
    }
    url
}

fn unique_post() -> PostId {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis();
    PostId::new(&format!("t3_cinerank_test_{}_{millis}", std::process::id())).unwrap()
}

#[tokio::test]
async fn submit_reset_round_trip() {
    let Some(url) = redis_url() else { return };
    let store = Store::new(&url).await.unwrap();
    let post = unique_post();

    store.set(&configs_key(&post), CONFIGS).await.unwrap();
    let configs = Configs::load(&store, &post).await.unwrap();
    let movie = configs
        .movie(&cinerank::entities::MovieId::new("m1").unwrap())
        .unwrap();
    let votes = Votes::new(Arc::new(store.clone()), TTL);
    let alice = user("t2_alice");

    let outcome = votes
        .submit(&post, movie, &alice, &ballot(Some(7), Some(Recommendation::Yes)))
        .await
        .unwrap();
    assert!(outcome.applied());
    assert_eq!(outcome.aggregate().ratings[RatingBucket::Seven], 3);
    assert_eq!(
        outcome.aggregate().recommendations[Recommendation::Yes],
        4
    );

    let again = votes
        .submit(&post, movie, &alice, &ballot(Some(3), None))
        .await
        .unwrap();
    assert!(!again.applied());

    let reset = votes.reset(&post, movie, &alice).await.unwrap();
    assert!(reset.applied());
    assert_eq!(reset.aggregate().ratings[RatingBucket::Seven], 2);
    assert_eq!(reset.aggregate().recommendations[Recommendation::Yes], 3);

    let vote = votes.vote(&post, &movie.id, &alice).await.unwrap();
    assert!(vote.is_empty());
}

#[tokio::test]
async fn exec_conflicts_when_a_watched_key_changes() {
    let Some(url) = redis_url() else { return };
    let store = Store::new(&url).await.unwrap();
    let post = unique_post();
    let key = format!("{post}|movie-m1|ratings");

    let mut loser = store.watch(&[&key]).await.unwrap();
    let mut winner = store.watch(&[&key]).await.unwrap();

    winner.hash_increment_by(&key, "seven", 1);
    winner.exec().await.unwrap();

    loser.hash_increment_by(&key, "seven", 1);
    let err = loser.exec().await.unwrap_err();
    assert!(err.is_conflict());
    // the losing increment never applied
    assert_eq!(
        store.hash_get(&key, "seven").await.unwrap(),
        Some("1".to_owned())
    );
}
