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

//! Cross-component tests for the vote engine, against the in-memory store.

use std::time::Duration;

use futures::future::join_all;

use cinerank::{
    entities::{RatingBucket, Recommendation},
    storage::Backend,
};

use cinerank_test::{ballot, fixture, user, TTL};

#[tokio::test]
async fn submit_applies_and_merges() {
    let fx = fixture().await;
    let movie = fx.movie("m1");

    let outcome = fx
        .votes
        .submit(
            &fx.post,
            movie,
            &user("t2_alice"),
            &ballot(Some(7), Some(Recommendation::Yes)),
        )
        .await
        .unwrap();
    assert!(outcome.applied());

    let aggregate = outcome.aggregate();
    // baseline seven=2 plus the new vote; baseline recommend_yes=3 plus one
    assert_eq!(aggregate.ratings[RatingBucket::Seven], 3);
    assert_eq!(aggregate.ratings[RatingBucket::Ten], 1);
    assert_eq!(aggregate.recommendations[Recommendation::Yes], 4);
    assert_eq!(aggregate.total_ratings(), 4);
    // (7×3 + 10×1) / 4
    assert_eq!(aggregate.average_rating(), 7.75);

    let vote = fx
        .votes
        .vote(&fx.post, &movie.id, &user("t2_alice"))
        .await
        .unwrap();
    assert_eq!(vote.rating.map(|r| r.value()), Some(7));
    assert_eq!(vote.recommendation, Some(Recommendation::Yes));
}

#[tokio::test]
async fn second_submit_is_a_noop() {
    let fx = fixture().await;
    let movie = fx.movie("m2");
    let alice = user("t2_alice");

    let first = fx
        .votes
        .submit(&fx.post, movie, &alice, &ballot(Some(9), None))
        .await
        .unwrap();
    assert!(first.applied());

    // a second submit -- even with a different rating -- has no additional effect
    let second = fx
        .votes
        .submit(&fx.post, movie, &alice, &ballot(Some(3), None))
        .await
        .unwrap();
    assert!(!second.applied());
    assert_eq!(first.aggregate(), second.aggregate());
    assert_eq!(second.aggregate().ratings[RatingBucket::Three], 0);
}

#[tokio::test]
async fn submit_is_gated_on_the_whole_record() {
    let fx = fixture().await;
    let movie = fx.movie("m2");
    let alice = user("t2_alice");

    fx.votes
        .submit(&fx.post, movie, &alice, &ballot(Some(9), None))
        .await
        .unwrap();
    // a rating-only record blocks a recommendation-only submit: one record per (movie, user)
    let outcome = fx
        .votes
        .submit(
            &fx.post,
            movie,
            &alice,
            &ballot(None, Some(Recommendation::Yes)),
        )
        .await
        .unwrap();
    assert!(!outcome.applied());
    assert_eq!(outcome.aggregate().recommendations[Recommendation::Yes], 0);
}

#[tokio::test]
async fn reset_on_unvoted_is_a_noop() {
    let fx = fixture().await;
    let movie = fx.movie("m1");

    let before = fx.votes.aggregate(&fx.post, movie).await.unwrap();
    let outcome = fx
        .votes
        .reset(&fx.post, movie, &user("t2_nobody"))
        .await
        .unwrap();
    assert!(!outcome.applied());
    assert_eq!(&before, outcome.aggregate());
}

#[tokio::test]
async fn submit_reset_submit_round_trips() {
    let once = fixture().await;
    let thrice = fixture().await;
    let alice = user("t2_alice");
    let b = || ballot(Some(7), Some(Recommendation::Conditional));

    once.votes
        .submit(&once.post, once.movie("m1"), &alice, &b())
        .await
        .unwrap();

    thrice
        .votes
        .submit(&thrice.post, thrice.movie("m1"), &alice, &b())
        .await
        .unwrap();
    thrice
        .votes
        .reset(&thrice.post, thrice.movie("m1"), &alice)
        .await
        .unwrap();
    thrice
        .votes
        .submit(&thrice.post, thrice.movie("m1"), &alice, &b())
        .await
        .unwrap();

    assert_eq!(
        once.votes.aggregate(&once.post, once.movie("m1")).await.unwrap(),
        thrice
            .votes
            .aggregate(&thrice.post, thrice.movie("m1"))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn reset_decrements_the_stored_bucket() {
    let fx = fixture().await;
    let movie = fx.movie("m1");
    let alice = user("t2_alice");

    fx.votes
        .submit(&fx.post, movie, &alice, &ballot(Some(7), None))
        .await
        .unwrap();
    // whatever the caller's UI thinks alice rated, reset undoes the *stored* seven
    let outcome = fx.votes.reset(&fx.post, movie, &alice).await.unwrap();
    assert!(outcome.applied());
    let aggregate = outcome.aggregate();
    assert_eq!(aggregate.ratings[RatingBucket::Seven], 2); // back to baseline
    assert_eq!(aggregate.ratings[RatingBucket::Ten], 1); // untouched

    let vote = fx.votes.vote(&fx.post, &movie.id, &alice).await.unwrap();
    assert!(vote.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submits_by_different_users_all_land() {
    let fx = fixture().await;
    let movie = fx.movie("m3");

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let votes = fx.votes.clone();
            let post = fx.post.clone();
            let movie = movie.clone();
            tokio::spawn(async move {
                let who = user(&format!("t2_user{i}"));
                let b = ballot(Some(7), None);
                // conflict is the caller's cue to retry; that's the documented contract
                loop {
                    match votes.submit(&post, &movie, &who, &b).await {
                        Ok(outcome) => return outcome.applied(),
                        Err(err) if err.is_conflict() => continue,
                        Err(err) => panic!("{err}"),
                    }
                }
            })
        })
        .collect();
    let applied = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .filter(|applied| *applied)
        .count();
    assert_eq!(applied, 8);

    let aggregate = fx.votes.aggregate(&fx.post, movie).await.unwrap();
    assert_eq!(aggregate.ratings[RatingBucket::Seven], 8);
    assert_eq!(aggregate.total_ratings(), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submits_by_one_user_count_once() {
    let fx = fixture().await;
    let movie = fx.movie("m3");

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let votes = fx.votes.clone();
            let post = fx.post.clone();
            let movie = movie.clone();
            tokio::spawn(async move {
                let alice = user("t2_alice");
                let b = ballot(Some(7), None);
                loop {
                    match votes.submit(&post, &movie, &alice, &b).await {
                        Ok(outcome) => return outcome.applied(),
                        Err(err) if err.is_conflict() => continue,
                        Err(err) => panic!("{err}"),
                    }
                }
            })
        })
        .collect();
    let applied = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .filter(|applied| *applied)
        .count();
    // exactly one submit applies; the racer resolves to a no-op (or retried its conflict into one)
    assert_eq!(applied, 1);

    let aggregate = fx.votes.aggregate(&fx.post, movie).await.unwrap();
    assert_eq!(aggregate.ratings[RatingBucket::Seven], 1);
}

#[tokio::test]
async fn a_reader_sees_a_submit_immediately() {
    let fx = fixture().await;
    let movie = fx.movie("m1");

    // prime the cache with the pre-write aggregate
    let before = fx.votes.aggregate(&fx.post, movie).await.unwrap();
    assert_eq!(before.ratings[RatingBucket::Seven], 2);

    fx.votes
        .submit(&fx.post, movie, &user("t2_alice"), &ballot(Some(7), None))
        .await
        .unwrap();

    // no clock advance: we're well inside the TTL window, & must still see the new count
    let after = fx.votes.aggregate(&fx.post, movie).await.unwrap();
    assert_eq!(after.ratings[RatingBucket::Seven], 3);
}

#[tokio::test]
async fn out_of_band_writes_surface_after_the_ttl() {
    let fx = fixture().await;
    let movie = fx.movie("m1");

    let before = fx.votes.aggregate(&fx.post, movie).await.unwrap();
    assert_eq!(before.ratings[RatingBucket::Ten], 1);

    // a write that bypasses the protocol invalidates nothing; within the TTL, readers of this
    // process see the cached aggregate (that's the documented trade)
    fx.store
        .hash_increment_by("t3_test|movie-m1|ratings", "ten", 5)
        .await
        .unwrap();
    let cached = fx.votes.aggregate(&fx.post, movie).await.unwrap();
    assert_eq!(cached.ratings[RatingBucket::Ten], 1);

    // ...& once the TTL lapses, the cache refills from the store
    fx.clock.advance(TTL + Duration::from_millis(1));
    let fresh = fx.votes.aggregate(&fx.post, movie).await.unwrap();
    assert_eq!(fresh.ratings[RatingBucket::Ten], 6);
}

#[tokio::test]
async fn corrupt_stored_values_are_fatal() {
    let fx = fixture().await;
    let movie = fx.movie("m1");
    let alice = user("t2_alice");

    fx.store
        .hash_set("t3_test|movie-m1|rating", alice.as_str(), "eleven")
        .await
        .unwrap();
    let err = fx
        .votes
        .vote(&fx.post, &movie.id, &alice)
        .await
        .unwrap_err();
    assert!(matches!(err, cinerank::votes::Error::Corrupt { .. }));

    // a corrupt histogram count is no better
    fx.store
        .hash_set("t3_test|movie-m1|ratings", "ten", "lots")
        .await
        .unwrap();
    let err = fx.votes.aggregate(&fx.post, movie).await.unwrap_err();
    assert!(matches!(err, cinerank::votes::Error::Corrupt { .. }));
}
