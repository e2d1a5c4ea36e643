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

//! # votes
//!
//! The heart of cinerank: the per-(movie, user) vote registry and the submit/reset protocol that
//! moves a user between Unvoted & Voted.
//!
//! A submit is one optimistic transaction: watch the keys being touched, re-read the user's record
//! *inside* the watch scope (this is the at-most-one-vote gate -- checking any earlier would leave
//! a double-count window), queue the record write + histogram increments, exec. A reset is the
//! mirror image, with one extra rule: the decremented buckets derive from the *stored* record,
//! never from anything the caller supplies, so client-side drift can't corrupt a histogram.
//!
//! A failed exec surfaces as [Error::Conflict]. The engine never retries internally; whether to
//! retry, how many times & with what backoff is the integrating layer's policy call, and hiding a
//! loop down here would just make that call for them.
//!
//! Key layout, for post `P` & movie `E`:
//!
//! ```text
//! P|movie-E|rating            hash: user id -> rating value
//! P|movie-E|ratings           hash: bucket field -> live increment
//! P|movie-E|recommendation    hash: user id -> choice
//! P|movie-E|recommendations   hash: bucket field -> live increment
//! ```

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use enum_map::EnumMap;
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use snafu::{prelude::*, Backtrace};
use tracing::{debug, error};

use crate::{
    cache::{Cache, Clock, SystemClock},
    entities::{
        Ballot, Movie, MovieId, PostId, Rating, RatingBucket, Recommendation, UserId, Vote,
    },
    histogram::Aggregate,
    http::{Cinerank, ErrorResponseBody},
    metrics::Instruments,
    storage,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("The vote transaction was discarded by a concurrent writer; safe to retry"))]
    Conflict { backtrace: Backtrace },
    #[snafu(display("{key}/{field} holds {value}, which is outside the known bucket set"))]
    Corrupt {
        key: String,
        field: String,
        value: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Counter store error: {source}"))]
    Store { source: storage::Error },
}

impl Error {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          key layout                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

struct Keys {
    rating: String,
    ratings: String,
    recommendation: String,
    recommendations: String,
}

impl Keys {
    fn new(post: &PostId, movie: &MovieId) -> Keys {
        let prefix = format!("{post}|movie-{movie}");
        Keys {
            rating: format!("{prefix}|rating"),
            ratings: format!("{prefix}|ratings"),
            recommendation: format!("{prefix}|recommendation"),
            recommendations: format!("{prefix}|recommendations"),
        }
    }
    /// Cache key for one user's record. The record spans both per-user hashes, so it's cached
    /// as a unit under the user's own key.
    fn vote(&self, user: &UserId) -> String {
        format!("{}|{user}", self.rating)
    }
}

// Stored values outside the bucket set mean something upstream corrupted the store; per the
// engine's contract that's fatal-and-logged, never papered over.

fn parse_rating(key: &str, field: &str, text: &str) -> Result<Rating> {
    text.parse::<Rating>().ok().or_else(|| {
        error!("{key}/{field} holds {text:?}, which is not a rating; data corruption upstream?");
        None
    })
    .context(CorruptSnafu {
        key,
        field,
        value: text,
    })
}

fn parse_recommendation(key: &str, field: &str, text: &str) -> Result<Recommendation> {
    text.parse::<Recommendation>().ok().or_else(|| {
        error!(
            "{key}/{field} holds {text:?}, which is not a recommendation; data corruption upstream?"
        );
        None
    })
    .context(CorruptSnafu {
        key,
        field,
        value: text,
    })
}

fn parse_count(key: &str, field: &str, text: &str) -> Result<i64> {
    text.parse::<i64>().ok().or_else(|| {
        error!("{key}/{field} holds {text:?}, which is not a count; data corruption upstream?");
        None
    })
    .context(CorruptSnafu {
        key,
        field,
        value: text,
    })
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         the service                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The result of a submit. `AlreadyVoted` is an intentional non-error: repeated submits after the
/// first have no additional effect & report the current aggregate.
#[derive(Clone, Debug)]
pub enum Submit {
    Applied(Aggregate),
    AlreadyVoted(Aggregate),
}

impl Submit {
    pub fn applied(&self) -> bool {
        matches!(self, Submit::Applied(_))
    }
    pub fn aggregate(&self) -> &Aggregate {
        match self {
            Submit::Applied(aggregate) | Submit::AlreadyVoted(aggregate) => aggregate,
        }
    }
}

/// The result of a reset; same shape as [Submit].
#[derive(Clone, Debug)]
pub enum Reset {
    Applied(Aggregate),
    NothingToReset(Aggregate),
}

impl Reset {
    pub fn applied(&self) -> bool {
        matches!(self, Reset::Applied(_))
    }
    pub fn aggregate(&self) -> &Aggregate {
        match self {
            Reset::Applied(aggregate) | Reset::NothingToReset(aggregate) => aggregate,
        }
    }
}

/// The vote registry & submit/reset protocol, over any [storage::Backend].
pub struct Votes {
    storage: Arc<dyn storage::Backend + Send + Sync>,
    votes: Cache<Vote>,
    ratings: Cache<EnumMap<RatingBucket, i64>>,
    recommendations: Cache<EnumMap<Recommendation, i64>>,
    instruments: Instruments,
}

impl Votes {
    pub fn new(storage: Arc<dyn storage::Backend + Send + Sync>, ttl: Duration) -> Votes {
        Votes::with_clock(storage, ttl, Arc::new(SystemClock))
    }
    /// As [new], with the cache clock injected (the test suites drive expiry by hand).
    ///
    /// [new]: Votes::new
    pub fn with_clock(
        storage: Arc<dyn storage::Backend + Send + Sync>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Votes {
        Votes {
            storage,
            votes: Cache::new(ttl, clock.clone()),
            ratings: Cache::new(ttl, clock.clone()),
            recommendations: Cache::new(ttl, clock),
            instruments: Instruments::default(),
        }
    }

    /// Fetch `user`'s current record for `movie` (empty [Vote] ⇒ Unvoted). Read-through-cached.
    pub async fn vote(&self, post: &PostId, movie: &MovieId, user: &UserId) -> Result<Vote> {
        let keys = Keys::new(post, movie);
        let cache_key = keys.vote(user);
        if let Some(vote) = self.votes.get(&cache_key) {
            self.instruments.cache_hits.add(1, &[]);
            return Ok(vote);
        }
        self.instruments.cache_misses.add(1, &[]);
        let rating = self
            .storage
            .hash_get(&keys.rating, user.as_str())
            .await
            .context(StoreSnafu)?
            .map(|text| parse_rating(&keys.rating, user.as_str(), &text))
            .transpose()?;
        let recommendation = self
            .storage
            .hash_get(&keys.recommendation, user.as_str())
            .await
            .context(StoreSnafu)?
            .map(|text| parse_recommendation(&keys.recommendation, user.as_str(), &text))
            .transpose()?;
        let vote = Vote {
            rating,
            recommendation,
        };
        self.votes.put(&cache_key, vote);
        Ok(vote)
    }

    /// The current aggregate for `movie`: baseline + live increments, read through the cache.
    pub async fn aggregate(&self, post: &PostId, movie: &Movie) -> Result<Aggregate> {
        let keys = Keys::new(post, &movie.id);
        self.aggregate1(&keys, movie).await
    }

    async fn aggregate1(&self, keys: &Keys, movie: &Movie) -> Result<Aggregate> {
        let live_ratings = self.live_ratings(keys).await?;
        let live_recommendations = self.live_recommendations(keys).await?;
        Ok(Aggregate::merge(
            movie,
            &live_ratings,
            &live_recommendations,
        ))
    }

    async fn live_ratings(&self, keys: &Keys) -> Result<EnumMap<RatingBucket, i64>> {
        if let Some(map) = self.ratings.get(&keys.ratings) {
            self.instruments.cache_hits.add(1, &[]);
            return Ok(map);
        }
        self.instruments.cache_misses.add(1, &[]);
        let fields: Vec<&str> = RatingBucket::ALL.iter().map(|b| b.field()).collect();
        let values = self
            .storage
            .hash_multi_get(&keys.ratings, &fields)
            .await
            .context(StoreSnafu)?;
        let mut map = EnumMap::default();
        for (bucket, value) in RatingBucket::ALL.into_iter().zip(values) {
            if let Some(text) = value {
                map[bucket] = parse_count(&keys.ratings, bucket.field(), &text)?;
            }
        }
        self.ratings.put(&keys.ratings, map.clone());
        Ok(map)
    }

    async fn live_recommendations(&self, keys: &Keys) -> Result<EnumMap<Recommendation, i64>> {
        if let Some(map) = self.recommendations.get(&keys.recommendations) {
            self.instruments.cache_hits.add(1, &[]);
            return Ok(map);
        }
        self.instruments.cache_misses.add(1, &[]);
        let fields: Vec<&str> = Recommendation::ALL.iter().map(|r| r.field()).collect();
        let values = self
            .storage
            .hash_multi_get(&keys.recommendations, &fields)
            .await
            .context(StoreSnafu)?;
        let mut map = EnumMap::default();
        for (bucket, value) in Recommendation::ALL.into_iter().zip(values) {
            if let Some(text) = value {
                map[bucket] = parse_count(&keys.recommendations, bucket.field(), &text)?;
            }
        }
        self.recommendations.put(&keys.recommendations, map.clone());
        Ok(map)
    }

    /// Cast `user`'s vote on `movie`: Unvoted → Voted.
    ///
    /// No-ops (without touching a single counter) if the user already has a record. On success
    /// the written keys' cache entries are invalidated before control returns, so an immediate
    /// re-read reflects the post-write aggregate even inside the TTL window.
    pub async fn submit(
        &self,
        post: &PostId,
        movie: &Movie,
        user: &UserId,
        ballot: &Ballot,
    ) -> Result<Submit> {
        let keys = Keys::new(post, &movie.id);
        let mut watched: Vec<&str> = Vec::with_capacity(4);
        if ballot.rating().is_some() {
            watched.push(&keys.rating);
            watched.push(&keys.ratings);
        }
        if ballot.recommendation().is_some() {
            watched.push(&keys.recommendation);
            watched.push(&keys.recommendations);
        }
        let mut txn = self.storage.watch(&watched).await.context(StoreSnafu)?;
        // The gate: re-read inside the watch scope. Anything earlier (the UI's idea of the
        // user's state, a cached record) could have gone stale.
        let rating = txn
            .hash_get(&keys.rating, user.as_str())
            .await
            .context(StoreSnafu)?;
        let recommendation = txn
            .hash_get(&keys.recommendation, user.as_str())
            .await
            .context(StoreSnafu)?;
        if rating.is_some() || recommendation.is_some() {
            txn.abort().await;
            self.instruments
                .noops
                .add(1, &[KeyValue::new("op", "submit")]);
            debug!("{user} has already voted on {}; not double counting", movie.id);
            return Ok(Submit::AlreadyVoted(self.aggregate1(&keys, movie).await?));
        }
        if let Some(rating) = ballot.rating() {
            txn.hash_set(&keys.rating, user.as_str(), &rating.to_string());
            txn.hash_increment_by(&keys.ratings, RatingBucket::from(rating).field(), 1);
        }
        if let Some(choice) = ballot.recommendation() {
            txn.hash_set(&keys.recommendation, user.as_str(), &choice.to_string());
            txn.hash_increment_by(&keys.recommendations, choice.field(), 1);
        }
        self.finish(txn, &keys, user, ballot.rating().is_some(), ballot.recommendation().is_some())
            .await?;
        self.instruments.submits.add(1, &[]);
        Ok(Submit::Applied(self.aggregate1(&keys, movie).await?))
    }

    /// Withdraw `user`'s vote on `movie`: Voted → Unvoted. No-ops if there's nothing to reset.
    pub async fn reset(&self, post: &PostId, movie: &Movie, user: &UserId) -> Result<Reset> {
        let keys = Keys::new(post, &movie.id);
        // Watch all four keys up-front: which buckets get decremented depends on the record
        // we're about to read, & the record must not change shape underneath us.
        let watched = [
            keys.rating.as_str(),
            keys.ratings.as_str(),
            keys.recommendation.as_str(),
            keys.recommendations.as_str(),
        ];
        let mut txn = self.storage.watch(&watched).await.context(StoreSnafu)?;
        let rating = txn
            .hash_get(&keys.rating, user.as_str())
            .await
            .context(StoreSnafu)?;
        let recommendation = txn
            .hash_get(&keys.recommendation, user.as_str())
            .await
            .context(StoreSnafu)?;
        if rating.is_none() && recommendation.is_none() {
            txn.abort().await;
            self.instruments
                .noops
                .add(1, &[KeyValue::new("op", "reset")]);
            debug!("{user} has no vote on {} to reset", movie.id);
            return Ok(Reset::NothingToReset(self.aggregate1(&keys, movie).await?));
        }
        let had_rating = rating.is_some();
        let had_recommendation = recommendation.is_some();
        if let Some(text) = rating {
            let stored = parse_rating(&keys.rating, user.as_str(), &text)?;
            txn.hash_delete(&keys.rating, &[user.as_str()]);
            txn.hash_increment_by(&keys.ratings, RatingBucket::from(stored).field(), -1);
        }
        if let Some(text) = recommendation {
            let stored = parse_recommendation(&keys.recommendation, user.as_str(), &text)?;
            txn.hash_delete(&keys.recommendation, &[user.as_str()]);
            txn.hash_increment_by(&keys.recommendations, stored.field(), -1);
        }
        self.finish(txn, &keys, user, had_rating, had_recommendation)
            .await?;
        self.instruments.resets.add(1, &[]);
        Ok(Reset::Applied(self.aggregate1(&keys, movie).await?))
    }

    /// Exec the transaction, then invalidate the written keys' cache entries -- in that order, in
    /// the same logical step, before any reader gets control back.
    async fn finish(
        &self,
        txn: Box<dyn storage::Transaction>,
        keys: &Keys,
        user: &UserId,
        wrote_ratings: bool,
        wrote_recommendations: bool,
    ) -> Result<()> {
        match txn.exec().await {
            Ok(()) => {}
            Err(err) if err.is_conflict() => {
                self.instruments.conflicts.add(1, &[]);
                return ConflictSnafu.fail();
            }
            Err(err) => return Err(Error::Store { source: err }),
        }
        self.votes.invalidate(&keys.vote(user));
        if wrote_ratings {
            self.ratings.invalidate(&keys.ratings);
        }
        if wrote_recommendations {
            self.recommendations.invalidate(&keys.recommendations);
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          the vote API                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Serialize)]
pub struct BucketCount {
    pub bucket: &'static str,
    pub count: u64,
}

/// The aggregate as it goes over the wire: ordered bucket arrays, plus the derived figures every
/// caller wants anyway.
#[derive(Debug, Serialize)]
pub struct AggregateRsp {
    pub ratings: Vec<BucketCount>,
    pub recommendations: Vec<BucketCount>,
    pub average: f64,
    pub total_ratings: u64,
    pub total_recommendations: u64,
}

impl From<&Aggregate> for AggregateRsp {
    fn from(aggregate: &Aggregate) -> Self {
        AggregateRsp {
            ratings: RatingBucket::ALL
                .into_iter()
                .map(|bucket| BucketCount {
                    bucket: bucket.field(),
                    count: aggregate.ratings[bucket],
                })
                .collect(),
            recommendations: Recommendation::ALL
                .into_iter()
                .map(|bucket| BucketCount {
                    bucket: bucket.field(),
                    count: aggregate.recommendations[bucket],
                })
                .collect(),
            average: aggregate.average_rating(),
            total_ratings: aggregate.total_ratings(),
            total_recommendations: aggregate.total_recommendations(),
        }
    }
}

pub(crate) fn into_error_response(err: Error) -> axum::response::Response {
    let status = match &err {
        Error::Conflict { .. } => StatusCode::CONFLICT,
        Error::Corrupt { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        Error::Store { .. } => StatusCode::BAD_GATEWAY,
    };
    (
        status,
        ErrorResponseBody {
            error: format!("{err}"),
        },
    )
        .into_response()
}

fn no_such_movie(id: &MovieId) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        ErrorResponseBody {
            error: format!("No movie {id}"),
        },
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct VoteQuery {
    user: UserId,
}

#[derive(Debug, Serialize)]
struct VoteRsp {
    rating: Option<u8>,
    recommendation: Option<Recommendation>,
}

async fn vote(
    State(state): State<Arc<Cinerank>>,
    Path(id): Path<MovieId>,
    Query(query): Query<VoteQuery>,
) -> axum::response::Response {
    if state.configs.movie(&id).is_none() {
        return no_such_movie(&id);
    }
    match state.votes.vote(&state.post, &id, &query.user).await {
        Ok(vote) => Json(VoteRsp {
            rating: vote.rating.map(|r| r.value()),
            recommendation: vote.recommendation,
        })
        .into_response(),
        Err(err) => into_error_response(err),
    }
}

async fn aggregate(
    State(state): State<Arc<Cinerank>>,
    Path(id): Path<MovieId>,
) -> axum::response::Response {
    let Some(movie) = state.configs.movie(&id) else {
        return no_such_movie(&id);
    };
    match state.votes.aggregate(&state.post, movie).await {
        Ok(aggregate) => Json(AggregateRsp::from(&aggregate)).into_response(),
        Err(err) => into_error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct SubmitReq {
    user: UserId,
    rating: Option<Rating>,
    recommendation: Option<Recommendation>,
}

#[derive(Debug, Serialize)]
struct SubmitRsp {
    applied: bool,
    aggregate: AggregateRsp,
}

async fn submit(
    State(state): State<Arc<Cinerank>>,
    Path(id): Path<MovieId>,
    Json(req): Json<SubmitReq>,
) -> axum::response::Response {
    let Some(movie) = state.configs.movie(&id) else {
        return no_such_movie(&id);
    };
    let ballot = match Ballot::new(req.rating, req.recommendation) {
        Ok(ballot) => ballot,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                ErrorResponseBody {
                    error: format!("{err}"),
                },
            )
                .into_response();
        }
    };
    match state.votes.submit(&state.post, movie, &req.user, &ballot).await {
        Ok(outcome) => Json(SubmitRsp {
            applied: outcome.applied(),
            aggregate: AggregateRsp::from(outcome.aggregate()),
        })
        .into_response(),
        Err(err) => into_error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct ResetReq {
    user: UserId,
}

async fn reset(
    State(state): State<Arc<Cinerank>>,
    Path(id): Path<MovieId>,
    Json(req): Json<ResetReq>,
) -> axum::response::Response {
    let Some(movie) = state.configs.movie(&id) else {
        return no_such_movie(&id);
    };
    match state.votes.reset(&state.post, movie, &req.user).await {
        Ok(outcome) => Json(SubmitRsp {
            applied: outcome.applied(),
            aggregate: AggregateRsp::from(outcome.aggregate()),
        })
        .into_response(),
        Err(err) => into_error_response(err),
    }
}

/// The vote API. The returned [Router] will presumably be merged with others.
pub fn make_router(state: Arc<Cinerank>) -> Router {
    Router::new()
        .route("/movies/{id}/vote", get(vote).post(submit))
        .route("/movies/{id}/reset", post(reset))
        .route("/movies/{id}/aggregate", get(aggregate))
        .with_state(state)
}
