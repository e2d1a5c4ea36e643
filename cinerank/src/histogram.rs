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

//! # histogram
//!
//! Per-movie aggregates: the configuration-shipped baseline tallies merged with the live
//! increments accumulated in the counter store.
//!
//! The merge is plain addition, so it's order-independent & idempotent -- reading twice without an
//! intervening write yields identical aggregates. A bucket with no live increments reports
//! exactly its baseline.

use enum_map::EnumMap;
use serde::Serialize;

use crate::entities::{Movie, MovieId, RatingBucket, Recommendation};

/// The merged (baseline + live) count vectors for one movie.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Aggregate {
    pub ratings: EnumMap<RatingBucket, u64>,
    pub recommendations: EnumMap<Recommendation, u64>,
}

impl Aggregate {
    /// Merge `movie`'s baselines with the live increment vectors read from the store.
    ///
    /// Live deltas can only dip a merged count below zero if someone mutated the store
    /// out-of-band; clamp rather than underflow.
    pub fn merge(
        movie: &Movie,
        live_ratings: &EnumMap<RatingBucket, i64>,
        live_recommendations: &EnumMap<Recommendation, i64>,
    ) -> Aggregate {
        let mut ratings = EnumMap::default();
        for (bucket, live) in live_ratings.iter() {
            ratings[bucket] = (movie.baseline_ratings[bucket] as i64 + *live).max(0) as u64;
        }
        let mut recommendations = EnumMap::default();
        for (bucket, live) in live_recommendations.iter() {
            recommendations[bucket] =
                (movie.baseline_recommendations[bucket] as i64 + *live).max(0) as u64;
        }
        Aggregate {
            ratings,
            recommendations,
        }
    }
    pub fn total_ratings(&self) -> u64 {
        self.ratings.values().sum()
    }
    pub fn total_recommendations(&self) -> u64 {
        self.recommendations.values().sum()
    }
    /// The mean rating: Σ(count × value) / Σcount, defined as 0.0 when no one's rated (the
    /// ranking engine depends on that -- a NaN would poison its sort).
    pub fn average_rating(&self) -> f64 {
        let total = self.total_ratings();
        if 0 == total {
            return 0.0;
        }
        let weighted: u64 = self
            .ratings
            .iter()
            .map(|(bucket, count)| count * bucket.value() as u64)
            .sum();
        weighted as f64 / total as f64
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                     the export boundary                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// One (movie, bucket) final count, ready for the external CSV collaborator.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ExportRow {
    pub movie: MovieId,
    pub title: String,
    pub bucket: &'static str,
    pub count: u64,
}

/// Flatten aggregates into tabular rows: one row per bucket, rating buckets first (ascending),
/// then the recommendation trio.
pub fn export_rows<'a>(
    entries: impl IntoIterator<Item = (&'a Movie, &'a Aggregate)>,
) -> Vec<ExportRow> {
    entries
        .into_iter()
        .flat_map(|(movie, aggregate)| {
            RatingBucket::ALL
                .into_iter()
                .map(|bucket| ExportRow {
                    movie: movie.id.clone(),
                    title: movie.title.clone(),
                    bucket: bucket.field(),
                    count: aggregate.ratings[bucket],
                })
                .chain(Recommendation::ALL.into_iter().map(|bucket| ExportRow {
                    movie: movie.id.clone(),
                    title: movie.title.clone(),
                    bucket: bucket.field(),
                    count: aggregate.recommendations[bucket],
                }))
                .collect::<Vec<ExportRow>>()
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn movie(json: &str) -> Movie {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn average() {
        // one vote of 5 & one vote of 9 average to 7.0
        let mut aggregate = Aggregate::default();
        aggregate.ratings[RatingBucket::Five] = 1;
        aggregate.ratings[RatingBucket::Nine] = 1;
        assert_eq!(aggregate.average_rating(), 7.0);

        assert_eq!(Aggregate::default().average_rating(), 0.0);
    }

    #[test]
    fn merge() {
        let movie = movie(r#"{"id": "m1", "title": "x", "seven": 2, "recommend_no": 1}"#);
        let mut live_ratings = EnumMap::default();
        live_ratings[RatingBucket::Seven] = 1;
        live_ratings[RatingBucket::Ten] = 3;
        let live_recommendations = EnumMap::default();

        let aggregate = Aggregate::merge(&movie, &live_ratings, &live_recommendations);
        assert_eq!(aggregate.ratings[RatingBucket::Seven], 3);
        assert_eq!(aggregate.ratings[RatingBucket::Ten], 3);
        // no live increments ⇒ exactly the baseline
        assert_eq!(aggregate.recommendations[Recommendation::No], 1);
        // idempotent: same inputs, same output
        assert_eq!(
            aggregate,
            Aggregate::merge(&movie, &live_ratings, &live_recommendations)
        );
    }

    #[test]
    fn merge_clamps_at_zero() {
        let movie = movie(r#"{"id": "m1", "title": "x", "one": 1}"#);
        let mut live_ratings = EnumMap::default();
        live_ratings[RatingBucket::One] = -2;
        let aggregate = Aggregate::merge(&movie, &live_ratings, &EnumMap::default());
        assert_eq!(aggregate.ratings[RatingBucket::One], 0);
    }

    #[test]
    fn rows() {
        let movie = movie(r#"{"id": "m1", "title": "x", "ten": 2}"#);
        let aggregate = Aggregate::merge(&movie, &EnumMap::default(), &EnumMap::default());
        let rows = export_rows([(&movie, &aggregate)]);
        assert_eq!(rows.len(), 13);
        assert_eq!(rows[9].bucket, "ten");
        assert_eq!(rows[9].count, 2);
        assert_eq!(rows[10].bucket, "recommend_yes");
    }
}
