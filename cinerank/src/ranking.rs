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

//! # ranking
//!
//! The leaderboard: a pure function from (aggregates, filter, search query) to an ordered view.
//!
//! [rank] takes the evaluation date as a parameter rather than consulting the wall clock; "this
//! year" is only meaningful relative to *some* "today", and making it explicit keeps the function
//! a function. The HTTP layer passes the actual date.

use chrono::{Datelike, NaiveDate, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use snafu::{prelude::*, Backtrace};

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use crate::{
    entities::{Movie, MovieId},
    histogram::{export_rows, Aggregate},
    http::{Cinerank, ErrorResponseBody},
    votes,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{month} is not a calendar month"))]
    BadMonth { month: u32, backtrace: Backtrace },
    #[snafu(display("A specific-month filter needs a month"))]
    MissingMonth { backtrace: Backtrace },
    #[snafu(display("A specific-year filter needs a year"))]
    MissingYear { backtrace: Backtrace },
    #[snafu(display("{text} is not a ranking filter"))]
    UnknownFilter { text: String, backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////

/// Which movies make the board, by release date. A pure value; no side effects.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Filter {
    AllTime,
    ThisYear,
    ThisMonth,
    SpecificYear { year: i32 },
    SpecificMonth { year: i32, month: u32 },
}

impl Filter {
    /// Assemble a [Filter] from its wire parts (the filter-type tag plus optional year/month
    /// discriminators).
    pub fn new(kind: &str, year: Option<i32>, month: Option<u32>) -> Result<Filter> {
        match kind {
            "all_time" => Ok(Filter::AllTime),
            "this_year" => Ok(Filter::ThisYear),
            "this_month" => Ok(Filter::ThisMonth),
            "specific_year" => Ok(Filter::SpecificYear {
                year: year.context(MissingYearSnafu)?,
            }),
            "specific_month" => {
                let month = month.context(MissingMonthSnafu)?;
                ensure!((1..=12).contains(&month), BadMonthSnafu { month });
                Ok(Filter::SpecificMonth {
                    year: year.context(MissingYearSnafu)?,
                    month,
                })
            }
            _ => UnknownFilterSnafu {
                text: kind.to_owned(),
            }
            .fail(),
        }
    }
    /// Does a movie released on `release` (if ever dated) make the cut, evaluated at `today`?
    ///
    /// A movie with no release date is excluded from everything but all-time.
    fn admits(&self, release: Option<NaiveDate>, today: NaiveDate) -> bool {
        let Some(release) = release else {
            return matches!(self, Filter::AllTime);
        };
        match self {
            Filter::AllTime => true,
            Filter::ThisYear => release.year() == today.year(),
            Filter::ThisMonth => {
                release.year() == today.year() && release.month() == today.month()
            }
            Filter::SpecificYear { year } => release.year() == *year,
            Filter::SpecificMonth { year, month } => {
                release.year() == *year && release.month() == *month
            }
        }
    }
}

/// One row of the board.
#[derive(Clone, Debug)]
pub struct Ranked {
    pub movie: Movie,
    pub average: f64,
    pub votes: u64,
}

/// Compute the board: date-filter, text-filter, then sort by average rating (descending), ties
/// broken by total vote count (descending).
///
/// The average of a zero-vote movie is 0.0 by [Aggregate::average_rating]'s definition, which
/// both keeps NaN out of the sort & pins unrated movies below anything with a vote.
pub fn rank(
    entries: impl IntoIterator<Item = (Movie, Aggregate)>,
    filter: &Filter,
    query: &str,
    today: NaiveDate,
) -> Vec<Ranked> {
    let query = query.to_lowercase();
    entries
        .into_iter()
        .filter(|(movie, _)| filter.admits(movie.release_date, today))
        .filter(|(movie, _)| {
            query.is_empty()
                || movie.title.to_lowercase().contains(&query)
                || movie
                    .original_title
                    .as_deref()
                    .map(|title| title.to_lowercase().contains(&query))
                    .unwrap_or(false)
        })
        .map(|(movie, aggregate)| Ranked {
            average: aggregate.average_rating(),
            votes: aggregate.total_ratings(),
            movie,
        })
        .sorted_by(|a, b| {
            b.average
                .total_cmp(&a.average)
                .then(b.votes.cmp(&a.votes))
        })
        .collect()
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                     the leaderboard API                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

fn default_kind() -> String {
    "all_time".to_owned()
}

#[derive(Debug, Deserialize)]
struct RankingsQuery {
    #[serde(default = "default_kind", rename = "type")]
    kind: String,
    year: Option<i32>,
    month: Option<u32>,
    #[serde(default)]
    q: String,
}

#[derive(Debug, Serialize)]
struct RankedRsp {
    id: MovieId,
    title: String,
    original_title: Option<String>,
    release_date: Option<NaiveDate>,
    image: Option<String>,
    average: f64,
    votes: u64,
}

/// Walk the configured movies, fetching each one's aggregate (through the cache; a board render
/// is a burst of reads & this is exactly what the cache is for).
async fn aggregates(state: &Cinerank) -> votes::Result<Vec<(Movie, Aggregate)>> {
    let mut entries = Vec::with_capacity(state.configs.movies.len());
    for movie in &state.configs.movies {
        let aggregate = state.votes.aggregate(&state.post, movie).await?;
        entries.push((movie.clone(), aggregate));
    }
    Ok(entries)
}

async fn rankings(
    State(state): State<Arc<Cinerank>>,
    Query(query): Query<RankingsQuery>,
) -> axum::response::Response {
    let filter = match Filter::new(&query.kind, query.year, query.month) {
        Ok(filter) => filter,
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
    let entries = match aggregates(&state).await {
        Ok(entries) => entries,
        Err(err) => return votes::into_error_response(err),
    };
    let board = rank(entries, &filter, &query.q, Utc::now().date_naive())
        .into_iter()
        .map(|ranked| RankedRsp {
            image: ranked
                .movie
                .image_url(&state.configs.refs)
                .map(str::to_owned),
            id: ranked.movie.id,
            title: ranked.movie.title,
            original_title: ranked.movie.original_title,
            release_date: ranked.movie.release_date,
            average: ranked.average,
            votes: ranked.votes,
        })
        .collect::<Vec<RankedRsp>>();
    Json(board).into_response()
}

async fn export(State(state): State<Arc<Cinerank>>) -> axum::response::Response {
    let entries = match aggregates(&state).await {
        Ok(entries) => entries,
        Err(err) => return votes::into_error_response(err),
    };
    Json(export_rows(
        entries.iter().map(|(movie, aggregate)| (movie, aggregate)),
    ))
    .into_response()
}

/// The leaderboard & export API. The returned [Router] will presumably be merged with others.
pub fn make_router(state: Arc<Cinerank>) -> Router {
    Router::new()
        .route("/rankings", get(rankings))
        .route("/export", get(export))
        .with_state(state)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entities::RatingBucket;
    use enum_map::EnumMap;

    fn movie(json: &str) -> Movie {
        serde_json::from_str(json).unwrap()
    }

    fn with_votes(movie: Movie, counts: &[(RatingBucket, u64)]) -> (Movie, Aggregate) {
        let mut aggregate = Aggregate::default();
        for (bucket, count) in counts {
            aggregate.ratings[*bucket] = *count;
        }
        (movie, aggregate)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    #[test]
    fn date_filters() {
        let dated = movie(r#"{"id": "m1", "title": "x", "release_date": "2024-03-10"}"#);
        let undated = movie(r#"{"id": "m2", "title": "y"}"#);
        let entries = || {
            vec![
                (dated.clone(), Aggregate::default()),
                (undated.clone(), Aggregate::default()),
            ]
        };

        let march = Filter::new("specific_month", Some(2024), Some(3)).unwrap();
        let board = rank(entries(), &march, "", today());
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].movie.id, dated.id);

        let april = Filter::new("specific_month", Some(2024), Some(4)).unwrap();
        assert!(rank(entries(), &april, "", today()).is_empty());

        // the undated movie is excluded from every non-all-time filter...
        for filter in [
            Filter::ThisYear,
            Filter::ThisMonth,
            Filter::SpecificYear { year: 2024 },
        ] {
            assert!(rank(entries(), &filter, "", today())
                .iter()
                .all(|r| r.movie.id != undated.id));
        }
        // ...and included in all-time
        assert_eq!(rank(entries(), &Filter::AllTime, "", today()).len(), 2);
    }

    #[test]
    fn filter_parsing() {
        assert_eq!(Filter::new("all_time", None, None).unwrap(), Filter::AllTime);
        assert!(Filter::new("specific_year", None, None).is_err());
        assert!(Filter::new("specific_month", Some(2024), Some(13)).is_err());
        assert!(Filter::new("best_boy", None, None).is_err());
    }

    #[test]
    fn text_filter() {
        let entries = vec![
            (
                movie(r#"{"id": "m1", "title": "Manichitrathazhu"}"#),
                Aggregate::default(),
            ),
            (
                movie(r#"{"id": "m2", "title": "Kireedam", "original_title": "കിരീടം"}"#),
                Aggregate::default(),
            ),
        ];
        let board = rank(entries.clone(), &Filter::AllTime, "MANICHI", today());
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].movie.id.as_str(), "m1");
        // original titles match too
        let board = rank(entries, &Filter::AllTime, "കിരീടം", today());
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].movie.id.as_str(), "m2");
    }

    #[test]
    fn ordering() {
        let entries = vec![
            with_votes(
                movie(r#"{"id": "low", "title": "a"}"#),
                &[(RatingBucket::Four, 2)],
            ),
            with_votes(
                movie(r#"{"id": "high", "title": "b"}"#),
                &[(RatingBucket::Nine, 1)],
            ),
            // same 8.0 average as "popular", fewer votes
            with_votes(
                movie(r#"{"id": "niche", "title": "c"}"#),
                &[(RatingBucket::Eight, 1)],
            ),
            with_votes(
                movie(r#"{"id": "popular", "title": "d"}"#),
                &[(RatingBucket::Eight, 10)],
            ),
            (movie(r#"{"id": "unrated", "title": "e"}"#), Aggregate::default()),
        ];
        let board = rank(entries.clone(), &Filter::AllTime, "", today());
        let order: Vec<&str> = board.iter().map(|r| r.movie.id.as_str()).collect();
        assert_eq!(order, vec!["high", "popular", "niche", "low", "unrated"]);

        // pure: same inputs, same output
        let board = rank(entries, &Filter::AllTime, "", today());
        let again: Vec<&str> = board.iter().map(|r| r.movie.id.as_str()).collect();
        assert_eq!(order, again);
    }

    #[test]
    fn zero_votes_dont_nan() {
        let (movie, aggregate) = (
            movie(r#"{"id": "m1", "title": "x"}"#),
            Aggregate::default(),
        );
        let board = rank(vec![(movie, aggregate)], &Filter::AllTime, "", today());
        assert_eq!(board[0].average, 0.0);
    }

    #[test]
    fn empty_aggregates_use_enum_map_default() {
        // a merge over empty live vectors is exactly the baseline
        let movie = movie(r#"{"id": "m1", "title": "x", "nine": 2}"#);
        let aggregate = Aggregate::merge(&movie, &EnumMap::default(), &EnumMap::default());
        assert_eq!(aggregate.ratings[RatingBucket::Nine], 2);
    }
}
