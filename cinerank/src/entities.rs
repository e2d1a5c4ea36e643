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

//! # cinerank models
//!
//! I hate these sort of "catch-all" modules named "models" or "entities", but these types are truly
//! foundational: the ids that make up the counter-store key space, the rating & recommendation
//! buckets, and the movie as it arrives from configuration.

use std::{collections::HashMap, fmt::Display, str::FromStr};

use chrono::NaiveDate;
use enum_map::{Enum, EnumMap};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use snafu::{prelude::*, Backtrace};
use tap::Pipe;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("A ballot must carry a rating, a recommendation, or both"))]
    EmptyBallot { backtrace: Backtrace },
    #[snafu(display("{text} is not a valid {what}"))]
    BadId {
        what: &'static str,
        text: String,
        backtrace: Backtrace,
    },
    #[snafu(display("{value} is not a rating between 1 and 10"))]
    BadRating { value: u64, backtrace: Backtrace },
    #[snafu(display("{text} doesn't parse as a rating: {source}"))]
    BadRatingParse {
        text: String,
        source: std::num::ParseIntError,
        backtrace: Backtrace,
    },
    #[snafu(display("{text} is not a recommendation (yes/conditional/no)"))]
    BadRecommendation { text: String, backtrace: Backtrace },
    #[snafu(display("A movie must have a non-empty title"))]
    EmptyTitle { backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Identifiers                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

// Posts, users & movies are all identified by opaque strings handed to us by the hosting platform
// (things like "t3_abc123"). We refine them only as far as the key layout requires: ids are
// embedded in '|'-separated counter-store keys, so the separator (and whitespace, and the empty
// string) are banned.

const MAX_ID_LENGTH: usize = 128;

lazy_static! {
    static ref ID: Regex = Regex::new(r"^[^|\s]+$").unwrap(/* known good */);
}

fn check_id(s: &str) -> bool {
    !s.is_empty() && s.len() <= MAX_ID_LENGTH && ID.is_match(s)
}

/// Declare a newtype struct refining [String] into an identifier that is safe to embed in the
/// '|'-separated counter-store key space.
///
/// The one time an id with a pipe in it reaches the store, two entities start sharing counters.
/// Each generated type gets a validating constructor, [Display], [FromStr] and serde support
/// (deserialization validates via [TryFrom]).
macro_rules! define_id {
    ($type_name:ident, $what:expr) => {
        #[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
        #[serde(try_from = "String")]
        pub struct $type_name(String);

        impl $type_name {
            pub fn new(s: &str) -> Result<$type_name> {
                check_id(s).then(|| $type_name(s.to_owned())).context(BadIdSnafu {
                    what: $what,
                    text: s.to_owned(),
                })
            }
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $type_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $type_name {
            type Err = Error;
            fn from_str(s: &str) -> Result<$type_name> {
                $type_name::new(s)
            }
        }

        impl TryFrom<String> for $type_name {
            type Error = Error;
            fn try_from(value: String) -> Result<$type_name> {
                ensure!(
                    check_id(&value),
                    BadIdSnafu {
                        what: $what,
                        text: value,
                    }
                );
                value.pipe($type_name).pipe(Ok)
            }
        }
    };
}

define_id!(PostId, "post id");
define_id!(UserId, "user id");
define_id!(MovieId, "movie id");

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                     ratings & their buckets                                    //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A single user's rating of a movie: an integer from one to ten.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(try_from = "u64")]
pub struct Rating(u8);

impl Rating {
    pub fn new(value: u8) -> Result<Rating> {
        (1..=10)
            .contains(&value)
            .then_some(Rating(value))
            .context(BadRatingSnafu {
                value: value as u64,
            })
    }
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Display for Rating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Rating {
    type Err = Error;
    /// Parse a rating off the wire; this is how stored hash values come back to us.
    fn from_str(s: &str) -> Result<Rating> {
        s.parse::<u8>()
            .context(BadRatingParseSnafu { text: s.to_owned() })
            .and_then(Rating::new)
    }
}

impl TryFrom<u64> for Rating {
    type Error = Error;
    fn try_from(value: u64) -> Result<Rating> {
        u8::try_from(value)
            .ok()
            .context(BadRatingSnafu { value })
            .and_then(Rating::new)
    }
}

/// One discrete rating value, as named in the counter store.
///
/// The store keys histogram fields by *name* ("one" through "ten"), and an earlier rendition of
/// this program recovered the name from an array index -- rearrange the array and every vote lands
/// in the wrong bucket. Here each bucket carries its own value & field name.
#[derive(Clone, Copy, Debug, Enum, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum RatingBucket {
    One,
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Ten,
}

impl RatingBucket {
    /// All buckets, in ascending rating order.
    pub const ALL: [RatingBucket; 10] = [
        RatingBucket::One,
        RatingBucket::Two,
        RatingBucket::Three,
        RatingBucket::Four,
        RatingBucket::Five,
        RatingBucket::Six,
        RatingBucket::Seven,
        RatingBucket::Eight,
        RatingBucket::Nine,
        RatingBucket::Ten,
    ];
    /// The rating value this bucket counts.
    pub fn value(&self) -> u8 {
        match self {
            RatingBucket::One => 1,
            RatingBucket::Two => 2,
            RatingBucket::Three => 3,
            RatingBucket::Four => 4,
            RatingBucket::Five => 5,
            RatingBucket::Six => 6,
            RatingBucket::Seven => 7,
            RatingBucket::Eight => 8,
            RatingBucket::Nine => 9,
            RatingBucket::Ten => 10,
        }
    }
    /// The field name under which this bucket's count lives in the store.
    pub fn field(&self) -> &'static str {
        match self {
            RatingBucket::One => "one",
            RatingBucket::Two => "two",
            RatingBucket::Three => "three",
            RatingBucket::Four => "four",
            RatingBucket::Five => "five",
            RatingBucket::Six => "six",
            RatingBucket::Seven => "seven",
            RatingBucket::Eight => "eight",
            RatingBucket::Nine => "nine",
            RatingBucket::Ten => "ten",
        }
    }
    pub fn from_field(field: &str) -> Option<RatingBucket> {
        RatingBucket::ALL.into_iter().find(|b| b.field() == field)
    }
}

impl From<Rating> for RatingBucket {
    fn from(value: Rating) -> Self {
        RatingBucket::ALL[(value.value() - 1) as usize]
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        recommendations                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A user's recommendation choice. Doubles as its own histogram bucket.
#[derive(Clone, Copy, Debug, Enum, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Recommendation {
    Yes,
    Conditional,
    No,
}

impl Recommendation {
    pub const ALL: [Recommendation; 3] = [
        Recommendation::Yes,
        Recommendation::Conditional,
        Recommendation::No,
    ];
    /// The field name under which this bucket's count lives in the store.
    pub fn field(&self) -> &'static str {
        match self {
            Recommendation::Yes => "recommend_yes",
            Recommendation::Conditional => "recommend_conditional",
            Recommendation::No => "recommend_no",
        }
    }
    pub fn from_field(field: &str) -> Option<Recommendation> {
        Recommendation::ALL.into_iter().find(|r| r.field() == field)
    }
}

impl Display for Recommendation {
    /// The wire value stored against the user's id (distinct from the bucket [field]).
    ///
    /// [field]: Recommendation::field
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Recommendation::Yes => "yes",
                Recommendation::Conditional => "conditional",
                Recommendation::No => "no",
            }
        )
    }
}

impl FromStr for Recommendation {
    type Err = Error;
    fn from_str(s: &str) -> Result<Recommendation> {
        match s {
            "yes" => Ok(Recommendation::Yes),
            "conditional" => Ok(Recommendation::Conditional),
            "no" => Ok(Recommendation::No),
            _ => BadRecommendationSnafu { text: s.to_owned() }.fail(),
        }
    }
}

impl<'de> Deserialize<'de> for Recommendation {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        Recommendation::from_str(&text)
            .map_err(|err| <D::Error as serde::de::Error>::custom(format!("{err}")))
    }
}

impl Serialize for Recommendation {
    fn serialize<S>(&self, serializer: S) -> StdResult<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&format!("{self}"))
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         votes & ballots                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A user's outstanding vote record for one movie.
///
/// Presence is authoritative: "no record" means "not yet voted", never "voted zero". An empty
/// [Vote] is how the registry reports an Unvoted user.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Vote {
    pub rating: Option<Rating>,
    pub recommendation: Option<Recommendation>,
}

impl Vote {
    pub fn is_empty(&self) -> bool {
        self.rating.is_none() && self.recommendation.is_none()
    }
}

/// What a Submit carries: like [Vote], but refined to be non-empty at construction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Ballot {
    rating: Option<Rating>,
    recommendation: Option<Recommendation>,
}

impl Ballot {
    pub fn new(rating: Option<Rating>, recommendation: Option<Recommendation>) -> Result<Ballot> {
        if rating.is_none() && recommendation.is_none() {
            EmptyBallotSnafu.fail()
        } else {
            Ok(Ballot {
                rating,
                recommendation,
            })
        }
    }
    pub fn rating(&self) -> Option<Rating> {
        self.rating
    }
    pub fn recommendation(&self) -> Option<Recommendation> {
        self.recommendation
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Movie                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A movie as loaded from configuration, baselines included.
///
/// Immutable once loaded for a given configuration snapshot; the configuration collaborator
/// replaces the whole list when a moderator edits it.
#[derive(Clone, Debug, Deserialize)]
#[serde(try_from = "MovieDe")]
pub struct Movie {
    pub id: MovieId,
    pub title: String,
    pub original_title: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub secondary_key: Option<String>,
    pub secondary_value: Option<String>,
    pub tertiary_key: Option<String>,
    pub image_uri: Option<String>,
    /// Pre-existing tallies shipped with configuration, merged under live increments on read.
    pub baseline_ratings: EnumMap<RatingBucket, u64>,
    pub baseline_recommendations: EnumMap<Recommendation, u64>,
}

/// The raw configuration shape: baselines appear as individual, optional, per-bucket fields
/// ("one" through "ten" and the "recommend_*" trio), absent meaning zero.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MovieDe {
    id: MovieId,
    title: String,
    original_title: Option<String>,
    release_date: Option<NaiveDate>,
    secondary_key: Option<String>,
    secondary_value: Option<String>,
    tertiary_key: Option<String>,
    image_uri: Option<String>,
    one: Option<u64>,
    two: Option<u64>,
    three: Option<u64>,
    four: Option<u64>,
    five: Option<u64>,
    six: Option<u64>,
    seven: Option<u64>,
    eight: Option<u64>,
    nine: Option<u64>,
    ten: Option<u64>,
    recommend_yes: Option<u64>,
    recommend_conditional: Option<u64>,
    recommend_no: Option<u64>,
}

impl TryFrom<MovieDe> for Movie {
    type Error = Error;
    fn try_from(de: MovieDe) -> Result<Movie> {
        if de.title.trim().is_empty() {
            return EmptyTitleSnafu.fail();
        }
        let mut baseline_ratings = EnumMap::default();
        for (bucket, count) in [
            (RatingBucket::One, de.one),
            (RatingBucket::Two, de.two),
            (RatingBucket::Three, de.three),
            (RatingBucket::Four, de.four),
            (RatingBucket::Five, de.five),
            (RatingBucket::Six, de.six),
            (RatingBucket::Seven, de.seven),
            (RatingBucket::Eight, de.eight),
            (RatingBucket::Nine, de.nine),
            (RatingBucket::Ten, de.ten),
        ] {
            baseline_ratings[bucket] = count.unwrap_or(0);
        }
        let mut baseline_recommendations = EnumMap::default();
        for (bucket, count) in [
            (Recommendation::Yes, de.recommend_yes),
            (Recommendation::Conditional, de.recommend_conditional),
            (Recommendation::No, de.recommend_no),
        ] {
            baseline_recommendations[bucket] = count.unwrap_or(0);
        }
        Ok(Movie {
            id: de.id,
            title: de.title,
            original_title: de.original_title,
            release_date: de.release_date,
            secondary_key: de.secondary_key,
            secondary_value: de.secondary_value,
            tertiary_key: de.tertiary_key,
            image_uri: de.image_uri,
            baseline_ratings,
            baseline_recommendations,
        })
    }
}

impl Movie {
    /// Resolve this movie's image reference through the configuration's `refs` map; a reference
    /// with no resolution passes through untouched (the collaborator may not have uploaded yet).
    pub fn image_url<'a>(&'a self, refs: &'a HashMap<String, String>) -> Option<&'a str> {
        self.image_uri
            .as_deref()
            .map(|uri| refs.get(uri).map(String::as_str).unwrap_or(uri))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ids() {
        assert!(MovieId::new("tt0111161").is_ok());
        assert!(MovieId::new("").is_err());
        assert!(MovieId::new("with|pipe").is_err());
        assert!(UserId::new("t2 whitespace").is_err());
        assert!(PostId::new("t3_abc123").is_ok());
    }

    #[test]
    fn ratings() {
        assert!(Rating::new(0).is_err());
        assert!(Rating::new(11).is_err());
        for value in 1..=10u8 {
            let rating = Rating::new(value).unwrap();
            let bucket = RatingBucket::from(rating);
            assert_eq!(bucket.value(), value);
            assert_eq!(RatingBucket::from_field(bucket.field()), Some(bucket));
        }
        assert_eq!("7".parse::<Rating>().unwrap().value(), 7);
        assert!("0".parse::<Rating>().is_err());
        assert!("seven".parse::<Rating>().is_err());
    }

    #[test]
    fn recommendations() {
        for rec in Recommendation::ALL {
            assert_eq!(format!("{rec}").parse::<Recommendation>().unwrap(), rec);
            assert_eq!(Recommendation::from_field(rec.field()), Some(rec));
        }
        assert!("maybe".parse::<Recommendation>().is_err());
    }

    #[test]
    fn ballots() {
        assert!(Ballot::new(None, None).is_err());
        assert!(Ballot::new(Some(Rating::new(5).unwrap()), None).is_ok());
    }

    #[test]
    fn movie_from_config() {
        let movie: Movie = serde_json::from_str(
            r#"{"id": "m1", "title": "Manichitrathazhu", "original_title": "മണിച്ചിത്രത്താഴ്",
                "release_date": "1993-12-25", "seven": 2, "ten": 1, "recommend_yes": 3}"#,
        )
        .unwrap();
        assert_eq!(movie.baseline_ratings[RatingBucket::Seven], 2);
        assert_eq!(movie.baseline_ratings[RatingBucket::Ten], 1);
        assert_eq!(movie.baseline_ratings[RatingBucket::One], 0);
        assert_eq!(movie.baseline_recommendations[Recommendation::Yes], 3);
        assert_eq!(
            movie.release_date,
            Some(NaiveDate::from_ymd_opt(1993, 12, 25).unwrap())
        );

        assert!(serde_json::from_str::<Movie>(r#"{"id": "m1", "title": " "}"#).is_err());
        assert!(
            serde_json::from_str::<Movie>(r#"{"id": "m1", "title": "x", "eleven": 1}"#).is_err()
        );
    }
}
