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

//! # cinerank
//!
//! Movie ratings, concurrently.
//!
//! Many users, one post, each casting at most one rating (1-10) & one recommendation
//! (yes/conditional/no) per movie. Votes aggregate into live histograms in a Redis-style counter
//! store behind a short-TTL read-through cache; a pure ranking engine derives the filterable
//! leaderboard. The submit/reset protocol is one optimistic watch/queue/exec transaction per user
//! action -- no locks, no internal retries, conflicts surface to the caller.

pub mod cache;
pub mod configs;
pub mod entities;
pub mod histogram;
pub mod http;
pub mod memory;
pub mod metrics;
pub mod ranking;
pub mod redis;
pub mod storage;
pub mod votes;
