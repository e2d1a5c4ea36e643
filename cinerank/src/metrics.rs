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

//! # cinerank metrics
//!
//! cinerank uses [OpenTelemetry] to collect metrics. OTel advises re-using instruments rather
//! than re-creating them at every collection site, so the full set is built once, up-front, and
//! attached to the application state. With only a handful of instruments, a plain struct with
//! named fields is the honest size for this -- no registry machinery required. Exporter wiring is
//! a deployment concern; absent one, these land in the default (no-op) meter provider and cost
//! nearly nothing.
//!
//! [OpenTelemetry]: https://docs.rs/opentelemetry/latest/opentelemetry/index.html

use opentelemetry::{global, metrics::Counter};

/// The engine's instruments. Create once; attach to state.
#[derive(Clone)]
pub struct Instruments {
    /// Submits that applied
    pub submits: Counter<u64>,
    /// Resets that applied
    pub resets: Counter<u64>,
    /// Submits/resets that were intentional no-ops (already voted/nothing to reset)
    pub noops: Counter<u64>,
    /// Optimistic-lock failures surfaced to callers
    pub conflicts: Counter<u64>,
    pub cache_hits: Counter<u64>,
    pub cache_misses: Counter<u64>,
}

impl Instruments {
    pub fn new(scope: &'static str) -> Instruments {
        let meter = global::meter(scope);
        Instruments {
            submits: meter
                .u64_counter("cinerank.votes.submitted")
                .with_description("Vote submissions that applied")
                .build(),
            resets: meter
                .u64_counter("cinerank.votes.reset")
                .with_description("Vote resets that applied")
                .build(),
            noops: meter
                .u64_counter("cinerank.votes.noops")
                .with_description("Submits & resets that were intentional no-ops")
                .build(),
            conflicts: meter
                .u64_counter("cinerank.votes.conflicts")
                .with_description("Transactions discarded due to concurrent modification")
                .build(),
            cache_hits: meter
                .u64_counter("cinerank.cache.hits")
                .with_description("Read-through cache hits")
                .build(),
            cache_misses: meter
                .u64_counter("cinerank.cache.misses")
                .with_description("Read-through cache misses")
                .build(),
        }
    }
}

impl Default for Instruments {
    fn default() -> Self {
        Instruments::new("cinerank")
    }
}
