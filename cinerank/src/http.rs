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

use axum::Json;
use serde::{Deserialize, Serialize};

use crate::{configs::Configs, entities::PostId, votes::Votes};

/// A serializable struct for use in HTTP error responses
///
/// This is intended to be used in the error paths of whatever response type an axum handler is
/// using. I can't see a way to enforce the rule that all handlers return a JSON body for errors,
/// but I can at least set up a standard representation of an error response.
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponseBody {
    pub error: String,
}

impl axum::response::IntoResponse for ErrorResponseBody {
    fn into_response(self) -> axum::response::Response {
        Json(self).into_response()
    }
}

/// Application state available to all handlers
pub struct Cinerank {
    /// The post/instance this process serves; one logical keyspace per post.
    pub post: PostId,
    /// The configuration snapshot loaded at startup.
    pub configs: Configs,
    /// The vote registry & submit/reset protocol.
    pub votes: Votes,
}
