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

//! # cinerankd
//!
//! The cinerank daemon: serves one post's vote engine over HTTP.
//!
//! Pick a store (`--redis <url>` for production, `--memory` for hacking), name the post whose
//! keyspace to serve, & go. `RUST_LOG` governs log verbosity in the usual way.

use std::{fs, path::PathBuf, sync::Arc, time::Duration};

use axum::Router;
use clap::{crate_version, value_parser, Arg, ArgAction, Command};
use snafu::prelude::*;
use tap::Pipe;
use tokio::{
    net::TcpListener,
    signal::unix::{signal, SignalKind},
};
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, Registry};
use tower_http::cors::CorsLayer;

use cinerank::{
    configs::{configs_key, Configs},
    entities::{self, PostId},
    http::Cinerank,
    memory, ranking, redis, storage,
    votes::{self, Votes},
};

/// The cinerankd application error type
///
/// Note that I do not derive [Debug]: `main()` returns `Result<(), Error>`, & on the `Err` path
/// the runtime prints the `Debug` representation to stderr. The derived implementation is not
/// very readable; forwarding to `Display` is.
#[derive(Snafu)]
enum Error {
    #[snafu(display("Failed to bind {address}: {source}"))]
    Bind {
        address: String,
        source: std::io::Error,
    },
    #[snafu(display("Configuration trouble: {source}"))]
    Configs { source: cinerank::configs::Error },
    #[snafu(display("{text} won't do as a post id: {source}"))]
    Post {
        text: String,
        source: entities::Error,
    },
    #[snafu(display("Couldn't read {}: {source}", path.display()))]
    ReadSeed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to reach Redis: {source}"))]
    Redis { source: cinerank::redis::Error },
    #[snafu(display("Failed to serve: {source}"))]
    Serve { source: std::io::Error },
    #[snafu(display("Failed to set the global tracing subscriber: {source}"))]
    SetGlobalDefault {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
    #[snafu(display("Name a store: --redis <url> or --memory"))]
    Store,
    #[snafu(display("While seeding configuration: {source}"))]
    StoreSeed { source: storage::Error },
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

type Result<T> = std::result::Result<T, Error>;

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .unwrap(/* no handler ⇒ may as well die */);
        info!("Received Ctrl+C; shutting down");
    };
    let terminate = async {
        signal(SignalKind::terminate())
            .unwrap(/* no handler ⇒ may as well die */)
            .recv()
            .await;
        info!("Received SIGTERM; shutting down");
    };
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("cinerankd")
        .version(crate_version!())
        .author("Michael Herstine <sp1ff@pobox.com>")
        .about("Movie ratings, concurrently")
        .arg(
            Arg::new("address")
                .short('a')
                .long("address")
                .default_value("0.0.0.0:2387")
                .help("address:port on which to listen"),
        )
        .arg(
            Arg::new("post")
                .short('p')
                .long("post")
                .required(true)
                .help("post/instance id whose keyspace this daemon serves"),
        )
        .arg(
            Arg::new("redis")
                .short('r')
                .long("redis")
                .help("Redis URL (e.g. redis://127.0.0.1/)"),
        )
        .arg(
            Arg::new("memory")
                .short('m')
                .long("memory")
                .action(ArgAction::SetTrue)
                .conflicts_with("redis")
                .help("serve from a transient in-memory store"),
        )
        .arg(
            Arg::new("ttl")
                .long("cache-ttl")
                .value_parser(value_parser!(u64))
                .default_value("4")
                .help("read-through cache TTL, in seconds"),
        )
        .arg(
            Arg::new("seed")
                .long("seed-configs")
                .value_parser(value_parser!(PathBuf))
                .help("JSON file with which to seed the post configuration, if absent"),
        )
        .get_matches();

    Registry::default()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .pipe(tracing::subscriber::set_global_default)
        .context(SetGlobalDefaultSnafu)?;

    let text = matches.get_one::<String>("post").unwrap(/* required */);
    let post = PostId::new(text).context(PostSnafu { text: text.clone() })?;

    let storage: Arc<dyn storage::Backend + Send + Sync> =
        match matches.get_one::<String>("redis") {
            Some(url) => {
                info!("Serving {post} from Redis at {url}");
                Arc::new(redis::Store::new(url).await.context(RedisSnafu)?)
            }
            None if matches.get_flag("memory") => {
                info!("Serving {post} from a transient in-memory store");
                Arc::new(memory::Store::new())
            }
            None => return StoreSnafu.fail(),
        };

    if let Some(path) = matches.get_one::<PathBuf>("seed") {
        let key = configs_key(&post);
        if storage.get(&key).await.context(StoreSeedSnafu)?.is_none() {
            let text = fs::read_to_string(path).context(ReadSeedSnafu { path: path.clone() })?;
            // validate before writing; a broken seed shouldn't brick the post
            Configs::from_json(&text).context(ConfigsSnafu)?;
            storage.set(&key, &text).await.context(StoreSeedSnafu)?;
            info!("Seeded configuration for {post} from {}", path.display());
        }
    }

    let configs = Configs::load(storage.as_ref(), &post).await.context(ConfigsSnafu)?;
    info!(
        "Loaded configuration: {} movie(s), {} moderator(s)",
        configs.movies.len(),
        configs.mods.len()
    );

    let ttl = *matches.get_one::<u64>("ttl").unwrap(/* defaulted */);
    let state = Arc::new(Cinerank {
        votes: Votes::new(storage, Duration::from_secs(ttl)),
        post,
        configs,
    });

    let app = Router::new()
        .merge(votes::make_router(state.clone()))
        .merge(ranking::make_router(state))
        .layer(CorsLayer::permissive());

    let address = matches.get_one::<String>("address").unwrap(/* defaulted */);
    let listener = TcpListener::bind(address).await.context(BindSnafu {
        address: address.clone(),
    })?;
    info!("cinerankd listening on {address}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context(ServeSnafu)?;

    info!("cinerankd exiting");
    Ok(())
}
