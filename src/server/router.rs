//! Route construction
//!
//! One hub per configured source, each mounted at its serve path. Routes
//! are registered with `get`, so HEAD is answered and anything else gets
//! a 405 with an `Allow` header for free.

use std::collections::HashSet;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::chunker::Chunker;
use crate::config::SourceConfig;
use crate::error::{ConfigError, Result};
use crate::hub::BroadcastHub;
use crate::server::client::{self, StreamContext};
use crate::server::ServerConfig;

/// Build the router, spawning one broadcast hub per source
pub fn build(sources: Vec<SourceConfig>, server: &ServerConfig) -> Result<Router> {
    let mut seen = HashSet::new();
    let mut router = Router::new();

    for source in sources {
        let path = source.path.clone();
        if !seen.insert(path.clone()) {
            return Err(ConfigError::DuplicatePath(path).into());
        }

        let chunker = Chunker::new(
            path.clone(),
            &source.source,
            source.auth_mode(),
            source.wire_format(),
            source.rate_limit(),
        )?;

        let hub = BroadcastHub::new(path.clone(), chunker, server.idle_grace);
        let handle = hub.handle();
        hub.start();

        let ctx = Arc::new(StreamContext {
            hub: handle,
            trusted_proxy: server.trusted_proxy,
            client_header: server.client_header.clone(),
        });

        tracing::info!(source = %source.source, path = %path, "publishing stream");
        router = router.route(&path, get(client::stream).with_state(ctx));
    }

    Ok(router)
}
