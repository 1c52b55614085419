//! Reload coordination.

use std::path::Path;

use tracing::{error, info};

use marten_config::Config;

use crate::handler::ForwardHandler;

/// Rebuilds the configuration snapshot and atomically installs it in the
/// engine.
///
/// The config file (when one was given) is re-parsed and the host and
/// resolv files are re-read; only a fully built snapshot is ever installed.
/// Any failure logs, keeps the previous snapshot serving, and never leaves
/// the engine in a partial state. The response cache is not flushed: stale
/// answers persist until natural expiry. In-flight queries that captured
/// the prior snapshot complete against it.
pub fn reload(config_path: Option<&Path>, fallback: &Config, handler: &ForwardHandler) {
    let config = match config_path {
        Some(path) => match Config::from_file(path) {
            Ok(config) => config,
            Err(err) => {
                error!(
                    path = %path.display(),
                    error = %err,
                    "reload: config re-parse failed, keeping previous snapshot"
                );
                return;
            }
        },
        None => fallback.clone(),
    };

    if let Err(err) = config.validate() {
        error!(error = %err, "reload: invalid configuration, keeping previous snapshot");
        return;
    }

    match config.load_snapshot() {
        Ok(snapshot) => {
            info!(
                hosts = snapshot.hosts.len(),
                upstreams = snapshot.upstreams.len(),
                "configuration reloaded"
            );
            handler.install(snapshot);
        }
        Err(err) => {
            error!(error = %err, "reload: snapshot rebuild failed, keeping previous snapshot");
        }
    }
}
