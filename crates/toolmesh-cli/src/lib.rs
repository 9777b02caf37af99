// Copyright 2025 toolmesh Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # toolmesh CLI
//!
//! Command-line interface for the toolmesh coordinator.
//!
//! - `toolmesh serve`: run the coordinator from a TOML config file
//! - `toolmesh call`: make one tool call (raw JSON envelope on stdout)
//! - `toolmesh status`: print the aggregated backend status
//! - `toolmesh check-config`: load and validate a config file, then exit
//!
//! The binary parses arguments with `argh` and dispatches to
//! `toolmesh-gateway` and `toolmesh-client`.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use toolmesh_common::config::{GatewayConfig, CONFIG_ENV_VAR};

/// Picks the config path: the `--config` flag, else `$TOOLMESH_CONFIG`.
pub fn resolve_config_path(flag: Option<String>, env: Option<String>) -> Result<PathBuf> {
    flag.or(env)
        .filter(|path| !path.trim().is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("No config file given: pass --config or set {}", CONFIG_ENV_VAR))
}

/// Loads and validates the config, applying command-line overrides.
pub fn load_config(
    path: &Path,
    bind: Option<String>,
    disable_health_check: bool,
) -> Result<GatewayConfig> {
    let mut config = GatewayConfig::load(path)
        .map_err(|e| anyhow!("Invalid config {}: {}", path.display(), e))?;

    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if disable_health_check {
        config.health.enabled = false;
    }
    Ok(config)
}

/// Validates that a gateway URL uses plain HTTP.
pub fn validate_http_url(url: &str) -> Result<()> {
    if url.starts_with("http://") {
        Ok(())
    } else {
        Err(anyhow!(
            "Invalid gateway address: '{}' must start with http://",
            url
        ))
    }
}
