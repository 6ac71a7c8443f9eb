// Copyright (c) 2024 The container-trust-plugin Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::{env, path::Path, time::Duration};

use anyhow::{bail, Context, Result};
use config::{Config, File};
use log::debug;
use serde::Deserialize;

use crate::policy::DEFAULT_POLICY_PATH;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/docker/trust-plugin.yaml";
pub const CONFIG_PATH_ENV: &str = "TRUST_PLUGIN_CONFIG";
pub const DEFAULT_PLUGIN_SOCKET: &str = "/run/docker/plugins/container-trust-plugin.sock";

fn enabled_default() -> bool {
    true
}

fn policy_path_default() -> String {
    DEFAULT_POLICY_PATH.into()
}

/// The plugin configuration file. Older files spell the keys in
/// PascalCase (`{"Enabled": true, "AutoPull": false}`), so those spellings
/// are accepted too.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    #[serde(default = "enabled_default", alias = "Enabled")]
    pub enabled: bool,

    #[serde(default, alias = "autopull", alias = "AutoPull")]
    pub auto_pull: bool,

    #[serde(
        default = "policy_path_default",
        alias = "policypath",
        alias = "PolicyPath"
    )]
    pub policy_path: String,

    pub socket: String,

    #[serde(default, alias = "timeoutsecs", alias = "TimeoutSecs")]
    pub timeout_secs: Option<u64>,

    #[serde(
        default,
        alias = "insecureregistries",
        alias = "InsecureRegistries"
    )]
    pub insecure_registries: Vec<String>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_pull: false,
            policy_path: DEFAULT_POLICY_PATH.into(),
            socket: DEFAULT_PLUGIN_SOCKET.into(),
            timeout_secs: None,
            insecure_registries: Vec::new(),
        }
    }
}

impl PluginConfig {
    /// `--config` takes precedence, then `TRUST_PLUGIN_CONFIG`, then the
    /// default location. The file must exist.
    pub fn new(config_path: Option<String>) -> Result<Self> {
        let path = config_path
            .or_else(|| {
                let path = env::var(CONFIG_PATH_ENV).ok()?;
                debug!("Read plugin config path from env: {path}");
                Some(path)
            })
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        if !Path::new(&path).exists() {
            bail!("Config file {path} not found.")
        }

        Self::from_file(&path)
    }

    /// Supported formats are all formats supported by the `config` crate,
    /// picked by the file extension.
    pub fn from_file(config_path: &str) -> Result<Self> {
        let c = Config::builder()
            .set_default("socket", DEFAULT_PLUGIN_SOCKET)?
            .add_source(File::with_name(config_path))
            .build()?;

        let res = c.try_deserialize().context("invalid config")?;
        Ok(res)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}
