// Copyright (c) 2024 The container-trust-plugin Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! The engine's control plane, as far as the plugin needs it: the list of
//! registries unqualified names are searched in, and pulling and tagging
//! images on the caller's behalf.

use std::{path::PathBuf, str::FromStr};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::reference::ImageReference;

mod client;

pub use client::{EngineClient, TlsOptions};

pub const DEFAULT_ENGINE_HOST: &str = "unix:///var/run/docker.sock";

#[async_trait]
pub trait RegistryListProvider: Send + Sync {
    /// Registries configured on the engine, in search order. Read live on
    /// every call since the engine configuration may change.
    async fn registries(&self) -> Result<Vec<String>>;
}

#[async_trait]
pub trait ImageEngine: Send + Sync {
    /// Pull `reference`, returning once the engine has finished.
    async fn pull(&self, reference: &ImageReference) -> Result<()>;

    /// Point the local tag `target` at the image `source`.
    async fn tag(&self, source: &ImageReference, target: &ImageReference) -> Result<()>;
}

/// Address of the engine API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineHost {
    Unix(PathBuf),
    /// `host:port`, with TLS when `tls` is set.
    Tcp { address: String, tls: bool },
}

impl FromStr for EngineHost {
    type Err = anyhow::Error;

    fn from_str(host: &str) -> Result<Self> {
        let Some((scheme, address)) = host.split_once("://") else {
            bail!("unable to parse engine host `{host}`");
        };

        if address.is_empty() {
            bail!("engine host `{host}` has no address");
        }

        match scheme {
            "unix" => Ok(EngineHost::Unix(PathBuf::from(address))),
            "tcp" | "http" => Ok(EngineHost::Tcp {
                address: address.trim_end_matches('/').to_string(),
                tls: false,
            }),
            "https" => Ok(EngineHost::Tcp {
                address: address.trim_end_matches('/').to_string(),
                tls: true,
            }),
            other => bail!("protocol `{other}` of engine host `{host}` is not supported"),
        }
    }
}
