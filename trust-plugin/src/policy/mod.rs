// Copyright (c) 2024 The container-trust-plugin Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Trust policy in the containers-policy.json format, see
//! <https://github.com/containers/image/blob/main/docs/containers-policy.json.5.md>.

use std::{collections::HashMap, path::Path};

use anyhow::{Context, Result};
use oci_client::Reference;
use serde::Deserialize;

pub mod requirement;

pub use requirement::{PolicyReqMatchType, PolicyReqType};

/// The only transport pulls go through.
pub const DOCKER_TRANSPORT: &str = "docker";

/// Default location of the system trust policy.
pub const DEFAULT_POLICY_PATH: &str = "/etc/containers/policy.json";

pub type PolicyTransportScopes = HashMap<String, Vec<PolicyReqType>>;

#[derive(Deserialize, Debug)]
pub struct Policy {
    /// Applies to any image without a more specific scope in `transports`.
    default: Vec<PolicyReqType>,

    #[serde(default)]
    transports: HashMap<String, PolicyTransportScopes>,
}

impl Policy {
    pub fn from_slice(policy: &[u8]) -> Result<Self> {
        serde_json::from_slice(policy).context("parse image policy")
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let policy = tokio::fs::read(path)
            .await
            .with_context(|| format!("read policy file {}", path.display()))?;
        Self::from_slice(&policy)
    }

    /// Selects the requirements for the image: the exact reference first,
    /// then the repository and each parent namespace, then wildcarded
    /// domains, then the transport default, and finally `default`.
    pub fn requirements_for_image(&self, reference: &Reference) -> &[PolicyReqType] {
        if let Some(scopes) = self.transports.get(DOCKER_TRANSPORT) {
            if let Some(reqs) = scopes.get(&reference.whole()) {
                return reqs;
            }

            for name in image_namespaces(reference) {
                if let Some(reqs) = scopes.get(&name) {
                    return reqs;
                }
            }

            if let Some(reqs) = scopes.get("") {
                return reqs;
            }
        }

        &self.default
    }
}

/// `registry/repository`
pub fn repository_full_name(reference: &Reference) -> String {
    format!("{}/{}", reference.registry(), reference.repository())
}

/// The repository, its parent namespaces up to the registry host, and the
/// wildcarded parent domains of that host, most specific first.
///
/// `busybox` is looked up as `docker.io/library/busybox`, then
/// `docker.io/library`, `docker.io` and `*.io`; never as the bare `busybox`.
pub fn image_namespaces(reference: &Reference) -> Vec<String> {
    let mut namespaces = Vec::new();
    let mut name = repository_full_name(reference);

    loop {
        namespaces.push(name.clone());
        match name.rsplit_once('/') {
            Some((parent, _)) => name = parent.to_string(),
            None => break,
        }
    }

    // Wildcards match domains, never ports.
    if let Some((host, _)) = name.rsplit_once(':') {
        name = host.to_string();
    }

    while let Some((_, parent)) = name.split_once('.') {
        name = parent.to_string();
        namespaces.push(format!("*.{name}"));
    }

    namespaces
}
