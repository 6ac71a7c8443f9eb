// Copyright (c) 2024 The container-trust-plugin Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Recording stand-ins for the engine and the policy evaluator.

#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use container_trust_plugin::{
    digest::Digest,
    engine::{ImageEngine, RegistryListProvider},
    evaluator::{PolicyEvaluator, PolicyVerdict},
    reference::ImageReference,
    Collaborators, InterceptedRequest,
};

pub const MANIFEST: &[u8] = br#"{"schemaVersion":2,"mediaType":"application/vnd.oci.image.manifest.v1+json"}"#;

pub fn manifest_digest() -> Digest {
    Digest::sha256_of(MANIFEST)
}

pub fn pull(uri: &str) -> InterceptedRequest {
    InterceptedRequest::new("POST", uri)
}

#[derive(Default)]
pub struct FakeRegistries {
    pub registries: Vec<String>,
    pub fail: bool,
    pub calls: Mutex<usize>,
}

impl FakeRegistries {
    pub fn new(registries: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            registries: registries.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl RegistryListProvider for FakeRegistries {
    async fn registries(&self) -> Result<Vec<String>> {
        *self.calls.lock().unwrap() += 1;
        if self.fail {
            bail!("connection refused");
        }
        Ok(self.registries.clone())
    }
}

pub enum Verdict {
    Allowed,
    Denied,
    Fails(&'static str),
    Hangs,
}

pub struct FakeEvaluator {
    pub verdict: Verdict,
    pub evaluated: Mutex<Vec<String>>,
}

impl FakeEvaluator {
    pub fn new(verdict: Verdict) -> Arc<Self> {
        Arc::new(Self {
            verdict,
            evaluated: Mutex::new(Vec::new()),
        })
    }

    pub fn evaluated(&self) -> Vec<String> {
        self.evaluated.lock().unwrap().clone()
    }
}

#[async_trait]
impl PolicyEvaluator for FakeEvaluator {
    async fn evaluate(&self, reference: &ImageReference) -> Result<PolicyVerdict> {
        self.evaluated.lock().unwrap().push(reference.to_string());
        match self.verdict {
            Verdict::Allowed => {}
            Verdict::Denied => return Ok(PolicyVerdict::Denied),
            Verdict::Fails(message) => bail!(message),
            Verdict::Hangs => tokio::time::sleep(Duration::from_secs(3600)).await,
        }

        Ok(PolicyVerdict::Allowed {
            manifest_digest: manifest_digest(),
        })
    }
}

#[derive(Default)]
pub struct FakeEngine {
    pub fail_pull: bool,
    pub fail_tag: bool,
    pub calls: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageEngine for FakeEngine {
    async fn pull(&self, reference: &ImageReference) -> Result<()> {
        self.calls.lock().unwrap().push(format!("pull {reference}"));
        if self.fail_pull {
            bail!("manifest unknown");
        }
        Ok(())
    }

    async fn tag(&self, source: &ImageReference, target: &ImageReference) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("tag {source} {target}"));
        if self.fail_tag {
            bail!("no such image");
        }
        Ok(())
    }
}

pub fn collaborators(
    registries: &Arc<FakeRegistries>,
    evaluator: &Arc<FakeEvaluator>,
    engine: &Arc<FakeEngine>,
) -> Collaborators {
    Collaborators::new(registries.clone(), evaluator.clone(), engine.clone())
}
