// Copyright (c) 2024 The container-trust-plugin Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Policy evaluation of a resolved reference.
//!
//! The verdict carries the digest of the manifest the policy was checked
//! against. That digest, not the tag, is the identity of what will run.

use std::{path::PathBuf, str::FromStr, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use oci_client::{
    client::{ClientConfig, ClientProtocol},
    secrets::RegistryAuth,
    Client, Reference,
};

use crate::{
    digest::Digest,
    policy::{Policy, PolicyReqType},
    reference::ImageReference,
};

const MANIFEST_MEDIA_TYPES: &[&str] = &[
    "application/vnd.oci.image.manifest.v1+json",
    "application/vnd.oci.image.index.v1+json",
    "application/vnd.docker.distribution.manifest.v2+json",
    "application/vnd.docker.distribution.manifest.list.v2+json",
];

/// A denied image carries no digest: its manifest may never have been
/// fetched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyVerdict {
    Allowed { manifest_digest: Digest },
    Denied,
}

impl PolicyVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyVerdict::Allowed { .. })
    }
}

#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    /// Any error means the policy could not be evaluated at all.
    async fn evaluate(&self, reference: &ImageReference) -> Result<PolicyVerdict>;
}

/// A manifest and the digest the registry reports for it, if any.
pub struct FetchedManifest {
    pub content: Vec<u8>,
    pub digest: Option<String>,
}

#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn fetch_manifest(&self, reference: &Reference) -> Result<FetchedManifest>;
}

/// The image being judged, as seen by signature verification.
pub struct PolicyImage {
    pub reference: Reference,
    pub manifest: Vec<u8>,
    pub manifest_digest: Digest,
}

/// Verifies the signature-based requirements (`signedBy`,
/// `sigstoreSigned`). Returning an error rejects the image.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    async fn verify(&self, requirement: &PolicyReqType, image: &PolicyImage) -> Result<()>;
}

/// Pulls manifests straight from the registry, anonymously.
pub struct RegistryManifestSource {
    client: Client,
}

impl RegistryManifestSource {
    /// `insecure_registries` are reached over plain HTTP.
    pub fn new(insecure_registries: Vec<String>) -> Self {
        let protocol = match insecure_registries.is_empty() {
            true => ClientProtocol::Https,
            false => ClientProtocol::HttpsExcept(insecure_registries),
        };
        let client = Client::new(ClientConfig {
            protocol,
            ..Default::default()
        });

        Self { client }
    }
}

#[async_trait]
impl ManifestSource for RegistryManifestSource {
    async fn fetch_manifest(&self, reference: &Reference) -> Result<FetchedManifest> {
        let (content, digest) = self
            .client
            .pull_manifest_raw(reference, &RegistryAuth::Anonymous, MANIFEST_MEDIA_TYPES)
            .await
            .with_context(|| format!("fetch manifest of {}", reference.whole()))?;

        Ok(FetchedManifest {
            content: content.to_vec(),
            digest: Some(digest).filter(|d| !d.is_empty()),
        })
    }
}

/// Evaluates the system trust policy. The policy file is read on every
/// evaluation so edits take effect without a restart.
pub struct TrustPolicyEvaluator {
    policy_path: PathBuf,
    manifests: Arc<dyn ManifestSource>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
}

impl TrustPolicyEvaluator {
    pub fn new(policy_path: impl Into<PathBuf>, manifests: Arc<dyn ManifestSource>) -> Self {
        Self {
            policy_path: policy_path.into(),
            manifests,
            verifier: None,
        }
    }

    pub fn with_signature_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Settles what can be decided from the reference alone. Signature
    /// requirements only pass here when a verifier can check them later.
    fn check_reference_requirement(
        &self,
        req: &PolicyReqType,
        reference: &Reference,
    ) -> Result<()> {
        match req {
            PolicyReqType::Accept => Ok(()),
            PolicyReqType::Reject => bail!("Policy `reject` rejects image {}", reference.whole()),
            PolicyReqType::SignedBy(_) | PolicyReqType::SigstoreSigned(_) => {
                if self.verifier.is_none() {
                    bail!(
                        "no signature verifier available to check image {}",
                        reference.whole()
                    );
                }
                Ok(())
            }
        }
    }

    async fn check_signature_requirement(
        &self,
        req: &PolicyReqType,
        image: &PolicyImage,
    ) -> Result<()> {
        match &self.verifier {
            Some(verifier) => verifier.verify(req, image).await,
            None => bail!(
                "no signature verifier available to check image {}",
                image.reference.whole()
            ),
        }
    }
}

/// The manifest digest, recomputed locally. When the registry reports a
/// digest it must agree with the content.
fn manifest_digest(manifest: &FetchedManifest) -> Result<Digest> {
    let Some(reported) = &manifest.digest else {
        return Ok(Digest::sha256_of(&manifest.content));
    };

    let reported = Digest::from_str(reported)
        .map_err(|e| anyhow!("registry reported an unusable digest: {e}"))?;
    let computed = reported.recompute(&manifest.content);
    if computed != reported {
        bail!("manifest content does not match registry digest {reported}, computed {computed}");
    }

    Ok(computed)
}

#[async_trait]
impl PolicyEvaluator for TrustPolicyEvaluator {
    async fn evaluate(&self, reference: &ImageReference) -> Result<PolicyVerdict> {
        let reference = Reference::from_str(&reference.to_string())
            .with_context(|| format!("build image reference for {reference}"))?;
        let policy = Policy::from_file(&self.policy_path).await?;

        let reqs = policy.requirements_for_image(&reference);
        if reqs.is_empty() {
            bail!("List of verification policy requirements must not be empty");
        }

        // The image must meet every requirement of the scope. A rejected
        // image never reaches its registry.
        for req in reqs {
            if let Err(e) = self.check_reference_requirement(req, &reference) {
                warn!("Image {} rejected by policy: {e:#}", reference.whole());
                return Ok(PolicyVerdict::Denied);
            }
        }

        let manifest = self.manifests.fetch_manifest(&reference).await?;
        let manifest_digest = manifest_digest(&manifest)?;
        debug!("Manifest of {} is {manifest_digest}", reference.whole());

        let image = PolicyImage {
            reference,
            manifest: manifest.content,
            manifest_digest,
        };

        for req in reqs.iter().filter(|req| req.needs_signature()) {
            if let Err(e) = self.check_signature_requirement(req, &image).await {
                warn!("Image {} rejected by policy: {e:#}", image.reference.whole());
                return Ok(PolicyVerdict::Denied);
            }
        }

        Ok(PolicyVerdict::Allowed {
            manifest_digest: image.manifest_digest,
        })
    }
}
