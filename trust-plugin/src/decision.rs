// Copyright (c) 2024 The container-trust-plugin Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! From an intercepted request to a verdict.
//!
//! A request moves through `matched -> parsed -> qualified -> evaluated ->
//! reconciled`; a failure at any step is a final deny. Requests that are
//! not pulls are let through untouched.

use std::{future::Future, sync::Arc, time::Duration};

use log::{debug, info, warn};

use crate::{
    engine::{ImageEngine, RegistryListProvider},
    evaluator::{PolicyEvaluator, PolicyVerdict},
    matcher::{InterceptedRequest, RequestMatcher, Token},
    qualify,
    reference::{Identifier, ImageReference},
    Error, Result,
};

/// Everything the pipeline consults besides the request itself. Built once
/// at startup and shared, read-only, by every request.
pub struct Collaborators {
    matcher: RequestMatcher,
    registries: Arc<dyn RegistryListProvider>,
    evaluator: Arc<dyn PolicyEvaluator>,
    engine: Arc<dyn ImageEngine>,
    auto_pull: bool,
    timeout: Option<Duration>,
}

impl Collaborators {
    pub fn new(
        registries: Arc<dyn RegistryListProvider>,
        evaluator: Arc<dyn PolicyEvaluator>,
        engine: Arc<dyn ImageEngine>,
    ) -> Self {
        Self {
            matcher: RequestMatcher::new(),
            registries,
            evaluator,
            engine,
            auto_pull: false,
            timeout: None,
        }
    }

    /// Pull allowed tags by digest and retag them locally instead of
    /// asking the caller to.
    pub fn with_auto_pull(mut self, auto_pull: bool) -> Self {
        self.auto_pull = auto_pull;
        self
    }

    /// Bound every call to the registry list, the policy evaluator and the
    /// engine.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug)]
pub enum Decision {
    Allow,
    Deny(Error),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Human readable reason of a deny.
    pub fn message(&self) -> Option<String> {
        match self {
            Decision::Allow => None,
            Decision::Deny(e) => Some(e.to_string()),
        }
    }
}

enum Outcome {
    PassThrough,
    Allowed(ImageReference),
}

/// Decide whether the engine may execute `request`.
pub async fn decide(request: &InterceptedRequest, collaborators: &Collaborators) -> Decision {
    match reconcile(request, collaborators).await {
        Ok(Outcome::PassThrough) => {
            debug!("Not a pull, letting through: {} {}", request.method, request.uri);
            Decision::Allow
        }
        Ok(Outcome::Allowed(reference)) => {
            info!("Allowing pull of {reference}: {}", request.uri);
            Decision::Allow
        }
        Err(e) => {
            warn!("Denying {}: {e}", request.uri);
            Decision::Deny(e)
        }
    }
}

async fn reconcile(request: &InterceptedRequest, c: &Collaborators) -> Result<Outcome> {
    let Some(matched) = c.matcher.match_request(request)? else {
        return Ok(Outcome::PassThrough);
    };

    let requested = ImageReference::parse(&matched.repository)?;
    let requested = match matched.token {
        Token::Digest(digest) => requested.with_digest(digest),
        Token::Tag(tag) => requested.with_tag(&tag)?,
    };
    let requested = match requested.is_name_only() {
        true => requested.with_default_tag(),
        false => requested,
    };

    let qualified = match qualify::is_fully_qualified(&requested) {
        true => requested.clone(),
        false => {
            let registries = bounded(c.timeout, "registry list", c.registries.registries())
                .await?
                .map_err(|source| Error::RegistryList { source })?;
            qualify::resolve(requested.clone(), &registries)?
        }
    };

    let verdict = bounded(c.timeout, "policy evaluation", c.evaluator.evaluate(&qualified))
        .await?
        .map_err(|source| Error::PolicyEvaluation { source })?;
    let PolicyVerdict::Allowed { manifest_digest } = verdict else {
        return Err(Error::PolicyDenied);
    };

    match requested.identifier() {
        Identifier::Digest(provided) => {
            if *provided != manifest_digest {
                return Err(Error::DigestMismatch {
                    provided: provided.to_string(),
                    computed: manifest_digest.to_string(),
                });
            }
        }
        Identifier::Tag(tag) => {
            if !c.auto_pull {
                return Err(Error::ManualPullRequired {
                    repository: requested.name(),
                    digest: manifest_digest.to_string(),
                    tag: tag.clone(),
                });
            }

            // The caller's own name is pulled and tagged so the engine
            // resolves it exactly as it would the original request.
            let by_digest = requested.clone().with_digest(manifest_digest);
            bounded(c.timeout, "auto pull", c.engine.pull(&by_digest))
                .await?
                .map_err(|source| Error::AutoPull { source })?;
            bounded(c.timeout, "auto tag", c.engine.tag(&by_digest, &requested))
                .await?
                .map_err(|source| Error::AutoPull { source })?;
        }
        Identifier::Bare => return Err(Error::AllTagsPull),
    }

    Ok(Outcome::Allowed(qualified))
}

/// Run a downstream call, giving up after `timeout` if one is set.
async fn bounded<T>(
    timeout: Option<Duration>,
    operation: &str,
    call: impl Future<Output = anyhow::Result<T>>,
) -> Result<anyhow::Result<T>> {
    let Some(timeout) = timeout else {
        return Ok(call.await);
    };

    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| Error::Timeout {
            operation: operation.to_string(),
            seconds: timeout.as_secs(),
        })
}
