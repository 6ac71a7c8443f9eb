// Copyright (c) 2024 The container-trust-plugin Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Registry qualification of unqualified references.
//!
//! Engines configured with additional registries (`--add-registry`) resolve
//! an unqualified name like `rhel/rhel7` against each of them in order.
//! Only the registry the engine tries first can be checked here, so an
//! unqualified pull is only evaluated when that choice is unambiguous.

use log::debug;

use crate::{
    reference::{is_valid_hostname, ImageReference},
    Error, Result,
};

/// The default public registry. References that resolve to it are left
/// unqualified.
pub const DEFAULT_REGISTRY: &str = "docker.io";

pub fn is_fully_qualified(reference: &ImageReference) -> bool {
    reference.is_fully_qualified()
}

/// Returns the registry host (empty when the reference names none) and
/// the repository path below it.
pub fn split_host(reference: &ImageReference) -> (&str, &str) {
    (reference.host().unwrap_or_default(), reference.path())
}

/// Prefix an unqualified reference with `host`, keeping its tag or digest.
/// A reference that already names a registry is returned unchanged.
pub fn qualify(reference: ImageReference, host: &str) -> Result<ImageReference> {
    if !is_valid_hostname(host) {
        return Err(Error::InvalidHostname(host.to_string()));
    }

    if is_fully_qualified(&reference) {
        return Ok(reference);
    }

    reference.with_host(host)
}

/// Apply the qualification rules against the registries the engine is
/// configured with, in the engine's search order.
pub fn resolve(reference: ImageReference, registries: &[String]) -> Result<ImageReference> {
    if is_fully_qualified(&reference) {
        return Ok(reference);
    }

    if registries.len() > 1 {
        return Err(Error::AmbiguousQualification);
    }

    match registries.first() {
        Some(registry) if !registry.is_empty() && registry != DEFAULT_REGISTRY => {
            let qualified = qualify(reference, registry)?;
            debug!("Qualified unqualified reference as {qualified}");
            Ok(qualified)
        }
        _ => Ok(reference),
    }
}
