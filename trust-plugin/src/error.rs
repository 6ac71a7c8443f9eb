// Copyright (c) 2024 The container-trust-plugin Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every way a pull can be refused. Each kind is terminal at the point
/// it is detected; nothing here is retried.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    MalformedRequest(String),

    #[error("unable to verify all tags for the given image")]
    AllTagsPull,

    #[error("invalid reference format: {0}")]
    InvalidReference(String),

    #[error("invalid digest format: {0}")]
    InvalidDigest(String),

    #[error("Invalid hostname {0:?}")]
    InvalidHostname(String),

    #[error("can't check signatures, please pull with a fully qualified image name")]
    AmbiguousQualification,

    #[error("failed to get registries from the engine: {source:#}")]
    RegistryList {
        #[source]
        source: anyhow::Error,
    },

    #[error("{source:#}")]
    PolicyEvaluation {
        #[source]
        source: anyhow::Error,
    },

    #[error("image isn't allowed")]
    PolicyDenied,

    #[error("digests mismatch, provided {provided}, computed {computed}")]
    DigestMismatch { provided: String, computed: String },

    #[error("image is allowed but can't pull by tag. Pull the image with 'docker pull {repository}@{digest}' and tag it with 'docker tag {repository}@{digest} {repository}:{tag}'")]
    ManualPullRequired {
        repository: String,
        digest: String,
        tag: String,
    },

    #[error("{source:#}")]
    AutoPull {
        #[source]
        source: anyhow::Error,
    },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },
}

impl Error {
    /// An intentional refusal, as opposed to a failure somewhere along the
    /// pipeline. The host surfaces the two through different fields.
    pub fn is_policy_denial(&self) -> bool {
        matches!(self, Error::PolicyDenied)
    }
}
