// Copyright (c) 2024 The container-trust-plugin Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use serde::Deserialize;

/// A rule which must be satisfied by the image.
#[derive(Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum PolicyReqType {
    /// Accept the image unconditionally.
    #[serde(rename = "insecureAcceptAnything")]
    Accept,

    /// Reject the image unconditionally.
    #[serde(rename = "reject")]
    Reject,

    /// At least one signature of the image must be verified by the given key.
    #[serde(rename = "signedBy")]
    SignedBy(SignedByParameters),

    /// The image must carry a sigstore signature verified by the given key.
    #[serde(rename = "sigstoreSigned")]
    SigstoreSigned(SigstoreParameters),
}

impl PolicyReqType {
    /// Whether checking the requirement needs a signature verifier.
    pub fn needs_signature(&self) -> bool {
        matches!(
            self,
            PolicyReqType::SignedBy(_) | PolicyReqType::SigstoreSigned(_)
        )
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, Default)]
pub struct SignedByParameters {
    /// What kind of key `keyPath`/`keyData` is, e.g. `GPGKeys`.
    #[serde(rename = "keyType")]
    pub key_type: String,

    // Exactly one of keyPath, keyPaths and keyData can be specified.
    #[serde(rename = "keyPath")]
    pub key_path: Option<String>,
    #[serde(default, rename = "keyPaths")]
    pub key_paths: Vec<String>,
    /// Base64-encoded.
    #[serde(rename = "keyData")]
    pub key_data: Option<String>,

    /// What image identity the signature must be claiming about the image.
    /// Defaults to `matchRepoDigestOrExact`.
    #[serde(default, rename = "signedIdentity")]
    pub signed_identity: Option<PolicyReqMatchType>,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Default)]
pub struct SigstoreParameters {
    #[serde(rename = "keyPath")]
    pub key_path: Option<String>,
    #[serde(rename = "keyData")]
    pub key_data: Option<String>,

    /// Defaults to `matchRepoDigestOrExact`.
    #[serde(default, rename = "signedIdentity")]
    pub signed_identity: Option<PolicyReqMatchType>,
}

/// The set of image identities a signature may claim and still be accepted.
#[derive(Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum PolicyReqMatchType {
    #[serde(rename = "matchExact")]
    MatchExact,
    #[serde(rename = "matchRepoDigestOrExact")]
    MatchRepoDigestOrExact,
    #[serde(rename = "matchRepository")]
    MatchRepository,
    #[serde(rename = "exactReference")]
    ExactReference {
        #[serde(rename = "dockerReference")]
        docker_reference: String,
    },
    #[serde(rename = "exactRepository")]
    ExactRepository {
        #[serde(rename = "dockerRepository")]
        docker_repository: String,
    },
    #[serde(rename = "remapIdentity")]
    RemapIdentity {
        prefix: String,
        #[serde(rename = "signedPrefix")]
        signed_prefix: String,
    },
}
