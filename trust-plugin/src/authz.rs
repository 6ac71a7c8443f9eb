// Copyright (c) 2024 The container-trust-plugin Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! The authorization plugin callbacks.
//!
//! The engine asks before executing each API call (`AuthZReq`) and again
//! before returning its response (`AuthZRes`). Only the former is gated.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    decision::{decide, Collaborators, Decision},
    matcher::InterceptedRequest,
};

/// What the engine sends for every call. Fields the plugin has no use for
/// (headers, bodies, peer certificates) are ignored.
#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct AuthZRequest {
    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub user_authn_method: String,

    #[serde(default)]
    pub request_method: String,

    #[serde(default, rename = "RequestURI")]
    pub request_uri: String,
}

/// `Msg` explains an intentional deny, `Err` reports a failure. The engine
/// refuses the call in both cases.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct AuthZResponse {
    pub allow: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl AuthZResponse {
    pub fn allow() -> Self {
        Self {
            allow: true,
            ..Default::default()
        }
    }

    pub fn error(err: impl Into<String>) -> Self {
        Self {
            allow: false,
            msg: None,
            err: Some(err.into()),
        }
    }
}

impl From<Decision> for AuthZResponse {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Allow => Self::allow(),
            Decision::Deny(e) if e.is_policy_denial() => Self {
                allow: false,
                msg: Some(e.to_string()),
                err: None,
            },
            Decision::Deny(e) => Self::error(e.to_string()),
        }
    }
}

pub struct TrustPlugin {
    enabled: bool,
    collaborators: Collaborators,
}

impl TrustPlugin {
    /// A disabled plugin lets everything through.
    pub fn new(enabled: bool, collaborators: Collaborators) -> Self {
        Self {
            enabled,
            collaborators,
        }
    }

    pub async fn authz_req(&self, req: &AuthZRequest) -> AuthZResponse {
        if !self.enabled {
            debug!("Plugin disabled, allowing {} {}", req.request_method, req.request_uri);
            return AuthZResponse::allow();
        }

        let request = InterceptedRequest::new(&req.request_method, &req.request_uri);
        decide(&request, &self.collaborators).await.into()
    }

    pub fn authz_res(&self, _req: &AuthZRequest) -> AuthZResponse {
        AuthZResponse::allow()
    }
}
