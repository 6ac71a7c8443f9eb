// Copyright (c) 2024 The container-trust-plugin Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! An authorization plugin for the container engine that only lets image
//! pulls through when the trust policy accepts the image, and only by the
//! digest the policy was checked against.

pub mod authz;
pub mod config;
pub mod decision;
pub mod digest;
pub mod engine;
pub mod evaluator;
pub mod matcher;
pub mod policy;
pub mod qualify;
pub mod reference;
pub mod server;

mod error;
pub use error::*;

pub use authz::{AuthZRequest, AuthZResponse, TrustPlugin};
pub use config::PluginConfig;
pub use decision::{decide, Collaborators, Decision};
pub use matcher::InterceptedRequest;
pub use server::PluginServer;
