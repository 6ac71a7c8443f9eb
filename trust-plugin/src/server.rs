// Copyright (c) 2024 The container-trust-plugin Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! The plugin endpoint the engine connects to.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use hyper::{
    header, server::conn::Http, service::service_fn, Body, Method, Request, Response, StatusCode,
};
use log::{debug, error, info};
use serde::Serialize;
use tokio::{fs, net::UnixListener};

use crate::authz::{AuthZRequest, AuthZResponse, TrustPlugin};

pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.2+json";

pub const ACTIVATE_URL: &str = "/Plugin.Activate";
pub const AUTHZ_REQ_URL: &str = "/AuthZPlugin.AuthZReq";
pub const AUTHZ_RES_URL: &str = "/AuthZPlugin.AuthZRes";

const AUTHZ_CAPABILITY: &str = "authz";

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Manifest {
    implements: Vec<&'static str>,
}

pub struct PluginServer {
    socket: PathBuf,
    plugin: Arc<TrustPlugin>,
}

impl PluginServer {
    pub fn new(socket: impl Into<PathBuf>, plugin: TrustPlugin) -> Self {
        Self {
            socket: socket.into(),
            plugin: Arc::new(plugin),
        }
    }

    /// Serve until the listener fails. Each connection is handled on its
    /// own task, so a pull the plugin triggers itself can be authorized
    /// while the original request is still pending.
    pub async fn run(self) -> Result<()> {
        if let Some(parent) = self.socket.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create socket directory {}", parent.display()))?;
        }
        if self.socket.exists() {
            fs::remove_file(&self.socket)
                .await
                .with_context(|| format!("remove stale socket {}", self.socket.display()))?;
        }

        let listener = UnixListener::bind(&self.socket)
            .with_context(|| format!("bind {}", self.socket.display()))?;
        info!("Listening on {}", self.socket.display());

        loop {
            let (stream, _) = listener.accept().await.context("accept connection")?;
            let plugin = self.plugin.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let plugin = plugin.clone();
                    async move { route(&plugin, req).await }
                });
                if let Err(e) = Http::new().serve_connection(stream, service).await {
                    error!("Plugin connection failed: {e}");
                }
            });
        }
    }
}

fn json_response<T: Serialize>(body: &T) -> Result<Response<Body>> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)
        .body(Body::from(serde_json::to_vec(body)?))?)
}

fn not_found() -> Result<Response<Body>> {
    Ok(Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::from("URL NOT FOUND"))?)
}

fn not_allowed() -> Result<Response<Body>> {
    Ok(Response::builder()
        .status(StatusCode::METHOD_NOT_ALLOWED)
        .body(Body::from("Method Not Allowed"))?)
}

/// Decode an authorization request. A body that can't be decoded is
/// answered with a deny rather than an HTTP error.
async fn authz_request(req: Request<Body>) -> std::result::Result<AuthZRequest, AuthZResponse> {
    let body = hyper::body::to_bytes(req.into_body())
        .await
        .map_err(|e| AuthZResponse::error(format!("read request body: {e}")))?;
    serde_json::from_slice(&body)
        .map_err(|e| AuthZResponse::error(format!("decode authorization request: {e}")))
}

pub async fn route(plugin: &TrustPlugin, req: Request<Body>) -> Result<Response<Body>> {
    debug!("Plugin call: {} {}", req.method(), req.uri().path());
    if req.method() != Method::POST {
        return not_allowed();
    }

    let path = req.uri().path().to_string();
    match path.as_str() {
        ACTIVATE_URL => json_response(&Manifest {
            implements: vec![AUTHZ_CAPABILITY],
        }),
        AUTHZ_REQ_URL => match authz_request(req).await {
            Ok(request) => json_response(&plugin.authz_req(&request).await),
            Err(response) => json_response(&response),
        },
        AUTHZ_RES_URL => match authz_request(req).await {
            Ok(request) => json_response(&plugin.authz_res(&request)),
            Err(response) => json_response(&response),
        },
        _ => not_found(),
    }
}
