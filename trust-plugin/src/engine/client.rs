// Copyright (c) 2024 The container-trust-plugin Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::{fs, path::PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Deserialize;
use tokio::net::UnixStream;
use url::form_urlencoded;

use super::{EngineHost, ImageEngine, RegistryListProvider};
use crate::reference::{Identifier, ImageReference};

const CERT_FILE: &str = "cert.pem";
const KEY_FILE: &str = "key.pem";
const CA_FILE: &str = "ca.pem";

/// Client certificates for a TCP engine endpoint.
#[derive(Clone, Debug)]
pub struct TlsOptions {
    /// Directory holding `cert.pem`, `key.pem` and optionally `ca.pem`.
    pub cert_path: PathBuf,
    /// Verify the engine's certificate.
    pub verify: bool,
}

enum Transport {
    Unix(PathBuf),
    Http {
        client: reqwest::Client,
        base_url: String,
    },
}

/// Talks to the engine API over its unix socket or over TCP.
pub struct EngineClient {
    transport: Transport,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EngineInfo {
    /// Only reported by engines supporting additional registries.
    #[serde(default)]
    registries: Option<Vec<RegistryEntry>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RegistryEntry {
    name: String,
}

#[derive(Deserialize)]
struct ErrorMessage {
    message: String,
}

/// One line of the JSON stream the engine sends while pulling.
#[derive(Deserialize)]
struct ProgressMessage {
    error: Option<String>,
    #[serde(rename = "errorDetail")]
    error_detail: Option<ErrorMessage>,
}

impl EngineClient {
    pub fn new(host: &EngineHost, tls: Option<TlsOptions>) -> Result<Self> {
        let transport = match host {
            EngineHost::Unix(path) => {
                if tls.is_some() {
                    warn!("Ignoring TLS certificates for unix socket {}", path.display());
                }
                Transport::Unix(path.clone())
            }
            EngineHost::Tcp { address, tls: https } => {
                let mut builder = reqwest::Client::builder();
                let scheme = match (&tls, https) {
                    (Some(tls), _) => {
                        builder = configure_tls(builder, tls)?;
                        "https"
                    }
                    (None, true) => "https",
                    (None, false) => "http",
                };

                Transport::Http {
                    client: builder.build().context("build engine http client")?,
                    base_url: format!("{scheme}://{address}"),
                }
            }
        };

        Ok(Self { transport })
    }

    /// Sends a bodyless request, returning the status code and the whole
    /// response body.
    async fn request(&self, method: &str, path_and_query: &str) -> Result<(u16, Vec<u8>)> {
        debug!("Engine request: {method} {path_and_query}");
        match &self.transport {
            Transport::Unix(socket) => {
                let stream = UnixStream::connect(socket)
                    .await
                    .with_context(|| format!("connect to engine at {}", socket.display()))?;
                let (mut sender, connection) = hyper::client::conn::handshake(stream)
                    .await
                    .context("HTTP handshake with engine failed")?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        debug!("Engine connection closed: {e}");
                    }
                });

                let request = hyper::Request::builder()
                    .method(hyper::Method::from_bytes(method.as_bytes())?)
                    .uri(path_and_query)
                    .header(hyper::header::HOST, "docker")
                    .body(hyper::Body::empty())?;
                let response = sender.send_request(request).await?;
                let status = response.status().as_u16();
                let body = hyper::body::to_bytes(response.into_body()).await?;
                Ok((status, body.to_vec()))
            }
            Transport::Http { client, base_url } => {
                let response = client
                    .request(
                        reqwest::Method::from_bytes(method.as_bytes())?,
                        format!("{base_url}{path_and_query}"),
                    )
                    .send()
                    .await
                    .with_context(|| format!("connect to engine at {base_url}"))?;
                let status = response.status().as_u16();
                let body = response.bytes().await?;
                Ok((status, body.to_vec()))
            }
        }
    }

    /// Like `request`, but a non-2xx status is an error carrying the
    /// engine's message.
    async fn checked_request(&self, method: &str, path_and_query: &str) -> Result<Vec<u8>> {
        let (status, body) = self.request(method, path_and_query).await?;
        if !(200..300).contains(&status) {
            let message = serde_json::from_slice::<ErrorMessage>(&body)
                .map(|e| e.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).trim().to_string());
            bail!("engine returned {status} for {method} {path_and_query}: {message}");
        }

        Ok(body)
    }
}

fn configure_tls(
    builder: reqwest::ClientBuilder,
    tls: &TlsOptions,
) -> Result<reqwest::ClientBuilder> {
    let mut pem = fs::read(tls.cert_path.join(CERT_FILE))
        .with_context(|| format!("read {CERT_FILE} in {}", tls.cert_path.display()))?;
    pem.push(b'\n');
    pem.extend(
        fs::read(tls.cert_path.join(KEY_FILE))
            .with_context(|| format!("read {KEY_FILE} in {}", tls.cert_path.display()))?,
    );
    let identity =
        reqwest::Identity::from_pem(&pem).map_err(|e| anyhow!("Error loading x509 key pair: {e}"))?;

    let mut builder = builder
        .identity(identity)
        .danger_accept_invalid_certs(!tls.verify);

    let ca = tls.cert_path.join(CA_FILE);
    if ca.exists() {
        let ca = fs::read(&ca).with_context(|| format!("read {}", ca.display()))?;
        builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&ca)?);
    }

    Ok(builder)
}

/// Query string for `POST /images/create`: the name plus the tag or digest.
fn pull_query(reference: &ImageReference) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    query.append_pair("fromImage", &reference.name());
    match reference.identifier() {
        Identifier::Tag(tag) => {
            query.append_pair("tag", tag);
        }
        Identifier::Digest(digest) => {
            query.append_pair("tag", &digest.to_string());
        }
        Identifier::Bare => {}
    }
    query.finish()
}

/// The engine reports pull failures inside a 200 response stream.
fn check_pull_stream(body: &[u8]) -> Result<()> {
    for line in body.split(|b| *b == b'\n').filter(|l| !l.is_empty()) {
        let Ok(message) = serde_json::from_slice::<ProgressMessage>(line) else {
            continue;
        };
        if let Some(error) = message.error_detail.map(|d| d.message).or(message.error) {
            bail!(error);
        }
    }

    Ok(())
}

#[async_trait]
impl RegistryListProvider for EngineClient {
    async fn registries(&self) -> Result<Vec<String>> {
        let body = self.checked_request("GET", "/info").await?;
        let info: EngineInfo = serde_json::from_slice(&body).context("parse engine info")?;

        Ok(info
            .registries
            .unwrap_or_default()
            .into_iter()
            .map(|r| r.name)
            .collect())
    }
}

#[async_trait]
impl ImageEngine for EngineClient {
    async fn pull(&self, reference: &ImageReference) -> Result<()> {
        info!("Pulling {reference}");
        let body = self
            .checked_request("POST", &format!("/images/create?{}", pull_query(reference)))
            .await?;
        check_pull_stream(&body)
    }

    async fn tag(&self, source: &ImageReference, target: &ImageReference) -> Result<()> {
        let tag = target
            .tag()
            .ok_or_else(|| anyhow!("tag target {target} has no tag"))?;
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("repo", &target.name())
            .append_pair("tag", tag)
            .finish();

        info!("Tagging {source} as {target}");
        self.checked_request("POST", &format!("/images/{source}/tag?{query}"))
            .await?;
        Ok(())
    }
}
