// Copyright (c) 2024 The container-trust-plugin Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Recognizes the engine API calls that pull an image.
//!
//! A pull is `POST [/vX.Y]/images/create?fromImage=<repository>&tag=<tag>`.
//! The `tag` parameter may carry a digest instead of a tag, and clients
//! may also fold the tag or digest into `fromImage` itself.

use std::str::FromStr;

use percent_encoding::percent_decode_str;
use regex::Regex;
use url::form_urlencoded;

use crate::{digest::Digest, Error, Result};

const PULL_METHOD: &str = "POST";

/// One call the engine is about to execute, as handed over by the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterceptedRequest {
    pub method: String,
    pub uri: String,
}

impl InterceptedRequest {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
        }
    }
}

/// The tag or digest a pull asks for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    Tag(String),
    Digest(Digest),
}

impl Token {
    /// A token that parses as a digest is a digest, anything else is a tag.
    pub fn classify(raw: &str) -> Self {
        match Digest::from_str(raw) {
            Ok(digest) => Token::Digest(digest),
            Err(_) => Token::Tag(raw.to_string()),
        }
    }
}

/// The raw repository and tag-or-digest pulled by a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawReferenceMatch {
    pub repository: String,
    pub token: Token,
}

pub struct RequestMatcher {
    pull_path: Regex,
}

impl Default for RequestMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestMatcher {
    pub fn new() -> Self {
        Self {
            pull_path: Regex::new(r"^(?:/v[0-9]+(?:\.[0-9]+)*)?/images/create$")
                .expect("pull path regex"),
        }
    }

    /// `Ok(None)` means the request is not a pull and must pass through.
    pub fn match_request(&self, request: &InterceptedRequest) -> Result<Option<RawReferenceMatch>> {
        if request.method != PULL_METHOD {
            return Ok(None);
        }

        self.match_uri(&request.uri)
    }

    pub fn match_uri(&self, uri: &str) -> Result<Option<RawReferenceMatch>> {
        validate_escapes(uri)?;

        // The engine routes on the decoded path, so `/images%2Fcreate` is a
        // pull too.
        let (path, query) = uri.split_once('?').unwrap_or((uri, ""));
        let path = percent_decode_str(path)
            .decode_utf8()
            .map_err(|e| Error::MalformedRequest(format!("invalid UTF-8 in request path: {e}")))?;
        if !self.pull_path.is_match(&path) {
            return Ok(None);
        }

        let mut from_image = None;
        let mut tag = None;
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            if value.contains(char::REPLACEMENT_CHARACTER) {
                return Err(Error::MalformedRequest(format!(
                    "invalid UTF-8 in query parameter {key}"
                )));
            }
            match key.as_ref() {
                "fromImage" if from_image.is_none() => from_image = Some(value.into_owned()),
                "tag" if tag.is_none() => tag = Some(value.into_owned()),
                _ => {}
            }
        }

        // Imports (`fromSrc`) create images too but do not pull anything.
        let Some(from_image) = from_image else {
            return Ok(None);
        };

        let (repository, token) = match tag.filter(|t| !t.is_empty()) {
            Some(tag) => (from_image, tag),
            None => split_embedded_token(&from_image).ok_or(Error::AllTagsPull)?,
        };

        if repository.is_empty() {
            return Err(Error::MalformedRequest(
                "unable to find repository name and reference".into(),
            ));
        }

        Ok(Some(RawReferenceMatch {
            repository,
            token: Token::classify(&token),
        }))
    }
}

/// Split `repo@digest` or `repo:tag` into its parts.
fn split_embedded_token(from_image: &str) -> Option<(String, String)> {
    if let Some((repository, digest)) = from_image.split_once('@') {
        return Some((repository.to_string(), digest.to_string()));
    }

    let pos = from_image.rfind(':')?;
    if from_image[pos..].contains('/') {
        return None;
    }
    Some((
        from_image[..pos].to_string(),
        from_image[pos + 1..].to_string(),
    ))
}

/// Every `%` must introduce two hex digits.
fn validate_escapes(uri: &str) -> Result<()> {
    let bytes = uri.as_bytes();
    for (i, _) in uri.match_indices('%') {
        let escape = bytes.get(i + 1..i + 3);
        if !escape.is_some_and(|e| e.iter().all(u8::is_ascii_hexdigit)) {
            let end = (i + 3).min(uri.len());
            return Err(Error::MalformedRequest(format!(
                "invalid URL escape {:?}",
                String::from_utf8_lossy(&bytes[i..end])
            )));
        }
    }

    Ok(())
}
