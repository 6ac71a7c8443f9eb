// Copyright (c) 2024 The container-trust-plugin Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Image reference grammar.
//!
//! A reference is `[host[:port]/]path[:tag|@digest]`. Unlike the engine's
//! own parser, nothing is normalized here: a reference that names no
//! registry keeps `host == None` until [`crate::qualify`] decides which
//! registry it belongs to.

use std::{fmt, str::FromStr};

use lazy_static::lazy_static;
use regex::Regex;

use crate::{digest::Digest, Error, Result};

/// Tag applied to a reference that names neither a tag nor a digest.
pub const DEFAULT_TAG: &str = "latest";

const NAME_TOTAL_LENGTH_MAX: usize = 255;

lazy_static! {
    static ref PATH_COMPONENT: Regex =
        Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|[-]*)[a-z0-9]+)*$").expect("path component regex");
    static ref DOMAIN: Regex = Regex::new(
        r"^(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])(?:\.(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]))*(?::[0-9]+)?$"
    )
    .expect("domain regex");
    static ref TAG: Regex = Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("tag regex");
}

/// What a reference points at besides its name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identifier {
    /// Only a name was given.
    Bare,
    /// A mutable alias.
    Tag(String),
    /// An immutable content address.
    Digest(Digest),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageReference {
    host: Option<String>,
    path: String,
    identifier: Identifier,
}

/// A hostname is only recognized as such when it is unambiguous: it must
/// contain a `.` or a `:`, or be `localhost`. Everything else is the first
/// namespace of a repository on the default registry.
pub fn is_valid_hostname(hostname: &str) -> bool {
    !hostname.is_empty()
        && !hostname.contains('/')
        && (hostname.contains('.') || hostname.contains(':') || hostname == "localhost")
}

impl ImageReference {
    /// Parse `[host/]path[:tag][@digest]`. When both a tag and a digest are
    /// present the digest wins, as it does when the engine pulls.
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() {
            return Err(Error::InvalidReference(
                "repository name must have at least one component".into(),
            ));
        }

        let (remainder, digest) = match input.split_once('@') {
            Some((name, digest)) => (name, Some(Digest::from_str(digest)?)),
            None => (input, None),
        };

        // A `:` after the last `/` starts a tag, anything before is a port.
        let (name, tag) = match remainder.rfind(':') {
            Some(pos) if !remainder[pos..].contains('/') => {
                (&remainder[..pos], Some(&remainder[pos + 1..]))
            }
            _ => (remainder, None),
        };

        let (host, path) = split_host(name);
        let reference = Self {
            host: host.map(str::to_string),
            path: path.to_string(),
            identifier: Identifier::Bare,
        };
        reference.validate_name(input)?;

        match (digest, tag) {
            (Some(digest), _) => Ok(reference.with_digest(digest)),
            (None, Some(tag)) => reference.with_tag(tag),
            (None, None) => Ok(reference),
        }
    }

    fn validate_name(&self, input: &str) -> Result<()> {
        if let Some(host) = &self.host {
            if !DOMAIN.is_match(host) {
                return Err(Error::InvalidReference(input.to_string()));
            }
        }

        if self.path.split('/').any(|c| !PATH_COMPONENT.is_match(c)) {
            if self.path.to_lowercase() != self.path {
                return Err(Error::InvalidReference(format!(
                    "repository name must be lowercase: {input}"
                )));
            }
            return Err(Error::InvalidReference(input.to_string()));
        }

        if self.name().len() > NAME_TOTAL_LENGTH_MAX {
            return Err(Error::InvalidReference(format!(
                "repository name must not be more than {NAME_TOTAL_LENGTH_MAX} characters"
            )));
        }

        Ok(())
    }

    /// Registry host, if the reference names one.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Repository path below the registry host.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `host/path`, or just `path` for an unqualified reference.
    pub fn name(&self) -> String {
        match &self.host {
            Some(host) => format!("{host}/{}", self.path),
            None => self.path.clone(),
        }
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.identifier {
            Identifier::Tag(tag) => Some(tag),
            _ => None,
        }
    }

    pub fn digest(&self) -> Option<&Digest> {
        match &self.identifier {
            Identifier::Digest(digest) => Some(digest),
            _ => None,
        }
    }

    pub fn is_name_only(&self) -> bool {
        self.identifier == Identifier::Bare
    }

    pub fn is_fully_qualified(&self) -> bool {
        self.host.is_some()
    }

    /// Same name, pointing at `tag`. Any previous tag or digest is dropped.
    pub fn with_tag(self, tag: &str) -> Result<Self> {
        if !TAG.is_match(tag) {
            return Err(Error::InvalidReference(format!("invalid tag format: {tag:?}")));
        }

        Ok(Self {
            identifier: Identifier::Tag(tag.to_string()),
            ..self
        })
    }

    /// Same name, pointing at `digest`. Any previous tag or digest is dropped.
    pub fn with_digest(self, digest: Digest) -> Self {
        Self {
            identifier: Identifier::Digest(digest),
            ..self
        }
    }

    pub fn with_default_tag(self) -> Self {
        match self.identifier {
            Identifier::Bare => Self {
                identifier: Identifier::Tag(DEFAULT_TAG.to_string()),
                ..self
            },
            _ => self,
        }
    }

    /// Same tag or digest, under `host`.
    pub fn with_host(self, host: &str) -> Result<Self> {
        if !is_valid_hostname(host) || !DOMAIN.is_match(host) {
            return Err(Error::InvalidHostname(host.to_string()));
        }

        Ok(Self {
            host: Some(host.to_string()),
            ..self
        })
    }
}

/// Split a repository name into its registry host and the rest. The host
/// is `None` when the leading component is not a valid hostname.
fn split_host(name: &str) -> (Option<&str>, &str) {
    match name.split_once('/') {
        Some((host, rest)) if is_valid_hostname(host) => (Some(host), rest),
        _ => (None, name),
    }
}

impl FromStr for ImageReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        match &self.identifier {
            Identifier::Bare => Ok(()),
            Identifier::Tag(tag) => write!(f, ":{tag}"),
            Identifier::Digest(digest) => write!(f, "@{digest}"),
        }
    }
}
