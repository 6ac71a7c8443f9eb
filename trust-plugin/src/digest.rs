// Copyright (c) 2024 The container-trust-plugin Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Content digests in the `algorithm:hex` form used by image manifests.

use std::{fmt, str::FromStr};

use sha2::{Digest as _, Sha256, Sha384, Sha512};
use strum::{Display, EnumString};

use crate::{Error, Result};

#[derive(EnumString, Display, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Algorithm {
    #[strum(serialize = "sha256")]
    Sha256,
    #[strum(serialize = "sha384")]
    Sha384,
    #[strum(serialize = "sha512")]
    Sha512,
}

impl Algorithm {
    /// Length of the hex encoded value.
    fn encoded_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
            Algorithm::Sha384 => 96,
            Algorithm::Sha512 => 128,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Digest {
    algorithm: Algorithm,
    encoded: String,
}

impl Digest {
    /// Canonical sha256 digest of the given bytes, the identity a registry
    /// assigns to a manifest.
    pub fn sha256_of(content: &[u8]) -> Self {
        Self {
            algorithm: Algorithm::Sha256,
            encoded: format!("{:x}", Sha256::digest(content)),
        }
    }

    /// Digest of `content` computed with the same algorithm as `self`.
    pub fn recompute(&self, content: &[u8]) -> Self {
        let encoded = match self.algorithm {
            Algorithm::Sha256 => format!("{:x}", Sha256::digest(content)),
            Algorithm::Sha384 => format!("{:x}", Sha384::digest(content)),
            Algorithm::Sha512 => format!("{:x}", Sha512::digest(content)),
        };

        Self {
            algorithm: self.algorithm,
            encoded,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (algorithm, encoded) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidDigest(s.to_string()))?;
        let algorithm =
            Algorithm::from_str(algorithm).map_err(|_| Error::InvalidDigest(s.to_string()))?;

        if encoded.len() != algorithm.encoded_len()
            || !encoded
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(Error::InvalidDigest(s.to_string()));
        }

        Ok(Self {
            algorithm,
            encoded: encoded.to_string(),
        })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::rstest;

    use super::*;

    const EMPTY_SHA256: &str =
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[rstest]
    #[case(EMPTY_SHA256, true)]
    #[case("sha512:cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce47d0d13c5d85f2b0ff8318d2877eec2f63b931bd47417a81a538327af927da3e", true)]
    #[case("sha256:E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855", false)]
    #[case("sha256:e3b0c442", false)]
    #[case("md5:d41d8cd98f00b204e9800998ecf8427e", false)]
    #[case("latest", false)]
    #[case("v1:2", false)]
    #[case("", false)]
    fn parse_digest(#[case] input: &str, #[case] valid: bool) {
        assert_eq!(Digest::from_str(input).is_ok(), valid, "{input}");
    }

    #[test]
    fn digest_of_content() {
        let digest = Digest::sha256_of(b"");
        assert_eq!(digest.to_string(), EMPTY_SHA256);
        assert_eq!(digest.algorithm(), Algorithm::Sha256);

        let sha512 = Digest::from_str("sha512:cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce47d0d13c5d85f2b0ff8318d2877eec2f63b931bd47417a81a538327af927da3e").unwrap();
        assert_eq!(sha512.recompute(b""), sha512);
    }
}
