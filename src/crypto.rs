// ED25519 key material and its canonical string encoding.
//
// Keys cross the context snapshot and secret boundaries as DER-prefixed hex,
// the same encoding the ledger SDKs print; in memory they are always typed.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::{Error, Result};

const PRIVATE_DER_PREFIX: &str = "302e020100300506032b657004220420";
const PUBLIC_DER_PREFIX: &str = "302a300506032b6570032100";

#[derive(Clone)]
pub struct PrivateKey(SigningKey);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

fn decode_32(encoded: &str, prefix: &str, what: &str) -> Result<[u8; 32]> {
    let trimmed = encoded.trim().trim_start_matches("0x").to_ascii_lowercase();
    let body = trimmed.strip_prefix(prefix).unwrap_or(&trimmed);
    let bytes = hex::decode(body).map_err(|e| Error::IllegalArgument {
        message: format!("{what} is not valid hex ({e})"),
        value: redact(encoded),
    })?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| Error::DataValidation {
        message: format!("{what} has the wrong length"),
        expected: "32 bytes".to_string(),
        found: format!("{} bytes", bytes.len()),
    })
}

fn redact(encoded: &str) -> String {
    format!("<{} chars>", encoded.len())
}

impl PrivateKey {
    pub fn generate() -> Self {
        Self(SigningKey::generate(&mut OsRng))
    }

    /// Parse a DER-prefixed or raw 32-byte hex ED25519 private key.
    pub fn from_str_ed25519(encoded: &str) -> Result<Self> {
        let bytes = decode_32(encoded, PRIVATE_DER_PREFIX, "private key")?;
        Ok(Self(SigningKey::from_bytes(&bytes)))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    /// Raw 32-byte hex, without the DER prefix.
    pub fn to_string_raw(&self) -> String {
        hex::encode(self.0.to_bytes())
    }
}

impl fmt::Display for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PRIVATE_DER_PREFIX}{}", self.to_string_raw())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PrivateKey")
            .field(&self.public_key().to_string())
            .finish()
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bytes() == other.0.to_bytes()
    }
}

impl Eq for PrivateKey {}

impl FromStr for PrivateKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_str_ed25519(s)
    }
}

impl PublicKey {
    pub fn from_str_ed25519(encoded: &str) -> Result<Self> {
        let bytes = decode_32(encoded, PUBLIC_DER_PREFIX, "public key")?;
        VerifyingKey::from_bytes(&bytes)
            .map(Self)
            .map_err(|e| Error::IllegalArgument {
                message: format!("public key is not a curve point ({e})"),
                value: redact(encoded),
            })
    }

    pub fn to_string_raw(&self) -> String {
        hex::encode(self.0.to_bytes())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PUBLIC_DER_PREFIX}{}", self.to_string_raw())
    }
}

impl FromStr for PublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_str_ed25519(s)
    }
}
