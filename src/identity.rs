// Copyright (c) 2026 Tox Secure Transport Contributors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! Long-term local identity: a Noise X25519 static keypair for the
//! handshake plus an independent Ed25519 signing keypair for signed version
//! negotiation (spec §4.4). The two keys serve different cryptographic
//! roles and are never derived from one another.

use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use std::fs;
use std::io::Write as _;
use std::path::Path;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

const FILE_MAGIC: &[u8; 8] = b"TXIDENT1";

/// Identity persistence and generation errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Underlying filesystem operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// On-disk identity file was truncated or carried the wrong magic.
    #[error("malformed identity file")]
    Malformed,
    /// A cryptographic primitive rejected its input (key generation or parse).
    #[error("cryptographic failure")]
    Crypto,
}

/// Noise X25519 static keypair, used only for the Noise-IK handshake.
#[derive(ZeroizeOnDrop)]
pub struct NoiseStaticKeypair {
    private: [u8; 32],
    #[zeroize(skip)]
    public: [u8; 32],
}

impl NoiseStaticKeypair {
    /// Raw private key bytes, as `snow` expects them.
    pub fn private_bytes(&self) -> &[u8; 32] {
        &self.private
    }

    /// Raw public key bytes.
    pub fn public_bytes(&self) -> &[u8; 32] {
        &self.public
    }
}

/// The crate's local identity: one keypair per cryptographic role.
pub struct LocalIdentity {
    /// Handshake static keypair (X25519, via `snow`'s DH backend).
    pub noise: NoiseStaticKeypair,
    /// Signing keypair (Ed25519), used for `SIGNED` negotiation mode.
    signing: Ed25519KeyPair,
    signing_pkcs8: Vec<u8>,
}

impl LocalIdentity {
    /// Generate a fresh identity; neither key touches disk.
    pub fn generate() -> Result<Self, IdentityError> {
        let rng = SystemRandom::new();

        let builder = snow::Builder::new(
            "Noise_IK_25519_ChaChaPoly_SHA256"
                .parse()
                .map_err(|_| IdentityError::Crypto)?,
        );
        let keypair = builder.generate_keypair().map_err(|_| IdentityError::Crypto)?;
        let mut private = [0u8; 32];
        let mut public = [0u8; 32];
        private.copy_from_slice(&keypair.private);
        public.copy_from_slice(&keypair.public);

        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| IdentityError::Crypto)?;
        let signing =
            Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).map_err(|_| IdentityError::Crypto)?;

        Ok(Self {
            noise: NoiseStaticKeypair { private, public },
            signing,
            signing_pkcs8: pkcs8.as_ref().to_vec(),
        })
    }

    /// Load an identity from `path`, generating and persisting a fresh one
    /// if the file does not exist.
    pub fn load_or_generate(path: &Path) -> Result<Self, IdentityError> {
        if path.exists() {
            Self::load(path)
        } else {
            let identity = Self::generate()?;
            identity.save(path)?;
            Ok(identity)
        }
    }

    /// Load an identity from an on-disk file written by `save`.
    pub fn load(path: &Path) -> Result<Self, IdentityError> {
        let bytes = fs::read(path)?;
        if bytes.len() < 8 + 32 + 32 + 2 || &bytes[..8] != FILE_MAGIC {
            return Err(IdentityError::Malformed);
        }
        let mut private = [0u8; 32];
        let mut public = [0u8; 32];
        private.copy_from_slice(&bytes[8..40]);
        public.copy_from_slice(&bytes[40..72]);
        let pkcs8_len = u16::from_be_bytes([bytes[72], bytes[73]]) as usize;
        let pkcs8 = bytes
            .get(74..74 + pkcs8_len)
            .ok_or(IdentityError::Malformed)?
            .to_vec();
        let signing =
            Ed25519KeyPair::from_pkcs8(&pkcs8).map_err(|_| IdentityError::Malformed)?;

        Ok(Self {
            noise: NoiseStaticKeypair { private, public },
            signing,
            signing_pkcs8: pkcs8,
        })
    }

    /// Persist the identity to `path` with an atomic tmp-then-rename write
    /// and, on Unix, owner-only permissions.
    pub fn save(&self, path: &Path) -> Result<(), IdentityError> {
        let mut out = Vec::with_capacity(8 + 32 + 32 + 2 + self.signing_pkcs8.len());
        out.extend_from_slice(FILE_MAGIC);
        out.extend_from_slice(&self.noise.private);
        out.extend_from_slice(&self.noise.public);
        out.extend_from_slice(&(self.signing_pkcs8.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.signing_pkcs8);

        atomic_write_private(path, &out)?;
        out.zeroize();
        Ok(())
    }

    /// Ed25519 public key bytes, carried in signed version-negotiation
    /// messages so the peer can verify `sign`.
    pub fn signing_public_key(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.signing.public_key().as_ref());
        out
    }

    /// Sign `message` with the Ed25519 signing key.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let mut out = [0u8; 64];
        out.copy_from_slice(self.signing.sign(message).as_ref());
        out
    }
}

/// Verify an Ed25519 signature against a raw 32-byte public key.
pub fn verify_signature(public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    UnparsedPublicKey::new(&ED25519, public_key.as_slice())
        .verify(message, signature.as_slice())
        .is_ok()
}

fn set_private_perms_best_effort(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
}

fn atomic_write_private(path: &Path, bytes: &[u8]) -> Result<(), IdentityError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.to_path_buf();
    tmp.set_extension("tmp");
    {
        let mut f = fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    set_private_perms_best_effort(&tmp);
    fs::rename(&tmp, path)?;
    set_private_perms_best_effort(path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_identity_signs_and_verifies() {
        let identity = LocalIdentity::generate().unwrap();
        let sig = identity.sign(b"hello peer");
        assert!(verify_signature(
            &identity.signing_public_key(),
            b"hello peer",
            &sig
        ));
        assert!(!verify_signature(
            &identity.signing_public_key(),
            b"tampered",
            &sig
        ));
    }

    #[test]
    fn save_and_load_round_trips_both_keypairs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.bin");

        let original = LocalIdentity::generate().unwrap();
        original.save(&path).unwrap();

        let loaded = LocalIdentity::load(&path).unwrap();
        assert_eq!(
            loaded.noise.private_bytes(),
            original.noise.private_bytes()
        );
        assert_eq!(loaded.noise.public_bytes(), original.noise.public_bytes());
        assert_eq!(loaded.signing_public_key(), original.signing_public_key());

        let sig = loaded.sign(b"round trip");
        assert!(verify_signature(
            &original.signing_public_key(),
            b"round trip",
            &sig
        ));
    }

    #[test]
    fn load_or_generate_persists_on_first_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.bin");

        let first = LocalIdentity::load_or_generate(&path).unwrap();
        let second = LocalIdentity::load_or_generate(&path).unwrap();
        assert_eq!(first.noise.public_bytes(), second.noise.public_bytes());
    }

    #[test]
    fn load_rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.bin");
        fs::write(&path, b"too short").unwrap();
        assert!(matches!(
            LocalIdentity::load(&path),
            Err(IdentityError::Malformed)
        ));
    }
}
