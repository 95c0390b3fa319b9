//! On-disk identity storage
//!
//! An identity persists as two opaque DER blobs under a base filename:
//! `<name>.pub` (SPKI public key) and `<name>.key` (PKCS#8 private key).
//! A missing blob reads as [`StorageError::NotFound`] so the daemon can
//! generate and persist a fresh identity on first run.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use telehash_core::crypto::{self, CryptoError, RsaPublicKey};
use telehash_core::Identity;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("identity not found")]
    NotFound,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("bad key encoding: {0}")]
    Key(#[from] CryptoError),
}

fn public_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.pub"))
}

fn private_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.key"))
}

fn read_blob(path: &Path) -> Result<Vec<u8>, StorageError> {
    match fs::read(path) {
        Ok(blob) => Ok(blob),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StorageError::NotFound),
        Err(e) => Err(e.into()),
    }
}

/// Load an identity stored under `name` in `dir`.
pub fn read_identity(dir: &Path, name: &str) -> Result<Identity, StorageError> {
    let public = crypto::rsa_public_key_from_der(&read_blob(&public_path(dir, name))?)?;
    let private = crypto::rsa_private_key_from_der(&read_blob(&private_path(dir, name))?)?;
    Ok(Identity::from_keys(private, public)?)
}

/// Persist an identity under `name` in `dir`, creating the directory if
/// needed.
pub fn write_identity(dir: &Path, name: &str, identity: &Identity) -> Result<(), StorageError> {
    fs::create_dir_all(dir)?;
    fs::write(
        public_path(dir, name),
        crypto::rsa_public_key_der(identity.public_key())?,
    )?;
    fs::write(
        private_path(dir, name),
        crypto::rsa_private_key_der(identity.private_key())?,
    )?;
    Ok(())
}

/// Load a bare DER-encoded RSA public key, e.g. a seed's.
pub fn read_public_key(path: &Path) -> Result<RsaPublicKey, StorageError> {
    Ok(crypto::rsa_public_key_from_der(&read_blob(path)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use telehash_core::Crypto;

    #[test]
    fn identity_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let crypto = Crypto::seeded(51);
        let identity = Identity::generate(&crypto).unwrap();

        write_identity(dir.path(), "node", &identity).unwrap();
        let loaded = read_identity(dir.path(), "node").unwrap();
        assert_eq!(loaded.hashname(), identity.hashname());
    }

    #[test]
    fn missing_identity_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_identity(dir.path(), "absent"),
            Err(StorageError::NotFound)
        ));
    }

    #[test]
    fn public_key_blob_is_readable_alone() {
        let dir = tempfile::tempdir().unwrap();
        let crypto = Crypto::seeded(52);
        let identity = Identity::generate(&crypto).unwrap();
        write_identity(dir.path(), "seed", &identity).unwrap();

        let key = read_public_key(&dir.path().join("seed.pub")).unwrap();
        assert_eq!(&key, identity.public_key());
    }

    #[test]
    fn corrupt_blob_is_a_key_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("junk.pub"), b"not der").unwrap();
        assert!(matches!(
            read_public_key(&dir.path().join("junk.pub")),
            Err(StorageError::Key(_))
        ));
    }
}
