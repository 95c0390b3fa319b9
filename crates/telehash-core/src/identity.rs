//! Local node identity

use crate::crypto::{self, Crypto, CryptoError, RsaPrivateKey, RsaPublicKey};
use crate::types::Hashname;
use std::fmt;

/// The local RSA keypair and its derived hashname.
///
/// Created once per process and supplied at switch construction;
/// immutable thereafter.
#[derive(Clone)]
pub struct Identity {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    hashname: Hashname,
}

impl Identity {
    /// Generate a fresh identity.
    pub fn generate(crypto: &Crypto) -> Result<Self, CryptoError> {
        let (private_key, public_key) = crypto.generate_rsa_keypair()?;
        Self::from_keys(private_key, public_key)
    }

    /// Assemble an identity from previously stored keys.
    pub fn from_keys(
        private_key: RsaPrivateKey,
        public_key: RsaPublicKey,
    ) -> Result<Self, CryptoError> {
        let hashname = crypto::derive_hashname(&public_key)?;
        Ok(Self {
            private_key,
            public_key,
            hashname,
        })
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    pub fn hashname(&self) -> Hashname {
        self.hashname
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("hashname", &self.hashname)
            .finish_non_exhaustive()
    }
}
