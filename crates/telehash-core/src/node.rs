//! Remote peer representation

use crate::crypto::{self, CryptoError, RsaPublicKey};
use crate::types::Hashname;
use std::fmt;
use std::net::SocketAddr;

/// A remote peer: its RSA public key and, when known, a UDP endpoint.
///
/// The hashname is derived from the public key at construction. The
/// endpoint may be updated as routing learns better addresses; the key
/// and hashname never change.
#[derive(Clone)]
pub struct Node {
    public_key: RsaPublicKey,
    endpoint: Option<SocketAddr>,
    hashname: Hashname,
}

impl Node {
    pub fn new(public_key: RsaPublicKey, endpoint: Option<SocketAddr>) -> Result<Self, CryptoError> {
        let hashname = crypto::derive_hashname(&public_key)?;
        Ok(Self {
            public_key,
            endpoint,
            hashname,
        })
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    pub fn hashname(&self) -> Hashname {
        self.hashname
    }

    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.endpoint
    }

    pub fn set_endpoint(&mut self, endpoint: SocketAddr) {
        self.endpoint = Some(endpoint);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("hashname", &self.hashname)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Crypto;

    #[test]
    fn hashname_tracks_public_key() {
        let crypto = Crypto::seeded(21);
        let (_, public) = crypto.generate_rsa_keypair().unwrap();

        let node = Node::new(public.clone(), None).unwrap();
        assert_eq!(node.hashname(), crypto::derive_hashname(&public).unwrap());
        assert!(node.endpoint().is_none());
    }

    #[test]
    fn endpoint_is_mutable() {
        let crypto = Crypto::seeded(22);
        let (_, public) = crypto.generate_rsa_keypair().unwrap();

        let mut node = Node::new(public, None).unwrap();
        let addr: SocketAddr = "127.0.0.1:42424".parse().unwrap();
        node.set_endpoint(addr);
        assert_eq!(node.endpoint(), Some(addr));
    }
}
