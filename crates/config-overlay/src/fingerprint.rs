//! Connection settings for the data broker and their fingerprint.
//!
//! The overlay only restarts its sync stream when the fingerprint of these
//! settings changes, so unrelated configuration updates never reconnect.

use std::fmt;
use std::time::Duration;

use sha2::{Digest, Sha256};
use url::Url;

use crate::options::{Options, OptionsError};

/// Everything needed to open a channel to the data broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Broker addresses.
    pub addrs: Vec<Url>,
    /// Server name expected in the broker certificate.
    pub override_certificate_name: String,
    /// Inline PEM certificate authority.
    pub ca: String,
    /// Path to a PEM certificate authority.
    pub ca_file: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// DNS round-robin across addresses.
    pub client_dns_round_robin: bool,
    /// Plaintext transport.
    pub with_insecure: bool,
    /// Service scope announced to the broker.
    pub service_name: String,
    /// Key used to sign broker requests.
    pub signed_jwt_key: Vec<u8>,
}

impl ConnectionOptions {
    /// Resolves connection settings from proxy options.
    ///
    /// Fails when the address list or the shared key cannot be decoded.
    pub fn from_options(options: &Options) -> Result<Self, OptionsError> {
        Ok(Self {
            addrs: options.databroker_urls()?,
            override_certificate_name: options.override_certificate_name.clone(),
            ca: options.ca.clone(),
            ca_file: options.ca_file.clone(),
            request_timeout: options.grpc_client_timeout,
            client_dns_round_robin: options.grpc_client_dns_round_robin,
            with_insecure: options.grpc_insecure,
            service_name: options.services.clone(),
            signed_jwt_key: options.decoded_shared_key()?,
        })
    }

    /// Computes the fingerprint of these settings.
    pub fn fingerprint(&self) -> ConnectionFingerprint {
        let mut hasher = Sha256::new();
        hash_bytes(&mut hasher, &(self.addrs.len() as u64).to_be_bytes());
        for addr in &self.addrs {
            hash_bytes(&mut hasher, addr.as_str().as_bytes());
        }
        hash_bytes(&mut hasher, self.override_certificate_name.as_bytes());
        hash_bytes(&mut hasher, self.ca.as_bytes());
        hash_bytes(&mut hasher, self.ca_file.as_bytes());
        hash_bytes(&mut hasher, &self.request_timeout.as_nanos().to_be_bytes());
        hash_bytes(&mut hasher, &[self.client_dns_round_robin as u8]);
        hash_bytes(&mut hasher, &[self.with_insecure as u8]);
        hash_bytes(&mut hasher, self.service_name.as_bytes());
        hash_bytes(&mut hasher, &self.signed_jwt_key);
        ConnectionFingerprint(hasher.finalize().into())
    }
}

/// SHA-256 digest over [`ConnectionOptions`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionFingerprint([u8; 32]);

impl fmt::Display for ConnectionFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ConnectionFingerprint {
    /// Abbreviates the digest to keep log lines short.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionFingerprint({})", &hex::encode(self.0)[..12])
    }
}

/// Length-prefixes each field so neighbouring values cannot alias.
fn hash_bytes(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}
