//! The authentication-provider contract.
//!
//! Credential validation itself is an external collaborator; the runtime
//! only drives the exchange and stores the established identity on the
//! session.

use tether_proto::messages::{Credential, Identity};
use tether_proto::RemotingError;

/// Validates the credential pairs of an `auth` envelope.
///
/// Returning `Err` fails the handshake with `auth_failed` and tears the
/// session down.
pub trait AuthProvider: Send + Sync {
    /// Validate `credentials` and produce the session identity.
    fn authenticate(&self, credentials: &[Credential]) -> Result<Identity, RemotingError>;
}

/// Plain functions work as providers.
impl<F> AuthProvider for F
where
    F: Fn(&[Credential]) -> Result<Identity, RemotingError> + Send + Sync,
{
    fn authenticate(&self, credentials: &[Credential]) -> Result<Identity, RemotingError> {
        self(credentials)
    }
}
