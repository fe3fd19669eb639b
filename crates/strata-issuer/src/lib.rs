//! strata-issuer - mints, introspects, and revokes capability tokens.
//!
//! The issuer holds the node's Ed25519 signing keypair for its process
//! lifetime, publishes the verification half to the runtime directory, and
//! maintains the authoritative revoked-capability set. Revocations fan out
//! to resource services as idempotent notifications retried until
//! acknowledged.

pub mod notifier;
pub mod service;
