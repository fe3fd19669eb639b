//! Key management and the capability token codec.
//!
//! The issuer holds an Ed25519 keypair for the lifetime of its process. The
//! verification half is published to a well-known file under the runtime
//! directory and loaded once by each resource service at startup
//! ([`keys`]). Tokens are PASETO `v2.public` strings: claims signed with the
//! issuer key and verifiable by anyone holding the public key ([`token`]).

pub mod keys;
pub mod token;

pub use keys::{
    generate_keypair, load_public_key, wait_for_public_key, write_public_key, KeyError,
};
pub use token::{sign, verify, TokenError, V2_PUBLIC_HEADER};
