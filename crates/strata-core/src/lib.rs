//! # strata-core
//!
//! Core library for Strata - a node-local capability runtime substrate.
//!
//! Strata mediates access to host resources through cryptographically signed
//! capability tokens. This crate provides the building blocks shared by every
//! Strata service:
//!
//! - **Capability model**: signed claims with service scoping, permission
//!   lists, and embedded constraints
//! - **Token codec**: PASETO `v2.public` signing and verification over
//!   Ed25519
//! - **Policy core**: the centralized deny-by-default authorization decision
//!   plus constraint enforcement (path containment, request rate)
//! - **Revocation**: monotonic revoked-capability sets with an append-only
//!   on-disk log
//! - **Handle table**: binds granted resource accesses to the issuing
//!   capability
//! - **IPC**: length-prefixed JSON framing over Unix domain sockets
//!
//! ## Example
//!
//! ```rust
//! use strata_core::capability::{Capability, Constraints};
//! use strata_core::crypto::{generate_keypair, sign, verify};
//!
//! let key = generate_keypair();
//! let cap = Capability::new(
//!     "fs",
//!     vec!["open".into()],
//!     vec!["fs.open".into()],
//!     Constraints::default(),
//!     chrono::Duration::seconds(3600),
//! );
//! let token = sign(&cap, &key).unwrap();
//! let claims = verify(&token, &key.verifying_key()).unwrap();
//! assert_eq!(claims.id, cap.id);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audit;
pub mod capability;
pub mod config;
pub mod crypto;
pub mod handle;
pub mod ipc;
pub mod policy;
pub mod revocation;

pub use capability::{Capability, Constraints};
pub use handle::HandleTable;
pub use policy::{AuthContext, PolicyEngine, PolicyError};
pub use revocation::RevocationStore;
