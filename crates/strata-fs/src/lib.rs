//! strata-fs - capability-gated filesystem access over UDS.
//!
//! Every operation requires a valid capability token scoped to the `fs`
//! service. Authorization is delegated to the centralized policy core;
//! handles are bound to the capability that opened them, and revocation
//! makes both fresh operations and existing handles unusable.

pub mod service;
