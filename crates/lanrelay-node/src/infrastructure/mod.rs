//! Infrastructure layer for a LanRelay node.
//!
//! Contains OS-facing adapters: UDP and TCP sockets, input injection
//! back-ends, and file-system storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `lanrelay_core`, but MUST NOT be imported by the `application` layer
//! outside of tests.

pub mod input_injection;
pub mod network;
pub mod storage;
