//! Testing utilities and mock implementations
//!
//! Mock collaborators for exercising the transport without sockets or DNS.

pub mod mocks;

pub use mocks::*;
