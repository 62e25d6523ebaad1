//! townpass-bridge — obtain the caller identity from a native host embedding.
//!
//! A page inside a host webview can reach the host through several
//! incompatible mechanisms. The [`correlator::Correlator`] listens on all of
//! them, probes all of them, and resolves with the first answer the
//! [`identity`] normalizer recognizes. [`session::SessionClient`] then trades
//! that identity for a backend session.
//!
//! See `DESIGN.md` for the architecture.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;

pub mod host;
pub mod identity;
pub mod transport;

pub mod correlator;
pub mod session;
