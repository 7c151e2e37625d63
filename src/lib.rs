//! An LSP client core: process supervision over child stdio, a JSON-RPC
//! 2.0 transport framed on `Content-Length` headers, per-document version
//! tracking with incremental `didChange` encoding, and a range-tracked
//! diagnostic store that keeps diagnostics anchored to their source
//! ranges across interleaving edits.
//!
//! See [`client::LspClient`] for the main entry point and
//! [`client::LspManager`] for running one client per language.

pub mod changerecorder;
pub mod client;
pub mod config;
pub mod coord;
pub mod diagnostics;
pub mod error;
pub mod jsonrpc;
pub mod primitives;
pub mod process;
pub mod rangemap;
pub mod uri;

pub use client::{LspClient, LspClientOptions, LspManager};
pub use error::{Error, Result, StartServerError};
