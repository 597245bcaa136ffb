//! PostgreSQL wire-level constants and binary COPY framing.
//!
//! The bulk engine never parses server messages itself; the driver behind
//! [`Connection`](crate::conn::Connection) owns the socket. This module only
//! knows how a binary COPY payload is laid out and which OIDs name which types.

pub mod copy;
pub mod types;

pub use types::{FormatCode, type_oid};
