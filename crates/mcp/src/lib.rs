//! # Overlay MCP
//!
//! Client side of the tool server connection: JSON-RPC 2.0 envelopes, one per
//! line, over a child process's stdin/stdout.
//!
//! - [`protocol`]: envelope and MCP payload types
//! - [`transport`]: how a connection is obtained ([`Launcher`])
//! - [`pending`]: the table of requests awaiting a reply
//! - [`client`]: [`RpcClient`], correlation, timeouts, lifecycle

pub mod client;
pub mod pending;
pub mod protocol;
pub mod transport;

pub use client::{ClientOptions, RpcClient};
pub use pending::PendingTable;
pub use transport::{Connection, Launcher, PreparedLauncher, ProcessLauncher};
