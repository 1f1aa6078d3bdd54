//! # PSHELL
//!
//! An embedded, introspective command shell for host processes. Register
//! commands against a [`server::Server`], run it over UDP, TCP, a UNIX
//! datagram socket, or in-process ("LOCAL"), and drive it either
//! interactively or as a tiny binary RPC from another process via
//! [`control::ControlClient`].

pub mod args;
pub mod config;
pub mod control;
pub mod coordination;
pub mod error;
pub mod line_editor;
pub mod logging;
pub mod message;
pub mod registry;
pub mod server;
pub mod sink;

pub use control::ControlClient;
pub use error::ControlResult;
pub use message::{Message, MsgType};
pub use registry::{CommandFn, Registry};
pub use server::{DispatchMode, Server, ServerType, Transport};
pub use sink::OutputSink;

/// The current version of this crate, surfaced over the wire by the
/// `queryVersion` introspection query.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
