//! courier: a binary RPC server and client built on the serialization-tree
//! IR and its dictionary-compressing wire codec.
//!
//! Procedures are registered on a [`ServiceRegistry`] shared by every
//! transport (the binary server here, the HTTP adapters in courier-http).
//! Each connection is driven by a [`Responder`] state machine; the server
//! schedules connections onto an elastic worker pool.

mod client;
mod error;
pub mod logging;
mod registry;
mod responder;
mod server;

pub use client::RpcClient;
pub use error::{RemoteError, RpcError};
pub use registry::{
    procedure0, procedure1, procedure2, procedure3, procedure4, DispatchError, Procedure,
    ServiceRegistry,
};
pub use responder::Responder;
pub use server::{Runmode, RpcServer, ServerConfig, TlsSettings};

use sinfo::{Decompose, SerializationInfo};

/// Decomposes a value into a fresh anonymous tree; handy for building call
/// arguments.
pub fn to_si<T: Decompose + ?Sized>(value: &T) -> SerializationInfo {
    let mut si = SerializationInfo::new();
    value.decompose(&mut si);
    si
}
