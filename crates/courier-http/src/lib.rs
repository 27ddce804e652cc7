//! HTTP adapters for the RPC stack.
//!
//! The same serialization-tree pipeline that feeds the binary protocol runs
//! here over HTTP: XML-RPC (`text/xml`) and JSON-RPC 2.0
//! (`application/json`) servers as axum routers, plus matching reqwest
//! clients. Framing, Content-Length and keep-alive are delegated to hyper;
//! only POST is routed.

mod error;
pub mod jsonrpc;
pub mod xmlrpc;

pub use error::HttpRpcError;
pub use jsonrpc::JsonRpcClient;
pub use xmlrpc::XmlRpcClient;
