//! HTTP/JSON-RPC front end for the sirrah execution gateway.
pub mod rpc_gateway;

pub use rpc_gateway::*;
