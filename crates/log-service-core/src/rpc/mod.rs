//! Persistent-connection RPC protocol.
//!
//! Length-prefixed JSON-RPC 2.0 over TCP. Startup registers named methods on
//! a [`Registry`], freezes it into a [`DispatchTable`] and hands that to an
//! [`RpcServer`], which serves every accepted connection on its own task.

pub mod client;
pub mod dispatch;
pub mod protocol;
pub mod server;
pub mod service;

pub use client::RpcClient;
pub use dispatch::{parse_params, DispatchTable, MethodFuture, Registry, RpcDispatch, HEALTH_CHECK};
pub use protocol::{read_frame, write_frame, RpcError, RpcRequest, RpcResponse};
pub use server::{
    classify_accept_error, AcceptFailure, Acceptor, ConnectionTracker, RpcServer, RpcServerHandle,
};
pub use service::LogService;
