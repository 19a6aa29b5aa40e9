//! Execution back-ends (C3): the ephemeral-container runner and the remote exploitation-
//! framework RPC runner, unified behind `ExecutionBackend`.

pub mod backend;
pub mod container;
pub mod rpc;

pub use backend::ExecutionBackend;
pub use container::ContainerBackend;
pub use rpc::{RpcBackend, RpcSession};
