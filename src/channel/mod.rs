//! Multiplexed channel and event fan-out.

mod dispatch;
mod rpc;

pub use dispatch::{EventDispatcher, EventListener, EventStream, ListenerToken};
pub use rpc::{CallError, PendingCall, RpcChannel};
