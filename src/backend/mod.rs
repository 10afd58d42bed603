//! Backend RPC subsystem.
//!
//! # Data Flow
//! ```text
//! locator.rs (repository → backend descriptor)
//!     → rpc.rs (start PostUploadPackWithSidechannel, get correlation token)
//!     → sidechannel.rs (dial same address, present token, raw duplex bytes)
//!     → rpc.rs (await the call's final reply)
//!
//! Both connections: connect.rs (tcp:// or unix://) → wire.rs (hello frame)
//! ```
//!
//! # Design Decisions
//! - The call and the sidechannel are separate capabilities (traits) so the
//!   bridge can be driven by in-memory fakes
//! - Every blocking step takes the exchange context and fails fast once it
//!   is cancelled

pub mod connect;
pub mod descriptor;
pub mod locator;
pub mod rpc;
pub mod sidechannel;
pub mod wire;

pub use descriptor::{BackendAddress, BackendDescriptor};
pub use locator::{BackendLocator, LocateError, StaticLocator, UploadPackTarget};
pub use rpc::{BackendStatus, PendingCall, RpcClient, RpcError, UploadPackCall, UploadPackRpc};
pub use sidechannel::{
    BackendDialer, Sidechannel, SidechannelDialer, SidechannelError, SidechannelStatus,
};
pub use wire::{Repository, SidechannelId};
