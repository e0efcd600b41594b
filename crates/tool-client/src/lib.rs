//! Tool-server client stack: the two-operation RPC protocol, the HTTP
//! transport, the provider registry with atomic catalog swaps, and the
//! per-caller access filter.

pub mod client;
pub mod filter;
pub mod protocol;
pub mod registry;

pub use client::{ClientError, HttpToolServer, ToolServer};
pub use filter::{visible_surface, ToolSurface};
pub use protocol::{RpcRequest, ToolSpec};
pub use registry::{Catalog, ProviderHealth, ToolEntry, ToolRegistry};
