//! Request/response bridge to Home Assistant's MCP server
//!
//! Opens the server-push stream, learns the submission endpoint from it,
//! performs the MCP handshake and then correlates POSTed requests with the
//! replies that come back on the stream.

mod connector;
mod pending;
pub mod protocol;
mod transport;

pub use connector::McpBridge;
pub use pending::{PendingGuard, PendingRequests, Reply};
pub use protocol::{JsonRpcRequest, OutboundCommand, ToolDescriptor, MCP_PROTOCOL_VERSION};
pub use transport::{HttpTransport, LineStream, McpTransport};
