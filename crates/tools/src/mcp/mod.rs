pub mod client;
pub mod transport;

pub use client::{parse_command_line, McpClient};
pub use transport::{
    CapabilityChannel, CapabilityTransport, ConnectionState, Connector, RemoteCapability,
    StdioConnector,
};
