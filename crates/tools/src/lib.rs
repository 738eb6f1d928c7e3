pub mod mcp;

pub use mcp::{
    CapabilityChannel, CapabilityTransport, ConnectionState, Connector, RemoteCapability,
    StdioConnector,
};
