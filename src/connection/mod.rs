//! Connection to the device server
//!
//! A [`ConnectionClient`] sends stamped JSON messages over a transport and
//! correlates the responses through a shared [`PendingRequests`] registry.

pub mod client;
pub mod registry;
pub mod transport;

pub use client::{
    ConnectionBuilder, ConnectionClient, ConnectionObserver, ConnectionState, StreamSender,
    WeakConnectionClient,
};
pub use registry::{ConnectionId, PendingRequests, REQUEST_ID_LEN, ResponseCallback, random_request_id};
pub use transport::{
    Connector, Frame, MemoryConnector, MemoryPeer, NORMAL_CLOSURE, TransportHandle,
    WebSocketConnector,
};
