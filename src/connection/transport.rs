//! Transports behind a connection client
//!
//! A [`Connector`] opens a duplex text channel and hands the client a pair of
//! unbounded queues. [`WebSocketConnector`] is the production transport;
//! [`MemoryConnector`] wires the client to an in-process [`MemoryPeer`] so
//! skills can be exercised without a device server.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, trace, warn};

use crate::error::{DialogError, DialogResult};
use crate::value_objects::Message;

/// Close code sent and reported for a normal, client-initiated shutdown
pub const NORMAL_CLOSURE: u16 = 1000;

/// Inbound event delivered by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// The peer closed the channel, with its close code when it sent one
    Close(Option<u16>),
}

/// Queues of an open transport
///
/// Dropping `outbound` asks the transport to close. The transport ends
/// `inbound` (or sends [`Frame::Close`]) once the channel is gone.
#[derive(Debug)]
pub struct TransportHandle {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<Frame>,
}

/// Opens transports for a connection client
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> DialogResult<TransportHandle>;
}

/// WebSocket transport over tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> DialogResult<TransportHandle> {
        let (stream, _response) = connect_async(url).await.map_err(|e| DialogError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let (mut sink, mut source) = stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Frame>();

        let writer_url = url.to_string();
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(WsMessage::Text(text)).await {
                    warn!("WebSocket send to {} failed: {}", writer_url, e);
                    break;
                }
            }
            if let Err(e) = sink.close().await {
                debug!("WebSocket close on {} failed: {}", writer_url, e);
            }
        });

        let reader_url = url.to_string();
        tokio::spawn(async move {
            while let Some(next) = source.next().await {
                let frame = match next {
                    Ok(WsMessage::Text(text)) => Frame::Text(text),
                    Ok(WsMessage::Close(close)) => {
                        Frame::Close(close.map(|frame| u16::from(frame.code)))
                    }
                    Ok(other) => {
                        trace!("Ignoring non-text frame from {}: {:?}", reader_url, other);
                        continue;
                    }
                    Err(e) => {
                        warn!("WebSocket receive from {} failed: {}", reader_url, e);
                        Frame::Close(None)
                    }
                };
                let closing = matches!(frame, Frame::Close(_));
                if in_tx.send(frame).is_err() || closing {
                    break;
                }
            }
        });

        Ok(TransportHandle {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// In-process connector
///
/// Every successful `connect` yields a [`MemoryPeer`] on the receiver
/// returned by [`MemoryConnector::new`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refuse: Arc<AtomicBool>,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, accepted) = mpsc::unbounded_channel();
        let connector = Self {
            peers,
            refuse: Arc::new(AtomicBool::new(false)),
        };
        (connector, accepted)
    }

    /// Make subsequent connection attempts fail
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> DialogResult<TransportHandle> {
        let refused = |message: &str| DialogError::Transport {
            url: url.to_string(),
            message: message.to_string(),
        };
        if self.refuse.load(Ordering::SeqCst) {
            return Err(refused("connection refused"));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            url: url.to_string(),
            from_client: out_rx,
            to_client: in_tx,
        };
        self.peers
            .send(peer)
            .map_err(|_| refused("no peer is accepting connections"))?;

        Ok(TransportHandle {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Server side of an in-process connection
#[derive(Debug)]
pub struct MemoryPeer {
    url: String,
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<Frame>,
}

impl MemoryPeer {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Next raw frame written by the client, `None` once it hung up
    pub async fn recv_text(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next frame written by the client, parsed
    ///
    /// Frames that fail to parse are skipped.
    pub async fn recv(&mut self) -> Option<Message> {
        while let Some(text) = self.recv_text().await {
            match Message::from_json_str(&text) {
                Ok(message) => return Some(message),
                Err(e) => warn!("Peer skipping unparseable client frame: {}", e),
            }
        }
        None
    }

    /// Frame already written by the client, without waiting
    pub fn try_recv_text(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// Deliver a JSON value to the client
    pub fn send(&self, value: &serde_json::Value) -> bool {
        self.send_text(value.to_string())
    }

    /// Deliver a raw text frame to the client
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client.send(Frame::Text(text.into())).is_ok()
    }

    /// Close the connection from the server side
    pub fn close(&self, code: Option<u16>) -> bool {
        self.to_client.send(Frame::Close(code)).is_ok()
    }
}
