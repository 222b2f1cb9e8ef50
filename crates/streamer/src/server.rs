//! # Server Channel
//!
//! The serving role of a connection. One read loop pulls requests off the
//! transport, runs each against the bound handler, and writes the response
//! back before reading the next request.
//!
//! ## Invariants
//!
//! - Exactly one response is written for every well-formed request, carrying
//!   the request's `Id`.
//! - Requests are handled in arrival order, one at a time.
//! - Call failures are answered on the wire. Only transport or framing
//!   failures stop the loop.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::codec;
use crate::codec::Request;
use crate::codec::Response;
use crate::config::ChannelConfig;
use crate::dispatch;
use crate::dispatch::Binding;
use crate::dispatch::DispatchTable;
use crate::dispatch::Handler;
use crate::transport;
use crate::transport::ByteStream;
use crate::transport::StreamTransport;
use crate::transport::Transport;

/// Failures that end a server's read loop.
#[derive(Debug, Clone)]
pub enum Error {
    Transport(transport::Error),
    /// A frame arrived that was not a request. The stream can no longer be
    /// trusted to be in sync, so the loop stops.
    Codec(codec::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Codec(e) => write!(f, "Codec error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Codec(e) => Some(e),
        }
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<codec::Error> for Error {
    fn from(e: codec::Error) -> Self {
        Self::Codec(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Server role of a connection, owning the transport and the dispatch table.
///
/// Bind a handler first, then drive the channel with [`run`](Self::run) or
/// [`spawn`](Self::spawn). Requests that arrive before a bind are answered
/// with "Unknown method".
pub struct ServerChannel {
    config: ChannelConfig,
    transport: Box<dyn Transport>,
    table: Arc<DispatchTable>,
}

impl ServerChannel {
    pub fn new<S: ByteStream>(stream: S) -> Self {
        Self::with_config(stream, ChannelConfig::default())
    }

    pub fn with_config<S: ByteStream>(stream: S, config: ChannelConfig) -> Self {
        let transport = StreamTransport::new(stream, config.max_frame_len);
        Self::with_transport(Box::new(transport), config)
    }

    pub fn with_transport(transport: Box<dyn Transport>, config: ChannelConfig) -> Self {
        Self {
            config,
            transport,
            table: Arc::new(DispatchTable::new()),
        }
    }

    pub fn peer_name(&self) -> &str {
        &self.config.peer_name
    }

    /// Installs every method of `handler` on this channel.
    ///
    /// # Errors
    /// - [`dispatch::Error::DuplicateMethod`] if two methods share a name.
    /// - [`dispatch::Error::AlreadyBound`] if a handler was bound before.
    pub fn bind<H: Handler>(&self, handler: H) -> dispatch::Result<Binding> {
        let binding = self.table.bind(handler)?;
        tracing::info!(peer = %self.config.peer_name, methods = self.table.len(), "handler bound");
        Ok(binding)
    }

    /// The dispatch table, shared so bindings can be inspected while the
    /// channel runs.
    pub fn table(&self) -> Arc<DispatchTable> {
        self.table.clone()
    }

    /// Serves requests until the peer closes the stream.
    ///
    /// Returns `Ok(())` on a clean end of stream.
    pub async fn run(self) -> Result<()> {
        let peer = self.config.peer_name.clone();
        tracing::debug!(peer = %peer, "server loop started");

        let outcome = self.serve().await;
        match &outcome {
            Ok(()) => tracing::info!(peer = %peer, "server channel closed"),
            Err(e) => tracing::warn!(peer = %peer, error = %e, "server channel failed"),
        }
        outcome
    }

    /// Runs the channel on its own task.
    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn serve(&self) -> Result<()> {
        while let Some(frame) = self.transport.recv().await? {
            let request = Request::decode(&frame)?;
            let response = self.table.dispatch(request);
            self.respond(response).await?;
        }
        Ok(())
    }

    /// Writes one response. A result that cannot be framed is replaced by an
    /// error response for the same call.
    async fn respond(&self, response: Response) -> Result<()> {
        let id = response.id;
        let payload = match response.encode() {
            Ok(payload) => payload,
            Err(e) => Response::err(id, e.to_string()).encode()?,
        };

        match self.transport.send(&payload).await {
            Err(e @ transport::Error::FrameTooLarge { .. }) => {
                tracing::debug!(peer = %self.config.peer_name, id, error = %e, "response too large");
                let fallback = Response::err(id, format!("Result could not be sent: {}", e));
                self.transport.send(&fallback.encode()?).await?;
                Ok(())
            }
            other => Ok(other?),
        }
    }
}
