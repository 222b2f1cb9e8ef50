//! # Client Channel with Async Pump
//!
//! This module provides the `ClientChannel` for making RPC calls over a stream.
//! It uses an async pump task to demultiplex incoming responses and correlate
//! them with pending calls via call identifiers.
//!
//! ## Invariants
//!
//! - Identifiers are allocated from a per-channel counter and never reused.
//! - Only the pump reads from the transport, and only the writer task writes
//!   to it. A caller that gives up mid-call never leaves half a frame behind.
//! - A pending call lives exactly as long as the call that registered it,
//!   including calls dropped before completion.
//! - When the pump stops, every pending call is resolved with
//!   [`Error::ChannelClosed`], and calls issued afterwards fail immediately.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::args::IntoArgs;
use crate::codec;
use crate::codec::Request;
use crate::codec::Response;
use crate::config::ChannelConfig;
use crate::contract;
use crate::proxy;
use crate::proxy::Contract;
use crate::transport;
use crate::transport::ByteStream;
use crate::transport::StreamTransport;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub enum Error {
    Transport(transport::Error),
    Codec(codec::Error),
    /// An argument could not be serialized.
    Encode(String),
    /// The result could not be converted to the expected type.
    Decode(String),
    /// The remote side reported a failure for this call.
    Remote(String),
    /// The channel stopped before this call was answered.
    ChannelClosed(String),
    /// The configured call timeout elapsed.
    Timeout,
    /// A proxy member has no entry in its contract descriptor.
    UnknownMember(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Codec(e) => write!(f, "Codec error: {}", e),
            Self::Encode(msg) => write!(f, "Failed to encode arguments: {}", msg),
            Self::Decode(msg) => write!(f, "Failed to decode result: {}", msg),
            Self::Remote(msg) => write!(f, "Remote failure: {}", msg),
            Self::ChannelClosed(reason) => write!(f, "Channel closed: {}", reason),
            Self::Timeout => write!(f, "Call timed out"),
            Self::UnknownMember(name) => write!(f, "Unknown contract member '{}'", name),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Codec(e) => Some(e),
            _ => None,
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

/// A call that has been issued but not answered yet.
struct PendingCall {
    method: String,
    tx: oneshot::Sender<Result<Option<Value>>>,
}

/// An encoded request queued for the writer task.
struct Outgoing {
    payload: Vec<u8>,
    written: oneshot::Sender<transport::Result<()>>,
}

/// Removes a call's pending entry when the call ends, however it ends.
///
/// Ids are never reused, so removing an entry the pump already resolved is a
/// no-op.
struct PendingGuard<'a> {
    pending: &'a DashMap<u64, PendingCall>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// Client role of a connection.
///
/// The channel spawns two background tasks: a pump that reads from the
/// transport and routes responses to the matching pending call by `id`, and a
/// writer that sends queued requests one whole frame at a time.
/// Wrap it in an `Arc` to share it between tasks or hand it to proxies.
pub struct ClientChannel {
    config: ChannelConfig,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    pending: Arc<DashMap<u64, PendingCall>>,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    pump: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ClientChannel {
    /// Wraps an established stream and starts the pump.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<S: ByteStream>(stream: S) -> Self {
        Self::with_config(stream, ChannelConfig::default())
    }

    pub fn with_config<S: ByteStream>(stream: S, config: ChannelConfig) -> Self {
        let transport = StreamTransport::new(stream, config.max_frame_len);
        Self::with_transport(Box::new(transport), config)
    }

    /// Takes ownership of a transport and spawns the pump and writer over it.
    pub fn with_transport(transport: Box<dyn Transport>, config: ChannelConfig) -> Self {
        let transport: Arc<dyn Transport> = Arc::from(transport);
        let pending = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));
        let (outgoing, queue) = mpsc::unbounded_channel();

        let writer = tokio::spawn(writer(config.peer_name.clone(), transport.clone(), queue));
        let pump = tokio::spawn(pump(
            config.peer_name.clone(),
            transport,
            pending.clone(),
            closed.clone(),
        ));

        Self {
            config,
            outgoing,
            pending,
            closed,
            next_id: AtomicU64::new(1),
            pump,
            writer,
        }
    }

    pub fn peer_name(&self) -> &str {
        &self.config.peer_name
    }

    /// True once the pump has stopped. No further call can succeed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of calls still waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Untyped call. Resolves to the raw result, or `None` for a void method.
    pub async fn invoke<A: IntoArgs>(&self, method: &str, args: A) -> Result<Option<Value>> {
        let args = args.into_args().map_err(|e| Error::Encode(e.to_string()))?;
        let (id, rx) = self.prepare_call(method);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        // the pump may have drained the table before our entry landed
        if self.is_closed() {
            return Err(Error::ChannelClosed("channel already closed".into()));
        }

        let payload = Request::new(id, method, args).encode()?;
        self.send_and_await(payload, rx).await
    }

    /// Typed call. An absent result is decoded from JSON `null`, so `()` and
    /// `Option<T>` work for void methods.
    pub async fn invoke_as<T, A>(&self, method: &str, args: A) -> Result<T>
    where
        T: DeserializeOwned,
        A: IntoArgs,
    {
        let value = self.invoke(method, args).await?.unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Builds a typed proxy for contract `T` over this channel.
    ///
    /// The contract is validated on first use and the outcome is cached.
    pub fn typed<T: Contract>(self: &Arc<Self>) -> contract::Result<T> {
        proxy::build::<T>(Arc::clone(self))
    }

    /// Allocates the next identifier and registers a pending call for it.
    fn prepare_call(&self, method: &str) -> (u64, oneshot::Receiver<Result<Option<Value>>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        self.pending.insert(id, PendingCall {
            method: method.to_string(),
            tx,
        });

        (id, rx)
    }

    /// Hands an encoded request to the writer and awaits its response.
    async fn send_and_await(
        &self,
        payload: Vec<u8>,
        rx: oneshot::Receiver<Result<Option<Value>>>,
    ) -> Result<Option<Value>> {
        let (written, write_result) = oneshot::channel();
        self.outgoing
            .send(Outgoing { payload, written })
            .map_err(|_| Error::ChannelClosed("writer stopped".into()))?;

        match write_result.await {
            Ok(result) => result?,
            Err(_) => return Err(Error::ChannelClosed("writer stopped".into())),
        }

        let received = match self.config.call_timeout {
            Some(limit) => tokio::time::timeout(limit, rx)
                .await
                .map_err(|_| Error::Timeout)?,
            None => rx.await,
        };

        received.unwrap_or_else(|_| Err(Error::ChannelClosed("response channel dropped".into())))
    }
}

impl Drop for ClientChannel {
    fn drop(&mut self) {
        self.pump.abort();
        self.writer.abort();
    }
}

/// Sends queued requests in order, each as one uninterrupted frame.
async fn writer(
    peer_name: String,
    transport: Arc<dyn Transport>,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
) {
    while let Some(outgoing) = queue.recv().await {
        let result = transport.send(&outgoing.payload).await;
        if let Err(e) = &result {
            tracing::debug!(peer = %peer_name, error = %e, "request not sent");
        }
        // the caller may have been cancelled
        let _ = outgoing.written.send(result);
    }
}

/// Reads responses until the transport ends, then fails whatever is left.
async fn pump(
    peer_name: String,
    transport: Arc<dyn Transport>,
    pending: Arc<DashMap<u64, PendingCall>>,
    closed: Arc<AtomicBool>,
) {
    tracing::debug!(peer = %peer_name, "client pump started");

    let reason = loop {
        match transport.recv().await {
            Ok(Some(frame)) => {
                if let Err(e) = handle_frame(&frame, &pending) {
                    tracing::warn!(peer = %peer_name, error = %e, "malformed response, closing channel");
                    break e.to_string();
                }
            }
            Ok(None) => break "stream closed".to_string(),
            Err(e) => {
                tracing::warn!(peer = %peer_name, error = %e, "transport error in client pump");
                break e.to_string();
            }
        }
    };

    closed.store(true, Ordering::SeqCst);
    let failed = notify_all_pending(&pending, &reason);
    tracing::info!(peer = %peer_name, reason = %reason, failed, "client channel closed");
}

/// Routes one response frame to its pending call.
fn handle_frame(frame: &[u8], pending: &DashMap<u64, PendingCall>) -> codec::Result<()> {
    let response = Response::decode(frame)?;
    let id = response.id;

    let Some((_, call)) = pending.remove(&id) else {
        // already answered, timed out, or never issued
        tracing::debug!(id, "discarding response with no pending call");
        return Ok(());
    };

    let outcome = response.into_outcome().map_err(Error::Remote);
    if let Err(Error::Remote(message)) = &outcome {
        tracing::debug!(id, method = %call.method, error = %message, "remote call failed");
    }

    // the caller may have given up on the receiver
    let _ = call.tx.send(outcome);
    Ok(())
}

/// Fails every pending call with a closed-channel error. Returns how many.
fn notify_all_pending(pending: &DashMap<u64, PendingCall>, reason: &str) -> usize {
    let ids: Vec<u64> = pending.iter().map(|e| *e.key()).collect();
    let mut failed = 0;
    for id in ids {
        if let Some((_, call)) = pending.remove(&id) {
            let _ = call.tx.send(Err(Error::ChannelClosed(reason.to_string())));
            failed += 1;
        }
    }
    failed
}
