//! # streamer
//!
//! Bidirectional JSON RPC over a single ordered byte stream.
//!
//! ## Architecture
//!
//! One established stream (TCP, a Unix socket, an in-memory duplex) carries
//! length-prefixed JSON messages. Each end of it plays one role:
//!
//! - **ServerChannel**: reads requests, runs them against the bound handler,
//!   and writes one response per request.
//! - **ClientChannel**: issues requests with fresh ids and matches responses
//!   back to their callers, in whatever order they arrive.
//! - **Typed proxies**: a contract declared with [`contract!`] becomes a type
//!   whose async methods are remote calls.
//!
//! ## Core Concepts
//!
//! - **MethodSet / Handler**: explicit registration of the methods a server
//!   exposes, under `<namespace>.<type>.<method>`.
//! - **Transport**: moves whole messages. [`StreamTransport`] frames them over
//!   any `AsyncRead + AsyncWrite` stream.
//! - **Contract**: the declared shape of a remote handler, validated once per
//!   process before any proxy is built.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use streamer::Channel;
//! use streamer::MethodSet;
//!
//! streamer::contract! {
//!     pub interface IAdder in "Client" {
//!         async fn increment(value: i32) -> i32;
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (a, b) = tokio::io::duplex(4096);
//!
//! let server = Channel::server(a);
//! server.bind(MethodSet::new("Client.Adder").method("Increment", |v: i32| v + 1))?;
//! server.spawn();
//!
//! let client = Arc::new(Channel::client(b));
//! let adder = client.typed::<IAdder>()?;
//! assert_eq!(adder.increment(5).await?, 6);
//! # Ok(())
//! # }
//! ```

pub mod args;
pub mod client;
pub mod codec;
pub mod config;
pub mod contract;
pub mod dispatch;
pub mod frame;
pub mod proxy;
pub mod server;
pub mod transport;

#[cfg(test)]
mod mock_transport;

#[cfg(test)]
mod tests;

pub use args::FromArgs;
pub use args::IntoArgs;
pub use args::MethodFn;

pub use client::ClientChannel;
pub use server::ServerChannel;

pub use codec::Request;
pub use codec::Response;

pub use config::ChannelConfig;
pub use config::DEFAULT_MAX_FRAME_LEN;

pub use contract::ContractDescriptor;
pub use contract::ContractKind;
pub use contract::ContractSpec;

pub use dispatch::Binding;
pub use dispatch::DispatchTable;
pub use dispatch::Handler;
pub use dispatch::MethodSet;

pub use proxy::Contract;
pub use proxy::Proxy;

pub use transport::ByteStream;
pub use transport::StreamTransport;
pub use transport::Transport;

/// Entry points for wrapping an established stream in either role.
pub struct Channel;

impl Channel {
    /// Client role with default settings. Spawns the response pump, so it
    /// must be called from within a tokio runtime.
    pub fn client<S: ByteStream>(stream: S) -> ClientChannel {
        ClientChannel::new(stream)
    }

    /// Server role with default settings. Nothing runs until the channel is
    /// driven with `run` or `spawn`.
    pub fn server<S: ByteStream>(stream: S) -> ServerChannel {
        ServerChannel::new(stream)
    }
}
