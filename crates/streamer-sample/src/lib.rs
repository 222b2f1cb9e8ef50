//! # streamer-sample
//!
//! The handlers and contracts shared by the `streamer-server` and
//! `streamer-client` binaries.

use streamer::Handler;
use streamer::MethodSet;
use tracing_subscriber::EnvFilter;

/// Port the sample server listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 1335;

/// Served as `Sample.EchoHandler`. `Echo` returns its argument unchanged.
pub struct EchoHandler;

impl Handler for EchoHandler {
    fn methods(self) -> MethodSet {
        MethodSet::new("Sample.EchoHandler").method("Echo", |value: String| {
            tracing::debug!(len = value.len(), "echo");
            value
        })
    }
}

/// Served as `Client.Adder`. `Increment` returns its argument plus one.
pub struct Adder;

impl Handler for Adder {
    fn methods(self) -> MethodSet {
        MethodSet::new("Client.Adder").method("Increment", |value: i32| value.wrapping_add(1))
    }
}

streamer::contract! {
    /// Client view of [`EchoHandler`].
    pub interface IEchoHandler in "Sample" {
        async fn echo_async(value: String) -> String;
    }
}

streamer::contract! {
    /// Client view of [`Adder`].
    pub interface IAdder in "Client" {
        async fn increment(value: i32) -> i32;
    }
}

/// Installs the fmt subscriber. `RUST_LOG` wins over the `debug` flag.
pub fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
