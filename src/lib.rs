//! # Tor Onion Controller
//! A client for the control port of a local [Tor](https://www.torproject.org/) server, speaking
//! its [control protocol](https://spec.torproject.org/control-spec/).
//!
//! The controller authenticates with `SAFECOOKIE` only: it proves it can read the server's
//! authentication cookie, and checks that the server can too, before sending any credential.
//! Once authenticated it creates onion services, saving each newly generated private key so the
//! same onion address can be restored later.
//!
//! ## Commands Supported
//! - PROTOCOLINFO
//! - AUTHCHALLENGE
//! - AUTHENTICATE
//! - ADD_ONION
//!
//! ## Example Code
//! ```no_run
//! # use tokio;
//! use tor_onion_controller::{
//!     OnionServiceRequest, OnionServiceVersion, TorController, TorError,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), TorError> {
//! // Connect and authenticate to the Tor server running locally
//! let controller = TorController::new("127.0.0.1:9051");
//! controller.start().await?;
//!
//! // Create a v3 onion service on port 80, forwarding to local port 8080. The key is
//! // written to onion_key the first time, and reused on every later run.
//! let request = OnionServiceRequest::new(OnionServiceVersion::V3, 80, "onion_key")
//!     .with_target_ports([8080]);
//! let address = controller.add_onion(&request).await?;
//! println!("Listening on {}", address);
//!
//! controller.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod control_connection;
pub mod controller;
pub mod error;
pub mod fs;
pub mod key;
pub mod onion;
pub mod protocol_info;
pub mod reply;
pub mod version;

#[cfg(test)]
mod test_support;

pub use crate::control_connection::TorControlConnection;
pub use crate::controller::{ControllerState, TorController};
pub use crate::error::TorError;
pub use crate::fs::{FileSystem, MemoryFileSystem, OsFileSystem};
pub use crate::onion::{OnionAddress, OnionServiceRequest, OnionServiceVersion};
pub use crate::protocol_info::ProtocolInfo;
