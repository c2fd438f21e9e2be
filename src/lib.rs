//! An asynchronous CoAP (RFC 7252) client over UDP.
//!
//! ## Overview
//! This crate provides the client side of the Constrained Application
//! Protocol: a bit-exact message codec, a typed representation of the
//! recognized options, and a session engine that multiplexes any number of
//! concurrent request/response exchanges over a single UDP socket. It
//! handles Confirmable retransmission with exponential backoff, piggy-backed
//! and separate responses, and acknowledges separate responses on its own.
//!
//! Observe, block-wise transfer, DTLS, multicast and proxying are out of
//! scope.
//!
//! ## Usage
//! ```rust
//! use coap_udp::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), coap_udp::Error> {
//!     let client = Client::new("coap.example.com", 5683).await?;
//!
//!     let response = client.get("coap://coap.example.com/sensors/temp").await?;
//!     println!("{}", String::from_utf8_lossy(&response.payload));
//!
//!     client.close();
//!     Ok(())
//! }
//! ```
//!
//! Messages can also be built by hand and submitted with
//! [`Client::send`], for example to send a Non-Confirmable request or to
//! set content-format options on a POST.

pub mod error;

mod client;
mod header;
mod message;
mod option_value;
mod options;
mod session;
mod transport;

pub use client::Client;
pub use error::{Error, MessageError};
pub use header::{MessageClass, MessageType, RequestType, ResponseType};
pub use message::{Message, COAP_VERSION};
pub use options::{ContentFormat, Options};
pub use session::TransmissionParameters;
pub use transport::{Transport, UdpTransport};

/// The default CoAP UDP port.
pub const DEFAULT_PORT: u16 = 5683;
