use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::Error;
use crate::header::RequestType;
use crate::message::Message;
use crate::session::{Session, TransmissionParameters};
use crate::transport::UdpTransport;

/// An asynchronous CoAP client talking to one server over UDP.
///
/// All methods take `&self`; any number of requests may be in flight
/// concurrently, multiplexed over the one socket by MessageID and Token.
pub struct Client {
    session: Session<UdpTransport>,
    receiver: JoinHandle<()>,
    closed: AtomicBool,
}

impl Client {
    /// Resolves `host`, connects a UDP socket to it and spawns the
    /// background receive task.
    pub async fn new(host: &str, port: u16) -> Result<Client, Error> {
        Client::with_parameters(host, port, TransmissionParameters::default())
            .await
    }

    /// Like [`Client::new`], with custom transmission parameters.
    pub async fn with_parameters(
        host: &str,
        port: u16,
        parameters: TransmissionParameters,
    ) -> Result<Client, Error> {
        let transport = UdpTransport::connect(host, port).await?;
        let (session, receiver) = Session::new(transport, parameters);
        Ok(Client {
            session,
            receiver,
            closed: AtomicBool::new(false),
        })
    }

    /// Performs a GET request against a `coap://` URI.
    pub async fn get(&self, uri: &str) -> Result<Message, Error> {
        self.request(RequestType::Get, uri, Vec::new()).await
    }

    /// Performs a POST request against a `coap://` URI.
    pub async fn post(
        &self,
        uri: &str,
        payload: Vec<u8>,
    ) -> Result<Message, Error> {
        self.request(RequestType::Post, uri, payload).await
    }

    /// Performs a PUT request against a `coap://` URI.
    pub async fn put(
        &self,
        uri: &str,
        payload: Vec<u8>,
    ) -> Result<Message, Error> {
        self.request(RequestType::Put, uri, payload).await
    }

    /// Performs a DELETE request against a `coap://` URI.
    pub async fn delete(&self, uri: &str) -> Result<Message, Error> {
        self.request(RequestType::Delete, uri, Vec::new()).await
    }

    /// Sends a caller-built request and returns its response.
    ///
    /// The message must be Confirmable or Non-Confirmable with its options
    /// populated; the engine installs a fresh MessageID and Token before
    /// transmission.
    pub async fn send(&self, message: Message) -> Result<Message, Error> {
        self.ensure_open()?;
        self.session.exchange(message).await
    }

    /// Checks the server is reachable, returning the round-trip time.
    pub async fn ping(&self) -> Result<Duration, Error> {
        self.ensure_open()?;
        self.session.ping().await
    }

    /// Shuts the client down.
    ///
    /// In-flight and subsequent operations fail with [`Error::Closed`].
    /// Closing twice is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.session.close();
        self.receiver.abort();
    }

    async fn request(
        &self,
        method: RequestType,
        uri: &str,
        payload: Vec<u8>,
    ) -> Result<Message, Error> {
        self.ensure_open()?;
        let mut message = Message::request(method);
        message.options.set_uri(uri)?;
        message.payload = payload;
        self.session.exchange(message).await
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}
