use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, warn};
use rand::Rng;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::error::Error;
use crate::header::{MessageClass, MessageType};
use crate::message::Message;
use crate::option_value::{decode_uint, encode_uint};
use crate::transport::Transport;

/// Tokens are drawn from this range; their minimal-length encoding always
/// fits the eight bytes the header can describe.
const MAX_TOKEN: u64 = 0x0FFF_FFFF_FFFF_FFFF;

/// One receive worth of buffer, sized for the largest UDP payload so
/// datagrams are never truncated.
const RECV_BUFFER_SIZE: usize = 65_536;

/// The transmission parameters of RFC 7252 §4.8.
///
/// The initial Confirmable timeout is drawn uniformly from
/// `[ack_timeout, ack_timeout * ack_random_factor]` and doubles on every
/// retransmission; after `max_retransmit` retransmissions the exchange fails.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransmissionParameters {
    pub ack_timeout: Duration,
    pub ack_random_factor: f64,
    pub max_retransmit: u32,
}

impl Default for TransmissionParameters {
    fn default() -> TransmissionParameters {
        TransmissionParameters {
            ack_timeout: Duration::from_secs(2),
            ack_random_factor: 1.5,
            max_retransmit: 4,
        }
    }
}

impl TransmissionParameters {
    fn initial_timeout(&self) -> Duration {
        let factor =
            rand::thread_rng().gen_range(1.0..=self.ack_random_factor);
        self.ack_timeout.mul_f64(factor)
    }
}

/// Why the engine stopped accepting traffic.
#[derive(Debug, Clone)]
enum Shutdown {
    Closed,
    Endpoint { kind: io::ErrorKind, message: String },
}

impl Shutdown {
    fn to_error(&self) -> Error {
        match self {
            Shutdown::Closed => Error::Closed,
            Shutdown::Endpoint { kind, message } => {
                Error::Endpoint(io::Error::new(*kind, message.clone()))
            }
        }
    }
}

type Slot = oneshot::Sender<Message>;

/// The delivery slots of the in-flight exchanges.
///
/// Only the engine touches these maps: request tasks insert on registration
/// and remove through [`SlotGuard`]; the receive task removes on delivery.
#[derive(Default)]
struct Slots {
    by_message_id: HashMap<u16, Slot>,
    by_token: HashMap<u64, Slot>,
    shutdown: Option<Shutdown>,
}

/// Removes an exchange's slots on every exit path, including cancellation.
struct SlotGuard {
    slots: Arc<Mutex<Slots>>,
    message_id: Option<u16>,
    token: Option<u64>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(message_id) = self.message_id {
            slots.by_message_id.remove(&message_id);
        }
        if let Some(token) = self.token {
            slots.by_token.remove(&token);
        }
    }
}

/// The engine multiplexing concurrent exchanges over one transport.
pub(crate) struct Session<T> {
    transport: Arc<T>,
    slots: Arc<Mutex<Slots>>,
    parameters: TransmissionParameters,
}

impl<T> Clone for Session<T> {
    fn clone(&self) -> Session<T> {
        Session {
            transport: Arc::clone(&self.transport),
            slots: Arc::clone(&self.slots),
            parameters: self.parameters,
        }
    }
}

impl<T: Transport> Session<T> {
    /// Creates the session and spawns its receive task.
    pub(crate) fn new(
        transport: T,
        parameters: TransmissionParameters,
    ) -> (Session<T>, JoinHandle<()>) {
        let session = Session {
            transport: Arc::new(transport),
            slots: Arc::new(Mutex::new(Slots::default())),
            parameters,
        };
        let receiver = tokio::spawn(recv_loop(session.clone()));
        (session, receiver)
    }

    /// Runs one request/response exchange.
    ///
    /// A fresh MessageID and Token are installed on the message before it
    /// leaves. Confirmable requests ride the retransmission state machine;
    /// anything else is transmitted once and matched by token only.
    pub(crate) async fn exchange(
        &self,
        message: Message,
    ) -> Result<Message, Error> {
        match message.message_type {
            MessageType::Confirmable => {
                self.exchange_confirmable(message).await
            }
            _ => self.exchange_unconfirmed(message).await,
        }
    }

    async fn exchange_confirmable(
        &self,
        mut message: Message,
    ) -> Result<Message, Error> {
        let (_guard, mut first_rx, response_rx) =
            self.register_confirmable(&mut message)?;
        let datagram = message.to_bytes()?;

        let first = self.transmit(&datagram, &mut first_rx).await?;
        match (first.message_type, first.code) {
            (MessageType::Reset, _) => Err(Error::Reset),
            (MessageType::Acknowledgement, MessageClass::Empty) => {
                // Bare ACK; the actual response arrives on its own later.
                debug!(
                    "message {:#06x} acknowledged, awaiting separate response",
                    message.message_id
                );
                response_rx.await.map_err(|_| self.shutdown_error())
            }
            _ => Ok(first),
        }
    }

    async fn exchange_unconfirmed(
        &self,
        mut message: Message,
    ) -> Result<Message, Error> {
        let (_guard, response_rx) =
            self.register_unconfirmed(&mut message)?;
        let datagram = message.to_bytes()?;

        self.transport.send(&datagram).await?;
        response_rx.await.map_err(|_| self.shutdown_error())
    }

    /// Probes the peer with an Empty Confirmable message.
    ///
    /// Per RFC 7252 §4.3 the peer answers with Reset; an Acknowledgement is
    /// accepted as proof of life too. Returns the round-trip time.
    pub(crate) async fn ping(&self) -> Result<Duration, Error> {
        let mut message = Message::ping();
        let (_guard, mut reply_rx) = self.register_ping(&mut message)?;
        let datagram = message.to_bytes()?;

        let started = Instant::now();
        let reply = self.transmit(&datagram, &mut reply_rx).await?;
        debug!("ping answered with {:?}", reply.message_type);
        Ok(started.elapsed())
    }

    /// Fails all in-flight exchanges and refuses new registrations.
    pub(crate) fn close(&self) {
        self.shutdown(Shutdown::Closed);
    }

    /// Transmits a Confirmable datagram until a reply arrives or the
    /// retransmission budget runs out.
    async fn transmit(
        &self,
        datagram: &[u8],
        reply: &mut oneshot::Receiver<Message>,
    ) -> Result<Message, Error> {
        let mut timeout = self.parameters.initial_timeout();
        let mut retransmits = 0;

        self.transport.send(datagram).await?;
        loop {
            tokio::select! {
                received = &mut *reply => {
                    return received.map_err(|_| self.shutdown_error());
                }
                _ = time::sleep(timeout) => {
                    if retransmits == self.parameters.max_retransmit {
                        return Err(Error::TimedOut);
                    }
                    retransmits += 1;
                    timeout *= 2;
                    debug!(
                        "no reply, retransmission {retransmits} of {}",
                        self.parameters.max_retransmit
                    );
                    self.transport.send(datagram).await?;
                }
            }
        }
    }

    fn register_confirmable(
        &self,
        message: &mut Message,
    ) -> Result<
        (SlotGuard, oneshot::Receiver<Message>, oneshot::Receiver<Message>),
        Error,
    > {
        let mut slots = self.lock();
        if let Some(shutdown) = &slots.shutdown {
            return Err(shutdown.to_error());
        }

        let message_id = fresh_message_id(&slots);
        let token = fresh_token(&slots);
        message.message_id = message_id;
        message.set_token(encode_uint(token))?;

        let (first_tx, first_rx) = oneshot::channel();
        let (response_tx, response_rx) = oneshot::channel();
        slots.by_message_id.insert(message_id, first_tx);
        slots.by_token.insert(token, response_tx);

        Ok((
            self.guard(Some(message_id), Some(token)),
            first_rx,
            response_rx,
        ))
    }

    fn register_unconfirmed(
        &self,
        message: &mut Message,
    ) -> Result<(SlotGuard, oneshot::Receiver<Message>), Error> {
        let mut slots = self.lock();
        if let Some(shutdown) = &slots.shutdown {
            return Err(shutdown.to_error());
        }

        // No message-id slot: nothing acknowledges a Non-Confirmable, the
        // response can only be matched by token.
        let token = fresh_token(&slots);
        message.message_id = rand::thread_rng().gen();
        message.set_token(encode_uint(token))?;

        let (response_tx, response_rx) = oneshot::channel();
        slots.by_token.insert(token, response_tx);

        Ok((self.guard(None, Some(token)), response_rx))
    }

    fn register_ping(
        &self,
        message: &mut Message,
    ) -> Result<(SlotGuard, oneshot::Receiver<Message>), Error> {
        let mut slots = self.lock();
        if let Some(shutdown) = &slots.shutdown {
            return Err(shutdown.to_error());
        }

        // An Empty message must not carry a token, so the reply can only be
        // matched by message id.
        let message_id = fresh_message_id(&slots);
        message.message_id = message_id;

        let (reply_tx, reply_rx) = oneshot::channel();
        slots.by_message_id.insert(message_id, reply_tx);

        Ok((self.guard(Some(message_id), None), reply_rx))
    }

    fn guard(&self, message_id: Option<u16>, token: Option<u64>) -> SlotGuard {
        SlotGuard {
            slots: Arc::clone(&self.slots),
            message_id,
            token,
        }
    }

    /// Routes one received message to its waiting exchange.
    fn dispatch(&self, message: Message) {
        let acknowledge = {
            let mut slots = self.lock();

            if let Some(slot) =
                slots.by_message_id.remove(&message.message_id)
            {
                let message_id = message.message_id;
                if slot.send(message).is_err() {
                    debug!(
                        "exchange for message {message_id:#06x} gone before \
                         delivery"
                    );
                }
                return;
            }

            let Some(token) = decode_uint(message.token()) else {
                return;
            };
            match slots.by_token.remove(&token) {
                Some(slot) => {
                    // Separate responses delivered as Confirmable need an
                    // Acknowledgement of their own.
                    let acknowledge = (message.message_type
                        == MessageType::Confirmable)
                        .then_some(message.message_id);
                    if slot.send(message).is_err() {
                        debug!(
                            "exchange for token {token:#x} gone before \
                             delivery"
                        );
                    }
                    acknowledge
                }
                None => {
                    debug!("dropping datagram matching no exchange");
                    None
                }
            }
        };

        if let Some(message_id) = acknowledge {
            let transport = Arc::clone(&self.transport);
            tokio::spawn(async move {
                if let Ok(datagram) = Message::ack(message_id).to_bytes() {
                    if let Err(error) = transport.send(&datagram).await {
                        warn!(
                            "failed to acknowledge separate response: {error}"
                        );
                    }
                }
            });
        }
    }

    fn shutdown(&self, cause: Shutdown) {
        let mut slots = self.lock();
        slots.shutdown = Some(cause);
        // Dropping the senders wakes every waiter with the shutdown cause.
        slots.by_message_id.clear();
        slots.by_token.clear();
    }

    fn shutdown_error(&self) -> Error {
        match &self.lock().shutdown {
            Some(cause) => cause.to_error(),
            None => Error::Closed,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn slot_counts(&self) -> (usize, usize) {
        let slots = self.lock();
        (slots.by_message_id.len(), slots.by_token.len())
    }
}

fn fresh_message_id(slots: &Slots) -> u16 {
    let mut rng = rand::thread_rng();
    loop {
        let candidate = rng.gen();
        if !slots.by_message_id.contains_key(&candidate) {
            return candidate;
        }
    }
}

fn fresh_token(slots: &Slots) -> u64 {
    let mut rng = rand::thread_rng();
    loop {
        let candidate = rng.gen_range(0..=MAX_TOKEN);
        if !slots.by_token.contains_key(&candidate) {
            return candidate;
        }
    }
}

/// Reads datagrams for the session's lifetime.
///
/// Undecodable datagrams are dropped; a transport error is fatal and fails
/// every in-flight exchange.
async fn recv_loop<T: Transport>(session: Session<T>) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        let len = match session.transport.recv(&mut buf).await {
            Ok(len) => len,
            Err(error) => {
                warn!("endpoint receive failed: {error}");
                session.shutdown(Shutdown::Endpoint {
                    kind: error.kind(),
                    message: error.to_string(),
                });
                return;
            }
        };

        match Message::from_bytes(&buf[..len]) {
            Ok(message) => session.dispatch(message),
            Err(error) => debug!("dropping undecodable datagram: {error}"),
        }
    }
}
