use crate::error::MessageError;
use crate::header::{
    pack_type_byte, unpack_type_byte, MessageClass, MessageType, RequestType,
};
use crate::options::{ContentFormat, Options};

/// The protocol version this client speaks.
pub const COAP_VERSION: u8 = 1;

/// The single byte separating the option stream from the payload.
const PAYLOAD_MARKER: u8 = 0xFF;

/// The longest token the header can describe.
const MAX_TOKEN_LENGTH: usize = 8;

/// A CoAP message.
///
/// Carries the fixed header fields, the token, the typed [`Options`] and the
/// payload. [`Message::to_bytes`] and [`Message::from_bytes`] convert to and
/// from the wire representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub version: u8,
    pub message_type: MessageType,
    pub code: MessageClass,
    pub message_id: u16,
    token: Vec<u8>,
    pub options: Options,
    pub payload: Vec<u8>,
}

impl Default for Message {
    fn default() -> Message {
        Message {
            version: COAP_VERSION,
            message_type: MessageType::Confirmable,
            code: MessageClass::Request(RequestType::Get),
            message_id: 0,
            token: Vec::new(),
            options: Options::new(),
            payload: Vec::new(),
        }
    }
}

impl Message {
    /// Creates a Confirmable GET with no token and no options.
    pub fn new() -> Message {
        Default::default()
    }

    /// Creates a Confirmable request with the given method.
    pub fn request(method: RequestType) -> Message {
        Message {
            code: MessageClass::Request(method),
            ..Default::default()
        }
    }

    /// Creates an Empty Confirmable message, the CoAP liveness probe.
    pub fn ping() -> Message {
        Message {
            code: MessageClass::Empty,
            ..Default::default()
        }
    }

    /// Creates the Empty Acknowledgement for a received message id.
    pub(crate) fn ack(message_id: u16) -> Message {
        Message {
            message_type: MessageType::Acknowledgement,
            code: MessageClass::Empty,
            message_id,
            ..Default::default()
        }
    }

    /// Sets the token, which may be at most eight bytes long.
    pub fn set_token(&mut self, token: Vec<u8>) -> Result<(), MessageError> {
        if token.len() > MAX_TOKEN_LENGTH {
            return Err(MessageError::InvalidTokenLength(token.len() as u8));
        }
        self.token = token;
        Ok(())
    }

    /// Returns the token.
    pub fn token(&self) -> &[u8] {
        &self.token
    }

    /// Sets the Content-Format option.
    pub fn set_content_format(&mut self, format: ContentFormat) {
        self.options.content_format = Some(format.into());
    }

    /// Returns the Content-Format option, when set and recognized.
    pub fn content_format(&self) -> Option<ContentFormat> {
        self.options
            .content_format
            .and_then(ContentFormat::from_number)
    }

    /// Serializes the message into its wire representation.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        if self.token.len() > MAX_TOKEN_LENGTH {
            return Err(MessageError::InvalidTokenLength(
                self.token.len() as u8
            ));
        }
        if self.code == MessageClass::Empty
            && !(self.token.is_empty()
                && self.options.is_empty()
                && self.payload.is_empty())
        {
            return Err(MessageError::InvalidEmptyMessage);
        }

        let mut buf =
            Vec::with_capacity(4 + self.token.len() + self.payload.len());
        buf.push(pack_type_byte(
            self.version,
            self.message_type,
            self.token.len() as u8,
        ));
        buf.push(self.code.into());
        buf.extend_from_slice(&self.message_id.to_be_bytes());
        buf.extend_from_slice(&self.token);
        self.options.encode_into(&mut buf)?;
        if !self.payload.is_empty() {
            buf.push(PAYLOAD_MARKER);
            buf.extend_from_slice(&self.payload);
        }

        Ok(buf)
    }

    /// Decodes a wire representation into a message.
    pub fn from_bytes(buf: &[u8]) -> Result<Message, MessageError> {
        if buf.len() < 4 {
            return Err(MessageError::Malformed);
        }

        let (version, message_type, token_length) = unpack_type_byte(buf[0]);
        if version != COAP_VERSION {
            return Err(MessageError::BadVersion(version));
        }
        if usize::from(token_length) > MAX_TOKEN_LENGTH {
            return Err(MessageError::InvalidTokenLength(token_length));
        }
        let code = MessageClass::from(buf[1]);
        let message_id = u16::from_be_bytes([buf[2], buf[3]]);

        let mut idx = 4 + usize::from(token_length);
        if idx > buf.len() {
            return Err(MessageError::Malformed);
        }
        let token = buf[4..idx].to_vec();

        let mut options = Options::new();
        let mut number = 0u16;
        let mut payload = Vec::new();
        while idx < buf.len() {
            let header = buf[idx];
            idx += 1;

            if header == PAYLOAD_MARKER {
                // A marker with nothing behind it is a format error.
                if idx == buf.len() {
                    return Err(MessageError::Malformed);
                }
                payload = buf[idx..].to_vec();
                break;
            }

            let delta =
                extended_field(buf, &mut idx, u16::from(header >> 4))?;
            let length = match extended_field(
                buf,
                &mut idx,
                u16::from(header & 0x0F),
            ) {
                Err(MessageError::InvalidOptionDelta) => {
                    Err(MessageError::InvalidOptionLength)
                }
                other => other,
            }?;

            number = number
                .checked_add(delta)
                .ok_or(MessageError::InvalidOptionDelta)?;

            let end = idx + usize::from(length);
            if end > buf.len() {
                return Err(MessageError::InvalidOptionLength);
            }
            options.decode_option(number, &buf[idx..end])?;
            idx = end;
        }

        if code == MessageClass::Empty
            && !(token.is_empty() && options.is_empty() && payload.is_empty())
        {
            return Err(MessageError::InvalidEmptyMessage);
        }

        Ok(Message {
            version,
            message_type,
            code,
            message_id,
            token,
            options,
            payload,
        })
    }
}

/// Resolves one option-header nibble against its extension bytes.
fn extended_field(
    buf: &[u8],
    idx: &mut usize,
    nibble: u16,
) -> Result<u16, MessageError> {
    match nibble {
        13 => {
            let byte =
                *buf.get(*idx).ok_or(MessageError::Malformed)?;
            *idx += 1;
            Ok(u16::from(byte) + 13)
        }
        14 => {
            if *idx + 1 >= buf.len() {
                return Err(MessageError::Malformed);
            }
            let word = u16::from_be_bytes([buf[*idx], buf[*idx + 1]]);
            *idx += 2;
            word.checked_add(269)
                .ok_or(MessageError::InvalidOptionDelta)
        }
        15 => Err(MessageError::InvalidOptionDelta),
        immediate => Ok(immediate),
    }
}
