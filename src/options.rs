use std::fmt;
use std::str::FromStr;

use log::debug;
use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::{Error, MessageError};
use crate::option_value::{decode_uint, encode_uint};
use crate::DEFAULT_PORT;

// Option numbers (RFC 7252 §5.10).
const IF_MATCH: u16 = 1;
const URI_HOST: u16 = 3;
const ETAG: u16 = 4;
const IF_NONE_MATCH: u16 = 5;
const URI_PORT: u16 = 7;
const LOCATION_PATH: u16 = 8;
const URI_PATH: u16 = 11;
const CONTENT_FORMAT: u16 = 12;
const MAX_AGE: u16 = 14;
const URI_QUERY: u16 = 15;
const ACCEPT: u16 = 17;
const LOCATION_QUERY: u16 = 20;
const PROXY_URI: u16 = 35;
const PROXY_SCHEME: u16 = 39;
const SIZE1: u16 = 60;

/// The largest value the two-byte extended delta/length form can carry.
const MAX_EXTENDED: usize = 0xFFFF + 269;

/// The recognized options of a message, one typed slot per option.
///
/// Repeatable options keep their insertion order; single-valued options are
/// overwritten when decoded twice. Unsigned integer options hold the decoded
/// value, which is re-encoded in its minimal-length form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub if_match: Vec<Vec<u8>>,
    pub uri_host: Option<String>,
    pub etag: Vec<Vec<u8>>,
    pub if_none_match: bool,
    pub uri_port: Option<u64>,
    pub location_path: Vec<String>,
    pub uri_path: Vec<String>,
    pub content_format: Option<u64>,
    pub max_age: Option<u64>,
    pub uri_query: Vec<String>,
    pub accept: Option<u64>,
    pub location_query: Vec<String>,
    pub proxy_uri: Option<String>,
    pub proxy_scheme: Option<String>,
    pub size1: Option<u64>,
}

impl Options {
    /// Creates an empty option set.
    pub fn new() -> Options {
        Default::default()
    }

    /// Returns whether no option is set.
    pub fn is_empty(&self) -> bool {
        *self == Options::default()
    }

    /// Populates the URI options from a `coap://` URL.
    ///
    /// `uri_host` receives the host name, `uri_port` the port (5683 when
    /// absent), `uri_path` the percent-decoded path segments and `uri_query`
    /// the percent-decoded `&`-separated query components. Path segments
    /// that are empty after trimming whitespace are left out.
    pub fn set_uri(&mut self, raw: &str) -> Result<(), Error> {
        let url =
            Url::parse(raw).map_err(|e| Error::BadUri(e.to_string()))?;
        if url.scheme() != "coap" {
            return Err(Error::BadUri(format!(
                "unsupported scheme `{}`",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| Error::BadUri("missing host".to_string()))?;

        self.uri_host = Some(host.to_string());
        self.uri_port = Some(u64::from(url.port().unwrap_or(DEFAULT_PORT)));

        self.uri_path.clear();
        if let Some(segments) = url.path_segments() {
            for segment in segments {
                let segment = decode_component(segment)?;
                let segment = segment.trim();
                if segment.is_empty() {
                    continue;
                }
                self.uri_path.push(segment.to_string());
            }
        }

        self.uri_query.clear();
        if let Some(query) = url.query() {
            for component in query.split('&') {
                if component.is_empty() {
                    continue;
                }
                self.uri_query.push(decode_component(component)?);
            }
        }

        Ok(())
    }

    /// Stores one decoded option value in its typed slot.
    ///
    /// Unknown critical (odd-numbered) options fail the decode; unknown
    /// elective options are dropped.
    pub fn decode_option(
        &mut self,
        number: u16,
        value: &[u8],
    ) -> Result<(), MessageError> {
        match number {
            IF_MATCH => self.if_match.push(value.to_vec()),
            URI_HOST => self.uri_host = Some(decode_string(number, value)?),
            ETAG => self.etag.push(value.to_vec()),
            IF_NONE_MATCH => {
                if !value.is_empty() {
                    return Err(MessageError::IncompatibleOptionValue(
                        number,
                    ));
                }
                self.if_none_match = true;
            }
            URI_PORT => self.uri_port = Some(decode_number(number, value)?),
            LOCATION_PATH => {
                self.location_path.push(decode_string(number, value)?)
            }
            URI_PATH => self.uri_path.push(decode_string(number, value)?),
            CONTENT_FORMAT => {
                self.content_format = Some(decode_number(number, value)?)
            }
            MAX_AGE => self.max_age = Some(decode_number(number, value)?),
            URI_QUERY => self.uri_query.push(decode_string(number, value)?),
            ACCEPT => self.accept = Some(decode_number(number, value)?),
            LOCATION_QUERY => {
                self.location_query.push(decode_string(number, value)?)
            }
            PROXY_URI => {
                self.proxy_uri = Some(decode_string(number, value)?)
            }
            PROXY_SCHEME => {
                self.proxy_scheme = Some(decode_string(number, value)?)
            }
            SIZE1 => self.size1 = Some(decode_number(number, value)?),
            unknown if unknown % 2 == 1 => {
                return Err(MessageError::UnknownCriticalOption(unknown))
            }
            unknown => {
                debug!("dropping unknown elective option {unknown}");
            }
        }

        Ok(())
    }

    /// Appends the serialized option stream, without a payload marker.
    ///
    /// Options are emitted in ascending option-number order with delta
    /// compression; repeated numbers keep their insertion order.
    pub(crate) fn encode_into(
        &self,
        buf: &mut Vec<u8>,
    ) -> Result<(), MessageError> {
        let mut previous = 0;

        for value in &self.if_match {
            put_option(buf, &mut previous, IF_MATCH, value)?;
        }
        if let Some(host) = &self.uri_host {
            put_option(buf, &mut previous, URI_HOST, host.as_bytes())?;
        }
        for etag in &self.etag {
            put_option(buf, &mut previous, ETAG, etag)?;
        }
        if self.if_none_match {
            put_option(buf, &mut previous, IF_NONE_MATCH, &[])?;
        }
        if let Some(port) = self.uri_port {
            put_option(buf, &mut previous, URI_PORT, &encode_uint(port))?;
        }
        for path in &self.location_path {
            put_option(buf, &mut previous, LOCATION_PATH, path.as_bytes())?;
        }
        for path in &self.uri_path {
            put_option(buf, &mut previous, URI_PATH, path.as_bytes())?;
        }
        if let Some(format) = self.content_format {
            put_option(
                buf,
                &mut previous,
                CONTENT_FORMAT,
                &encode_uint(format),
            )?;
        }
        if let Some(age) = self.max_age {
            put_option(buf, &mut previous, MAX_AGE, &encode_uint(age))?;
        }
        for query in &self.uri_query {
            put_option(buf, &mut previous, URI_QUERY, query.as_bytes())?;
        }
        if let Some(accept) = self.accept {
            put_option(buf, &mut previous, ACCEPT, &encode_uint(accept))?;
        }
        for query in &self.location_query {
            put_option(
                buf,
                &mut previous,
                LOCATION_QUERY,
                query.as_bytes(),
            )?;
        }
        if let Some(uri) = &self.proxy_uri {
            put_option(buf, &mut previous, PROXY_URI, uri.as_bytes())?;
        }
        if let Some(scheme) = &self.proxy_scheme {
            put_option(buf, &mut previous, PROXY_SCHEME, scheme.as_bytes())?;
        }
        if let Some(size) = self.size1 {
            put_option(buf, &mut previous, SIZE1, &encode_uint(size))?;
        }

        Ok(())
    }
}

fn decode_component(component: &str) -> Result<String, Error> {
    percent_decode_str(component)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| Error::BadUri(e.to_string()))
}

fn decode_string(number: u16, value: &[u8]) -> Result<String, MessageError> {
    std::str::from_utf8(value)
        .map(str::to_string)
        .map_err(|_| MessageError::IncompatibleOptionValue(number))
}

fn decode_number(number: u16, value: &[u8]) -> Result<u64, MessageError> {
    decode_uint(value)
        .ok_or(MessageError::IncompatibleOptionValue(number))
}

/// Appends one option header plus value, advancing the running number.
fn put_option(
    buf: &mut Vec<u8>,
    previous: &mut u16,
    number: u16,
    value: &[u8],
) -> Result<(), MessageError> {
    let delta = usize::from(number - *previous);
    *previous = number;

    if value.len() > MAX_EXTENDED {
        return Err(MessageError::InvalidOptionLength);
    }

    buf.push(nibble(delta) << 4 | nibble(value.len()));
    put_extended(buf, delta);
    put_extended(buf, value.len());
    buf.extend_from_slice(value);

    Ok(())
}

fn nibble(value: usize) -> u8 {
    if value <= 12 {
        value as u8
    } else if value < 269 {
        13
    } else {
        14
    }
}

fn put_extended(buf: &mut Vec<u8>, value: usize) {
    if value <= 12 {
        // Immediate, no extension byte.
    } else if value < 269 {
        buf.push((value - 13) as u8);
    } else {
        buf.extend_from_slice(&((value - 269) as u16).to_be_bytes());
    }
}

/// The content formats the client understands by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    TextPlain,
    LinkFormat,
    Xml,
    OctetStream,
    Exi,
    Json,
}

impl ContentFormat {
    /// Looks a content format up by its registered number.
    pub fn from_number(number: u64) -> Option<ContentFormat> {
        match number {
            0 => Some(ContentFormat::TextPlain),
            40 => Some(ContentFormat::LinkFormat),
            41 => Some(ContentFormat::Xml),
            42 => Some(ContentFormat::OctetStream),
            47 => Some(ContentFormat::Exi),
            50 => Some(ContentFormat::Json),
            _ => None,
        }
    }
}

impl From<ContentFormat> for u64 {
    fn from(format: ContentFormat) -> u64 {
        match format {
            ContentFormat::TextPlain => 0,
            ContentFormat::LinkFormat => 40,
            ContentFormat::Xml => 41,
            ContentFormat::OctetStream => 42,
            ContentFormat::Exi => 47,
            ContentFormat::Json => 50,
        }
    }
}

impl FromStr for ContentFormat {
    type Err = Error;

    fn from_str(name: &str) -> Result<ContentFormat, Error> {
        match name {
            "text/plain" => Ok(ContentFormat::TextPlain),
            "application/link-format" => Ok(ContentFormat::LinkFormat),
            "application/xml" => Ok(ContentFormat::Xml),
            "application/octet-stream" => Ok(ContentFormat::OctetStream),
            "application/exi" => Ok(ContentFormat::Exi),
            "application/json" => Ok(ContentFormat::Json),
            _ => Err(Error::BadContentFormat(name.to_string())),
        }
    }
}

impl fmt::Display for ContentFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ContentFormat::TextPlain => "text/plain",
            ContentFormat::LinkFormat => "application/link-format",
            ContentFormat::Xml => "application/xml",
            ContentFormat::OctetStream => "application/octet-stream",
            ContentFormat::Exi => "application/exi",
            ContentFormat::Json => "application/json",
        };
        f.write_str(name)
    }
}
