//! Length-prefixed request/response codec.
//!
//! All integers are big-endian `i32`.
//!
//! Request:
//!
//! ```text
//! token_count: i32                      1..=MAX_TOKENS
//! token_count x { len: i32, utf8 }      [verb, mode_or_name, value]
//! payload_len: i32, payload             PUT only
//! ```
//!
//! Response:
//!
//! ```text
//! status: i32
//! id: i32                               PUT 200 only
//! content_len: i32, content             GET 200 only
//! ```
//!
//! Every decode reads exactly one request and every encode flushes, so nothing is
//! carried from one exchange into the next.

use crate::message::{
    Command, Expect, Locator, Response, Status, MODE_BY_ID, MODE_BY_NAME, VERB_DELETE, VERB_GET,
    VERB_PUT, VERB_TERMINATE,
};
use filestore_types::FileId;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on tokens in one request.
pub const MAX_TOKENS: usize = 3;

/// Upper bound on the byte length of a single token.
pub const MAX_TOKEN_LEN: usize = 4096;

/// Default upper bound on a PUT payload (64 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Errors that end the exchange.
///
/// A request whose framing is intact but whose content is not understood is not an
/// error; it decodes to [`Command::Invalid`]. Everything here leaves the stream at an
/// unknown position, so the session cannot continue after it.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("connection closed before the message was complete")]
    Truncated,
    #[error("negative length prefix: {0}")]
    NegativeLength(i32),
    #[error("{what} of {len} bytes exceeds the limit of {limit}")]
    TooLarge {
        what: &'static str,
        len: usize,
        limit: usize,
    },
    #[error("token count {0} is outside 1..={max}", max = MAX_TOKENS)]
    TokenCount(i32),
    #[error("unexpected status code {0}")]
    UnexpectedStatus(i32),
    #[error("received an invalid file id: {0}")]
    InvalidId(i32),
    #[error("I/O error: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            ErrorKind::UnexpectedEof => ProtocolError::Truncated,
            _ => ProtocolError::Io(e),
        }
    }
}

async fn read_len<R>(
    reader: &mut R,
    what: &'static str,
    limit: usize,
) -> Result<usize, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let raw = reader.read_i32().await?;
    let len = usize::try_from(raw).map_err(|_| ProtocolError::NegativeLength(raw))?;
    if len > limit {
        return Err(ProtocolError::TooLarge { what, len, limit });
    }
    Ok(len)
}

async fn read_bytes<R>(reader: &mut R, len: usize) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    // Grow with the data actually received rather than trusting the prefix up front.
    let mut buf = Vec::with_capacity(len.min(64 * 1024));
    let read = (&mut *reader).take(len as u64).read_to_end(&mut buf).await?;
    if read != len {
        return Err(ProtocolError::Truncated);
    }
    Ok(buf)
}

fn wire_len(what: &'static str, len: usize) -> Result<i32, ProtocolError> {
    i32::try_from(len).map_err(|_| ProtocolError::TooLarge {
        what,
        len,
        limit: i32::MAX as usize,
    })
}

/// Reads one request.
///
/// PUT payloads longer than `max_payload` are rejected before any payload byte is read.
///
/// # Errors
///
/// Returns a [`ProtocolError`] if the stream ends mid-request or a length prefix is
/// negative or over its limit.
pub async fn decode<R>(reader: &mut R, max_payload: usize) -> Result<Command, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let count = reader.read_i32().await?;
    if count < 1 || count as usize > MAX_TOKENS {
        return Err(ProtocolError::TokenCount(count));
    }

    let mut raw_tokens = Vec::with_capacity(MAX_TOKENS);
    for _ in 0..count {
        let len = read_len(reader, "token", MAX_TOKEN_LEN).await?;
        raw_tokens.push(read_bytes(reader, len).await?);
    }
    raw_tokens.resize(MAX_TOKENS, Vec::new());

    // The payload belongs to the frame even if the rest of the request turns out to be
    // unusable, so it is consumed before anything is interpreted.
    let payload = if raw_tokens[0] == VERB_PUT.as_bytes() {
        let len = read_len(reader, "payload", max_payload).await?;
        Some(read_bytes(reader, len).await?)
    } else {
        None
    };

    let mut tokens = Vec::with_capacity(MAX_TOKENS);
    for raw in raw_tokens {
        match String::from_utf8(raw) {
            Ok(token) => tokens.push(token),
            Err(_) => return Ok(Command::Invalid("token is not valid UTF-8".into())),
        }
    }
    let [verb, second, third]: [String; MAX_TOKENS] = match tokens.try_into() {
        Ok(tokens) => tokens,
        Err(_) => return Ok(Command::Invalid("wrong number of tokens".into())),
    };

    let locator = |mode: String, value: String| match mode.as_str() {
        MODE_BY_NAME => Ok(Locator::ByName(value)),
        MODE_BY_ID => Ok(Locator::ById(value)),
        _ => Err(Command::Invalid(format!("unknown locator mode {mode:?}"))),
    };

    let command = match verb.as_str() {
        VERB_GET => locator(second, third).map(Command::Get).unwrap_or_else(|c| c),
        VERB_DELETE => locator(second, third).map(Command::Delete).unwrap_or_else(|c| c),
        VERB_PUT => Command::Put {
            target_name: second,
            payload: payload.unwrap_or_default(),
        },
        VERB_TERMINATE => Command::Terminate { token: second },
        _ => Command::Invalid(format!("unknown verb {verb:?}")),
    };

    Ok(command)
}

/// Writes one response and flushes it.
///
/// # Errors
///
/// Returns [`ProtocolError::TooLarge`] without writing anything if the content does not
/// fit a wire length, or [`ProtocolError::Io`] if the write fails.
pub async fn encode<W>(writer: &mut W, response: &Response) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    match response {
        Response::Content(content) => {
            let len = wire_len("content", content.len())?;
            writer.write_i32(Status::Ok.code()).await?;
            writer.write_i32(len).await?;
            writer.write_all(content).await?;
        }
        Response::Created(id) => {
            writer.write_i32(Status::Ok.code()).await?;
            writer.write_i32(id.to_wire()).await?;
        }
        Response::Done => writer.write_i32(Status::Ok.code()).await?,
        Response::Failed(status) => writer.write_i32(status.code()).await?,
    }
    writer.flush().await?;
    Ok(())
}

/// Writes a raw request made of `tokens`, followed by `payload` if one is given.
///
/// This is the client-side counterpart of [`decode`]; it does not check that the tokens
/// make sense.
///
/// # Errors
///
/// Returns [`ProtocolError::TokenCount`] or [`ProtocolError::TooLarge`] if the request
/// cannot be framed, or [`ProtocolError::Io`] if the write fails.
pub async fn encode_tokens<W>(
    writer: &mut W,
    tokens: &[&str],
    payload: Option<&[u8]>,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    if tokens.is_empty() || tokens.len() > MAX_TOKENS {
        return Err(ProtocolError::TokenCount(tokens.len() as i32));
    }
    if let Some(token) = tokens.iter().find(|t| t.len() > MAX_TOKEN_LEN) {
        return Err(ProtocolError::TooLarge {
            what: "token",
            len: token.len(),
            limit: MAX_TOKEN_LEN,
        });
    }
    let payload_len = payload
        .map(|p| wire_len("payload", p.len()))
        .transpose()?;

    writer.write_i32(tokens.len() as i32).await?;
    for token in tokens {
        writer.write_i32(token.len() as i32).await?;
        writer.write_all(token.as_bytes()).await?;
    }

    if let (Some(payload), Some(len)) = (payload, payload_len) {
        writer.write_i32(len).await?;
        writer.write_all(payload).await?;
    }

    writer.flush().await?;
    Ok(())
}

/// Writes `command` as a request.
///
/// # Errors
///
/// [`Command::Invalid`] has no wire form and is reported as
/// [`ProtocolError::Io`] with kind `InvalidInput`; other errors as for
/// [`encode_tokens`].
pub async fn encode_command<W>(writer: &mut W, command: &Command) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    match command {
        Command::Get(locator) => {
            encode_tokens(writer, &[VERB_GET, locator.mode(), locator.value()], None).await
        }
        Command::Delete(locator) => {
            encode_tokens(writer, &[VERB_DELETE, locator.mode(), locator.value()], None).await
        }
        Command::Put {
            target_name,
            payload,
        } => encode_tokens(writer, &[VERB_PUT, target_name.as_str(), ""], Some(payload)).await,
        Command::Terminate { token } => {
            encode_tokens(writer, &[VERB_TERMINATE, token.as_str(), ""], None).await
        }
        Command::Invalid(reason) => Err(ProtocolError::Io(std::io::Error::new(
            ErrorKind::InvalidInput,
            format!("cannot encode invalid command: {reason}"),
        ))),
    }
}

/// Reads one response whose success body has the shape `expect`.
///
/// `max_content` bounds the size of a GET body.
///
/// # Errors
///
/// Returns a [`ProtocolError`] if the stream ends early, the status code is unknown or
/// a returned id or length is out of range.
pub async fn decode_response<R>(
    reader: &mut R,
    expect: Expect,
    max_content: usize,
) -> Result<Response, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let code = reader.read_i32().await?;
    let status = Status::from_code(code).ok_or(ProtocolError::UnexpectedStatus(code))?;

    if status != Status::Ok {
        return Ok(Response::Failed(status));
    }

    let response = match expect {
        Expect::Content => {
            let len = read_len(reader, "content", max_content).await?;
            Response::Content(read_bytes(reader, len).await?)
        }
        Expect::Id => {
            let raw = reader.read_i32().await?;
            Response::Created(FileId::from_wire(raw).ok_or(ProtocolError::InvalidId(raw))?)
        }
        Expect::StatusOnly => Response::Done,
    };

    Ok(response)
}
