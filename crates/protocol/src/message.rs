//! Decoded requests and responses.

use filestore_types::FileId;
use std::fmt;

pub(crate) const VERB_GET: &str = "GET";
pub(crate) const VERB_PUT: &str = "PUT";
pub(crate) const VERB_DELETE: &str = "DELETE";
pub(crate) const VERB_TERMINATE: &str = "exit";

pub(crate) const MODE_BY_NAME: &str = "BY_NAME";
pub(crate) const MODE_BY_ID: &str = "BY_ID";

/// How a GET or DELETE identifies its target.
///
/// The value is kept exactly as the client sent it. An id that does not parse is a
/// lookup miss, not a protocol error, so parsing is left to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    ByName(String),
    ById(String),
}

impl Locator {
    pub(crate) fn mode(&self) -> &'static str {
        match self {
            Locator::ByName(_) => MODE_BY_NAME,
            Locator::ById(_) => MODE_BY_ID,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Locator::ByName(v) | Locator::ById(v) => v,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.mode(), self.value())
    }
}

/// A single decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get(Locator),
    /// An empty `target_name` asks the server to pick one.
    Put {
        target_name: String,
        payload: Vec<u8>,
    },
    Delete(Locator),
    /// Administrative shutdown; `token` is checked against the configured admin token.
    Terminate {
        token: String,
    },
    /// A fully framed request the server does not understand.
    Invalid(String),
}

impl Command {
    /// Short label used in logs.
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Get(_) => VERB_GET,
            Command::Put { .. } => VERB_PUT,
            Command::Delete(_) => VERB_DELETE,
            Command::Terminate { .. } => VERB_TERMINATE,
            Command::Invalid(_) => "INVALID",
        }
    }

    /// The body shape a successful reply to this command carries.
    pub fn expect(&self) -> Expect {
        match self {
            Command::Get(_) => Expect::Content,
            Command::Put { .. } => Expect::Id,
            _ => Expect::StatusOnly,
        }
    }
}

/// Status codes carried by every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    BadRequest,
    Forbidden,
    NotFound,
}

impl Status {
    pub fn code(self) -> i32 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::Forbidden => 403,
            Status::NotFound => 404,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            200 => Some(Status::Ok),
            400 => Some(Status::BadRequest),
            403 => Some(Status::Forbidden),
            404 => Some(Status::NotFound),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A response to one command.
///
/// Only successful GET and PUT replies carry a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// GET succeeded.
    Content(Vec<u8>),
    /// PUT succeeded and the file was assigned this id.
    Created(FileId),
    /// DELETE or TERMINATE succeeded.
    Done,
    /// Any failure.
    Failed(Status),
}

impl Response {
    pub fn status(&self) -> Status {
        match self {
            Response::Content(_) | Response::Created(_) | Response::Done => Status::Ok,
            Response::Failed(status) => *status,
        }
    }
}

/// What follows a 200 status on the wire. The client must know this from the command it
/// sent; the response itself does not say.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    Content,
    Id,
    StatusOnly,
}
