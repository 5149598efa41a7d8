//! The request-processing agent: data providers, per-transaction state,
//! the processor pipeline, RADIUS authentication and the server driver.

pub mod dp;
pub mod processor;
pub mod radauth;
pub mod radius;
pub mod request;

use crate::filters::FilterError;
use crate::rpc::RpcError;
use crate::rsr::RsrError;
use thiserror::Error;

// sub-tree prefixes
pub const META_REQ: &str = "*req";
pub const META_VARS: &str = "*vars";
pub const META_CGREQ: &str = "*cgreq";
pub const META_CGREP: &str = "*cgrep";
pub const META_REP: &str = "*rep";
pub const META_OPTS: &str = "*opts";

// action flags, in dispatch precedence order
pub const META_DRYRUN: &str = "*dryrun";
pub const META_AUTHORIZE: &str = "*authorize";
pub const META_INITIATE: &str = "*initiate";
pub const META_UPDATE: &str = "*update";
pub const META_TERMINATE: &str = "*terminate";
pub const META_MESSAGE: &str = "*message";
pub const META_CDRS: &str = "*cdrs";
pub const META_EVENT: &str = "*event";
pub const META_NONE: &str = "*none";
pub const META_RADAUTH: &str = "*radauth";

// ancillary flags
pub const META_ATTRIBUTES: &str = "*attributes";
pub const META_THRESHOLDS: &str = "*thresholds";
pub const META_STATS: &str = "*stats";
pub const META_RESOURCES: &str = "*resources";
pub const META_ACCOUNTS: &str = "*accounts";
pub const META_ROUTES: &str = "*routes";
pub const META_ROUTES_IGNORE_ERRORS: &str = "*routes_ignore_errors";
pub const META_ROUTES_EVENT_COST: &str = "*routes_event_cost";
pub const META_FD: &str = "*fd";
pub const META_DISPATCHERS: &str = "*dispatchers";
pub const META_CONTINUE: &str = "*continue";
pub const META_LOG: &str = "*log";
pub const META_AUTH: &str = "*auth";
pub const META_INIT: &str = "*init";

// well-known fields
pub const REMOTE_HOST: &str = "RemoteHost";
pub const USER_PASSWORD: &str = "UserPassword";
pub const ERROR_FIELD: &str = "Error";
pub const USAGE: &str = "Usage";
pub const MAX_USAGE: &str = "MaxUsage";

// RADIUS specifics
pub const META_RAD_REQ_TYPE: &str = "*radReqType";
pub const META_RAD_AUTH: &str = "*radAuth";
pub const META_RAD_REPLY_CODE: &str = "*radReplyCode";
pub const RADAUTH_FAILED: &str = "RADAUTH_FAILED";

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("mandatory field <{0}> has no value")]
    MandatoryMissing(String),
    #[error("unsupported field type <{0}>")]
    UnsupportedFieldType(String),
    #[error("unsupported path prefix <{0}>")]
    UnknownPathPrefix(String),
    #[error("sub-tree <{0}> is read-only")]
    ReadOnlySubtree(String),
    #[error("unknown template <{0}>")]
    UnknownTemplate(String),
    #[error("usage difference needs two values, got {0}")]
    UsageDifferenceArity(usize),
    #[error("processor <{0}> has no action flag")]
    MissingActionFlag(String),
    #[error("no user password available for radius authentication")]
    MissingPassword,
    #[error("no authentication attribute in request")]
    NoAuthAttribute,
    #[error("radius authentication is only available on the RADIUS path")]
    RadAuthUnavailable,
    #[error("unknown reply attribute <{0}>")]
    UnknownReplyAttribute(String),
    #[error("unknown reply code <{0}>")]
    UnknownReplyCode(String),
    #[error(transparent)]
    Rsr(#[from] RsrError),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Packet(#[from] radius_proto::PacketError),
    #[error(transparent)]
    Dictionary(#[from] radius_proto::DictionaryError),
    #[error(transparent)]
    Chap(#[from] radius_proto::ChapError),
    #[error(transparent)]
    MsChap(#[from] radius_proto::MsChapError),
    #[error(transparent)]
    Cipher(#[from] radius_proto::CipherError),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
