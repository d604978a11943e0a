//! Client-side peer discovery, endorsement-policy based peer selection and
//! connection caching for a permissioned, multi-organisation ledger network.
//!
//! The crate locates live peers through the discovery protocol, compiles a
//! chaincode's signature policy into a peer group resolver and keeps a cache
//! of framed connections to the peers it talks to.
#[macro_use]
extern crate serde_derive;
#[macro_use(Message)]
extern crate actix_derive;

pub mod channel;
pub mod client;
pub mod connector;
pub mod discovery;
pub mod msp_id;
pub mod peer;
pub mod policy;
pub mod protocol;
pub mod selection;
pub mod settings;

#[cfg(test)]
pub mod testkit;

mod integration_test;

use std::net::SocketAddr;

#[derive(Debug)]
pub enum Error {
    IO(std::io::Error),
    Actix(actix::MailboxError),
    Config(String),
    Codec(String),

    // channel errors
    ChannelError(String),

    // discovery errors
    NoPeersFound,
    DiscoveryQueryFailed(String),

    // connector errors
    ConnectionFailed { target: SocketAddr, reason: String },
    Timeout { target: SocketAddr },
    UnexpectedResponse { target: SocketAddr },
    Closed,

    // policy / selection errors
    PolicyQueryFailed { channel_id: String, chaincode_id: String },
    PolicyUnsatisfiable(String),
    NotInitialized,
    InvalidInput(String),

    /// Error when parsing a peer description `MSP@IP`
    PeerParseError,
}

impl Error {
    /// True for failures which may succeed against a different peer or at a
    /// later time; callers should retry rather than give up.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::IO(_)
            | Error::Actix(_)
            | Error::ChannelError(_)
            | Error::NoPeersFound
            | Error::DiscoveryQueryFailed(_)
            | Error::ConnectionFailed { .. }
            | Error::Timeout { .. }
            | Error::UnexpectedResponse { .. }
            | Error::PolicyQueryFailed { .. } => true,
            _ => false,
        }
    }

    /// True when no amount of retrying can help, e.g. the endorsement policy
    /// cannot be met by any combination of the available peers.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::PolicyUnsatisfiable(_)
            | Error::InvalidInput(_)
            | Error::NotInitialized
            | Error::Closed
            | Error::Config(_)
            | Error::PeerParseError => true,
            _ => false,
        }
    }

    /// The peer a transport-level failure is attributable to, when known.
    pub fn failed_target(&self) -> Option<SocketAddr> {
        match self {
            Error::ConnectionFailed { target, .. }
            | Error::Timeout { target }
            | Error::UnexpectedResponse { target } => Some(*target),
            _ => None,
        }
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Error::IO(err) => Error::IO(std::io::Error::new(err.kind(), err.to_string())),
            Error::Actix(err) => Error::Actix(match err {
                actix::MailboxError::Closed => actix::MailboxError::Closed,
                actix::MailboxError::Timeout => actix::MailboxError::Timeout,
            }),
            Error::Config(s) => Error::Config(s.clone()),
            Error::Codec(s) => Error::Codec(s.clone()),
            Error::ChannelError(s) => Error::ChannelError(s.clone()),
            Error::NoPeersFound => Error::NoPeersFound,
            Error::DiscoveryQueryFailed(s) => Error::DiscoveryQueryFailed(s.clone()),
            Error::ConnectionFailed { target, reason } => {
                Error::ConnectionFailed { target: *target, reason: reason.clone() }
            }
            Error::Timeout { target } => Error::Timeout { target: *target },
            Error::UnexpectedResponse { target } => Error::UnexpectedResponse { target: *target },
            Error::Closed => Error::Closed,
            Error::PolicyQueryFailed { channel_id, chaincode_id } => Error::PolicyQueryFailed {
                channel_id: channel_id.clone(),
                chaincode_id: chaincode_id.clone(),
            },
            Error::PolicyUnsatisfiable(s) => Error::PolicyUnsatisfiable(s.clone()),
            Error::NotInitialized => Error::NotInitialized,
            Error::InvalidInput(s) => Error::InvalidInput(s.clone()),
            Error::PeerParseError => Error::PeerParseError,
        }
    }
}

impl std::error::Error for Error {}

impl std::convert::From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::IO(error)
    }
}

impl std::convert::From<actix::MailboxError> for Error {
    fn from(error: actix::MailboxError) -> Self {
        Error::Actix(error)
    }
}

impl std::convert::From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Error::Config(error.to_string())
    }
}

impl std::convert::From<Box<bincode::ErrorKind>> for Error {
    fn from(error: Box<bincode::ErrorKind>) -> Self {
        Error::Codec(error.to_string())
    }
}

impl std::convert::From<channel::Error> for Error {
    fn from(error: channel::Error) -> Self {
        match error {
            channel::Error::IO(io_err) => Error::IO(io_err),
            channel::Error::Closed => Error::ChannelError("channel closed".to_string()),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
