//! Events produced by the reactor.
//!
//! Every connection-level outcome is queued here during `wait()` and
//! drained by the owner afterwards, in the order it happened. Events of one
//! token are never reordered.

use bytes::Bytes;
use hivenet_core::proto::{PackHeader, ProtoType};
use hivenet_core::router::RouterHeader;
use hivenet_core::Token;

/// A non-RPC inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Package {
    Pack { header: PackHeader, body: Bytes },
    Common(Bytes),
    Text(Bytes),
}

impl Package {
    /// Payload bytes, without any framing header.
    pub fn body(&self) -> &Bytes {
        match self {
            Self::Pack { body, .. } => body,
            Self::Common(body) | Self::Text(body) => body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A listener admitted a new stream.
    Accepted {
        listener: Token,
        token: Token,
        proto: ProtoType,
        ip: String,
    },

    /// An outbound connect finished. On failure the token is already closed.
    Connected {
        token: Token,
        result: Result<(), String>,
    },

    /// The connection failed and is now closed.
    ///
    /// Explicit `close()` calls do not produce this event.
    Error { token: Token, reason: String },

    /// RPC remote call addressed to this node.
    Call {
        token: Token,
        header: RouterHeader,
        payload: Bytes,
    },

    /// Pack, common or text message.
    Package { token: Token, package: Package },

    /// A forward requested by `token` could not be delivered.
    ///
    /// The requesting connection stays open.
    ForwardError {
        token: Token,
        header: RouterHeader,
        reason: String,
    },
}

impl Event {
    /// Token the event belongs to.
    pub fn token(&self) -> Token {
        match self {
            Self::Accepted { token, .. }
            | Self::Connected { token, .. }
            | Self::Error { token, .. }
            | Self::Call { token, .. }
            | Self::Package { token, .. }
            | Self::ForwardError { token, .. } => *token,
        }
    }
}
