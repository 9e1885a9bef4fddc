//! # Remote control boundary
//!
//! The wire protocol spoken to the remote show-control instances is not part of
//! this crate. Everything the actuation core needs from it is captured by two
//! traits:
//!
//! - [`Connector`] opens a [`Session`] for a bare `host:port` address and an
//!   optional credential.
//! - [`Session`] issues an [`Action`], lists the scenes the remote knows about
//!   and closes itself.
//!
//! ```text
//! Coordinator ──► ConnectionCache ──► Connector::open ──► Session
//!      │                                                     ▲
//!      └────────────── ephemeral policy ─────────────────────┘
//! ```
//!
//! Address normalisation ([`normalize_address`]) and the [`Target`] /
//! [`Action`] data model also live here so that every caller agrees on what a
//! cache key looks like.

pub mod cache;

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use cache::ConnectionCache;

/// Errors surfaced by a remote-control client implementation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Request rejected: {0}")]
    Request(String),

    #[error("Session closed")]
    Closed,
}

/// An open, authenticated channel to one remote endpoint.
#[async_trait]
pub trait Session: Send + Sync {
    /// Performs `action` on the remote.
    async fn issue_action(&self, action: &Action) -> Result<(), RemoteError>;

    /// Names the remote currently accepts as scene targets.
    async fn list_scenes(&self) -> Result<Vec<String>, RemoteError>;

    async fn close(&self) -> Result<(), RemoteError>;
}

/// Factory for [`Session`]s.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a session to `address` (bare `host:port`). `None` means the
    /// remote is contacted without authentication.
    async fn open(
        &self,
        address: &str,
        credential: Option<&str>,
    ) -> Result<Box<dyn Session>, RemoteError>;
}

/// One remote endpoint for a single actuation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub name: String,
    pub address: String,
    /// Empty means unauthenticated.
    pub credential: String,
    pub enabled: bool,
}

impl Target {
    /// Builds an enabled target, normalising the address and trimming the
    /// credential.
    pub fn new(name: impl Into<String>, address: &str, credential: &str) -> Self {
        Self {
            name: name.into(),
            address: normalize_address(address),
            credential: credential.trim().to_string(),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Strips surrounding whitespace and any `scheme://` prefix (matched
/// case-insensitively), leaving a bare `host:port`.
pub fn normalize_address(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(idx) = trimmed.find("://") {
        let scheme = &trimmed[..idx];
        let is_scheme = !scheme.is_empty()
            && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if is_scheme {
            return trimmed[idx + 3..].trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Operation applied to a media input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaOp {
    None,
    Play,
    Pause,
    Stop,
    Restart,
    Resume,
}

impl fmt::Display for MediaOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaOp::None => write!(f, "none"),
            MediaOp::Play => write!(f, "play"),
            MediaOp::Pause => write!(f, "pause"),
            MediaOp::Stop => write!(f, "stop"),
            MediaOp::Restart => write!(f, "restart"),
            MediaOp::Resume => write!(f, "resume"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown media operation: {0}")]
pub struct UnknownMediaOp(pub String);

impl FromStr for MediaOp {
    type Err = UnknownMediaOp;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(MediaOp::None),
            "play" => Ok(MediaOp::Play),
            "pause" => Ok(MediaOp::Pause),
            "stop" => Ok(MediaOp::Stop),
            "restart" => Ok(MediaOp::Restart),
            "resume" => Ok(MediaOp::Resume),
            other => Err(UnknownMediaOp(other.to_string())),
        }
    }
}

/// The unit of synchronised work: exactly one operation per actuation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Make the named scene the active one.
    SetScene(String),
    /// Drive a media input.
    Media { input: String, op: MediaOp },
}

impl Action {
    pub fn scene(name: impl Into<String>) -> Self {
        Action::SetScene(name.into())
    }

    /// An action with nothing to do: a blank scene name, or a media action
    /// without an input or with [`MediaOp::None`].
    pub fn is_empty(&self) -> bool {
        match self {
            Action::SetScene(name) => name.trim().is_empty(),
            Action::Media { input, op } => input.trim().is_empty() || *op == MediaOp::None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::SetScene(name) => write!(f, "scene '{}'", name),
            Action::Media { input, op } => write!(f, "media '{}' {}", input, op),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_scheme_and_whitespace() {
        let cases = [
            ("127.0.0.1:4455", "127.0.0.1:4455"),
            (" ws://127.0.0.1:4455 ", "127.0.0.1:4455"),
            ("wss://example.com:4455", "example.com:4455"),
            ("WS://Example.com:4455", "Example.com:4455"),
            ("  example.com:4455  ", "example.com:4455"),
            ("", ""),
            ("   ", ""),
        ];
        for (input, expected) in cases {
            assert_eq!(normalize_address(input), expected, "input {:?}", input);
        }
    }

    #[test]
    fn target_new_normalizes_fields() {
        let target = Target::new("Main", " ws://10.0.0.21:4455", "  secret ");
        assert_eq!(target.address, "10.0.0.21:4455");
        assert_eq!(target.credential, "secret");
        assert!(target.enabled);
        assert!(!target.disabled().enabled);
    }

    #[test]
    fn media_op_parses_case_insensitively() {
        assert_eq!("PLAY".parse::<MediaOp>(), Ok(MediaOp::Play));
        assert_eq!(" resume ".parse::<MediaOp>(), Ok(MediaOp::Resume));
        assert_eq!("".parse::<MediaOp>(), Ok(MediaOp::None));
        assert!("rewind".parse::<MediaOp>().is_err());
    }

    #[test]
    fn empty_actions() {
        assert!(Action::scene("  ").is_empty());
        assert!(!Action::scene("SceneA").is_empty());
        assert!(Action::Media {
            input: "Clip".into(),
            op: MediaOp::None
        }
        .is_empty());
        assert!(Action::Media {
            input: "".into(),
            op: MediaOp::Play
        }
        .is_empty());
        assert!(!Action::Media {
            input: "Clip".into(),
            op: MediaOp::Stop
        }
        .is_empty());
    }
}
