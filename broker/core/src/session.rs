//! Streaming Session Broker
//!
//! Holds in-flight streaming generations under opaque tokens until a client
//! comes back to drain them.
//!
//! # Lifecycle
//!
//! ```text
//!   open(stream) ──► Active ──consume(token)──► Consuming ──exhausted/dropped──► Retired
//!                                                                            (entry removed)
//! ```
//!
//! A token is drained by exactly one consumer, exactly once. `consume` on a
//! token that is missing, retired or already being consumed fails with
//! [`SessionError::UnknownToken`].
//!
//! Sessions that are opened but never consumed stay `Active` for the life of
//! the process. There is no expiry.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::backend::FragmentStream;

/// Opaque handle naming one stored stream
///
/// Minted from a random v4 UUID. Any string can be parsed into a token; one
/// that was never issued simply never matches.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Mint a fresh random token
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Token text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for SessionToken {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors from the session broker
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Token was never issued, is retired, or is being consumed
    #[error("unknown session token: {0}")]
    UnknownToken(SessionToken),
}

/// Wrap a fragment as one event-stream payload
#[must_use]
pub fn frame_event(fragment: &str) -> String {
    format!("data: {fragment}\n\n")
}

/// Session table entry
enum Slot {
    Active(FragmentStream),
    Consuming,
}

/// Owner of all in-flight streaming sessions
///
/// Cheap to clone; clones share one table.
#[derive(Clone, Default)]
pub struct SessionBroker {
    table: Arc<DashMap<SessionToken, Slot>>,
}

impl SessionBroker {
    /// Create an empty broker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `stream` under a fresh token
    pub fn open(&self, stream: FragmentStream) -> SessionToken {
        loop {
            let token = SessionToken::generate();
            match self.table.entry(token.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(Slot::Active(stream));
                    debug!(token = %token, "Opened streaming session");
                    return token;
                }
                Entry::Occupied(_) => {
                    warn!(token = %token, "Token collision, minting another");
                }
            }
        }
    }

    /// Claim the session for `token` and drain it as framed payloads
    ///
    /// The entry is removed once the returned stream ends or is dropped.
    pub fn consume(&self, token: &SessionToken) -> Result<SessionStream, SessionError> {
        let inner = {
            let mut entry = self
                .table
                .get_mut(token)
                .ok_or_else(|| SessionError::UnknownToken(token.clone()))?;

            match std::mem::replace(entry.value_mut(), Slot::Consuming) {
                Slot::Active(stream) => stream,
                Slot::Consuming => {
                    debug!(token = %token, "Session already being consumed");
                    return Err(SessionError::UnknownToken(token.clone()));
                }
            }
        };

        debug!(token = %token, "Consuming streaming session");

        Ok(SessionStream {
            token: token.clone(),
            inner: Some(inner),
            table: Arc::clone(&self.table),
        })
    }

    /// Whether `token` is still in the table (active or being consumed)
    #[must_use]
    pub fn contains(&self, token: &SessionToken) -> bool {
        self.table.contains_key(token)
    }

    /// Number of sessions not yet retired
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether no sessions are live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl fmt::Debug for SessionBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBroker")
            .field("sessions", &self.table.len())
            .finish()
    }
}

/// Single-pass drain of one session, yielding `data: <fragment>\n\n` payloads
///
/// Retires its session when the underlying stream is exhausted, fails, or
/// when this stream is dropped early.
pub struct SessionStream {
    token: SessionToken,
    inner: Option<FragmentStream>,
    table: Arc<DashMap<SessionToken, Slot>>,
}

impl SessionStream {
    /// Token being drained
    #[must_use]
    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    fn retire(&mut self) {
        if self.inner.take().is_some() {
            self.table.remove(&self.token);
            debug!(token = %self.token, "Removed streaming session");
        }
    }
}

impl Stream for SessionStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        let this = &mut *self;
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(fragment))) => Poll::Ready(Some(frame_event(&fragment))),
            Poll::Ready(Some(Err(e))) => {
                warn!(
                    token = %this.token,
                    kind = e.kind(),
                    error = %e,
                    "Backend failed mid-stream"
                );
                this.retire();
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                this.retire();
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        if self.inner.is_some() {
            debug!(token = %self.token, "Consumer dropped before end of stream");
            self.retire();
        }
    }
}
