use serde::{ Deserialize, Serialize };
use std::fmt;
use std::time::{ Duration, Instant };

/// One independently fetched facet of a server's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Ping,
    Information,
    Rules,
    Clients,
}

impl RequestKind {
    pub const ALL: [RequestKind; 4] = [
        RequestKind::Ping,
        RequestKind::Information,
        RequestKind::Rules,
        RequestKind::Clients,
    ];

    pub fn opcode(self) -> u8 {
        match self {
            RequestKind::Ping => b'p',
            RequestKind::Information => b'i',
            RequestKind::Rules => b'r',
            RequestKind::Clients => b'c',
        }
    }

    pub fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            b'p' => Some(RequestKind::Ping),
            b'i' => Some(RequestKind::Information),
            b'r' => Some(RequestKind::Rules),
            b'c' => Some(RequestKind::Clients),
            _ => None,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::Ping => "ping",
            RequestKind::Information => "information",
            RequestKind::Rules => "rules",
            RequestKind::Clients => "clients",
        };
        f.write_str(name)
    }
}

/// Fetch status of a single request kind, carrying its payload.
///
/// The payload of a completed fetch is only reachable through
/// [`QueryState::payload`] while the state is `Fetched`. A previous payload
/// survives re-requests as `stale` so callers that want "last known" data can
/// still see it through [`QueryState::last_known`].
#[derive(Debug, Clone)]
pub enum QueryState<T> {
    NotRequested,
    Pending {
        since: Instant,
        stale: Option<T>,
    },
    Fetched {
        at: Instant,
        payload: T,
    },
    /// Explicitly invalidated after a fetch; requestable right away.
    Invalidated {
        stale: T,
    },
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        QueryState::NotRequested
    }
}

impl<T> QueryState<T> {
    pub fn fetched(at: Instant, payload: T) -> Self {
        QueryState::Fetched { at, payload }
    }

    pub fn is_fetched(&self) -> bool {
        matches!(self, QueryState::Fetched { .. })
    }

    pub fn pending_since(&self) -> Option<Instant> {
        match self {
            QueryState::Pending { since, .. } => Some(*since),
            _ => None,
        }
    }

    pub fn payload(&self) -> Option<&T> {
        match self {
            QueryState::Fetched { payload, .. } => Some(payload),
            _ => None,
        }
    }

    pub fn last_known(&self) -> Option<&T> {
        match self {
            QueryState::Fetched { payload, .. } => Some(payload),
            QueryState::Pending { stale, .. } => stale.as_ref(),
            QueryState::Invalidated { stale } => Some(stale),
            QueryState::NotRequested => None,
        }
    }

    /// Whether a request should go out now. Fetched data never expires by time.
    pub fn needs_request(&self, now: Instant, expiry: Duration) -> bool {
        match self {
            QueryState::NotRequested | QueryState::Invalidated { .. } => true,
            QueryState::Pending { since, .. } => now.saturating_duration_since(*since) >= expiry,
            QueryState::Fetched { .. } => false,
        }
    }

    pub fn mark_pending(&mut self, now: Instant) {
        let stale = match std::mem::take(self) {
            QueryState::NotRequested => None,
            QueryState::Pending { stale, .. } => stale,
            QueryState::Fetched { payload, .. } => Some(payload),
            QueryState::Invalidated { stale } => Some(stale),
        };
        *self = QueryState::Pending { since: now, stale };
    }

    pub fn complete(&mut self, now: Instant, payload: T) {
        *self = QueryState::Fetched { at: now, payload };
    }

    pub fn invalidate(&mut self) {
        if let QueryState::Fetched { .. } = self {
            if let QueryState::Fetched { payload, .. } = std::mem::take(self) {
                *self = QueryState::Invalidated { stale: payload };
            }
        }
    }
}
