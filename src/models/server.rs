use log::debug;
use parking_lot::Mutex;
use serde::{ Deserialize, Serialize };
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{ Duration, Instant };

use crate::models::query::{ QueryState, RequestKind };
use crate::query::transport::Transport;

pub const DEFAULT_PORT: u16 = 7777;

/// Latency shown for servers whose ping is unknown.
pub const UNKNOWN_LATENCY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ServerAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("Empty server address".to_string());
        }

        // [v6]:port
        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| format!("Unterminated bracket in address: {}", s))?;
            let port = match tail.strip_prefix(':') {
                Some(p) => p.parse().map_err(|e| format!("Invalid port in {}: {}", s, e))?,
                None if tail.is_empty() => DEFAULT_PORT,
                None => return Err(format!("Invalid address: {}", s)),
            };
            return Ok(Self::new(host, port));
        }

        match s.rsplit_once(':') {
            Some((host, _)) if host.contains(':') => Ok(Self::new(s, DEFAULT_PORT)),
            Some((host, port)) if !host.is_empty() => {
                let port = port.parse().map_err(|e| format!("Invalid port in {}: {}", s, e))?;
                Ok(Self::new(host, port))
            }
            Some(_) => Err(format!("Missing host in address: {}", s)),
            None => Ok(Self::new(s, DEFAULT_PORT)),
        }
    }
}

impl TryFrom<String> for ServerAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ServerAddress> for String {
    fn from(address: ServerAddress) -> Self {
        address.to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub password: bool,
    pub players: u16,
    pub max_players: u16,
    pub hostname: String,
    pub game_mode: String,
    pub language: String,
}

impl ServerInfo {
    pub fn player_count(&self) -> String {
        format!("{}/{}", self.players, self.max_players)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub name: String,
    pub score: i32,
}

/// Where a record came from. Only `Live` records are polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Live,
    Favourite,
    Backend,
}

/// Pre-fetched data for a static record.
#[derive(Debug, Clone, Default)]
pub struct StaticSnapshot {
    pub ping: Option<Duration>,
    pub info: ServerInfo,
    pub rules: Vec<Rule>,
    pub clients: Vec<Client>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryRequest {
    pub kind: RequestKind,
    /// Echoed back by ping responses; zero for other kinds.
    pub nonce: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryResponse {
    Ping { nonce: u32 },
    Information(ServerInfo),
    Rules(Vec<Rule>),
    Clients(Vec<Client>),
}

impl QueryResponse {
    pub fn kind(&self) -> RequestKind {
        match self {
            QueryResponse::Ping { .. } => RequestKind::Ping,
            QueryResponse::Information(_) => RequestKind::Information,
            QueryResponse::Rules(_) => RequestKind::Rules,
            QueryResponse::Clients(_) => RequestKind::Clients,
        }
    }
}

#[derive(Debug, Default)]
struct RecordState {
    ping: QueryState<Duration>,
    information: QueryState<ServerInfo>,
    rules: QueryState<Vec<Rule>>,
    clients: QueryState<Vec<Client>>,
    ping_nonce: u32,
}

impl RecordState {
    fn is_fetched(&self, kind: RequestKind) -> bool {
        match kind {
            RequestKind::Ping => self.ping.is_fetched(),
            RequestKind::Information => self.information.is_fetched(),
            RequestKind::Rules => self.rules.is_fetched(),
            RequestKind::Clients => self.clients.is_fetched(),
        }
    }

    fn needs_request(&self, kind: RequestKind, now: Instant, expiry: Duration) -> bool {
        match kind {
            RequestKind::Ping => self.ping.needs_request(now, expiry),
            RequestKind::Information => self.information.needs_request(now, expiry),
            RequestKind::Rules => self.rules.needs_request(now, expiry),
            RequestKind::Clients => self.clients.needs_request(now, expiry),
        }
    }

    fn mark_pending(&mut self, kind: RequestKind, now: Instant) {
        match kind {
            RequestKind::Ping => self.ping.mark_pending(now),
            RequestKind::Information => self.information.mark_pending(now),
            RequestKind::Rules => self.rules.mark_pending(now),
            RequestKind::Clients => self.clients.mark_pending(now),
        }
    }

    fn invalidate(&mut self, kind: RequestKind) {
        match kind {
            RequestKind::Ping => self.ping.invalidate(),
            RequestKind::Information => self.information.invalidate(),
            RequestKind::Rules => self.rules.invalidate(),
            RequestKind::Clients => self.clients.invalidate(),
        }
    }
}

/// Per-endpoint query state. Shared between the group that owns it, the
/// dispatcher, the selected-target refresher and the transport's receive path.
#[derive(Debug)]
pub struct ServerRecord {
    address: ServerAddress,
    origin: Origin,
    state: Mutex<RecordState>,
}

impl ServerRecord {
    pub fn live(address: ServerAddress) -> Arc<Self> {
        Arc::new(Self {
            address,
            origin: Origin::Live,
            state: Mutex::new(RecordState::default()),
        })
    }

    /// Builds a record that reports every kind as fetched and is never polled.
    pub fn with_snapshot(address: ServerAddress, origin: Origin, snapshot: StaticSnapshot) -> Arc<Self> {
        let now = Instant::now();
        let state = RecordState {
            ping: QueryState::fetched(now, snapshot.ping.unwrap_or(UNKNOWN_LATENCY)),
            information: QueryState::fetched(now, snapshot.info),
            rules: QueryState::fetched(now, snapshot.rules),
            clients: QueryState::fetched(now, snapshot.clients),
            ping_nonce: 0,
        };
        Arc::new(Self {
            address,
            origin,
            state: Mutex::new(state),
        })
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn is_static(&self) -> bool {
        self.origin != Origin::Live
    }

    pub fn is_fetched(&self, kind: RequestKind) -> bool {
        self.state.lock().is_fetched(kind)
    }

    /// Checks all `kinds` under a single lock.
    pub fn all_fetched(&self, kinds: &[RequestKind]) -> bool {
        let state = self.state.lock();
        kinds.iter().all(|kind| state.is_fetched(*kind))
    }

    pub fn pending_since(&self, kind: RequestKind) -> Option<Instant> {
        let state = self.state.lock();
        match kind {
            RequestKind::Ping => state.ping.pending_since(),
            RequestKind::Information => state.information.pending_since(),
            RequestKind::Rules => state.rules.pending_since(),
            RequestKind::Clients => state.clients.pending_since(),
        }
    }

    /// Sends `kind` unless it is fetched or still pending within `expiry`.
    /// Returns whether a request was issued.
    pub fn request_if_stale(
        self: &Arc<Self>,
        kind: RequestKind,
        expiry: Duration,
        transport: &dyn Transport
    ) -> bool {
        if self.is_static() {
            return false;
        }

        let request = {
            let mut state = self.state.lock();
            let now = Instant::now();
            if !state.needs_request(kind, now, expiry) {
                return false;
            }
            state.mark_pending(kind, now);
            let nonce = if kind == RequestKind::Ping {
                state.ping_nonce = rand::random();
                state.ping_nonce
            } else {
                0
            };
            QueryRequest { kind, nonce }
        };

        // A failed send stays pending and goes out again after expiry.
        if let Err(e) = transport.send(self, request) {
            debug!("Query {} to {} not sent: {}", kind, self.address, e);
        }
        true
    }

    /// Re-requests `kind` even if it was already fetched.
    pub fn request_fresh(self: &Arc<Self>, kind: RequestKind, transport: &dyn Transport) -> bool {
        self.invalidate(kind);
        self.request_if_stale(kind, Duration::ZERO, transport)
    }

    pub fn invalidate(&self, kind: RequestKind) {
        if self.is_static() {
            return;
        }
        self.state.lock().invalidate(kind);
    }

    /// Stores a decoded response. Ping responses are only accepted while a
    /// ping is pending with the same nonce. Returns whether it was stored.
    pub fn on_response(&self, response: QueryResponse) -> bool {
        if self.is_static() {
            return false;
        }

        let mut state = self.state.lock();
        let now = Instant::now();
        match response {
            QueryResponse::Ping { nonce } => {
                match state.ping.pending_since() {
                    Some(since) if nonce == state.ping_nonce => {
                        state.ping.complete(now, now.saturating_duration_since(since));
                    }
                    _ => {
                        debug!("Discarding unmatched ping reply from {}", self.address);
                        return false;
                    }
                }
            }
            QueryResponse::Information(info) => state.information.complete(now, info),
            QueryResponse::Rules(rules) => state.rules.complete(now, rules),
            QueryResponse::Clients(clients) => state.clients.complete(now, clients),
        }
        true
    }

    pub fn ping(&self) -> Option<Duration> {
        self.state.lock().ping.payload().copied()
    }

    pub fn information(&self) -> Option<ServerInfo> {
        self.state.lock().information.payload().cloned()
    }

    pub fn rules(&self) -> Option<Vec<Rule>> {
        self.state.lock().rules.payload().cloned()
    }

    pub fn clients(&self) -> Option<Vec<Client>> {
        self.state.lock().clients.payload().cloned()
    }

    /// Information from the latest fetch, even if a newer request is pending.
    pub fn last_known_information(&self) -> Option<ServerInfo> {
        self.state.lock().information.last_known().cloned()
    }

    pub fn last_known_ping(&self) -> Option<Duration> {
        self.state.lock().ping.last_known().copied()
    }

    pub fn ping_nonce(&self) -> u32 {
        self.state.lock().ping_nonce
    }
}
