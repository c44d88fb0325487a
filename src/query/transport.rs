use dashmap::DashMap;
use log::{ debug, error, info, warn };
use std::io::ErrorKind;
use std::net::{ IpAddr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket };
use std::sync::{ Arc, Weak };
use std::thread::{ self, JoinHandle };
use std::time::{ Duration, Instant };
use thiserror::Error;

use crate::models::server::{ QueryRequest, ServerAddress, ServerRecord };
use crate::query::cancel::CancellationToken;
use crate::query::packet::{ decode_response, encode_request, MAX_DATAGRAM };

/// How long a failed hostname lookup is reported from cache before it is
/// tried again.
const FAILED_LOOKUP_RETRY: Duration = Duration::from_secs(30);
/// Receive timeout, so the receiver notices cancellation.
const RECEIVE_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not resolve {address}: {reason}")]
    Resolve {
        address: ServerAddress,
        reason: String,
    },
    #[error("{0} is still being resolved")]
    Resolving(ServerAddress),
    #[error("{0} has no IPv4 address, IPv6 addresses are not supported")]
    IPv6NotSupported(ServerAddress),
    #[error("send failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Fire-and-forget query sender. Responses come back asynchronously through
/// [`ServerRecord::on_response`], from any thread, possibly long after the
/// requester moved on.
pub trait Transport: Send + Sync {
    fn send(&self, record: &Arc<ServerRecord>, request: QueryRequest) -> Result<(), TransportError>;

    /// Drops whatever the transport keeps for `address`.
    fn release(&self, _address: &ServerAddress) {}
}

type Lookup = dyn Fn(&ServerAddress) -> std::io::Result<Vec<SocketAddr>> + Send + Sync;

fn system_lookup(address: &ServerAddress) -> std::io::Result<Vec<SocketAddr>> {
    Ok((address.host.as_str(), address.port).to_socket_addrs()?.collect())
}

#[derive(Debug, Clone)]
enum Resolution {
    Pending,
    Resolved(SocketAddrV4),
    Failed {
        at: Instant,
        reason: String,
    },
}

/// Endpoints given as IP literals need no lookup.
fn literal_target(address: &ServerAddress) -> Option<Result<SocketAddrV4, TransportError>> {
    match address.host.parse::<IpAddr>().ok()? {
        IpAddr::V4(ip) => Some(Ok(SocketAddrV4::new(ip, address.port))),
        IpAddr::V6(_) => Some(Err(TransportError::IPv6NotSupported(address.clone()))),
    }
}

/// SA-MP query transport over a single UDP socket.
///
/// Sends go straight out on the caller's thread. Hostnames are looked up on
/// a separate thread, so a slow lookup never holds up a send.
pub struct UdpTransport {
    socket: UdpSocket,
    lookup: Arc<Lookup>,
    resolved: Arc<DashMap<ServerAddress, Resolution>>,
    routes: DashMap<SocketAddr, Vec<Weak<ServerRecord>>>,
}

/// The running receive loop of a [`UdpTransport`].
pub struct Receiver {
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl Receiver {
    /// Stops the loop and waits for it to exit.
    pub fn stop(mut self) {
        self.cancel.cancel();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl UdpTransport {
    pub fn bind(addr: &str) -> std::io::Result<Arc<Self>> {
        Self::bind_with_lookup(addr, Arc::new(system_lookup))
    }

    fn bind_with_lookup(addr: &str, lookup: Arc<Lookup>) -> std::io::Result<Arc<Self>> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(RECEIVE_POLL))?;
        info!("Query socket bound on {}", socket.local_addr()?);
        Ok(Arc::new(Self {
            socket,
            lookup,
            resolved: Arc::new(DashMap::new()),
            routes: DashMap::new(),
        }))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Starts the receive loop on its own thread.
    pub fn spawn_receiver(self: &Arc<Self>) -> std::io::Result<Receiver> {
        let transport = Arc::clone(self);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let thread = thread::Builder::new()
            .name("query-receiver".to_string())
            .spawn(move || {
                let mut buffer = [0u8; MAX_DATAGRAM];
                while !token.is_cancelled() {
                    match transport.socket.recv_from(&mut buffer) {
                        Ok((len, from)) => transport.deliver(from, &buffer[..len]),
                        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                        Err(e) => {
                            // ICMP port-unreachable surfaces here on some platforms.
                            debug!("Query socket receive error: {}", e);
                        }
                    }
                }
                debug!("Query receiver stopped");
            })?;
        Ok(Receiver { cancel, thread: Some(thread) })
    }

    /// Returns the cached target for `address`. Unknown hostnames start a
    /// lookup and report [`TransportError::Resolving`] until it finishes.
    fn resolve(&self, address: &ServerAddress) -> Result<SocketAddrV4, TransportError> {
        if let Some(target) = literal_target(address) {
            return target;
        }

        let mut start_lookup = false;
        let state = {
            let mut entry = self.resolved.entry(address.clone()).or_insert_with(|| {
                start_lookup = true;
                Resolution::Pending
            });
            let expired = matches!(&*entry, Resolution::Failed { at, .. } if at.elapsed() >= FAILED_LOOKUP_RETRY);
            if expired {
                *entry = Resolution::Pending;
                start_lookup = true;
            }
            entry.clone()
        };

        if start_lookup {
            self.spawn_lookup(address.clone());
        }
        match state {
            Resolution::Resolved(target) => Ok(target),
            Resolution::Pending => Err(TransportError::Resolving(address.clone())),
            Resolution::Failed { reason, .. } => Err(TransportError::Resolve { address: address.clone(), reason }),
        }
    }

    fn spawn_lookup(&self, address: ServerAddress) {
        let resolved = self.resolved.clone();
        let lookup = self.lookup.clone();
        let name = format!("resolve-{}", address);
        let target = address.clone();
        let spawned = thread::Builder::new()
            .name(name)
            .spawn(move || {
                let outcome = match lookup(&target) {
                    Ok(candidates) => candidates
                        .into_iter()
                        .find_map(|addr| match addr {
                            SocketAddr::V4(v4) => Some(Resolution::Resolved(v4)),
                            SocketAddr::V6(_) => None,
                        })
                        .unwrap_or_else(|| Resolution::Failed {
                            at: Instant::now(),
                            reason: "no IPv4 address".to_string(),
                        }),
                    Err(e) => Resolution::Failed { at: Instant::now(), reason: e.to_string() },
                };
                match &outcome {
                    Resolution::Resolved(v4) => debug!("Resolved {} to {}", target, v4),
                    Resolution::Failed { reason, .. } => warn!("Could not resolve {}: {}", target, reason),
                    Resolution::Pending => {}
                }
                // Released while the lookup ran.
                if let Some(mut entry) = resolved.get_mut(&target) {
                    *entry = outcome;
                }
            });
        if let Err(e) = spawned {
            warn!("Could not start lookup for {}: {}", address, e);
            self.resolved.insert(address, Resolution::Failed { at: Instant::now(), reason: e.to_string() });
        }
    }

    fn route(&self, target: SocketAddr, record: &Arc<ServerRecord>) {
        let mut entry = self.routes.entry(target).or_default();
        entry.retain(|weak| weak.strong_count() > 0);
        if !entry.iter().any(|weak| weak.as_ptr() == Arc::as_ptr(record)) {
            entry.push(Arc::downgrade(record));
        }
    }

    /// Hands a datagram to every live record registered for its sender.
    pub fn deliver(&self, from: SocketAddr, datagram: &[u8]) {
        let response = match decode_response(datagram) {
            Ok((_, response)) => response,
            Err(e) => {
                debug!("Discarding datagram from {}: {}", from, e);
                return;
            }
        };

        let records: Vec<Arc<ServerRecord>> = match self.routes.get(&from) {
            Some(entry) => entry.iter().filter_map(Weak::upgrade).collect(),
            None => {
                debug!("Discarding {} reply from unknown sender {}", response.kind(), from);
                return;
            }
        };

        for record in records {
            record.on_response(response.clone());
        }
    }
}

impl Transport for UdpTransport {
    fn send(&self, record: &Arc<ServerRecord>, request: QueryRequest) -> Result<(), TransportError> {
        let target = self.resolve(record.address())?;
        self.route(SocketAddr::V4(target), record);

        let packet = encode_request(target, &request);
        match self.socket.send_to(&packet, SocketAddr::V4(target)) {
            Ok(_) => Ok(()),
            Err(e) => {
                error!("Error sending {} query to {}: {}", request.kind, record.address(), e);
                Err(e.into())
            }
        }
    }

    fn release(&self, address: &ServerAddress) {
        let target = match self.resolved.remove(address) {
            Some((_, Resolution::Resolved(target))) => Some(target),
            Some(_) => None,
            None => literal_target(address).and_then(Result::ok),
        };
        if let Some(target) = target {
            let target = SocketAddr::V4(target);
            let empty = match self.routes.get_mut(&target) {
                Some(mut entry) => {
                    entry.retain(|weak| weak.strong_count() > 0);
                    entry.is_empty()
                }
                None => false,
            };
            if empty {
                self.routes.remove(&target);
            }
        }
    }
}

/// In-process transport for tests: records every send, answers nothing.
pub mod testing {
    use super::*;
    use crate::models::query::RequestKind;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct RecordingTransport {
        sent: Mutex<Vec<(ServerAddress, QueryRequest)>>,
        asked: Mutex<Vec<Weak<ServerRecord>>>,
        released: Mutex<Vec<ServerAddress>>,
    }

    impl RecordingTransport {
        pub fn sent_count(&self, address: &ServerAddress, kind: RequestKind) -> usize {
            self.sent
                .lock()
                .iter()
                .filter(|(a, r)| a == address && r.kind == kind)
                .count()
        }

        pub fn total_sent(&self) -> usize {
            self.sent.lock().len()
        }

        pub fn released(&self) -> Vec<ServerAddress> {
            self.released.lock().clone()
        }

        /// Live records queried for `address`, most recent first.
        pub fn records_for(&self, address: &ServerAddress) -> Vec<Arc<ServerRecord>> {
            let mut records: Vec<Arc<ServerRecord>> = Vec::new();
            for record in self.asked.lock().iter().rev().filter_map(Weak::upgrade) {
                if record.address() == address && !records.iter().any(|known| Arc::ptr_eq(known, &record)) {
                    records.push(record);
                }
            }
            records
        }
    }

    impl Transport for RecordingTransport {
        fn send(&self, record: &Arc<ServerRecord>, request: QueryRequest) -> Result<(), TransportError> {
            self.sent.lock().push((record.address().clone(), request));
            self.asked.lock().push(Arc::downgrade(record));
            Ok(())
        }

        fn release(&self, address: &ServerAddress) {
            self.released.lock().push(address.clone());
        }
    }
}
