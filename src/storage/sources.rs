use log::{ debug, info, warn };
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{ Deserialize, Serialize };
use std::collections::{ BTreeMap, HashMap, HashSet };
use std::path::{ Path, PathBuf };
use std::sync::Arc;
use std::time::Duration;

use crate::error::SourceError;
use crate::models::group::{ Connector, FavouriteEntry, SourceKind };
use crate::models::server::{ Origin, ServerAddress, ServerInfo, ServerRecord, StaticSnapshot };
use crate::storage::legacy;

pub type ServerMap = BTreeMap<ServerAddress, Arc<ServerRecord>>;

/// Where groups and their servers come from.
pub trait ListSourceProvider: Send + Sync {
    /// The persisted connector list.
    fn connectors(&self) -> Result<Vec<Connector>, SourceError>;

    fn save_connectors(&self, connectors: &[Connector]) -> Result<(), SourceError>;

    fn revert_to_defaults(&self) -> Result<(), SourceError>;

    /// Builds fresh records for every server listed by `connector`.
    /// Favourites and backend lists yield static records, others live ones.
    fn fetch_servers(&self, connector: &Connector) -> Result<ServerMap, SourceError>;

    fn favourites(&self, connector: &Connector) -> Result<Vec<FavouriteEntry>, SourceError>;

    fn save_favourites(&self, connector: &Connector, entries: &[FavouriteEntry]) -> Result<(), SourceError>;
}

pub fn default_connectors() -> Vec<Connector> {
    vec![
        Connector {
            name: "Favourites".to_string(),
            kind: SourceKind::Favourites,
            endpoint: "favourites.json".to_string(),
        },
        Connector {
            name: "open.mp".to_string(),
            kind: SourceKind::Backend,
            endpoint: "https://api.open.mp/servers".to_string(),
        }
    ]
}

/// A server as listed by a backend feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendServer {
    #[serde(rename = "ip")]
    pub address: ServerAddress,
    #[serde(rename = "hn", default)]
    pub hostname: String,
    #[serde(rename = "pc", default)]
    pub players: u16,
    #[serde(rename = "pm", default)]
    pub max_players: u16,
    #[serde(rename = "gm", default)]
    pub game_mode: String,
    #[serde(rename = "la", default)]
    pub language: String,
    #[serde(rename = "pa", default)]
    pub password: bool,
}

pub fn favourite_record(entry: &FavouriteEntry) -> Arc<ServerRecord> {
    let info = ServerInfo {
        password: !entry.server_password.is_empty(),
        hostname: entry.hostname.clone(),
        game_mode: entry.game_mode.clone(),
        ..Default::default()
    };
    ServerRecord::with_snapshot(entry.address.clone(), Origin::Favourite, StaticSnapshot {
        info,
        ..Default::default()
    })
}

pub fn backend_record(server: &BackendServer) -> Arc<ServerRecord> {
    let info = ServerInfo {
        password: server.password,
        players: server.players,
        max_players: server.max_players,
        hostname: server.hostname.clone(),
        game_mode: server.game_mode.clone(),
        language: server.language.clone(),
    };
    ServerRecord::with_snapshot(server.address.clone(), Origin::Backend, StaticSnapshot {
        info,
        ..Default::default()
    })
}

fn favourite_map(entries: &[FavouriteEntry]) -> ServerMap {
    entries
        .iter()
        .map(|entry| (entry.address.clone(), favourite_record(entry)))
        .collect()
}

fn parse_listed(raw: &str) -> Result<ServerAddress, SourceError> {
    raw.parse::<ServerAddress>().map_err(|_| SourceError::InvalidAddress(raw.to_string()))
}

/// Unparseable entries are skipped, the rest of the list still loads.
fn live_map(addresses: &[String]) -> ServerMap {
    let mut servers = ServerMap::new();
    for raw in addresses {
        match parse_listed(raw) {
            Ok(address) => {
                servers.insert(address.clone(), ServerRecord::live(address));
            }
            Err(e) => warn!("Skipping listed server: {}", e),
        }
    }
    servers
}

/// Connectors and favourites stored as JSON under one directory; API and
/// backend lists fetched over HTTP.
///
/// Methods block. HTTP calls are driven on `runtime`, so they must run on a
/// blocking thread (`web::block`, `spawn_blocking`), never on an async worker.
pub struct JsonListSource {
    dir: PathBuf,
    http: reqwest::Client,
    runtime: tokio::runtime::Handle,
}

impl JsonListSource {
    pub fn new(
        dir: impl Into<PathBuf>,
        runtime: tokio::runtime::Handle,
        http_timeout: Duration
    ) -> Result<Self, SourceError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| SourceError::Io { path: dir.clone(), source })?;
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|source| SourceError::Http { url: String::new(), source })?;
        Ok(Self { dir, http, runtime })
    }

    fn connectors_path(&self) -> PathBuf {
        self.dir.join("connectors.json")
    }

    fn endpoint_path(&self, endpoint: &str) -> PathBuf {
        let path = Path::new(endpoint);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dir.join(path)
        }
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, SourceError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(SourceError::Io { path: path.to_path_buf(), source }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| SourceError::Json { path: path.to_path_buf(), source })
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), SourceError> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|source| SourceError::Json { path: path.to_path_buf(), source })?;
        std::fs::write(path, bytes).map_err(|source| SourceError::Io { path: path.to_path_buf(), source })
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        debug!("Fetching server list from {}", url);
        self.runtime
            .block_on(async {
                self.http
                    .get(url)
                    .send().await?
                    .error_for_status()?
                    .json::<T>().await
            })
            .map_err(|source| SourceError::Http { url: url.to_string(), source })
    }
}

impl ListSourceProvider for JsonListSource {
    fn connectors(&self) -> Result<Vec<Connector>, SourceError> {
        match self.read_json(&self.connectors_path())? {
            Some(connectors) => Ok(connectors),
            None => {
                info!("No connector list in {}, using defaults", self.dir.display());
                Ok(default_connectors())
            }
        }
    }

    fn save_connectors(&self, connectors: &[Connector]) -> Result<(), SourceError> {
        self.write_json(&self.connectors_path(), &connectors)
    }

    fn revert_to_defaults(&self) -> Result<(), SourceError> {
        self.save_connectors(&default_connectors())
    }

    fn fetch_servers(&self, connector: &Connector) -> Result<ServerMap, SourceError> {
        let servers = match connector.kind {
            SourceKind::Favourites | SourceKind::LegacyFavourites => favourite_map(&self.favourites(connector)?),
            SourceKind::Api => live_map(&self.get_json::<Vec<String>>(&connector.endpoint)?),
            SourceKind::Backend => {
                let listed: Vec<BackendServer> = self.get_json(&connector.endpoint)?;
                listed
                    .iter()
                    .map(|server| (server.address.clone(), backend_record(server)))
                    .collect()
            }
        };
        info!("Loaded {} servers from {}", servers.len(), connector.name);
        Ok(servers)
    }

    fn favourites(&self, connector: &Connector) -> Result<Vec<FavouriteEntry>, SourceError> {
        let path = self.endpoint_path(&connector.endpoint);
        match connector.kind {
            SourceKind::Favourites => Ok(self.read_json(&path)?.unwrap_or_default()),
            SourceKind::LegacyFavourites => {
                let bytes = match std::fs::read(&path) {
                    Ok(bytes) => bytes,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                    Err(source) => return Err(SourceError::Io { path, source }),
                };
                legacy::read_favourites(&bytes).map_err(|reason| SourceError::Legacy { path, reason })
            }
            SourceKind::Api | SourceKind::Backend => Err(SourceError::ReadOnly(connector.kind.to_string())),
        }
    }

    fn save_favourites(&self, connector: &Connector, entries: &[FavouriteEntry]) -> Result<(), SourceError> {
        let path = self.endpoint_path(&connector.endpoint);
        match connector.kind {
            SourceKind::Favourites => self.write_json(&path, &entries),
            SourceKind::LegacyFavourites => {
                std::fs::write(&path, legacy::write_favourites(entries))
                    .map_err(|source| SourceError::Io { path, source })
            }
            SourceKind::Api | SourceKind::Backend => Err(SourceError::ReadOnly(connector.kind.to_string())),
        }
    }
}

/// Listing held by [`MemoryListSource`] for one endpoint.
#[derive(Debug, Clone)]
pub enum Listing {
    Addresses(Vec<String>),
    Favourites(Vec<FavouriteEntry>),
    Backend(Vec<BackendServer>),
}

/// In-memory provider for embedding and tests. Endpoints marked unavailable
/// fail like an unreachable host.
#[derive(Default)]
pub struct MemoryListSource {
    defaults: Vec<Connector>,
    connectors: Mutex<Vec<Connector>>,
    listings: Mutex<HashMap<String, Listing>>,
    unavailable: Mutex<HashSet<String>>,
}

impl MemoryListSource {
    pub fn new(connectors: Vec<Connector>) -> Self {
        Self {
            defaults: connectors.clone(),
            connectors: Mutex::new(connectors),
            ..Default::default()
        }
    }

    pub fn set_listing(&self, endpoint: impl Into<String>, listing: Listing) {
        self.listings.lock().insert(endpoint.into(), listing);
    }

    pub fn set_unavailable(&self, endpoint: impl Into<String>, unavailable: bool) {
        let endpoint = endpoint.into();
        let mut set = self.unavailable.lock();
        if unavailable {
            set.insert(endpoint);
        } else {
            set.remove(&endpoint);
        }
    }

    fn check_available(&self, endpoint: &str) -> Result<(), SourceError> {
        if self.unavailable.lock().contains(endpoint) {
            return Err(SourceError::Io {
                path: PathBuf::from(endpoint),
                source: std::io::ErrorKind::NotFound.into(),
            });
        }
        Ok(())
    }
}

impl ListSourceProvider for MemoryListSource {
    fn connectors(&self) -> Result<Vec<Connector>, SourceError> {
        self.check_available("connectors")?;
        Ok(self.connectors.lock().clone())
    }

    fn save_connectors(&self, connectors: &[Connector]) -> Result<(), SourceError> {
        self.check_available("connectors")?;
        *self.connectors.lock() = connectors.to_vec();
        Ok(())
    }

    fn revert_to_defaults(&self) -> Result<(), SourceError> {
        self.save_connectors(&self.defaults)
    }

    fn fetch_servers(&self, connector: &Connector) -> Result<ServerMap, SourceError> {
        self.check_available(&connector.endpoint)?;
        let listing = self.listings.lock().get(&connector.endpoint).cloned();
        let servers = match listing {
            None => ServerMap::new(),
            Some(Listing::Addresses(addresses)) => live_map(&addresses),
            Some(Listing::Favourites(entries)) => favourite_map(&entries),
            Some(Listing::Backend(listed)) => listed
                .iter()
                .map(|server| (server.address.clone(), backend_record(server)))
                .collect(),
        };
        Ok(servers)
    }

    fn favourites(&self, connector: &Connector) -> Result<Vec<FavouriteEntry>, SourceError> {
        self.check_available(&connector.endpoint)?;
        if !connector.kind.is_favourites() {
            return Err(SourceError::ReadOnly(connector.kind.to_string()));
        }
        match self.listings.lock().get(&connector.endpoint) {
            Some(Listing::Favourites(entries)) => Ok(entries.clone()),
            _ => Ok(Vec::new()),
        }
    }

    fn save_favourites(&self, connector: &Connector, entries: &[FavouriteEntry]) -> Result<(), SourceError> {
        self.check_available(&connector.endpoint)?;
        if !connector.kind.is_favourites() {
            return Err(SourceError::ReadOnly(connector.kind.to_string()));
        }
        self.set_listing(connector.endpoint.clone(), Listing::Favourites(entries.to_vec()));
        Ok(())
    }
}
