use log::{ error, info };
use parking_lot::RwLock;
use std::sync::Arc;

use crate::error::EngineError;
use crate::models::group::{ Connector, FavouriteEntry, GroupId, GroupSummary, SourceKind };
use crate::models::server::{ ServerAddress, ServerRecord };
use crate::query::dispatcher::QueueEntry;
use crate::storage::sources::{ ListSourceProvider, ServerMap };

struct Group {
    id: GroupId,
    connector: Connector,
    servers: ServerMap,
    server_count: u32,
    enqueued: bool,
}

impl Group {
    fn new(connector: Connector) -> Self {
        Self {
            id: GroupId::new(),
            connector,
            servers: ServerMap::new(),
            server_count: 0,
            enqueued: false,
        }
    }

    fn entries(&self) -> Vec<QueueEntry> {
        self.servers
            .values()
            .map(|record| QueueEntry::new(record.clone(), self.id))
            .collect()
    }
}

/// Records to enqueue and records to release after a group's server set was
/// replaced.
#[derive(Debug, Default)]
pub struct GroupReload {
    pub enqueue: Vec<QueueEntry>,
    pub released: Vec<Arc<ServerRecord>>,
}

/// Ordered collection of loaded list sources.
///
/// Provider I/O never runs under the registry lock; results are applied
/// afterwards, so a failed call leaves the registry as it was.
pub struct GroupRegistry {
    provider: Arc<dyn ListSourceProvider>,
    groups: RwLock<Vec<Group>>,
}

impl GroupRegistry {
    pub fn new(provider: Arc<dyn ListSourceProvider>) -> Self {
        Self {
            provider,
            groups: RwLock::new(Vec::new()),
        }
    }

    /// Replaces every group from the provider's connector list. Returns the
    /// records owned by the replaced groups.
    pub fn load(&self) -> Result<Vec<Arc<ServerRecord>>, EngineError> {
        let connectors = self.provider.connectors().map_err(|e| {
            error!("Failed to load server lists: {}", e);
            e
        })?;

        let fresh: Vec<Group> = connectors.into_iter().map(Group::new).collect();
        info!("Loaded {} server lists", fresh.len());

        let old = std::mem::replace(&mut *self.groups.write(), fresh);
        Ok(old.into_iter().flat_map(|group| group.servers.into_values()).collect())
    }

    pub fn summaries(&self) -> Vec<GroupSummary> {
        self.groups
            .read()
            .iter()
            .enumerate()
            .map(|(position, group)| GroupSummary {
                id: group.id,
                position,
                name: group.connector.name.clone(),
                kind: group.connector.kind,
                endpoint: group.connector.endpoint.clone(),
                server_count: group.server_count,
            })
            .collect()
    }

    pub fn id_at(&self, position: usize) -> Option<GroupId> {
        self.groups.read().get(position).map(|group| group.id)
    }

    pub fn contains(&self, id: GroupId) -> bool {
        self.groups.read().iter().any(|group| group.id == id)
    }

    /// True if `record` is the instance the group currently holds for its
    /// address. Entries built before a reload of the group fail this.
    pub fn owns(&self, id: GroupId, record: &Arc<ServerRecord>) -> bool {
        self.groups
            .read()
            .iter()
            .find(|group| group.id == id)
            .and_then(|group| group.servers.get(record.address()))
            .map_or(false, |held| Arc::ptr_eq(held, record))
    }

    pub fn connector(&self, id: GroupId) -> Option<Connector> {
        self.groups
            .read()
            .iter()
            .find(|group| group.id == id)
            .map(|group| group.connector.clone())
    }

    fn position(&self, id: GroupId) -> Result<usize, EngineError> {
        self.groups
            .read()
            .iter()
            .position(|group| group.id == id)
            .ok_or(EngineError::GroupNotFound(id))
    }

    pub fn server_count(&self, id: GroupId) -> Option<u32> {
        self.groups
            .read()
            .iter()
            .find(|group| group.id == id)
            .map(|group| group.server_count)
    }

    /// Adds one to the group's live server count. Returns the new count, or
    /// None if the group no longer exists.
    pub fn increment_count(&self, id: GroupId) -> Option<u32> {
        let mut groups = self.groups.write();
        let group = groups.iter_mut().find(|group| group.id == id)?;
        group.server_count += 1;
        Some(group.server_count)
    }

    /// Fetches the group's servers the first time it is selected and returns
    /// them for enqueueing. Later selections return nothing.
    pub fn select(&self, id: GroupId) -> Result<Vec<QueueEntry>, EngineError> {
        let connector = {
            let groups = self.groups.read();
            let group = groups
                .iter()
                .find(|group| group.id == id)
                .ok_or(EngineError::GroupNotFound(id))?;
            if group.enqueued {
                return Ok(Vec::new());
            }
            group.connector.clone()
        };

        let servers = self.provider.fetch_servers(&connector).map_err(|e| {
            error!("Failed to fetch servers of {}: {}", connector.name, e);
            e
        })?;

        let mut groups = self.groups.write();
        // A concurrent load() may have replaced the group meanwhile.
        let group = groups
            .iter_mut()
            .find(|group| group.id == id)
            .ok_or(EngineError::GroupNotFound(id))?;
        if group.enqueued {
            return Ok(Vec::new());
        }
        group.servers = servers;
        group.enqueued = true;
        Ok(group.entries())
    }

    fn replace_servers(&self, id: GroupId, servers: ServerMap) -> Result<GroupReload, EngineError> {
        let mut groups = self.groups.write();
        let group = groups
            .iter_mut()
            .find(|group| group.id == id)
            .ok_or(EngineError::GroupNotFound(id))?;
        let old = std::mem::replace(&mut group.servers, servers);
        group.server_count = 0;
        group.enqueued = true;
        Ok(GroupReload {
            enqueue: group.entries(),
            released: old.into_values().collect(),
        })
    }

    pub fn add_connector(&self, connector: Connector) -> Result<(), EngineError> {
        let mut connectors = self.provider.connectors()?;
        connectors.push(connector);
        self.provider.save_connectors(&connectors)?;
        Ok(())
    }

    pub fn edit_connector(&self, id: GroupId, connector: Connector) -> Result<(), EngineError> {
        let position = self.position(id)?;
        let mut connectors = self.provider.connectors()?;
        let slot = connectors
            .get_mut(position)
            .ok_or(EngineError::ConnectorNotFound(position))?;
        *slot = connector;
        self.provider.save_connectors(&connectors)?;
        Ok(())
    }

    pub fn remove_connector(&self, id: GroupId) -> Result<(), EngineError> {
        let position = self.position(id)?;
        let mut connectors = self.provider.connectors()?;
        if position >= connectors.len() {
            return Err(EngineError::ConnectorNotFound(position));
        }
        connectors.remove(position);
        self.provider.save_connectors(&connectors)?;
        Ok(())
    }

    pub fn revert_to_defaults(&self) -> Result<(), EngineError> {
        self.provider.revert_to_defaults()?;
        Ok(())
    }

    fn favourites_connector(&self, id: GroupId) -> Result<Connector, EngineError> {
        let connector = self.connector(id).ok_or(EngineError::GroupNotFound(id))?;
        if !connector.kind.is_favourites() {
            return Err(EngineError::NotFavourites(id));
        }
        Ok(connector)
    }

    /// Adds `record` to the favourites list behind `id` and rebuilds that
    /// group from the saved list.
    pub fn add_favourite(&self, id: GroupId, record: &ServerRecord) -> Result<GroupReload, EngineError> {
        let connector = self.favourites_connector(id)?;
        let mut entries = self.provider.favourites(&connector)?;
        if entries.iter().any(|entry| &entry.address == record.address()) {
            return Err(EngineError::AlreadyFavourite(record.address().clone()));
        }

        let info = record.last_known_information().unwrap_or_default();
        entries.push(FavouriteEntry {
            address: record.address().clone(),
            hostname: info.hostname,
            game_mode: info.game_mode,
            server_password: String::new(),
            rcon_password: String::new(),
        });
        self.provider.save_favourites(&connector, &entries)?;
        self.reload_favourites(id, &connector)
    }

    pub fn remove_favourite(&self, id: GroupId, address: &ServerAddress) -> Result<GroupReload, EngineError> {
        let connector = self.favourites_connector(id)?;
        let mut entries = self.provider.favourites(&connector)?;
        let before = entries.len();
        entries.retain(|entry| &entry.address != address);
        if entries.len() == before {
            return Err(EngineError::ServerNotFound(address.clone()));
        }
        self.provider.save_favourites(&connector, &entries)?;
        self.reload_favourites(id, &connector)
    }

    fn reload_favourites(&self, id: GroupId, connector: &Connector) -> Result<GroupReload, EngineError> {
        let servers = self.provider.fetch_servers(connector)?;
        self.replace_servers(id, servers)
    }

    pub fn favourite_lists(&self) -> Vec<GroupSummary> {
        self.summaries()
            .into_iter()
            .filter(|summary| matches!(summary.kind, SourceKind::Favourites | SourceKind::LegacyFavourites))
            .collect()
    }
}
