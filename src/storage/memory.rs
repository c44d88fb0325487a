use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use crate::models::server::{ ServerAddress, ServerRecord };

/// Global address -> record index of every server that has been shown.
pub struct AddressIndex {
    servers: DashMap<ServerAddress, Arc<ServerRecord>>,
}

impl AddressIndex {
    pub fn new() -> Self {
        Self {
            servers: DashMap::new(),
        }
    }

    /// Registers `record` unless its address is already known.
    /// Returns whether it was added.
    pub fn register(&self, record: &Arc<ServerRecord>) -> bool {
        match self.servers.entry(record.address().clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                true
            }
        }
    }

    pub fn get(&self, address: &ServerAddress) -> Option<Arc<ServerRecord>> {
        self.servers.get(address).map(|r| r.value().clone())
    }

    pub fn remove(&self, address: &ServerAddress) -> Option<Arc<ServerRecord>> {
        self.servers.remove(address).map(|(_, record)| record)
    }

    pub fn clear(&self) -> Vec<Arc<ServerRecord>> {
        let records = self.servers.iter().map(|r| r.value().clone()).collect();
        self.servers.clear();
        records
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

impl Default for AddressIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent() {
        let index = AddressIndex::new();
        let first = ServerRecord::live(ServerAddress::new("10.0.0.1", 7777));
        let twin = ServerRecord::live(ServerAddress::new("10.0.0.1", 7777));

        assert!(index.register(&first));
        assert!(!index.register(&twin));
        assert!(!index.register(&first));
        assert_eq!(index.len(), 1);
        assert!(Arc::ptr_eq(&index.get(first.address()).unwrap(), &first));
    }

    #[test]
    fn clear_hands_back_records() {
        let index = AddressIndex::new();
        index.register(&ServerRecord::live(ServerAddress::new("10.0.0.1", 7777)));
        index.register(&ServerRecord::live(ServerAddress::new("10.0.0.2", 7777)));
        assert_eq!(index.clear().len(), 2);
        assert!(index.is_empty());
    }
}
