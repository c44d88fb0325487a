use log::{ debug, trace };
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::display::ServerRow;
use crate::models::group::GroupId;
use crate::models::query::RequestKind;
use crate::models::server::{ Client, Rule, ServerAddress, ServerRecord };
use crate::query::dispatcher::{ QueueEntry, ReadyReceiver };
use crate::query::refresher::SelectedTargetRefresher;
use crate::storage::memory::AddressIndex;
use crate::storage::registry::GroupRegistry;

/// Whatever renders the server list. All calls come from the consumer tick
/// or from engine operations, never from the query threads.
pub trait Presentation: Send + Sync {
    /// Inserts or replaces the row for (group, address). Returns true if the
    /// row is new.
    fn upsert_row(&self, row: ServerRow) -> bool;

    /// Rebuilds every row showing `record`'s address.
    fn refresh_address(&self, record: &ServerRecord);

    fn remove_group_rows(&self, group: GroupId);

    fn clear(&self);

    fn set_group_count(&self, group: GroupId, count: u32);

    /// Switches the list to `group`.
    fn show_group(&self, group: GroupId);

    fn render_detail(&self, address: &ServerAddress, clients: Vec<Client>, rules: Vec<Rule>);

    fn selected_address(&self) -> Option<ServerAddress>;
}

/// Everything the tick and the engine share for entering a selection.
#[derive(Clone)]
pub struct SelectionContext {
    pub index: Arc<AddressIndex>,
    pub refresher: Arc<SelectedTargetRefresher>,
    pub presentation: Arc<dyn Presentation>,
}

impl SelectionContext {
    /// Points the detail refresher at the presented selection. Returns false
    /// when nothing is selected or the address is unknown.
    pub fn enter_selection(&self) -> bool {
        let Some(address) = self.presentation.selected_address() else {
            return false;
        };
        let Some(record) = self.index.get(&address) else {
            debug!("Selected server {} is not indexed yet", address);
            return false;
        };

        if record.all_fetched(&RequestKind::ALL) {
            self.render(&record);
        }
        self.refresher.select(record);
        true
    }

    pub fn render(&self, record: &ServerRecord) {
        self.presentation.refresh_address(record);
        self.presentation.render_detail(
            record.address(),
            record.clients().unwrap_or_default(),
            record.rules().unwrap_or_default(),
        );
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub drained: usize,
    pub new_rows: usize,
    pub discarded: usize,
    pub entered: bool,
    pub detail_rendered: bool,
}

/// Moves resolved records from the ready channel onto the presentation.
pub struct Consumer {
    ready: ReadyReceiver,
    registry: Arc<GroupRegistry>,
    selection: SelectionContext,
    auto_enter: Arc<AtomicBool>,
}

impl Consumer {
    pub fn new(
        ready: ReadyReceiver,
        registry: Arc<GroupRegistry>,
        selection: SelectionContext,
        auto_enter: Arc<AtomicBool>,
    ) -> Self {
        Self {
            ready,
            registry,
            selection,
            auto_enter,
        }
    }

    fn drain(&mut self) -> Vec<QueueEntry> {
        let mut entries = Vec::new();
        loop {
            match self.ready.try_recv() {
                Ok(entry) => entries.push(entry),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        entries
    }

    pub fn tick(&mut self) -> TickReport {
        let entries = self.drain();
        let mut report = TickReport {
            drained: entries.len(),
            ..TickReport::default()
        };

        for entry in entries {
            // Group reloaded or gone since the entry was promoted.
            if !self.registry.owns(entry.group, &entry.record) {
                report.discarded += 1;
                continue;
            }

            self.selection.index.register(&entry.record);
            let row = ServerRow::from_record(entry.group, &entry.record);
            if self.selection.presentation.upsert_row(row) {
                report.new_rows += 1;
                if let Some(count) = self.registry.increment_count(entry.group) {
                    self.selection.presentation.set_group_count(entry.group, count);
                }
            }

            if self.auto_enter.load(Ordering::SeqCst) && self.selection.enter_selection() {
                self.auto_enter.store(false, Ordering::SeqCst);
                report.entered = true;
            }
        }

        if let Some(record) = self.selection.refresher.take_detail_ready() {
            trace!("Detail ready for {}", record.address());
            self.selection.render(&record);
            report.detail_rendered = true;
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::DisplayState;
    use crate::models::group::{ Connector, FavouriteEntry, SourceKind };
    use crate::query::refresher::RefreshSettings;
    use crate::query::transport::testing::RecordingTransport;
    use crate::storage::sources::{ Listing, MemoryListSource };
    use tokio::sync::mpsc::{ unbounded_channel, UnboundedSender };

    struct Fixture {
        consumer: Consumer,
        ready: UnboundedSender<QueueEntry>,
        registry: Arc<GroupRegistry>,
        display: Arc<DisplayState>,
        auto_enter: Arc<AtomicBool>,
    }

    fn fixture() -> Fixture {
        let source = Arc::new(MemoryListSource::new(vec![Connector {
            name: "Favourites".to_string(),
            kind: SourceKind::Favourites,
            endpoint: "favourites".to_string(),
        }]));
        source.set_listing("favourites", Listing::Favourites(vec![FavouriteEntry {
            address: ServerAddress::new("10.0.0.1", 7777),
            hostname: "Saved".to_string(),
            game_mode: String::new(),
            server_password: String::new(),
            rcon_password: String::new(),
        }]));
        let registry = Arc::new(GroupRegistry::new(source));
        registry.load().unwrap();

        let display = Arc::new(DisplayState::new());
        let selection = SelectionContext {
            index: Arc::new(AddressIndex::new()),
            refresher: Arc::new(SelectedTargetRefresher::new(
                Arc::new(RecordingTransport::default()),
                RefreshSettings::default(),
            )),
            presentation: display.clone(),
        };
        let (ready, receiver) = unbounded_channel();
        let auto_enter = Arc::new(AtomicBool::new(false));
        let consumer = Consumer::new(receiver, registry.clone(), selection, auto_enter.clone());
        Fixture { consumer, ready, registry, display, auto_enter }
    }

    #[test]
    fn same_entry_twice_makes_one_row() {
        let mut f = fixture();
        let group = f.registry.id_at(0).unwrap();
        let entries = f.registry.select(group).unwrap();
        f.display.show_group(group);

        f.ready.send(entries[0].clone()).unwrap();
        f.ready.send(entries[0].clone()).unwrap();
        let report = f.consumer.tick();

        assert_eq!(report.drained, 2);
        assert_eq!(report.new_rows, 1);
        assert_eq!(f.registry.server_count(group), Some(1));
        assert_eq!(f.display.group_count(group), 1);
        assert_eq!(f.display.visible_rows().len(), 1);
        f.consumer.selection.refresher.shutdown();
    }

    #[test]
    fn entries_of_replaced_groups_are_discarded() {
        let mut f = fixture();
        let group = f.registry.id_at(0).unwrap();
        let entries = f.registry.select(group).unwrap();
        f.registry.load().unwrap();

        f.ready.send(entries[0].clone()).unwrap();
        let report = f.consumer.tick();
        assert_eq!(report.discarded, 1);
        assert_eq!(f.display.row_count(), 0);
        assert!(f.consumer.selection.index.is_empty());
    }

    #[test]
    fn auto_enter_fires_once_and_renders_static_detail() {
        let mut f = fixture();
        let group = f.registry.id_at(0).unwrap();
        let entries = f.registry.select(group).unwrap();
        f.display.show_group(group);
        f.auto_enter.store(true, Ordering::SeqCst);

        f.ready.send(entries[0].clone()).unwrap();
        let report = f.consumer.tick();
        assert!(report.entered);
        assert!(!f.auto_enter.load(Ordering::SeqCst));
        assert_eq!(f.display.detail().address, Some(ServerAddress::new("10.0.0.1", 7777)));
        assert_eq!(
            f.consumer.selection.refresher.target().map(|record| record.address().clone()),
            Some(ServerAddress::new("10.0.0.1", 7777))
        );
        f.consumer.selection.refresher.shutdown();
    }
}
