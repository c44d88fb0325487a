use log::{ info, warn };
use parking_lot::{ Mutex, MutexGuard };
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::Config;
use crate::consumer::{ Consumer, Presentation, SelectionContext, TickReport };
use crate::error::EngineError;
use crate::models::group::{ Connector, GroupId, GroupSummary };
use crate::models::server::{ ServerAddress, ServerRecord };
use crate::query::cancel::CancellationToken;
use crate::query::dispatcher::{ Dispatcher, DispatcherHandle };
use crate::query::refresher::SelectedTargetRefresher;
use crate::query::transport::Transport;
use crate::storage::memory::AddressIndex;
use crate::storage::registry::{ GroupRegistry, GroupReload };
use crate::storage::sources::ListSourceProvider;

/// Owns the query threads and the shared state behind the server browser.
///
/// Operations that touch a list source may block on I/O; callers on an
/// async runtime should run them on a blocking thread.
pub struct Engine {
    registry: Arc<GroupRegistry>,
    transport: Arc<dyn Transport>,
    dispatcher: DispatcherHandle,
    selection: SelectionContext,
    consumer: Mutex<Consumer>,
    auto_enter: Arc<AtomicBool>,
    cancel: CancellationToken,
    dispatcher_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Starts the dispatcher thread. No groups exist until [`Engine::load`].
    pub fn start(
        config: &Config,
        provider: Arc<dyn ListSourceProvider>,
        transport: Arc<dyn Transport>,
        presentation: Arc<dyn Presentation>,
    ) -> std::io::Result<Self> {
        let (dispatcher, handle, ready) = Dispatcher::new(transport.clone(), config.query_expiry());
        let cancel = CancellationToken::new();
        let dispatcher_thread = dispatcher.spawn(cancel.clone(), config.dispatcher_idle())?;

        let registry = Arc::new(GroupRegistry::new(provider));
        let selection = SelectionContext {
            index: Arc::new(AddressIndex::new()),
            refresher: Arc::new(SelectedTargetRefresher::new(transport.clone(), config.refresh_settings())),
            presentation,
        };
        let auto_enter = Arc::new(AtomicBool::new(false));
        let consumer = Consumer::new(ready, registry.clone(), selection.clone(), auto_enter.clone());

        Ok(Self {
            registry,
            transport,
            dispatcher: handle,
            selection,
            consumer: Mutex::new(consumer),
            auto_enter,
            cancel,
            dispatcher_thread: Mutex::new(Some(dispatcher_thread)),
        })
    }

    /// Rebuilds every group from the provider and selects the first one.
    ///
    /// On failure the current groups stay as they are.
    pub fn load(&self) -> Result<(), EngineError> {
        // No tick may run between the swap and the clears, or it could
        // index a record of a group that no longer exists.
        let released = {
            let _consumer = self.consumer.lock();
            let mut released = self.registry.load()?;

            self.dispatcher.clear();
            self.selection.refresher.cancel();
            self.auto_enter.store(false, Ordering::SeqCst);
            self.selection.presentation.clear();
            released.extend(self.selection.index.clear());
            released
        };
        self.release(released);

        if let Some(first) = self.registry.id_at(0) {
            if let Err(e) = self.select_group(first) {
                warn!("Could not open the first server list: {}", e);
            }
        }
        Ok(())
    }

    /// Makes `id` the displayed group, fetching and enqueueing its servers
    /// the first time.
    pub fn select_group(&self, id: GroupId) -> Result<(), EngineError> {
        let entries = self.registry.select(id)?;
        self.selection.presentation.show_group(id);
        if !entries.is_empty() {
            info!("Querying {} servers", entries.len());
            self.dispatcher.enqueue(entries);
        }

        self.reenter_selection();
        Ok(())
    }

    /// Enters the current selection, or waits for the next drained row when
    /// nothing is selectable yet. Called after the group or filter changed.
    pub fn reenter_selection(&self) {
        let entered = self.selection.enter_selection();
        self.auto_enter.store(!entered, Ordering::SeqCst);
    }

    /// Starts the detail refresh for whatever the presentation has selected.
    pub fn enter_selection(&self) -> bool {
        self.selection.enter_selection()
    }

    pub fn tick(&self) -> TickReport {
        self.consumer.lock().tick()
    }

    pub fn groups(&self) -> Vec<GroupSummary> {
        self.registry.summaries()
    }

    pub fn favourite_lists(&self) -> Vec<GroupSummary> {
        self.registry.favourite_lists()
    }

    pub fn group_at(&self, position: usize) -> Option<GroupId> {
        self.registry.id_at(position)
    }

    pub fn add_connector(&self, connector: Connector) -> Result<(), EngineError> {
        self.registry.add_connector(connector)?;
        self.load()
    }

    pub fn edit_connector(&self, id: GroupId, connector: Connector) -> Result<(), EngineError> {
        self.registry.edit_connector(id, connector)?;
        self.load()
    }

    pub fn remove_connector(&self, id: GroupId) -> Result<(), EngineError> {
        self.registry.remove_connector(id)?;
        self.load()
    }

    pub fn revert_to_defaults(&self) -> Result<(), EngineError> {
        self.registry.revert_to_defaults()?;
        self.load()
    }

    pub fn add_favourite(&self, id: GroupId, address: &ServerAddress) -> Result<(), EngineError> {
        let record = self
            .selection
            .index
            .get(address)
            .ok_or_else(|| EngineError::ServerNotFound(address.clone()))?;
        let consumer = self.consumer.lock();
        let reload = self.registry.add_favourite(id, &record)?;
        self.apply_reload(id, reload, consumer);
        Ok(())
    }

    pub fn remove_favourite(&self, id: GroupId, address: &ServerAddress) -> Result<(), EngineError> {
        let consumer = self.consumer.lock();
        let reload = self.registry.remove_favourite(id, address)?;
        self.apply_reload(id, reload, consumer);
        Ok(())
    }

    /// Swaps in a rebuilt group. `consumer` is held from before the registry
    /// swap until the old rows and index entries are gone.
    fn apply_reload(&self, id: GroupId, reload: GroupReload, consumer: MutexGuard<'_, Consumer>) {
        self.dispatcher.drop_group(id);
        self.selection.presentation.remove_group_rows(id);
        self.selection.presentation.set_group_count(id, 0);

        // Only unindex records that are still the indexed instance.
        for record in &reload.released {
            if let Some(indexed) = self.selection.index.get(record.address()) {
                if Arc::ptr_eq(&indexed, record) {
                    self.selection.index.remove(record.address());
                }
            }
        }
        drop(consumer);
        self.release(reload.released);
        self.dispatcher.enqueue(reload.enqueue);
    }

    fn release(&self, records: Vec<Arc<ServerRecord>>) {
        let mut addresses: Vec<ServerAddress> = records.iter().map(|record| record.address().clone()).collect();
        drop(records);
        addresses.sort();
        addresses.dedup();
        for address in &addresses {
            self.transport.release(address);
        }
    }

    /// Stops the dispatcher and refresher threads and drops every record.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(thread) = self.dispatcher_thread.lock().take() {
            let _ = thread.join();
        }
        self.selection.refresher.shutdown();
        let released = self.selection.index.clear();
        self.release(released);
        info!("Query engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.selection.refresher.cancel();
    }
}
