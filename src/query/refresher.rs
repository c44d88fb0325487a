use log::{ debug, info, warn };
use parking_lot::Mutex;
use std::sync::atomic::{ AtomicU64, Ordering };
use std::sync::Arc;
use std::thread::{ self, JoinHandle };
use std::time::{ Duration, Instant };

use crate::models::query::RequestKind;
use crate::models::server::ServerRecord;
use crate::query::cancel::CancellationToken;
use crate::query::transport::Transport;

#[derive(Debug, Clone, Copy)]
pub struct RefreshSettings {
    /// How long one pass waits for all four replies before re-issuing.
    pub response_window: Duration,
    /// How often a pass checks whether the replies are in.
    pub poll_step: Duration,
    /// Pause after a complete pass.
    pub interval: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            response_window: Duration::from_millis(1000),
            poll_step: Duration::from_millis(25),
            interval: Duration::from_millis(2000),
        }
    }
}

struct ActiveRefresh {
    generation: u64,
    record: Arc<ServerRecord>,
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

/// Deep-polls the one server currently selected.
///
/// Every selection gets a new generation. A loop only ever reports
/// completion tagged with its own generation, and the consumer only accepts
/// the current one, so a replaced loop can never mark the new selection as
/// ready.
pub struct SelectedTargetRefresher {
    transport: Arc<dyn Transport>,
    settings: RefreshSettings,
    generation: AtomicU64,
    completed: Arc<AtomicU64>,
    active: Mutex<Option<ActiveRefresh>>,
}

impl SelectedTargetRefresher {
    pub fn new(transport: Arc<dyn Transport>, settings: RefreshSettings) -> Self {
        Self {
            transport,
            settings,
            generation: AtomicU64::new(0),
            completed: Arc::new(AtomicU64::new(0)),
            active: Mutex::new(None),
        }
    }

    pub fn target(&self) -> Option<Arc<ServerRecord>> {
        self.active.lock().as_ref().map(|active| active.record.clone())
    }

    /// Cancels any running loop and starts one for `record`.
    /// Returns the new generation.
    pub fn select(&self, record: Arc<ServerRecord>) -> u64 {
        let mut active = self.active.lock();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = active.take() {
            previous.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let thread = {
            let record = record.clone();
            let cancel = cancel.clone();
            let transport = self.transport.clone();
            let completed = self.completed.clone();
            let settings = self.settings;
            thread::Builder::new()
                .name(format!("refresh-{}", generation))
                .spawn(move || refresh_loop(record, generation, cancel, transport, completed, settings))
        };
        let thread = match thread {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Could not start detail refresh for {}: {}", record.address(), e);
                None
            }
        };

        debug!("Refreshing {} (generation {})", record.address(), generation);
        *active = Some(ActiveRefresh { generation, record, cancel, thread });
        generation
    }

    /// Stops the running loop, if any. Its results are discarded.
    pub fn cancel(&self) {
        let mut active = self.active.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(previous) = active.take() {
            previous.cancel.cancel();
        }
    }

    /// Consumes the detail-ready flag. Returns the selected record if the
    /// current loop completed a pass since the last call.
    pub fn take_detail_ready(&self) -> Option<Arc<ServerRecord>> {
        let active = self.active.lock();
        let active = active.as_ref()?;
        let completed = self.completed.swap(0, Ordering::SeqCst);
        if completed == active.generation {
            Some(active.record.clone())
        } else {
            None
        }
    }

    /// Cancels and joins the running loop.
    pub fn shutdown(&self) {
        let previous = {
            let mut active = self.active.lock();
            self.generation.fetch_add(1, Ordering::SeqCst);
            active.take()
        };
        if let Some(mut previous) = previous {
            previous.cancel.cancel();
            if let Some(thread) = previous.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

fn refresh_loop(
    record: Arc<ServerRecord>,
    generation: u64,
    cancel: CancellationToken,
    transport: Arc<dyn Transport>,
    completed: Arc<AtomicU64>,
    settings: RefreshSettings
) {
    info!("Detail refresh for {} started", record.address());
    while !cancel.is_cancelled() {
        if !record.is_static() {
            for kind in RequestKind::ALL {
                record.request_fresh(kind, transport.as_ref());
            }
        }

        let deadline = Instant::now() + settings.response_window;
        let mut done = record.all_fetched(&RequestKind::ALL);
        while !done && Instant::now() < deadline {
            if cancel.wait(settings.poll_step) {
                break;
            }
            done = record.all_fetched(&RequestKind::ALL);
        }

        if cancel.is_cancelled() {
            break;
        }
        if done {
            // Monotonic: a stale loop can never overwrite a newer generation.
            completed.fetch_max(generation, Ordering::SeqCst);
            if cancel.wait(settings.interval) {
                break;
            }
        }
    }
    debug!("Detail refresh for {} (generation {}) stopped", record.address(), generation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::server::{ Origin, QueryResponse, ServerAddress, ServerInfo, StaticSnapshot };
    use crate::query::transport::testing::RecordingTransport;

    fn quick() -> RefreshSettings {
        RefreshSettings {
            response_window: Duration::from_millis(200),
            poll_step: Duration::from_millis(2),
            interval: Duration::from_millis(20),
        }
    }

    fn answer_all(record: &ServerRecord) {
        record.on_response(QueryResponse::Ping { nonce: record.ping_nonce() });
        record.on_response(QueryResponse::Information(ServerInfo::default()));
        record.on_response(QueryResponse::Rules(Vec::new()));
        record.on_response(QueryResponse::Clients(Vec::new()));
    }

    fn wait_for_sends(transport: &RecordingTransport, address: &ServerAddress) {
        for _ in 0..500 {
            if RequestKind::ALL.iter().all(|kind| transport.sent_count(address, *kind) > 0) {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("refresher never queried {}", address);
    }

    fn wait_for_ready(refresher: &SelectedTargetRefresher) -> Option<Arc<ServerRecord>> {
        for _ in 0..500 {
            if let Some(record) = refresher.take_detail_ready() {
                return Some(record);
            }
            thread::sleep(Duration::from_millis(2));
        }
        None
    }

    #[test]
    fn requests_all_four_kinds_and_flags_completion() {
        let transport = Arc::new(RecordingTransport::default());
        let refresher = SelectedTargetRefresher::new(transport.clone(), quick());
        let record = ServerRecord::live(ServerAddress::new("10.0.0.1", 7777));

        refresher.select(record.clone());
        wait_for_sends(&transport, record.address());
        assert!(refresher.take_detail_ready().is_none());

        answer_all(&record);
        let ready = wait_for_ready(&refresher).expect("detail never became ready");
        assert_eq!(ready.address(), record.address());
        refresher.shutdown();
    }

    #[test]
    fn replaced_selection_never_reports_old_target() {
        let transport = Arc::new(RecordingTransport::default());
        let refresher = SelectedTargetRefresher::new(transport.clone(), quick());
        let r = ServerRecord::live(ServerAddress::new("10.0.0.1", 7777));
        let s = ServerRecord::live(ServerAddress::new("10.0.0.2", 7777));

        refresher.select(r.clone());
        wait_for_sends(&transport, r.address());
        refresher.select(s.clone());

        // R answers after it was replaced.
        answer_all(&r);
        thread::sleep(Duration::from_millis(50));
        assert!(refresher.take_detail_ready().is_none());

        wait_for_sends(&transport, s.address());
        answer_all(&s);
        let ready = wait_for_ready(&refresher).expect("new selection never completed");
        assert_eq!(ready.address(), s.address());
        refresher.shutdown();
    }

    #[test]
    fn stale_completion_from_older_generation_is_ignored() {
        let transport = Arc::new(RecordingTransport::default());
        let refresher = SelectedTargetRefresher::new(transport, quick());
        let first = ServerRecord::live(ServerAddress::new("10.0.0.1", 7777));
        let second = ServerRecord::live(ServerAddress::new("10.0.0.2", 7777));

        let old = refresher.select(first);
        refresher.select(second);
        // Simulates a loop that passed its cancellation check just before
        // being replaced.
        refresher.completed.fetch_max(old, Ordering::SeqCst);
        assert!(refresher.take_detail_ready().is_none());
        refresher.shutdown();
    }

    #[test]
    fn static_target_completes_without_sending() {
        let transport = Arc::new(RecordingTransport::default());
        let refresher = SelectedTargetRefresher::new(transport.clone(), quick());
        let favourite = ServerRecord::with_snapshot(
            ServerAddress::new("10.0.0.3", 7777),
            Origin::Favourite,
            StaticSnapshot::default()
        );

        refresher.select(favourite);
        assert!(wait_for_ready(&refresher).is_some());
        assert_eq!(transport.total_sent(), 0);
        refresher.shutdown();
    }

    #[test]
    fn cancel_discards_results() {
        let transport = Arc::new(RecordingTransport::default());
        let refresher = SelectedTargetRefresher::new(transport, quick());
        let record = ServerRecord::with_snapshot(
            ServerAddress::new("10.0.0.4", 7777),
            Origin::Backend,
            StaticSnapshot::default()
        );

        refresher.select(record);
        refresher.cancel();
        thread::sleep(Duration::from_millis(30));
        assert!(refresher.take_detail_ready().is_none());
        assert!(refresher.target().is_none());
    }
}
