use parking_lot::Mutex;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::{ Arc, Weak };
use std::thread;
use std::time::{ Duration, Instant };

use mpbrowser::config::Config;
use mpbrowser::consumer::Presentation;
use mpbrowser::display::DisplayState;
use mpbrowser::engine::Engine;
use mpbrowser::models::group::{ Connector, FavouriteEntry, SourceKind };
use mpbrowser::models::query::RequestKind;
use mpbrowser::models::server::{ Client, QueryRequest, QueryResponse, Rule, ServerAddress, ServerInfo, ServerRecord };
use mpbrowser::query::transport::testing::RecordingTransport;
use mpbrowser::query::transport::{ Transport, TransportError };
use mpbrowser::storage::sources::{ BackendServer, Listing, MemoryListSource };

const WAIT: Duration = Duration::from_secs(3);

struct Harness {
    engine: Engine,
    transport: Arc<RecordingTransport>,
    source: Arc<MemoryListSource>,
    display: Arc<DisplayState>,
}

fn connector(name: &str, kind: SourceKind) -> Connector {
    Connector {
        name: name.to_string(),
        kind,
        endpoint: name.to_lowercase(),
    }
}

fn address(n: u8) -> ServerAddress {
    ServerAddress::new(format!("10.0.0.{}", n), 7777)
}

fn fast_config() -> Config {
    Config {
        dispatcher_idle_ms: 5,
        detail_window_ms: 200,
        detail_poll_ms: 5,
        detail_interval_ms: 50,
        ..Config::default()
    }
}

fn harness(connectors: Vec<Connector>) -> Harness {
    let config = fast_config();
    let transport = Arc::new(RecordingTransport::default());
    let source = Arc::new(MemoryListSource::new(connectors));
    let display = Arc::new(DisplayState::new());
    let engine = Engine::start(&config, source.clone(), transport.clone(), display.clone()).unwrap();
    Harness { engine, transport, source, display }
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn info(hostname: &str) -> ServerInfo {
    ServerInfo {
        password: false,
        players: 4,
        max_players: 100,
        hostname: hostname.to_string(),
        game_mode: "Freeroam".to_string(),
        language: "English".to_string(),
    }
}

fn live_record(h: &Harness, address: &ServerAddress) -> Arc<ServerRecord> {
    assert!(wait_for(|| !h.transport.records_for(address).is_empty()), "{} was never queried", address);
    h.transport.records_for(address).remove(0)
}

fn answer_all(record: &ServerRecord, hostname: &str) {
    record.on_response(QueryResponse::Ping { nonce: record.ping_nonce() });
    record.on_response(QueryResponse::Information(info(hostname)));
    record.on_response(QueryResponse::Rules(vec![Rule {
        name: "weather".to_string(),
        value: "10".to_string(),
    }]));
    record.on_response(QueryResponse::Clients(vec![Client {
        name: "player".to_string(),
        score: 3,
    }]));
}

fn answer_summary(record: &ServerRecord, hostname: &str) {
    assert!(wait_for(|| record.pending_since(RequestKind::Ping).is_some()));
    assert!(record.on_response(QueryResponse::Ping { nonce: record.ping_nonce() }));
    assert!(record.on_response(QueryResponse::Information(info(hostname))));
}

#[test]
fn silent_servers_never_reach_the_list() {
    let h = harness(vec![connector("Hosted", SourceKind::Api)]);
    h.source.set_listing("hosted", Listing::Addresses(vec![
        "10.0.0.1:7777".to_string(),
        "10.0.0.2:7777".to_string(),
        "10.0.0.3:7777".to_string(),
    ]));
    h.engine.load().unwrap();

    assert!(wait_for(|| h.transport.total_sent() >= 6));
    for n in 1..=3 {
        assert_eq!(h.transport.sent_count(&address(n), RequestKind::Ping), 1);
        assert_eq!(h.transport.sent_count(&address(n), RequestKind::Information), 1);
    }

    thread::sleep(Duration::from_millis(50));
    let report = h.engine.tick();
    assert_eq!(report.drained, 0);
    assert!(h.display.visible_rows().is_empty());
    assert_eq!(h.engine.groups()[0].server_count, 0);
    h.engine.shutdown();
}

#[test]
fn answering_servers_are_counted_once() {
    let h = harness(vec![connector("Hosted", SourceKind::Api)]);
    h.source.set_listing("hosted", Listing::Addresses(vec![
        "10.0.0.1:7777".to_string(),
        "10.0.0.2:7777".to_string(),
        "10.0.0.3:7777".to_string(),
    ]));
    h.engine.load().unwrap();
    let group = h.engine.groups()[0].id;

    answer_summary(&live_record(&h, &address(1)), "One");
    answer_summary(&live_record(&h, &address(2)), "Two");

    let mut new_rows = 0;
    assert!(wait_for(|| {
        new_rows += h.engine.tick().new_rows;
        new_rows == 2
    }));

    thread::sleep(Duration::from_millis(50));
    assert_eq!(h.engine.tick().new_rows, 0);
    assert_eq!(h.engine.groups()[0].server_count, 2);
    assert_eq!(h.display.group_count(group), 2);

    let hostnames: Vec<_> = h.display.visible_rows().into_iter().map(|row| row.hostname).collect();
    assert_eq!(hostnames.len(), 2);
    assert!(hostnames.contains(&"One".to_string()));
    assert!(hostnames.contains(&"Two".to_string()));
    h.engine.shutdown();
}

#[test]
fn static_lists_are_shown_without_queries() {
    let h = harness(vec![connector("Favourites", SourceKind::Favourites)]);
    h.source.set_listing("favourites", Listing::Favourites(vec![
        FavouriteEntry {
            address: address(1),
            hostname: "Saved".to_string(),
            game_mode: "dm".to_string(),
            server_password: String::new(),
            rcon_password: String::new(),
        }
    ]));
    h.engine.load().unwrap();

    assert!(wait_for(|| h.engine.tick().new_rows == 1));
    let rows = h.display.visible_rows();
    assert_eq!(rows[0].hostname, "Saved");
    assert_eq!(rows[0].latency_ms, 1000);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(h.transport.total_sent(), 0);
    h.engine.shutdown();
}

#[test]
fn only_the_latest_selection_is_rendered() {
    let h = harness(vec![connector("Backend", SourceKind::Backend)]);
    let listed = |n: u8, hostname: &str| BackendServer {
        address: address(n),
        hostname: hostname.to_string(),
        players: 1,
        max_players: 10,
        game_mode: "dm".to_string(),
        language: "en".to_string(),
        password: false,
    };
    h.source.set_listing("backend", Listing::Backend(vec![listed(1, "R"), listed(2, "S")]));
    h.engine.load().unwrap();

    // The first row is entered automatically once it appears.
    assert!(wait_for(|| h.engine.tick().entered));

    assert!(h.display.select_address(&address(2)));
    assert!(h.engine.enter_selection());
    assert!(wait_for(|| {
        let report = h.engine.tick();
        if report.detail_rendered {
            assert_eq!(h.display.detail().address, Some(address(2)));
        }
        h.display.detail().address == Some(address(2))
    }));
    h.engine.shutdown();
}

#[test]
fn replies_for_a_replaced_selection_do_not_complete_the_new_one() {
    let h = harness(vec![connector("Hosted", SourceKind::Api)]);
    h.source.set_listing("hosted", Listing::Addresses(vec![
        "10.0.0.1:7777".to_string(),
        "10.0.0.2:7777".to_string(),
    ]));
    h.engine.load().unwrap();

    let first = live_record(&h, &address(1));
    let second = live_record(&h, &address(2));
    answer_summary(&first, "R");
    answer_summary(&second, "S");
    assert!(wait_for(|| h.engine.tick().entered));
    assert_eq!(h.display.selected_address(), Some(address(1)));

    // The first target finishes a full pass and nobody takes the result
    // before the selection moves on.
    assert!(wait_for(|| first.pending_since(RequestKind::Clients).is_some()));
    answer_all(&first, "R");
    assert!(first.all_fetched(&RequestKind::ALL));
    thread::sleep(Duration::from_millis(20));

    assert!(h.display.select_address(&address(2)));
    assert!(h.engine.enter_selection());

    // Late replies for the replaced target; the new one stays silent.
    answer_all(&first, "R");
    assert!(first.all_fetched(&RequestKind::ALL));

    let deadline = Instant::now() + Duration::from_millis(300);
    while Instant::now() < deadline {
        assert!(!h.engine.tick().detail_rendered);
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(h.display.detail().address, None);
    h.engine.shutdown();
}

#[test]
fn failed_reload_keeps_groups_and_rows() {
    let h = harness(vec![connector("Backend", SourceKind::Backend)]);
    h.source.set_listing("backend", Listing::Backend(vec![BackendServer {
        address: address(1),
        hostname: "Kept".to_string(),
        players: 0,
        max_players: 10,
        game_mode: String::new(),
        language: String::new(),
        password: false,
    }]));
    h.engine.load().unwrap();
    assert!(wait_for(|| h.engine.tick().new_rows == 1));
    let before: Vec<_> = h.engine.groups().into_iter().map(|group| group.id).collect();

    h.source.set_unavailable("connectors", true);
    assert!(h.engine.load().is_err());

    let after: Vec<_> = h.engine.groups().into_iter().map(|group| group.id).collect();
    assert_eq!(before, after);
    assert_eq!(h.display.visible_rows().len(), 1);
    h.engine.shutdown();
}

#[test]
fn reload_discards_old_rows_and_releases_records() {
    let h = harness(vec![connector("Hosted", SourceKind::Api)]);
    h.source.set_listing("hosted", Listing::Addresses(vec!["10.0.0.1:7777".to_string()]));
    h.engine.load().unwrap();
    let old_group = h.engine.groups()[0].id;
    answer_summary(&live_record(&h, &address(1)), "Old");
    assert!(wait_for(|| h.engine.tick().new_rows == 1));

    h.engine.load().unwrap();
    assert_ne!(h.engine.groups()[0].id, old_group);
    assert!(h.transport.released().contains(&address(1)));
    assert!(h.display.visible_rows().is_empty());
    assert_eq!(h.display.group_count(old_group), 0);
    h.engine.shutdown();
}

#[test]
fn favourites_follow_edits() {
    let h = harness(vec![
        connector("Hosted", SourceKind::Api),
        connector("Favourites", SourceKind::Favourites)
    ]);
    h.source.set_listing("hosted", Listing::Addresses(vec!["10.0.0.1:7777".to_string()]));
    h.engine.load().unwrap();
    let favourites = h.engine.group_at(1).unwrap();

    answer_summary(&live_record(&h, &address(1)), "Starred");
    assert!(wait_for(|| h.engine.tick().new_rows == 1));

    h.engine.add_favourite(favourites, &address(1)).unwrap();
    assert!(h.engine.add_favourite(favourites, &address(1)).is_err());

    h.engine.select_group(favourites).unwrap();
    assert!(wait_for(|| h.engine.tick().new_rows == 1));
    let rows = h.display.visible_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].hostname, "Starred");
    assert_eq!(h.engine.groups()[1].server_count, 1);

    h.engine.remove_favourite(favourites, &address(1)).unwrap();
    assert!(h.display.visible_rows().is_empty());
    assert_eq!(h.engine.groups()[1].server_count, 0);
    thread::sleep(Duration::from_millis(30));
    h.engine.tick();
    assert!(h.display.visible_rows().is_empty());
    h.engine.shutdown();
}

/// Answers every query as soon as it is sent.
#[derive(Default)]
struct EchoTransport {
    asked: Mutex<Vec<Weak<ServerRecord>>>,
}

impl EchoTransport {
    /// Distinct records for `address` that are still alive.
    fn live_records(&self, address: &ServerAddress) -> usize {
        let mut alive: Vec<Arc<ServerRecord>> = Vec::new();
        for record in self.asked.lock().iter().filter_map(Weak::upgrade) {
            if record.address() == address && !alive.iter().any(|known| Arc::ptr_eq(known, &record)) {
                alive.push(record);
            }
        }
        alive.len()
    }
}

impl Transport for EchoTransport {
    fn send(&self, record: &Arc<ServerRecord>, request: QueryRequest) -> Result<(), TransportError> {
        self.asked.lock().push(Arc::downgrade(record));
        let response = match request.kind {
            RequestKind::Ping => QueryResponse::Ping { nonce: request.nonce },
            RequestKind::Information => QueryResponse::Information(info("Echo")),
            RequestKind::Rules => QueryResponse::Rules(Vec::new()),
            RequestKind::Clients => QueryResponse::Clients(Vec::new()),
        };
        record.on_response(response);
        Ok(())
    }
}

fn spawn_ticker(engine: &Arc<Engine>, stop: &Arc<AtomicBool>) -> thread::JoinHandle<()> {
    let engine = engine.clone();
    let stop = stop.clone();
    thread::spawn(move || {
        while !stop.load(Ordering::SeqCst) {
            engine.tick();
        }
    })
}

#[test]
fn reloads_racing_ticks_leave_no_stale_rows_or_records() {
    const LISTED: u8 = 20;
    let transport = Arc::new(EchoTransport::default());
    let source = Arc::new(MemoryListSource::new(vec![
        connector("Hosted", SourceKind::Api),
        connector("Favourites", SourceKind::Favourites)
    ]));
    source.set_listing("hosted", Listing::Addresses(
        (1..=LISTED).map(|n| address(n).to_string()).collect()
    ));
    let display = Arc::new(DisplayState::new());
    let engine = Arc::new(
        Engine::start(&fast_config(), source, transport.clone(), display.clone()).unwrap()
    );

    let stop = Arc::new(AtomicBool::new(false));
    let ticker = spawn_ticker(&engine, &stop);
    for _ in 0..30 {
        engine.load().unwrap();
        thread::sleep(Duration::from_millis(2));
    }
    stop.store(true, Ordering::SeqCst);
    ticker.join().unwrap();

    assert!(wait_for(|| {
        engine.tick();
        display.visible_rows().len() == usize::from(LISTED)
    }));
    assert_eq!(display.row_count(), usize::from(LISTED));
    // Only the records of the current list are still referenced.
    assert!(wait_for(|| (1..=LISTED).all(|n| transport.live_records(&address(n)) == 1)));

    let favourites = engine.group_at(1).unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let ticker = spawn_ticker(&engine, &stop);
    for _ in 0..20 {
        engine.add_favourite(favourites, &address(1)).unwrap();
        engine.remove_favourite(favourites, &address(1)).unwrap();
    }
    engine.add_favourite(favourites, &address(1)).unwrap();
    stop.store(true, Ordering::SeqCst);
    ticker.join().unwrap();

    assert!(wait_for(|| {
        engine.tick();
        display.group_count(favourites) == 1
    }));
    thread::sleep(Duration::from_millis(30));
    engine.tick();
    assert_eq!(display.group_count(favourites), 1);
    assert_eq!(engine.groups()[1].server_count, 1);
    assert_eq!(display.row_count(), usize::from(LISTED) + 1);
    engine.shutdown();
}
