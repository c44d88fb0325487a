use parking_lot::RwLock;
use serde::{ Deserialize, Serialize };
use std::collections::HashMap;

use crate::consumer::Presentation;
use crate::models::group::GroupId;
use crate::models::server::{ Client, Rule, ServerAddress, ServerRecord, UNKNOWN_LATENCY };

const PLACEHOLDER: &str = "-";

/// One line of the server list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerRow {
    pub group: GroupId,
    pub address: ServerAddress,
    pub latency_ms: u64,
    pub hostname: String,
    pub players: String,
    pub mode: String,
    pub language: String,
    pub password: bool,
}

impl ServerRow {
    /// Builds a row from the last data the record received, falling back to
    /// placeholders for data that never arrived.
    pub fn from_record(group: GroupId, record: &ServerRecord) -> Self {
        let latency = record.last_known_ping().unwrap_or(UNKNOWN_LATENCY);
        let (hostname, players, mode, language, password) = match record.last_known_information() {
            Some(info) => {
                let players = info.player_count();
                (info.hostname, players, info.game_mode, info.language, info.password)
            }
            None => (
                PLACEHOLDER.to_string(),
                "0/0".to_string(),
                PLACEHOLDER.to_string(),
                PLACEHOLDER.to_string(),
                false,
            ),
        };
        Self {
            group,
            address: record.address().clone(),
            latency_ms: latency.as_millis() as u64,
            hostname,
            players,
            mode,
            language,
            password,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterField {
    Hostname,
    Mode,
    Language,
    Address,
}

/// Case-insensitive substring match on one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFilter {
    pub field: FilterField,
    needle: String,
}

impl RowFilter {
    pub fn new(field: FilterField, text: &str) -> Self {
        Self {
            field,
            needle: text.to_lowercase(),
        }
    }

    pub fn matches(&self, row: &ServerRow) -> bool {
        if self.needle.is_empty() {
            return true;
        }
        let haystack = match self.field {
            FilterField::Hostname => row.hostname.to_lowercase(),
            FilterField::Mode => row.mode.to_lowercase(),
            FilterField::Language => row.language.to_lowercase(),
            FilterField::Address => row.address.to_string().to_lowercase(),
        };
        haystack.contains(&self.needle)
    }
}

/// The players and rules panes of the selected server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetailPanes {
    pub address: Option<ServerAddress>,
    pub clients: Vec<Client>,
    pub rules: Vec<Rule>,
    pub selected_client: Option<usize>,
    pub selected_rule: Option<usize>,
}

fn keep_index(index: Option<usize>, len: usize) -> Option<usize> {
    index.filter(|&i| i < len)
}

#[derive(Default)]
struct DisplayInner {
    rows: Vec<ServerRow>,
    counts: HashMap<GroupId, u32>,
    selected_group: Option<GroupId>,
    selected_address: Option<ServerAddress>,
    filter: Option<RowFilter>,
    detail: DetailPanes,
}

impl DisplayInner {
    fn is_visible(&self, row: &ServerRow) -> bool {
        Some(row.group) == self.selected_group
            && self.filter.as_ref().map_or(true, |filter| filter.matches(row))
    }
}

/// In-memory view model served over HTTP.
#[derive(Default)]
pub struct DisplayState {
    inner: RwLock<DisplayInner>,
}

impl DisplayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of the selected group that pass the current filter, in arrival
    /// order.
    pub fn visible_rows(&self) -> Vec<ServerRow> {
        let inner = self.inner.read();
        inner.rows.iter().filter(|row| inner.is_visible(row)).cloned().collect()
    }

    pub fn row_count(&self) -> usize {
        self.inner.read().rows.len()
    }

    pub fn group_count(&self, group: GroupId) -> u32 {
        self.inner.read().counts.get(&group).copied().unwrap_or(0)
    }

    pub fn selected_group(&self) -> Option<GroupId> {
        self.inner.read().selected_group
    }

    /// Returns whether the filter changed.
    pub fn set_filter(&self, filter: Option<RowFilter>) -> bool {
        let mut inner = self.inner.write();
        if inner.filter == filter {
            return false;
        }
        inner.filter = filter;
        true
    }

    /// Marks `address` as the selected row. Returns false if no visible row
    /// has that address.
    pub fn select_address(&self, address: &ServerAddress) -> bool {
        let mut inner = self.inner.write();
        let visible = inner
            .rows
            .iter()
            .any(|row| &row.address == address && inner.is_visible(row));
        if visible {
            inner.selected_address = Some(address.clone());
        }
        visible
    }

    pub fn detail(&self) -> DetailPanes {
        self.inner.read().detail.clone()
    }
}

impl Presentation for DisplayState {
    fn upsert_row(&self, row: ServerRow) -> bool {
        let mut inner = self.inner.write();
        let existing = inner
            .rows
            .iter()
            .position(|existing| existing.group == row.group && existing.address == row.address);
        match existing {
            Some(index) => {
                inner.rows[index] = row;
                false
            }
            None => {
                inner.rows.push(row);
                true
            }
        }
    }

    fn refresh_address(&self, record: &ServerRecord) {
        let mut inner = self.inner.write();
        for row in inner.rows.iter_mut().filter(|row| &row.address == record.address()) {
            *row = ServerRow::from_record(row.group, record);
        }
    }

    fn remove_group_rows(&self, group: GroupId) {
        let mut inner = self.inner.write();
        inner.rows.retain(|row| row.group != group);
        inner.counts.insert(group, 0);
    }

    fn clear(&self) {
        let mut inner = self.inner.write();
        let filter = inner.filter.take();
        *inner = DisplayInner {
            filter,
            ..DisplayInner::default()
        };
    }

    fn set_group_count(&self, group: GroupId, count: u32) {
        self.inner.write().counts.insert(group, count);
    }

    fn show_group(&self, group: GroupId) {
        let mut inner = self.inner.write();
        if inner.selected_group != Some(group) {
            inner.selected_group = Some(group);
            inner.selected_address = None;
        }
    }

    fn render_detail(&self, address: &ServerAddress, clients: Vec<Client>, rules: Vec<Rule>) {
        let mut inner = self.inner.write();
        let detail = &mut inner.detail;
        let same_server = detail.address.as_ref() == Some(address);
        let (selected_client, selected_rule) = if same_server {
            (
                keep_index(detail.selected_client, clients.len()),
                keep_index(detail.selected_rule, rules.len()),
            )
        } else {
            (None, None)
        };
        *detail = DetailPanes {
            address: Some(address.clone()),
            clients,
            rules,
            selected_client,
            selected_rule,
        };
    }

    fn selected_address(&self) -> Option<ServerAddress> {
        let inner = self.inner.read();
        let mut visible = inner.rows.iter().filter(|row| inner.is_visible(row));
        match &inner.selected_address {
            Some(selected) if visible.clone().any(|row| &row.address == selected) => Some(selected.clone()),
            _ => visible.next().map(|row| row.address.clone()),
        }
    }
}

impl DisplayState {
    /// Highlights a line in one of the detail panes. Out-of-range indices
    /// clear the highlight.
    pub fn select_detail_line(&self, client: Option<usize>, rule: Option<usize>) {
        let mut inner = self.inner.write();
        let detail = &mut inner.detail;
        detail.selected_client = keep_index(client, detail.clients.len());
        detail.selected_rule = keep_index(rule, detail.rules.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::server::{ Origin, ServerInfo, StaticSnapshot };
    use std::time::Duration;

    fn snapshot_record(host: &str, hostname: &str, mode: &str) -> std::sync::Arc<ServerRecord> {
        ServerRecord::with_snapshot(ServerAddress::new(host, 7777), Origin::Backend, StaticSnapshot {
            ping: Some(Duration::from_millis(42)),
            info: ServerInfo {
                password: false,
                players: 3,
                max_players: 50,
                hostname: hostname.to_string(),
                game_mode: mode.to_string(),
                language: "English".to_string(),
            },
            rules: Vec::new(),
            clients: Vec::new(),
        })
    }

    #[test]
    fn unanswered_record_uses_placeholders() {
        let group = GroupId::new();
        let record = ServerRecord::live(ServerAddress::new("10.0.0.1", 7777));
        let row = ServerRow::from_record(group, &record);
        assert_eq!(row.latency_ms, 1000);
        assert_eq!(row.hostname, "-");
        assert_eq!(row.players, "0/0");
        assert_eq!(row.mode, "-");
        assert_eq!(row.language, "-");
    }

    #[test]
    fn upsert_keeps_one_row_per_group_and_address() {
        let display = DisplayState::new();
        let group = GroupId::new();
        let record = snapshot_record("10.0.0.1", "Alpha", "Freeroam");

        assert!(display.upsert_row(ServerRow::from_record(group, &record)));
        assert!(!display.upsert_row(ServerRow::from_record(group, &record)));
        assert!(display.upsert_row(ServerRow::from_record(GroupId::new(), &record)));
        assert_eq!(display.row_count(), 2);
    }

    #[test]
    fn filter_and_selection_fallback() {
        let display = DisplayState::new();
        let group = GroupId::new();
        display.show_group(group);
        for (host, name, mode) in [("10.0.0.1", "Alpha", "Freeroam"), ("10.0.0.2", "Beta", "Roleplay")] {
            display.upsert_row(ServerRow::from_record(group, &snapshot_record(host, name, mode)));
        }
        display.upsert_row(ServerRow::from_record(
            GroupId::new(),
            &snapshot_record("10.0.0.3", "Gamma", "Roleplay"),
        ));

        assert_eq!(display.visible_rows().len(), 2);
        assert_eq!(display.selected_address(), Some(ServerAddress::new("10.0.0.1", 7777)));

        assert!(display.select_address(&ServerAddress::new("10.0.0.2", 7777)));
        assert!(!display.select_address(&ServerAddress::new("10.0.0.3", 7777)));
        assert_eq!(display.selected_address(), Some(ServerAddress::new("10.0.0.2", 7777)));

        display.set_filter(Some(RowFilter::new(FilterField::Mode, "FREE")));
        let visible = display.visible_rows();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].hostname, "Alpha");
        assert_eq!(display.selected_address(), Some(ServerAddress::new("10.0.0.1", 7777)));
    }

    #[test]
    fn detail_keeps_highlight_for_same_server() {
        let display = DisplayState::new();
        let address = ServerAddress::new("10.0.0.1", 7777);
        let clients = vec![
            Client { name: "a".to_string(), score: 1 },
            Client { name: "b".to_string(), score: 2 }
        ];

        display.render_detail(&address, clients.clone(), Vec::new());
        display.select_detail_line(Some(1), Some(0));
        assert_eq!(display.detail().selected_client, Some(1));
        assert_eq!(display.detail().selected_rule, None);

        display.render_detail(&address, clients.clone(), Vec::new());
        assert_eq!(display.detail().selected_client, Some(1));

        display.render_detail(&address, clients[..1].to_vec(), Vec::new());
        assert_eq!(display.detail().selected_client, None);

        display.select_detail_line(Some(0), None);
        display.render_detail(&ServerAddress::new("10.0.0.2", 7777), clients, Vec::new());
        assert_eq!(display.detail().selected_client, None);
    }

    #[test]
    fn removing_a_group_resets_its_count() {
        let display = DisplayState::new();
        let group = GroupId::new();
        display.upsert_row(ServerRow::from_record(group, &snapshot_record("10.0.0.1", "Alpha", "x")));
        display.set_group_count(group, 1);

        display.remove_group_rows(group);
        assert_eq!(display.row_count(), 0);
        assert_eq!(display.group_count(group), 0);
    }
}
