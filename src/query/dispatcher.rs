use log::{ debug, info, warn };
use std::sync::Arc;
use std::thread::{ self, JoinHandle };
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{ unbounded_channel, UnboundedReceiver, UnboundedSender };

use crate::models::group::GroupId;
use crate::models::query::RequestKind;
use crate::models::server::ServerRecord;
use crate::query::cancel::CancellationToken;
use crate::query::transport::Transport;

/// The cheap kinds a record needs before it is shown in the list.
pub const SUMMARY_KINDS: [RequestKind; 2] = [RequestKind::Ping, RequestKind::Information];

/// A record waiting for (or done with) its summary, tagged with its group.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub record: Arc<ServerRecord>,
    pub group: GroupId,
}

impl QueueEntry {
    pub fn new(record: Arc<ServerRecord>, group: GroupId) -> Self {
        Self { record, group }
    }

    fn is_resolved(&self) -> bool {
        self.record.is_static() || self.record.all_fetched(&SUMMARY_KINDS)
    }
}

#[derive(Debug)]
pub enum DispatchCommand {
    Enqueue(Vec<QueueEntry>),
    DropGroup(GroupId),
    Clear,
}

pub type ReadyReceiver = UnboundedReceiver<QueueEntry>;

/// Sending side of the pending queue.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    commands: UnboundedSender<DispatchCommand>,
}

impl DispatcherHandle {
    pub fn enqueue(&self, entries: Vec<QueueEntry>) {
        if entries.is_empty() {
            return;
        }
        self.send(DispatchCommand::Enqueue(entries));
    }

    pub fn drop_group(&self, group: GroupId) {
        self.send(DispatchCommand::DropGroup(group));
    }

    pub fn clear(&self) {
        self.send(DispatchCommand::Clear);
    }

    fn send(&self, command: DispatchCommand) {
        if self.commands.send(command).is_err() {
            warn!("Query dispatcher is gone, command dropped");
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    pub promoted: usize,
    pub requested: usize,
}

/// Owns the pending queue. Each pass issues (or re-issues, once expired) the
/// summary queries of every pending live record and moves resolved entries
/// onto the ready channel.
pub struct Dispatcher {
    pending: Vec<QueueEntry>,
    commands: UnboundedReceiver<DispatchCommand>,
    ready: UnboundedSender<QueueEntry>,
    transport: Arc<dyn Transport>,
    expiry: Duration,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, expiry: Duration) -> (Self, DispatcherHandle, ReadyReceiver) {
        let (command_tx, command_rx) = unbounded_channel();
        let (ready_tx, ready_rx) = unbounded_channel();
        let dispatcher = Self {
            pending: Vec::new(),
            commands: command_rx,
            ready: ready_tx,
            transport,
            expiry,
        };
        (dispatcher, DispatcherHandle { commands: command_tx }, ready_rx)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn apply_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(DispatchCommand::Enqueue(entries)) => {
                    debug!("Enqueued {} servers", entries.len());
                    self.pending.extend(entries);
                }
                Ok(DispatchCommand::DropGroup(group)) => {
                    self.pending.retain(|entry| entry.group != group);
                }
                Ok(DispatchCommand::Clear) => self.pending.clear(),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    pub fn run_pass(&mut self) -> PassReport {
        self.apply_commands();

        let mut report = PassReport::default();
        let mut still_pending = Vec::with_capacity(self.pending.len());
        for entry in self.pending.drain(..) {
            if entry.is_resolved() {
                if self.ready.send(entry).is_err() {
                    debug!("Ready receiver dropped, discarding entry");
                }
                report.promoted += 1;
                continue;
            }

            for kind in SUMMARY_KINDS {
                if entry.record.request_if_stale(kind, self.expiry, self.transport.as_ref()) {
                    report.requested += 1;
                }
            }
            still_pending.push(entry);
        }
        self.pending = still_pending;
        report
    }

    pub fn run(mut self, cancel: CancellationToken, idle: Duration) {
        info!("Query dispatcher started");
        while !cancel.is_cancelled() {
            let report = self.run_pass();
            if report.promoted > 0 {
                debug!("Promoted {} servers, {} still pending", report.promoted, self.pending.len());
            }
            if report.promoted == 0 && report.requested == 0 && cancel.wait(idle) {
                break;
            }
        }
        info!("Query dispatcher stopped");
    }

    pub fn spawn(self, cancel: CancellationToken, idle: Duration) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("query-dispatcher".to_string())
            .spawn(move || self.run(cancel, idle))
    }
}
