//! Pushes the local job list to the device.
//!
//! A sync run sends one `addjobtolist` per job, in list order, with the job's
//! index as its id, sleeping a fixed pacing delay after each send so the
//! device's input buffer is not overrun. After the last job a single
//! `savejoblist` tells the device to adopt the pending list.
//!
//! A run is bound to the connection it started on. If that connection goes
//! away the run stops at the next send and never commits, so a later
//! connection cannot receive the tail of a list whose head it never saw.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::job::Job;
use crate::protocol::{OutboundMessage, WireJob};
use crate::transport::TransportHandle;

/// Default gap between successive appends.
pub const DEFAULT_PACING: Duration = Duration::from_secs(2);

/// Anything that can carry outbound frames to the device.
pub trait MessageSink: Send + Sync {
    /// Fire and forget on whatever connection is current.
    fn send(&self, msg: OutboundMessage);

    /// Identifies the current connection, `None` while not connected.
    fn epoch(&self) -> Option<u64>;

    /// Send on the connection identified by `epoch` only. `false` means it
    /// is gone and the frame was dropped.
    fn send_on(&self, epoch: u64, msg: OutboundMessage) -> bool;
}

impl MessageSink for TransportHandle {
    fn send(&self, msg: OutboundMessage) {
        TransportHandle::send(self, msg);
    }

    fn epoch(&self) -> Option<u64> {
        TransportHandle::epoch(self)
    }

    fn send_on(&self, epoch: u64, msg: OutboundMessage) -> bool {
        TransportHandle::send_on(self, epoch, msg)
    }
}

/// How a sync run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every append and the commit were handed to the connection.
    Sent { jobs: usize },
    /// The connection changed or dropped; no commit was sent.
    Aborted { sent: usize, total: usize },
}

#[derive(Clone)]
pub struct SyncEngine<S> {
    sink: S,
    pacing: Duration,
}

impl<S: MessageSink> SyncEngine<S> {
    pub fn new(sink: S, pacing: Duration) -> Self {
        Self { sink, pacing }
    }

    /// Send every job in order, then commit, all on the connection that is
    /// current when the run starts.
    pub async fn sync_all(&self, jobs: Vec<Job>) -> SyncOutcome {
        let total = jobs.len();
        let Some(epoch) = self.sink.epoch() else {
            warn!(jobs = total, "not connected, sync not started");
            return SyncOutcome::Aborted { sent: 0, total };
        };
        info!(jobs = total, epoch, pacing_ms = self.pacing.as_millis() as u64, "sync started");

        for (index, job) in jobs.iter().enumerate() {
            debug!(id = index, name = %job.name, "appending job");
            let msg = OutboundMessage::AddJobToList(WireJob::from_job(index as u32, job));
            if !self.sink.send_on(epoch, msg) {
                warn!(sent = index, total, "connection lost mid-sync, not committing");
                return SyncOutcome::Aborted { sent: index, total };
            }
            tokio::time::sleep(self.pacing).await;
        }
        if !self.sink.send_on(epoch, OutboundMessage::SaveJobList) {
            warn!(sent = total, total, "connection lost before commit");
            return SyncOutcome::Aborted { sent: total, total };
        }

        info!(jobs = total, "sync sent");
        SyncOutcome::Sent { jobs: total }
    }

    pub fn request_list(&self) {
        self.sink.send(OutboundMessage::GetJobList);
    }

    /// Clear the device-side list. The local list is untouched until the
    /// device reports back.
    pub fn delete_all(&self) {
        self.sink.send(OutboundMessage::DeleteJobList);
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::job::{JobForm, PlantSelector, TriggerType};
    use crate::transport::tests::{MockConnector, Script};
    use crate::transport::{ConnectionState, ReconnectPolicy, Transport};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    /// Sink that records every frame with the (paused) clock time it was sent.
    /// Connected on epoch 0 until `go_offline` is called.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSink {
        pub(crate) sent: Arc<Mutex<Vec<(Instant, OutboundMessage)>>>,
        offline: Arc<AtomicBool>,
    }

    impl RecordingSink {
        pub(crate) fn go_offline(&self) {
            self.offline.store(true, Ordering::SeqCst);
        }

        pub(crate) fn messages(&self) -> Vec<OutboundMessage> {
            self.sent.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
        }

        pub(crate) fn times(&self) -> Vec<Instant> {
            self.sent.lock().unwrap().iter().map(|(t, _)| *t).collect()
        }
    }

    impl MessageSink for RecordingSink {
        fn send(&self, msg: OutboundMessage) {
            self.sent.lock().unwrap().push((Instant::now(), msg));
        }

        fn epoch(&self) -> Option<u64> {
            (!self.offline.load(Ordering::SeqCst)).then_some(0)
        }

        fn send_on(&self, epoch: u64, msg: OutboundMessage) -> bool {
            if self.epoch() != Some(epoch) {
                return false;
            }
            self.send(msg);
            true
        }
    }

    fn job(name: &str) -> Job {
        JobForm {
            name: name.into(),
            trigger_type: TriggerType::MoistureBased,
            plant: PlantSelector::Plant(1),
            ..JobForm::default()
        }
        .to_job(false)
    }

    #[tokio::test(start_paused = true)]
    async fn sync_sends_appends_in_order_then_commit() {
        let sink = RecordingSink::default();
        let engine = SyncEngine::new(sink.clone(), DEFAULT_PACING);
        let jobs = vec![job("a"), job("b"), job("c")];

        let outcome = engine.sync_all(jobs.clone()).await;

        assert_eq!(outcome, SyncOutcome::Sent { jobs: 3 });
        let msgs = sink.messages();
        assert_eq!(msgs.len(), 4);
        for (i, j) in jobs.iter().enumerate() {
            assert_eq!(
                msgs[i],
                OutboundMessage::AddJobToList(WireJob::from_job(i as u32, j))
            );
        }
        assert_eq!(msgs[3], OutboundMessage::SaveJobList);
    }

    #[tokio::test(start_paused = true)]
    async fn sync_paces_every_send() {
        let sink = RecordingSink::default();
        let engine = SyncEngine::new(sink.clone(), Duration::from_millis(500));

        engine.sync_all(vec![job("a"), job("b"), job("c")]).await;

        let times = sink.times();
        for w in times.windows(2) {
            assert!(w[1] - w[0] >= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sync_empty_list_only_commits() {
        let sink = RecordingSink::default();
        let engine = SyncEngine::new(sink.clone(), DEFAULT_PACING);

        assert_eq!(engine.sync_all(Vec::new()).await, SyncOutcome::Sent { jobs: 0 });
        assert_eq!(sink.messages(), vec![OutboundMessage::SaveJobList]);
    }

    #[tokio::test(start_paused = true)]
    async fn sync_while_offline_sends_nothing() {
        let sink = RecordingSink::default();
        sink.go_offline();
        let engine = SyncEngine::new(sink.clone(), DEFAULT_PACING);

        let outcome = engine.sync_all(vec![job("a"), job("b")]).await;

        assert_eq!(outcome, SyncOutcome::Aborted { sent: 0, total: 2 });
        assert!(sink.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn connection_lost_mid_run_stops_without_commit() {
        let sink = RecordingSink::default();
        let engine = SyncEngine::new(sink.clone(), DEFAULT_PACING);
        let run = tokio::spawn(async move { engine.sync_all(vec![job("a"), job("b"), job("c")]).await });

        tokio::time::sleep(Duration::from_millis(500)).await;
        sink.go_offline();

        assert_eq!(run.await.unwrap(), SyncOutcome::Aborted { sent: 1, total: 3 });
        assert_eq!(sink.messages().len(), 1);
        assert!(!sink.messages().contains(&OutboundMessage::SaveJobList));
    }

    /// The link drops after the first append and the transport reconnects
    /// well inside the pacing gap. Nothing from the run may reach the new
    /// connection.
    #[tokio::test(start_paused = true)]
    async fn reconnect_mid_run_never_commits_on_new_connection() {
        let (first_tx, first_rx) = mpsc::unbounded_channel::<String>();
        let (_second_tx, second_rx) = mpsc::unbounded_channel::<String>();
        let connector = MockConnector::new(vec![Script::Open(first_rx), Script::Open(second_rx)]);
        let wire = Arc::clone(&connector.sent);
        let connects = Arc::clone(&connector.connects);
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(100),
            max_attempts: 5,
        };
        let (transport, handle) = Transport::new("ws://test/ws", policy, connector, Dispatcher::new());
        let mut states = handle.subscribe();
        let task = tokio::spawn(transport.run());
        states.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();

        let engine = SyncEngine::new(handle.clone(), DEFAULT_PACING);
        let run = tokio::spawn(async move { engine.sync_all(vec![job("a"), job("b"), job("c")]).await });

        tokio::time::sleep(Duration::from_millis(500)).await;
        drop(first_tx);
        states
            .wait_for(|s| *s == ConnectionState::Backoff { attempt: 1 })
            .await
            .unwrap();
        states.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();
        assert_eq!(connects.lock().unwrap().len(), 2);

        let outcome = run.await.unwrap();
        handle.close();
        task.await.unwrap();

        assert_eq!(outcome, SyncOutcome::Aborted { sent: 1, total: 3 });
        let wire = wire.lock().unwrap().clone();
        assert_eq!(wire.iter().filter(|f| f.contains("addjobtolist")).count(), 1);
        assert!(wire.iter().all(|f| !f.contains("savejoblist")));
        // Both connections bootstrapped.
        assert_eq!(wire.iter().filter(|f| f.contains("getjoblist")).count(), 2);
    }

    #[tokio::test]
    async fn request_and_delete_are_single_frames() {
        let sink = RecordingSink::default();
        let engine = SyncEngine::new(sink.clone(), DEFAULT_PACING);
        engine.request_list();
        engine.delete_all();
        assert_eq!(
            sink.messages(),
            vec![OutboundMessage::GetJobList, OutboundMessage::DeleteJobList]
        );
    }
}
