//! The controller task: sole owner of the [`SchedulerContext`].
//!
//! User commands, inbound device frames and connection changes all arrive as
//! [`ControllerEvent`]s on one channel and are applied in order. Sync runs
//! are spawned with a snapshot of the list so events keep flowing during the
//! pacing delays; the run reports its [`SyncOutcome`] with `SyncFinished`.

use time::PrimitiveDateTime;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::context::SchedulerContext;
use crate::dispatch::Dispatcher;
use crate::job::{Job, JobForm};
use crate::presenter::{Notice, Presenter};
use crate::protocol::{parse_job_list, parse_settings, DeviceSettings, InboundAction};
use crate::sync::{MessageSink, SyncEngine, SyncOutcome};
use crate::transport::ConnectionState;
use crate::validate::local_now;

/// What the user can ask of the scheduler view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartEdit(usize),
    Confirm(JobForm),
    CancelEdit,
    Delete(usize),
    ToggleActive(usize),
    /// Push the list to the device and commit it.
    Sync,
    /// Clear the device-side list.
    DeleteAll,
    RequestList,
    Refresh,
}

#[derive(Debug)]
pub enum ControllerEvent {
    Command(Command),
    /// Authoritative list pushed by the device.
    JobList(Vec<Job>),
    Settings(DeviceSettings),
    DeviceStatus(String),
    Connection(ConnectionState),
    SyncFinished(SyncOutcome),
}

pub type EventSender = mpsc::UnboundedSender<ControllerEvent>;

/// Build the inbound dispatch table. Handlers decode frames and forward
/// them to the controller; malformed payloads are logged and dropped.
pub fn dispatcher(events: EventSender) -> Dispatcher {
    let jobs_tx = events.clone();
    let settings_tx = events.clone();
    let status_tx = events;

    Dispatcher::new()
        .on(InboundAction::SetJobList, move |frame| match parse_job_list(frame) {
            Ok(jobs) => {
                info!(jobs = jobs.len(), "job list received from device");
                let _ = jobs_tx.send(ControllerEvent::JobList(jobs));
            }
            Err(e) => error!("setjoblist rejected: {e:#}"),
        })
        .on(InboundAction::SetSettings, move |frame| match parse_settings(frame) {
            Ok(settings) => {
                let _ = settings_tx.send(ControllerEvent::Settings(settings));
            }
            Err(e) => error!("setsettings rejected: {e:#}"),
        })
        .on(InboundAction::SetValues, move |frame| {
            let _ = status_tx.send(ControllerEvent::DeviceStatus(frame.to_string()));
        })
        .on_telemetry(|frame| {
            let sensors = frame["sensors"].as_array().map_or(0, Vec::len);
            debug!(sensors, "telemetry received");
        })
}

/// Relay connection state changes into the controller until either side
/// goes away.
pub async fn forward_connection_state(
    mut states: watch::Receiver<ConnectionState>,
    events: EventSender,
) {
    loop {
        let state = *states.borrow_and_update();
        if events.send(ControllerEvent::Connection(state)).is_err() {
            return;
        }
        if states.changed().await.is_err() {
            return;
        }
    }
}

pub struct Controller<S, P> {
    ctx: SchedulerContext,
    sync: SyncEngine<S>,
    presenter: P,
    events: EventSender,
    clock: fn() -> PrimitiveDateTime,
}

impl<S, P> Controller<S, P>
where
    S: MessageSink + Clone + 'static,
    P: Presenter,
{
    pub fn new(sync: SyncEngine<S>, presenter: P, events: EventSender, plant_count: u8) -> Self {
        Self {
            ctx: SchedulerContext::new(plant_count),
            sync,
            presenter,
            events,
            clock: local_now,
        }
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: fn() -> PrimitiveDateTime) -> Self {
        self.clock = clock;
        self
    }

    #[cfg(test)]
    fn context(&self) -> &SchedulerContext {
        &self.ctx
    }

    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ControllerEvent>) {
        self.render();
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
    }

    pub fn handle(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Command(cmd) => self.handle_command(cmd),
            ControllerEvent::JobList(jobs) => {
                let was_editing = self.ctx.session.is_editing();
                self.ctx.session.replace_all(jobs);
                if was_editing {
                    self.presenter.clear_form();
                }
                self.render();
            }
            ControllerEvent::Settings(settings) => {
                info!(
                    plant_count = settings.plant_count,
                    moisture_sensor = settings.use_moisturesensor,
                    flow_sensor = settings.use_flowsensor,
                    webserial = settings.use_webserial,
                    auto_switch = settings.auto_switch_enabled,
                    "device settings received"
                );
                self.ctx.settings = settings;
                self.render();
            }
            ControllerEvent::DeviceStatus(status) => {
                self.presenter.notify(Notice::DeviceStatus(status));
            }
            ControllerEvent::Connection(state) => {
                if self.ctx.connection != state {
                    self.ctx.connection = state;
                    self.presenter.notify(Notice::Connection(state));
                    self.render();
                }
            }
            ControllerEvent::SyncFinished(outcome) => {
                self.ctx.syncing = false;
                let notice = match outcome {
                    SyncOutcome::Sent { jobs } => Notice::SyncFinished { jobs },
                    SyncOutcome::Aborted { sent, total } => Notice::SyncAborted { sent, total },
                };
                self.presenter.notify(notice);
                self.render();
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::StartEdit(index) => match self.ctx.session.start_edit(index) {
                Some(form) => {
                    self.presenter.load_form(&form);
                    self.render();
                }
                None => warn!(index, "edit requested for missing job"),
            },
            Command::Confirm(form) => {
                let vctx = self.ctx.validation_context((self.clock)());
                match self.ctx.session.confirm(&form, &vctx) {
                    Ok(outcome) => {
                        info!(?outcome, name = %form.name.trim(), "job saved locally");
                        self.presenter.clear_form();
                        self.render();
                    }
                    Err(e) => {
                        info!(reason = %e, "job rejected");
                        self.presenter.notify(Notice::Rejected(e));
                    }
                }
            }
            Command::CancelEdit => {
                self.ctx.session.cancel_edit();
                self.presenter.clear_form();
                self.render();
            }
            Command::Delete(index) => {
                let was_edited = self.ctx.session.edit_index() == Some(index);
                match self.ctx.session.delete(index) {
                    Some(job) => {
                        info!(index, name = %job.name, "job deleted locally");
                        if was_edited {
                            self.presenter.clear_form();
                        }
                        self.render();
                    }
                    None => warn!(index, "delete requested for missing job"),
                }
            }
            Command::ToggleActive(index) => match self.ctx.session.toggle_active(index) {
                Some(active) => {
                    debug!(index, active, "job activation toggled");
                    self.render();
                }
                None => warn!(index, "toggle requested for missing job"),
            },
            Command::Sync => self.start_sync(),
            Command::DeleteAll => {
                self.sync.delete_all();
                self.presenter.notify(Notice::DeviceClearRequested);
            }
            Command::RequestList => self.sync.request_list(),
            Command::Refresh => self.render(),
        }
    }

    fn start_sync(&mut self) {
        if self.ctx.syncing {
            warn!("sync already running");
            self.presenter.notify(Notice::SyncBusy);
            return;
        }
        if !self.ctx.session.can_commit() {
            self.presenter.notify(Notice::NothingToSync);
            return;
        }

        let jobs = self.ctx.session.snapshot();
        self.ctx.syncing = true;
        self.presenter.notify(Notice::SyncStarted { jobs: jobs.len() });
        self.render();

        let engine = self.sync.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let outcome = engine.sync_all(jobs).await;
            let _ = events.send(ControllerEvent::SyncFinished(outcome));
        });
    }

    fn render(&mut self) {
        let view = self.ctx.list_view();
        self.presenter.render(&view);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
