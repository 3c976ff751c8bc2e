//! Contract between the scheduler core and whatever renders it.

use crate::job::{Job, JobForm};
use crate::transport::ConnectionState;
use crate::validate::ValidationError;

/// Read-only view of the job list handed to the presenter on every change.
#[derive(Debug)]
pub struct ListView<'a> {
    pub jobs: &'a [Job],
    pub edit_index: Option<usize>,
    /// Whether the "commit to device" action should be enabled.
    pub can_commit: bool,
    pub plant_count: u8,
    pub connection: ConnectionState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Confirm was blocked; the form stays as the user left it.
    Rejected(ValidationError),
    SyncStarted { jobs: usize },
    /// Every append and the commit went out on one connection.
    SyncFinished { jobs: usize },
    /// The connection dropped mid-run; the device was not told to commit.
    SyncAborted { sent: usize, total: usize },
    /// A sync run is already in flight.
    SyncBusy,
    /// Commit requested with an empty list.
    NothingToSync,
    /// `deletejoblist` sent; the local list changes only if the device reports back.
    DeviceClearRequested,
    Connection(ConnectionState),
    /// Device status frame (`setvalues`), passed through verbatim.
    DeviceStatus(String),
}

pub trait Presenter: Send {
    fn render(&mut self, view: &ListView<'_>);
    /// Fill the form with the job being edited.
    fn load_form(&mut self, form: &JobForm);
    /// Reset the form to its cleared state.
    fn clear_form(&mut self);
    fn notify(&mut self, notice: Notice);
}
