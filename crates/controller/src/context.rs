use time::PrimitiveDateTime;

use crate::presenter::ListView;
use crate::protocol::DeviceSettings;
use crate::session::EditSession;
use crate::transport::ConnectionState;
use crate::validate::ValidationContext;

/// Everything the scheduler view owns: the job list with its edit session,
/// the last settings the device reported and the link state. Owned by the
/// controller task; nothing else mutates it.
pub struct SchedulerContext {
    pub session: EditSession,
    pub settings: DeviceSettings,
    pub connection: ConnectionState,
    pub syncing: bool,
}

impl SchedulerContext {
    pub fn new(plant_count: u8) -> Self {
        Self {
            session: EditSession::new(),
            settings: DeviceSettings {
                plant_count,
                ..DeviceSettings::default()
            },
            connection: ConnectionState::Disconnected,
            syncing: false,
        }
    }

    pub fn validation_context(&self, now: PrimitiveDateTime) -> ValidationContext {
        ValidationContext::new(now, self.settings.plant_count)
    }

    pub fn list_view(&self) -> ListView<'_> {
        ListView {
            jobs: self.session.jobs(),
            edit_index: self.session.edit_index(),
            can_commit: self.session.can_commit() && !self.syncing,
            plant_count: self.settings.plant_count,
            connection: self.connection,
        }
    }
}
