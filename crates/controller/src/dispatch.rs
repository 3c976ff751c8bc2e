//! Inbound frame routing. Handlers are registered per action once at
//! startup; frames without an action but with sensor data go to the
//! telemetry handler.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::protocol::{frame_action, is_telemetry, InboundAction};

pub type Handler = Box<dyn Fn(&Value) + Send + Sync>;

/// How a frame was routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Action(InboundAction),
    Telemetry,
    /// Known or unknown action with no registered handler.
    Unhandled(String),
    /// Frame without an action and without telemetry.
    Ignored,
    Malformed,
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<InboundAction, Handler>,
    telemetry: Option<Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, action: InboundAction, handler: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.handlers.insert(action, Box::new(handler));
        self
    }

    pub fn on_telemetry<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.telemetry = Some(Box::new(handler));
        self
    }

    /// Parse a text frame and hand it to the matching handler.
    pub fn dispatch(&self, text: &str) -> Routed {
        let frame: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                error!("bad frame json: {e}");
                return Routed::Malformed;
            }
        };

        match frame_action(&frame) {
            Some(name) => {
                let handler = name
                    .parse::<InboundAction>()
                    .ok()
                    .and_then(|a| self.handlers.get(&a).map(|h| (a, h)));
                match handler {
                    Some((action, h)) => {
                        debug!(%action, "dispatching frame");
                        h(&frame);
                        Routed::Action(action)
                    }
                    None => {
                        warn!(action = name, "unhandled action");
                        Routed::Unhandled(name.to_string())
                    }
                }
            }
            None if is_telemetry(&frame) => match &self.telemetry {
                Some(h) => {
                    h(&frame);
                    Routed::Telemetry
                }
                None => Routed::Unhandled("telemetry".to_string()),
            },
            None => {
                debug!("frame without action ignored");
                Routed::Ignored
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Dispatcher that records the action names its handlers saw.
    fn recording() -> (Dispatcher, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c) = (Arc::clone(&seen), Arc::clone(&seen), Arc::clone(&seen));
        let d = Dispatcher::new()
            .on(InboundAction::SetJobList, move |_| {
                a.lock().unwrap().push("setjoblist".into())
            })
            .on(InboundAction::SetSettings, move |f| {
                b.lock().unwrap().push(format!("setsettings:{}", f["plant_count"]))
            })
            .on_telemetry(move |_| c.lock().unwrap().push("telemetry".into()));
        (d, seen)
    }

    #[test]
    fn routes_by_action() {
        let (d, seen) = recording();
        assert_eq!(
            d.dispatch(r#"{"action":"setjoblist","joblist":[]}"#),
            Routed::Action(InboundAction::SetJobList)
        );
        assert_eq!(
            d.dispatch(r#"{"action":"setsettings","plant_count":4}"#),
            Routed::Action(InboundAction::SetSettings)
        );
        assert_eq!(*seen.lock().unwrap(), vec!["setjoblist", "setsettings:4"]);
    }

    #[test]
    fn sensor_frames_go_to_telemetry() {
        let (d, seen) = recording();
        assert_eq!(
            d.dispatch(r#"{"sensors":[{"id":1,"percent":40}],"enabled":true}"#),
            Routed::Telemetry
        );
        assert_eq!(*seen.lock().unwrap(), vec!["telemetry"]);
    }

    #[test]
    fn known_action_without_handler_is_unhandled() {
        let (d, seen) = recording();
        assert_eq!(
            d.dispatch(r#"{"action":"setvalues"}"#),
            Routed::Unhandled("setvalues".into())
        );
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn unknown_action_is_unhandled() {
        let (d, _) = recording();
        assert_eq!(
            d.dispatch(r#"{"action":"reboot"}"#),
            Routed::Unhandled("reboot".into())
        );
    }

    #[test]
    fn action_wins_over_sensors_field() {
        let (d, seen) = recording();
        d.dispatch(r#"{"action":"setjoblist","sensors":[]}"#);
        assert_eq!(*seen.lock().unwrap(), vec!["setjoblist"]);
    }

    #[test]
    fn frame_without_action_or_sensors_ignored() {
        let (d, _) = recording();
        assert_eq!(d.dispatch(r#"{"hello":1}"#), Routed::Ignored);
    }

    #[test]
    fn invalid_json_is_malformed() {
        let (d, seen) = recording();
        assert_eq!(d.dispatch("{not json"), Routed::Malformed);
        assert!(seen.lock().unwrap().is_empty());
    }
}
