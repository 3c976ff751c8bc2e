//! Line-oriented console front end.
//!
//! The console owns the form buffer the user fills with `set`; the
//! controller fills or clears the same buffer through [`ConsolePresenter`]
//! when an edit starts or a save succeeds. Job numbers shown and accepted
//! here are 1-based.

use std::io::{self, BufRead};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;

use crate::controller::{Command, ControllerEvent, EventSender};
use crate::job::{Field, JobForm, PlantSelector, TriggerType};
use crate::presenter::{ListView, Notice, Presenter};
use crate::transport::ConnectionState;

pub type FormBuffer = Arc<Mutex<JobForm>>;

fn lock(form: &FormBuffer) -> MutexGuard<'_, JobForm> {
    form.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

pub struct ConsolePresenter {
    form: FormBuffer,
}

impl ConsolePresenter {
    pub fn new(form: FormBuffer) -> Self {
        Self { form }
    }
}

impl Presenter for ConsolePresenter {
    fn render(&mut self, view: &ListView<'_>) {
        println!(
            "── jobs ({}) · {} · {} plant{} ──",
            view.jobs.len(),
            describe_connection(view.connection),
            view.plant_count,
            if view.plant_count == 1 { "" } else { "s" }
        );
        for (i, job) in view.jobs.iter().enumerate() {
            let marker = if view.edit_index == Some(i) { '>' } else { ' ' };
            println!("{marker}{:>3}. {job}", i + 1);
        }
        if !view.can_commit {
            println!("     (sync unavailable)");
        }
    }

    fn load_form(&mut self, form: &JobForm) {
        *lock(&self.form) = form.clone();
        println!("{}", describe_form(form));
    }

    fn clear_form(&mut self) {
        *lock(&self.form) = JobForm::default();
    }

    fn notify(&mut self, notice: Notice) {
        println!("{}", describe_notice(notice));
    }
}

fn describe_notice(notice: Notice) -> String {
    match notice {
        Notice::Rejected(e) => format!("rejected: {e}"),
        Notice::SyncStarted { jobs } => format!("syncing {jobs} job(s) to the device..."),
        // Sent, not committed: the device never confirms the commit.
        Notice::SyncFinished { jobs } => format!("sync finished, {jobs} job(s) sent"),
        Notice::SyncAborted { sent, total } => {
            format!("sync aborted, connection lost after {sent} of {total} job(s); no commit sent")
        }
        Notice::SyncBusy => "a sync is already running".to_string(),
        Notice::NothingToSync => "nothing to sync, the list is empty".to_string(),
        Notice::DeviceClearRequested => "asked the device to clear its list".to_string(),
        Notice::Connection(state) => format!("device {}", describe_connection(state)),
        Notice::DeviceStatus(status) => format!("device status: {status}"),
    }
}

fn describe_connection(state: ConnectionState) -> String {
    match state {
        ConnectionState::Disconnected => "disconnected".into(),
        ConnectionState::Connecting => "connecting".into(),
        ConnectionState::Connected => "connected".into(),
        ConnectionState::Backoff { attempt } => format!("reconnecting (attempt {attempt})"),
    }
}

/// Form contents, listing only the fields the trigger type enables.
fn describe_form(form: &JobForm) -> String {
    let mut out = format!(
        "form: name={:?} type={} plant={}",
        form.name,
        form.trigger_type,
        form.plant.index()
    );
    if form.is_enabled(Field::StartTime) {
        out.push_str(&format!(" start={:?} everyday={}", form.start_time, form.everyday));
    }
    if form.is_enabled(Field::MoistureMin) {
        out.push_str(&format!(" min={}", form.moisture_min));
    }
    if form.is_enabled(Field::MoistureMax) {
        out.push_str(&format!(" max={}", form.moisture_max));
    }
    if form.is_enabled(Field::VolumeMl) {
        out.push_str(&format!(" volume={} duration={}", form.volume_ml, form.duration_sec));
    }
    out
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Command(Command),
    /// Assign form fields, in order.
    Set(Vec<(String, String)>),
    /// Confirm the current form.
    Save,
    ShowForm,
    Help,
    Quit,
}

const HELP: &str = "\
commands:
  list                      show the job list
  new                       clear the form (abandons an edit)
  set key=value ...         fill the form: name type min max plant volume duration start everyday
  form                      show the form
  save                      add the form as a job, or update the job being edited
  edit N | delete N | toggle N
  sync                      send the list to the device and commit it
  fetch                     ask the device for its list
  clear-device              clear the list on the device
  quit";

/// Parse one console line. Blank lines parse to `None`.
pub fn parse_line(line: &str) -> Result<Option<Input>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let input = match verb {
        "list" | "ls" => Input::Command(Command::Refresh),
        "new" | "cancel" => Input::Command(Command::CancelEdit),
        "set" => Input::Set(parse_assignments(&rest)?),
        "form" => Input::ShowForm,
        "save" => Input::Save,
        "edit" => Input::Command(Command::StartEdit(parse_position(&rest)?)),
        "delete" | "rm" => Input::Command(Command::Delete(parse_position(&rest)?)),
        "toggle" => Input::Command(Command::ToggleActive(parse_position(&rest)?)),
        "sync" => Input::Command(Command::Sync),
        "fetch" => Input::Command(Command::RequestList),
        "clear-device" => Input::Command(Command::DeleteAll),
        "help" | "?" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => bail!("unknown command '{other}', try 'help'"),
    };
    Ok(Some(input))
}

/// 1-based job number to list index.
fn parse_position(args: &[&str]) -> Result<usize> {
    let [arg] = args else {
        bail!("expected one job number");
    };
    let n: usize = arg
        .parse()
        .with_context(|| format!("'{arg}' is not a job number"))?;
    if n == 0 {
        bail!("job numbers start at 1");
    }
    Ok(n - 1)
}

/// `key=value` pairs; a word without `=` continues the previous value, so
/// `name=Cherry tomatoes` keeps the space.
fn parse_assignments(words: &[&str]) -> Result<Vec<(String, String)>> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    for word in words {
        match word.split_once('=') {
            Some((key, value)) => pairs.push((key.to_ascii_lowercase(), value.to_string())),
            None => match pairs.last_mut() {
                Some((_, value)) => {
                    value.push(' ');
                    value.push_str(word);
                }
                None => bail!("expected key=value, got '{word}'"),
            },
        }
    }
    if pairs.is_empty() {
        bail!("nothing to set");
    }
    Ok(pairs)
}

/// Assign one form field from its console spelling.
pub fn apply_field(form: &mut JobForm, key: &str, value: &str) -> Result<()> {
    let value = value.trim();
    match key {
        "name" => form.name = value.to_string(),
        "type" => {
            form.trigger_type = match value {
                "time" | "0" => TriggerType::TimeBased,
                "moisture" | "1" => TriggerType::MoistureBased,
                "both" | "time+moisture" | "2" => TriggerType::TimeAndMoisture,
                _ => bail!("type must be time, moisture or both"),
            }
        }
        "min" => form.moisture_min = parse_number(key, value)?,
        "max" => form.moisture_max = parse_number(key, value)?,
        "plant" => {
            form.plant = PlantSelector::parse(value)
                .with_context(|| format!("'{value}' is not a plant number or 'all'"))?
        }
        "volume" => form.volume_ml = parse_number(key, value)?,
        "duration" => form.duration_sec = parse_number(key, value)?,
        "start" => form.start_time = value.to_string(),
        "everyday" => {
            form.everyday = match value.to_ascii_lowercase().as_str() {
                "yes" | "y" | "true" | "on" | "1" => true,
                "no" | "n" | "false" | "off" | "0" => false,
                _ => bail!("everyday must be yes or no"),
            }
        }
        _ => bail!("unknown field '{key}'"),
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .ok()
        .with_context(|| format!("{key}: '{value}' is not a valid number"))
}

pub type LineReceiver = mpsc::UnboundedReceiver<io::Result<String>>;

/// Read stdin on its own thread. A blocking stdin read cannot be cancelled,
/// so it must not live on the runtime or shutdown would wait for a newline.
pub fn stdin_lines() -> Result<LineReceiver> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("failed to start stdin reader")?;
    Ok(rx)
}

/// Apply console lines until `quit`, end of input, or the controller going
/// away.
pub async fn run(mut lines: LineReceiver, form: FormBuffer, events: EventSender) -> Result<()> {
    println!("type 'help' for commands");

    while let Some(line) = lines.recv().await {
        let line = line.context("failed to read stdin")?;
        let input = match parse_line(&line) {
            Ok(Some(input)) => input,
            Ok(None) => continue,
            Err(e) => {
                println!("error: {e:#}");
                continue;
            }
        };

        let command = match input {
            Input::Command(cmd) => cmd,
            Input::Save => Command::Confirm(lock(&form).clone()),
            Input::Set(pairs) => {
                let mut buf = lock(&form);
                for (key, value) in pairs {
                    if let Err(e) = apply_field(&mut buf, &key, &value) {
                        println!("error: {e:#}");
                        break;
                    }
                }
                continue;
            }
            Input::ShowForm => {
                println!("{}", describe_form(&lock(&form)));
                continue;
            }
            Input::Help => {
                println!("{HELP}");
                continue;
            }
            Input::Quit => return Ok(()),
        };

        if events.send(ControllerEvent::Command(command)).is_err() {
            tracing::warn!("controller stopped, leaving console");
            return Ok(());
        }
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Input {
        parse_line(line).unwrap().unwrap()
    }

    // -- Commands ---------------------------------------------------------

    #[test]
    fn blank_line_is_nothing() {
        assert!(parse_line("   ").unwrap().is_none());
    }

    #[test]
    fn simple_commands() {
        assert_eq!(parse("sync"), Input::Command(Command::Sync));
        assert_eq!(parse("fetch"), Input::Command(Command::RequestList));
        assert_eq!(parse("clear-device"), Input::Command(Command::DeleteAll));
        assert_eq!(parse("new"), Input::Command(Command::CancelEdit));
        assert_eq!(parse("list"), Input::Command(Command::Refresh));
        assert_eq!(parse("save"), Input::Save);
        assert_eq!(parse("quit"), Input::Quit);
    }

    #[test]
    fn job_numbers_are_one_based() {
        assert_eq!(parse("edit 1"), Input::Command(Command::StartEdit(0)));
        assert_eq!(parse("delete 3"), Input::Command(Command::Delete(2)));
        assert_eq!(parse("toggle 2"), Input::Command(Command::ToggleActive(1)));
    }

    #[test]
    fn bad_job_numbers_rejected() {
        for line in ["edit", "edit 0", "edit x", "delete 1 2", "toggle -1"] {
            assert!(parse_line(line).is_err(), "{line}");
        }
    }

    #[test]
    fn unknown_command_rejected() {
        let err = parse_line("water now").unwrap_err();
        assert!(format!("{err}").contains("unknown command 'water'"));
    }

    // -- Assignments ------------------------------------------------------

    #[test]
    fn set_splits_pairs_and_keeps_spaces_in_values() {
        assert_eq!(
            parse("set name=Cherry tomatoes type=time start=2026-10-18T07:00"),
            Input::Set(vec![
                ("name".into(), "Cherry tomatoes".into()),
                ("type".into(), "time".into()),
                ("start".into(), "2026-10-18T07:00".into()),
            ])
        );
    }

    #[test]
    fn set_without_pairs_rejected() {
        assert!(parse_line("set").is_err());
        assert!(parse_line("set tomatoes").is_err());
    }

    #[test]
    fn apply_fields_fill_the_form() {
        let mut form = JobForm::default();
        for (k, v) in [
            ("name", "Roses"),
            ("type", "moisture"),
            ("min", "30"),
            ("max", "60"),
            ("plant", "2"),
            ("everyday", "yes"),
        ] {
            apply_field(&mut form, k, v).unwrap();
        }
        assert_eq!(form.name, "Roses");
        assert_eq!(form.trigger_type, TriggerType::MoistureBased);
        assert_eq!((form.moisture_min, form.moisture_max), (30, 60));
        assert_eq!(form.plant, PlantSelector::Plant(2));
        assert!(form.everyday);
    }

    #[test]
    fn apply_field_accepts_wire_type_codes_and_all_plants() {
        let mut form = JobForm::default();
        apply_field(&mut form, "type", "2").unwrap();
        apply_field(&mut form, "plant", "all").unwrap();
        assert_eq!(form.trigger_type, TriggerType::TimeAndMoisture);
        assert_eq!(form.plant, PlantSelector::AllPlants);
    }

    #[test]
    fn apply_field_rejects_bad_values() {
        let mut form = JobForm::default();
        assert!(apply_field(&mut form, "volume", "lots").is_err());
        assert!(apply_field(&mut form, "type", "rain").is_err());
        assert!(apply_field(&mut form, "plant", "x").is_err());
        assert!(apply_field(&mut form, "colour", "red").is_err());
        assert_eq!(form, JobForm::default());
    }

    // -- Presenter --------------------------------------------------------

    #[test]
    fn presenter_shares_the_form_buffer() {
        let buffer: FormBuffer = Arc::default();
        let mut presenter = ConsolePresenter::new(Arc::clone(&buffer));
        let form = JobForm {
            name: "Basil".into(),
            ..JobForm::default()
        };

        presenter.load_form(&form);
        assert_eq!(*lock(&buffer), form);

        presenter.clear_form();
        assert_eq!(*lock(&buffer), JobForm::default());
    }

    #[test]
    fn form_description_lists_enabled_fields_only() {
        let form = JobForm {
            name: "Roses".into(),
            trigger_type: TriggerType::MoistureBased,
            ..JobForm::default()
        };
        let text = describe_form(&form);
        assert!(text.contains("min=20"));
        assert!(text.contains("max=80"));
        assert!(!text.contains("start="));
        assert!(!text.contains("volume="));
    }

    // -- Line loop ----------------------------------------------------------

    fn feed(lines: &[&str]) -> (mpsc::UnboundedSender<io::Result<String>>, LineReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        for line in lines {
            tx.send(Ok(line.to_string())).unwrap();
        }
        (tx, rx)
    }

    #[tokio::test]
    async fn saved_form_is_forwarded_as_confirm() {
        let (tx, rx) = feed(&["set name=Basil", "save", "sync"]);
        drop(tx);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        run(rx, Arc::default(), events_tx).await.unwrap();

        match events_rx.recv().await {
            Some(ControllerEvent::Command(Command::Confirm(form))) => assert_eq!(form.name, "Basil"),
            other => panic!("expected confirm, got {other:?}"),
        }
        assert!(matches!(
            events_rx.recv().await,
            Some(ControllerEvent::Command(Command::Sync))
        ));
        assert!(events_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn quit_returns_while_input_stays_open() {
        let (_tx, rx) = feed(&["quit", "sync"]);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        run(rx, Arc::default(), events_tx).await.unwrap();

        assert!(events_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn read_error_ends_the_loop() {
        let (tx, rx) = feed(&[]);
        tx.send(Err(io::Error::new(io::ErrorKind::InvalidData, "not utf-8")))
            .unwrap();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();

        assert!(run(rx, Arc::default(), events_tx).await.is_err());
    }

    #[test]
    fn sync_notices_do_not_claim_a_device_commit() {
        let done = describe_notice(Notice::SyncFinished { jobs: 2 });
        assert_eq!(done, "sync finished, 2 job(s) sent");
        assert!(!done.contains("committed"));

        let aborted = describe_notice(Notice::SyncAborted { sent: 1, total: 3 });
        assert!(aborted.starts_with("sync aborted"));
        assert!(aborted.contains("1 of 3"));
    }
}
