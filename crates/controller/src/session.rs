//! Edit session over the local job list.
//!
//! ```text
//!            start_edit(i)
//!   Composing ───────────▶ Editing(i)
//!       ▲                     │
//!       └── confirm / cancel ─┤
//!       └── delete(i) ────────┤
//!       └── replace_all ──────┘
//! ```
//!
//! `Composing` means the next confirm appends a new job; `Editing(i)` means
//! it overwrites entry `i` and restores the `active` flag the entry had when
//! the edit started.

use tracing::debug;

use crate::job::{Job, JobForm};
use crate::validate::{validate, ValidationContext, ValidationError};

/// Outcome of a successful confirm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmed {
    Added(usize),
    Updated(usize),
}

#[derive(Debug, Default)]
pub struct EditSession {
    jobs: Vec<Job>,
    edit_index: Option<usize>,
    /// `active` flag of the entry being edited, captured at `start_edit`.
    preserved_active: bool,
}

impl EditSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn edit_index(&self) -> Option<usize> {
        self.edit_index
    }

    pub fn is_editing(&self) -> bool {
        self.edit_index.is_some()
    }

    /// Whether a commit to the device makes sense. Derived, never stored.
    pub fn can_commit(&self) -> bool {
        !self.jobs.is_empty()
    }

    /// Copy of the list for a sync run.
    pub fn snapshot(&self) -> Vec<Job> {
        self.jobs.clone()
    }

    /// Begin editing entry `index` and return the form loaded from it.
    /// Out-of-range indices leave the session untouched.
    pub fn start_edit(&mut self, index: usize) -> Option<JobForm> {
        let job = self.jobs.get(index)?;
        self.preserved_active = job.active;
        self.edit_index = Some(index);
        debug!(index, name = %job.name, "edit started");
        Some(JobForm::from_job(job))
    }

    /// Validate `form` and apply it. On error nothing changes.
    pub fn confirm(
        &mut self,
        form: &JobForm,
        ctx: &ValidationContext,
    ) -> Result<Confirmed, ValidationError> {
        validate(form, ctx)?;

        let outcome = match self.edit_index.take() {
            Some(index) if index < self.jobs.len() => {
                self.jobs[index] = form.to_job(self.preserved_active);
                Confirmed::Updated(index)
            }
            _ => {
                self.jobs.push(form.to_job(false));
                Confirmed::Added(self.jobs.len() - 1)
            }
        };
        self.preserved_active = false;
        debug!(?outcome, "job confirmed");
        Ok(outcome)
    }

    pub fn cancel_edit(&mut self) {
        self.edit_index = None;
        self.preserved_active = false;
    }

    /// Remove entry `index`. Deleting the entry under edit ends the edit;
    /// deleting an earlier entry keeps the cursor on the same job.
    pub fn delete(&mut self, index: usize) -> Option<Job> {
        if index >= self.jobs.len() {
            return None;
        }
        let removed = self.jobs.remove(index);
        match self.edit_index {
            Some(i) if i == index => self.cancel_edit(),
            Some(i) if i > index => self.edit_index = Some(i - 1),
            _ => {}
        }
        Some(removed)
    }

    /// Flip the `active` flag of entry `index`. Returns the new value.
    pub fn toggle_active(&mut self, index: usize) -> Option<bool> {
        let job = self.jobs.get_mut(index)?;
        job.active = !job.active;
        Some(job.active)
    }

    /// Replace the list with the device's authoritative copy. Any edit in
    /// progress is abandoned.
    pub fn replace_all(&mut self, jobs: Vec<Job>) {
        if let Some(index) = self.edit_index {
            debug!(index, "authoritative list received, abandoning edit");
        }
        self.jobs = jobs;
        self.cancel_edit();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
