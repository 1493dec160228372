use crate::client::{RecordSubmission, UploadResponse};
use crate::staging::StagingSet;
use crate::validate::{is_decimal_input, validate_fields};
use std::collections::BTreeMap;

/// Phase of the upload workflow
///
/// `Validating` is transient: validation is synchronous, so
/// `begin_submit` passes through it and lands in `Idle` (with field
/// errors) or `Submitting`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Validating,
    Submitting,
    Success,
    Conflict,
    Resubmitting,
    Failed,
}

const GENERIC_ERROR: &str = "Error saving data";
const UPDATE_ERROR: &str = "Error updating data";

/// The upload modal's state machine
///
/// A single state object holding the form fields, the staged files, the
/// per-field error map and the current phase. Every transition is an
/// explicit method; the machine performs no IO itself — the caller
/// takes the `RecordSubmission` returned by `begin_submit` /
/// `confirm_overwrite`, performs the network call, and feeds the result
/// back through `on_response` / `on_transport_error`.
///
/// The server's "already exists" signal parks the machine in
/// `Conflict`; nothing is resubmitted until the user explicitly
/// confirms, and declining returns to `Idle` with no record change.
#[derive(Debug, Default)]
pub struct UploadWorkflow {
    month: String,
    baseline: String,
    consumption: String,
    staging: StagingSet,
    phase: Phase,
    errors: BTreeMap<&'static str, String>,
    message: Option<String>,
    pending: Option<RecordSubmission>,
}

impl UploadWorkflow {
    pub fn new() -> Self {
        UploadWorkflow::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Per-field validation errors from the last `begin_submit`.
    pub fn errors(&self) -> &BTreeMap<&'static str, String> {
        &self.errors
    }

    /// User-facing status message (success or failure), if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// True while a request is outstanding; the submit control must be
    /// disabled so no concurrent submissions can start.
    pub fn is_busy(&self) -> bool {
        matches!(self.phase(), Phase::Submitting | Phase::Resubmitting)
    }

    pub fn month(&self) -> &str {
        &self.month
    }

    pub fn baseline(&self) -> &str {
        &self.baseline
    }

    pub fn consumption(&self) -> &str {
        &self.consumption
    }

    pub fn staging(&mut self) -> &mut StagingSet {
        &mut self.staging
    }

    pub fn set_month(&mut self, value: &str) {
        self.month = value.to_string();
    }

    /// Update the baseline input; keystrokes that would produce
    /// non-decimal text are rejected at input time.
    pub fn set_baseline(&mut self, value: &str) {
        if is_decimal_input(value) {
            self.baseline = value.to_string();
        }
    }

    /// Update the consumption input under the same decimal mask.
    pub fn set_consumption(&mut self, value: &str) {
        if is_decimal_input(value) {
            self.consumption = value.to_string();
        }
    }

    /// Validate and, if clean, start a submission
    ///
    /// Returns the prepared submission (force_update unset) when the
    /// form is valid; the caller sends it and reports back. Returns
    /// `None` with a populated error map when validation fails, and
    /// `None` without touching anything while a request is in flight or
    /// a conflict is awaiting resolution.
    pub fn begin_submit(&mut self) -> Option<RecordSubmission> {
        if matches!(
            self.phase(),
            Phase::Submitting | Phase::Resubmitting | Phase::Conflict
        ) {
            return None;
        }

        self.message = None;
        self.phase = Phase::Validating;
        self.errors = validate_fields(
            &self.month,
            &self.baseline,
            &self.consumption,
            self.staging.len(),
        );
        if !self.errors.is_empty() {
            self.phase = Phase::Idle;
            return None;
        }

        let submission = RecordSubmission {
            month: self.month.clone(),
            baseline: self.baseline.clone(),
            consumption: self.consumption.clone(),
            attachments: self.staging.files().to_vec(),
            force_update: false,
        };
        self.pending = Some(submission.clone());
        self.phase = Phase::Submitting;
        Some(submission)
    }

    /// Feed back the server's response to the outstanding request.
    pub fn on_response(&mut self, response: &UploadResponse) {
        let phase = self.phase();
        if !matches!(phase, Phase::Submitting | Phase::Resubmitting) {
            return;
        }

        if response.success {
            self.message = Some(
                if phase == Phase::Resubmitting {
                    "Updated successfully!"
                } else {
                    "Saved successfully!"
                }
                .to_string(),
            );
            self.pending = None;
            self.clear_form();
            self.phase = Phase::Success;
        } else if response.exists && phase == Phase::Submitting {
            self.phase = Phase::Conflict;
        } else {
            self.message = Some(response.message.clone().unwrap_or_else(|| {
                if phase == Phase::Resubmitting {
                    UPDATE_ERROR
                } else {
                    GENERIC_ERROR
                }
                .to_string()
            }));
            self.pending = None;
            self.phase = Phase::Failed;
        }
    }

    /// A network failure: surfaced as a generic message, no retry.
    pub fn on_transport_error(&mut self) {
        if self.is_busy() {
            self.message = Some(GENERIC_ERROR.to_string());
            self.pending = None;
            self.phase = Phase::Failed;
        }
    }

    /// The user confirmed the overwrite: resubmit with the force flag.
    pub fn confirm_overwrite(&mut self) -> Option<RecordSubmission> {
        if self.phase() != Phase::Conflict {
            return None;
        }
        let mut submission = self.pending.clone()?;
        submission.force_update = true;
        self.phase = Phase::Resubmitting;
        Some(submission)
    }

    /// The user declined the overwrite: back to `Idle`, record untouched,
    /// form contents kept for editing.
    pub fn decline_overwrite(&mut self) {
        if self.phase() == Phase::Conflict {
            self.pending = None;
            self.phase = Phase::Idle;
        }
    }

    /// Full reset (modal close, or dismissal after the success delay).
    pub fn reset(&mut self) {
        self.clear_form();
        self.errors.clear();
        self.message = None;
        self.pending = None;
        self.phase = Phase::Idle;
    }

    fn clear_form(&mut self) {
        self.month.clear();
        self.baseline.clear();
        self.consumption.clear();
        self.staging.clear();
        self.errors.clear();
    }
}
