use crate::record::{is_allowed_mime, PendingAttachment, MAX_ATTACHMENTS, MAX_ATTACHMENT_BYTES};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Result of staging a batch of candidate files
///
/// Rejections are advisory: the batch is never failed as a whole, the
/// acceptable files are kept and the rest reported back for display.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct AddOutcome {
    /// Number of files newly appended to the set
    pub added: usize,

    /// Candidates dropped for a disallowed MIME type
    pub rejected_type: Vec<String>,

    /// Candidates dropped for exceeding the per-file size limit
    pub rejected_size: Vec<String>,

    /// Candidates dropped because the set is at capacity
    pub rejected_count: Vec<String>,
}

impl AddOutcome {
    /// Advisory message for display, or `None` when nothing was dropped.
    pub fn advisory(&self) -> Option<String> {
        if !self.rejected_type.is_empty() {
            return Some("Only images and PDFs are allowed.".to_string());
        }
        if !self.rejected_size.is_empty() {
            return Some(format!(
                "Files larger than {} MB are not allowed.",
                MAX_ATTACHMENT_BYTES / (1024 * 1024)
            ));
        }
        if !self.rejected_count.is_empty() {
            return Some(format!("At most {} attachments per record.", MAX_ATTACHMENTS));
        }
        None
    }
}

/// A transient display handle for one staged file
///
/// Stands in for a browser object URL: a scarce resource that must be
/// released when the preview closes or is replaced. Release happens in
/// `Drop`, so it is guaranteed on every exit path, including staging
/// set teardown.
#[derive(Debug)]
pub struct PreviewHandle {
    name: String,
    mime_type: String,
    uri: String,
    live: Arc<AtomicUsize>,
}

impl PreviewHandle {
    fn acquire(file: &PendingAttachment, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        PreviewHandle {
            name: file.name.clone(),
            mime_type: file.mime_type.clone(),
            uri: format!("preview://{}", Uuid::new_v4()),
            live,
        }
    }

    /// Name of the previewed file
    pub fn name(&self) -> &str {
        &self.name
    }

    /// MIME type of the previewed file
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Opaque display URI for the host UI
    pub fn uri(&self) -> &str {
        &self.uri
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory set of attachments pending submission
///
/// Candidates are filtered to the MIME allow-list and de-duplicated by
/// (name, size); insertion order is preserved. At most one preview
/// handle is live at a time.
#[derive(Debug, Default)]
pub struct StagingSet {
    files: Vec<PendingAttachment>,
    preview: Option<PreviewHandle>,
    live_previews: Arc<AtomicUsize>,
}

impl StagingSet {
    pub fn new() -> Self {
        StagingSet::default()
    }

    /// Stage a batch of candidate files
    ///
    /// Filters by MIME type and size, drops exact duplicates by
    /// (name, size) against both the existing set and the batch itself,
    /// and appends the survivors in order. Already-staged files keep
    /// their positions.
    pub fn add(&mut self, candidates: Vec<PendingAttachment>) -> AddOutcome {
        let mut outcome = AddOutcome::default();

        for candidate in candidates {
            if !is_allowed_mime(&candidate.mime_type) {
                outcome.rejected_type.push(candidate.name);
                continue;
            }
            if candidate.bytes.len() > MAX_ATTACHMENT_BYTES {
                outcome.rejected_size.push(candidate.name);
                continue;
            }
            if self
                .files
                .iter()
                .any(|f| f.dedup_key() == candidate.dedup_key())
            {
                continue;
            }
            if self.files.len() >= MAX_ATTACHMENTS {
                outcome.rejected_count.push(candidate.name);
                continue;
            }
            self.files.push(candidate);
            outcome.added += 1;
        }

        outcome
    }

    /// Remove one staged file by position; ignored when out of range.
    pub fn remove(&mut self, index: usize) {
        if index < self.files.len() {
            self.files.remove(index);
        }
    }

    /// Open a preview for the staged file at `index`
    ///
    /// Any previous preview handle is released first, so there is never
    /// more than one live handle. Returns `None` when out of range.
    pub fn preview(&mut self, index: usize) -> Option<&PreviewHandle> {
        // Drop the old handle before acquiring the new one.
        self.preview = None;
        let file = self.files.get(index)?;
        self.preview = Some(PreviewHandle::acquire(file, self.live_previews.clone()));
        self.preview.as_ref()
    }

    /// Close the current preview, if any.
    pub fn close_preview(&mut self) {
        self.preview = None;
    }

    /// Discard all staged files and any active preview (modal reset).
    pub fn clear(&mut self) {
        self.preview = None;
        self.files.clear();
    }

    pub fn files(&self) -> &[PendingAttachment] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Number of live preview handles; at most 1 unless a handle leaked.
    pub fn live_preview_count(&self) -> usize {
        self.live_previews.load(Ordering::SeqCst)
    }

    /// Take ownership of the staged files (successful submission path).
    pub fn take_files(&mut self) -> Vec<PendingAttachment> {
        self.preview = None;
        std::mem::take(&mut self.files)
    }
}
