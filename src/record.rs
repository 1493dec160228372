use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Attachment types accepted by the upload flow.
///
/// Anything outside this list is filtered out client-side before
/// submission and rejected server-side as a second line of defense.
pub const ALLOWED_MIME_TYPES: [&str; 7] = [
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/gif",
    "image/bmp",
    "image/webp",
    "application/pdf",
];

/// Maximum size of a single attachment in bytes (10 MiB).
pub const MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;

/// Maximum number of attachments on one record.
pub const MAX_ATTACHMENTS: usize = 10;

/// Check whether a MIME type is on the attachment allow-list.
pub fn is_allowed_mime(mime: &str) -> bool {
    ALLOWED_MIME_TYPES.contains(&mime)
}

/// Calendar month of a consumption record
///
/// Serialized as the full English month name ("January".."December"),
/// which is also the wire format of the `month` form field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Month {
    January,
    February,
    March,
    April,
    May,
    June,
    July,
    August,
    September,
    October,
    November,
    December,
}

/// All twelve months in calendar order, matching the selector options.
pub const MONTHS: [Month; 12] = [
    Month::January,
    Month::February,
    Month::March,
    Month::April,
    Month::May,
    Month::June,
    Month::July,
    Month::August,
    Month::September,
    Month::October,
    Month::November,
    Month::December,
];

impl Month {
    /// Full English name, as used on the wire and in the month selector.
    pub fn name(&self) -> &'static str {
        match self {
            Month::January => "January",
            Month::February => "February",
            Month::March => "March",
            Month::April => "April",
            Month::May => "May",
            Month::June => "June",
            Month::July => "July",
            Month::August => "August",
            Month::September => "September",
            Month::October => "October",
            Month::November => "November",
            Month::December => "December",
        }
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Month {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MONTHS
            .iter()
            .find(|m| m.name() == s)
            .copied()
            .ok_or_else(|| format!("Invalid month: {}", s))
    }
}

/// Metadata for an attachment persisted by the server
///
/// The bytes live on disk under the owner's attachment directory; the
/// record only carries this descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAttachment {
    /// Original file name as uploaded
    pub file_name: String,

    /// Name of the blob on disk (UUID-prefixed to avoid collisions)
    pub stored_name: String,

    /// Size in bytes
    pub size: u64,

    /// MIME type reported at upload time
    pub mime_type: String,
}

/// A monthly electricity consumption record
///
/// At most one record exists per (owner, month, year); overwriting an
/// existing record requires the forced-update path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumptionRecord {
    /// Username of the authenticated submitter (derived from the bearer
    /// token, never from form input)
    pub owner: String,

    /// Calendar month the record covers
    pub month: Month,

    /// Year the record covers (implicit current year at submission)
    pub year: i32,

    /// Monthly consumption baseline cost
    pub baseline_cost: f64,

    /// Monthly consumption in kWh
    pub consumption_kwh: f64,

    /// Supporting attachments, in upload order
    pub attachments: Vec<StoredAttachment>,

    /// When the record was first created
    pub created_at: DateTime<Utc>,

    /// When the record was last overwritten
    pub updated_at: DateTime<Utc>,
}

/// A client-side attachment pending submission
///
/// Held in memory by the staging set until the upload succeeds; the
/// (name, size) pair is the de-duplication key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAttachment {
    /// File name as selected
    pub name: String,

    /// Size in bytes
    pub size: u64,

    /// MIME type of the file
    pub mime_type: String,

    /// Raw file contents
    pub bytes: Vec<u8>,
}

impl PendingAttachment {
    pub fn new(name: &str, mime_type: &str, bytes: Vec<u8>) -> Self {
        PendingAttachment {
            name: name.to_string(),
            size: bytes.len() as u64,
            mime_type: mime_type.to_string(),
            bytes,
        }
    }

    /// De-duplication key: two selections of the same name and size are
    /// treated as the same file.
    pub fn dedup_key(&self) -> (&str, u64) {
        (&self.name, self.size)
    }
}
