/*!
# Wattlog

An internal web application for utility-consumption reporting, built in Rust.

## Overview

Authenticated users upload monthly electricity usage records — the month,
a baseline cost, and the consumption in kWh — together with supporting
file attachments (images or PDFs). A record is unique per user, month and
year; submitting a month that already has a record triggers a
confirmation step, and only an explicitly confirmed resubmission
overwrites the stored data.

## Architecture

The crate contains both halves of the flow:

### Client workflow
- **Validator** - pure field validation shared with the server
- **File Staging Set** - pending attachments with MIME filtering,
  (name, size) de-duplication, and RAII preview handles
- **Upload Client** - builds the multipart submission and sends it over
  a tower service with a bearer token
- **Conflict Resolver** - an explicit state machine
  (Idle → Submitting → Success/Conflict/Failed, with a confirmed
  Resubmitting path) that performs no IO itself

### Server
- **Record Endpoint** - `POST /api/electricity` multipart handler with
  duplicate-month detection and confirmed overwrite
- **Record Store** - file-backed JSON store; the existence check and
  the mutation happen under one write lock, so the upsert is atomic
- **Auth** - Argon2-hashed users, UUID bearer tokens, and a middleware
  that rejects unauthenticated requests before business logic

## Modules

- **record**: data model (months, records, attachments, upload policy)
- **validate**: field validation rules and the decimal input mask
- **staging**: client-side attachment staging set
- **workflow**: the upload/conflict state machine
- **client**: multipart upload client
- **store**: server-side record persistence
- **auth**: users, bearer tokens, auth middleware and handlers
- **app**: router, record endpoint, server bootstrap

## REST API Endpoints

- `POST /api/auth/login` - verify credentials, issue a bearer token
- `POST /api/auth/register` - create a user
- `POST /api/electricity` - submit a monthly record (multipart,
  bearer token required); answers `{success}`,
  `{exists: true, success: false}`, or `{success: false, message}`
- `GET /api/electricity` - list the caller's records
*/

// Re-export all modules so they appear in the documentation
pub mod app;
pub mod auth;
pub mod client;
pub mod record;
pub mod staging;
pub mod store;
pub mod validate;
pub mod workflow;

/// Re-export the central types to make the crate easier to use
pub use client::{RecordSubmission, UploadResponse};
pub use record::{ConsumptionRecord, Month, PendingAttachment};
pub use staging::StagingSet;
pub use store::{RecordStore, UpsertOutcome};
pub use workflow::{Phase, UploadWorkflow};
