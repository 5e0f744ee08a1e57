//! The form autofill pipeline: Field Discovery → Field Resolver →
//! Negotiation Controller → Submission State Machine, driven per attempt by
//! the session manager in `session`.

pub mod classifier;
pub mod discovery;
pub mod handlers;
pub mod heuristics;
pub mod models;
pub mod negotiation;
pub mod profile_fields;
pub mod records;
pub mod resolver;
pub mod retry;
pub mod session;
pub mod submission;
