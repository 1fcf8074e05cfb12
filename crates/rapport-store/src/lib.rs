//! rapport-store — Enrollment gallery, interaction aggregate, and the
//! SQLite mirror that makes edge totals durable across runs.

pub mod aggregate;
pub mod enrollment;
pub mod mirror;

pub use aggregate::{AggregateError, AggregationStore};
pub use enrollment::{load_roster, EnrollError, EnrollmentStore, RosterEntry};
pub use mirror::{Mirror, MirrorError};
