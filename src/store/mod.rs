//! Storage layer for modqueue.
//!
//! A subject's lifecycle state is the partition table it lives in:
//! - **flagged / confirmed / cleared / banned** tables per subject kind
//! - no row in any of them means the subject is unflagged
//!
//! # Example
//!
//! ```ignore
//! use modqueue::store::{Subject, SubjectKind, SubjectStore};
//!
//! let store = SubjectStore::open("/var/lib/modqueue/modqueue.db")?;
//! store.flag(SubjectKind::User, &Subject::new(42, "someone", 0.87, "scam links"))?;
//!
//! let (status, subject) = store.get(SubjectKind::User, 42)?.unwrap();
//! ```

mod records;
mod subject_store;

pub use records::{Subject, SubjectKind, SubjectStatus};
pub use subject_store::{DEFAULT_BUSY_TIMEOUT, SubjectStore};

pub(crate) use subject_store::{SUBJECT_COLUMNS, fetch, insert_subject, locate, row_to_subject};
