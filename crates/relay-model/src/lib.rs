//! relay-model
//!
//! Core types shared by every crate in the relay: the shard `Task`, the
//! decoded `Record` plus its `Meta`/`Pk`, and the closed vocabulary of
//! per-poll error kinds (`RelayError`).

pub mod error;
pub mod record;
pub mod task;

pub use error::RelayError;
pub use record::{Action, Meta, Pk, Record, RowSet};
pub use task::{Query, Task};
