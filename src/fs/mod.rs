//! File system operations with rollback support.
//!
//! Each mutation is paired with its inverse and a private backup artifact so
//! a transaction participant can undo it later.

pub mod backup;
pub mod encoding;
pub mod operation;
pub mod primitives;
pub mod temp;

pub use backup::{DirectoryBackup, FileSnapshot};
pub use encoding::{Encoding, LINE_ENDING};
pub use operation::{AppliedOperation, Operation, OperationKind};
pub use temp::{Relocation, TempStore};
