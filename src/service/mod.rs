//! Service layer
//!
//! Contains business logic separated from HTTP handlers.

mod note;

pub use note::{NewNote, NoteService};
