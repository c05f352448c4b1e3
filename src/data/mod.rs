//! Data layer module
//!
//! - Repository traits consumed by the federation core
//! - SQLite implementation of those traits
//! - Domain models

mod database;
mod models;
mod repository;

pub use database::Database;
pub use models::*;
#[cfg(test)]
pub use repository::MockActorRepository;
pub use repository::{ActorRepository, FollowRepository, NoteRepository, Store};
