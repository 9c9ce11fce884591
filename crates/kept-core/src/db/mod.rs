//! Database layer for Kept

mod connection;
mod migrations;
mod record;
mod repository;

pub use connection::{Database, ReadConnection, WriteTransaction};
pub use record::Record;
pub use repository::EntityRepository;
