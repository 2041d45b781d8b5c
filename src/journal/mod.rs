//! The durable journal: every other component treats this as the source of
//! truth for crash recovery, never an optional side effect.

mod schema;
mod store;

pub use schema::Schema;
pub use store::Journal;
