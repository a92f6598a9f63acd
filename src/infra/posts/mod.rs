pub mod sqlite_post_store;

pub use sqlite_post_store::SqlitePostStore;
