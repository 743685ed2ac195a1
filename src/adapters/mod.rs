pub mod http;
pub mod local_storage;
pub mod sqlite;
pub mod watchlist;

pub use local_storage::LocalStorage;
pub use sqlite::{Database, DatabaseStats};
pub use watchlist::{NewWatchlistItem, Watchlist, WatchlistAlert, WatchlistItem, WatchlistManager};
