pub mod backup;
pub mod config;
pub mod download;
pub mod error;
pub mod health;
pub mod index;
pub mod logging;
pub mod object_store;
pub mod range_stream;
pub mod upload;
pub mod url_refresh;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use object_store::test_double::InMemoryChatStore;
