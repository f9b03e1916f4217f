//! Filesystem persistence: CI event files and the Lark token file.
//!
//! Both are written with temp file + fsync + rename + directory fsync, so a
//! concurrent reader never sees a partial file.

pub mod atomic;
pub mod events;
pub mod token;

pub use atomic::{WriteMode, write_atomic};
pub use events::{CiEventStore, StoreError, StoredEvent};
pub use token::{AccessToken, TokenStore};
