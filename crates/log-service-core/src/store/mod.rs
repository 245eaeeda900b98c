//! Document store access.
//!
//! A single [`StoreClient`] is opened at startup and shared by every handler.
//! Documents are JSON bodies grouped into named [`Collection`]s inside one
//! SQLite database.

mod client;
mod collection;
mod options;

pub use client::StoreClient;
pub use collection::{Collection, Document};
pub use options::{Credentials, StoreLocation, StoreOptions};
