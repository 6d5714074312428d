//! Everything around a sheet that makes it a document: configuration,
//! archive persistence, and the command session a shell drives.

mod archive;
mod commands;
mod config;
mod listing;
mod session;

pub use archive::*;
pub use commands::*;
pub use config::*;
pub use listing::*;
pub use session::*;
