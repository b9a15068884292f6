pub mod commands;
pub mod error;
pub mod folder;

pub use commands::*;
pub use error::FolderError;
pub use folder::*;
