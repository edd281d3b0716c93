//! Context source adapters.

pub mod directory;

pub use directory::DirectoryContextSource;
