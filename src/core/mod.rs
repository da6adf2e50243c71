pub mod config;
pub mod note;
pub mod paths;
pub mod store;
