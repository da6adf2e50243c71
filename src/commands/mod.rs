pub mod index;
#[cfg(feature = "mcp")]
pub mod mcp;
pub mod search;
pub mod tags;
