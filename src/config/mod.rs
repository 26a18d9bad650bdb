//! Configuration
//!
//! Settings live in a TOML file. Every field has a default, so a partial file
//! (or none at all) is valid.

mod schema;
pub mod store;

pub use schema::*;
pub use store::load;
