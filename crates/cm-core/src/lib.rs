//! cardmedia/crates/cm-core/src/lib.rs
//!
//! Domain models, the error taxonomy, and the port traits of the card media store.

pub mod error;
pub mod models;
pub mod payload;
pub mod traits;

// Re-exporting for easier access in other crates
pub use error::*;
pub use models::*;
pub use payload::*;
pub use traits::*;
