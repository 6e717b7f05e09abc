pub mod error;
pub mod fuzzy;

pub use error::DocumentError;
