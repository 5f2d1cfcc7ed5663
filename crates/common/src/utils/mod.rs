//! Small helpers shared by the config structs of every Vigil crate.

pub mod serde;

pub use self::serde::{duration_millis, option_duration_millis};
