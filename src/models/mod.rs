pub mod error;
pub mod peer;
pub mod timezone;
pub mod wire;

pub use error::*;
pub use peer::*;
pub use timezone::*;
pub use wire::{SyncEntry, SyncMap};
