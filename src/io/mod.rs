pub mod bio;
pub mod buf;

pub use bio::{BcacheStats, BufferCache, BufferPin, ExclusiveBuffer};
pub use buf::BlockKey;
