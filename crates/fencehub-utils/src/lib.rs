mod assert;
mod bytebuf;

pub use bytebuf::{ByteBuf, CapacityExceeded};
