mod message_util;

pub use message_util::*;
