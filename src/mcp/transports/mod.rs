#[cfg(feature = "http")]
pub mod http;
pub mod stdio;
#[cfg(feature = "ws")]
pub mod ws;
