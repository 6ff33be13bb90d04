pub mod codec;
pub mod fields;
pub mod protocol;
pub mod session;
