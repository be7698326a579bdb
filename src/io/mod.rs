pub mod crypto;
pub mod net;
pub mod progress;
