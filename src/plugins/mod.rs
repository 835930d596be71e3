pub mod artifacts;
pub mod claims;
pub mod decisions;
pub mod events;
pub mod hooks;
pub mod session;
