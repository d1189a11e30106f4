mod service;

pub use service::{LockoutPolicy, LockoutState};
