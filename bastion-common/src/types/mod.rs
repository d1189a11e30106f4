mod secret;

pub use secret::Secret;
use uuid::Uuid;

pub type UserId = Uuid;
