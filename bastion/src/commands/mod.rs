pub mod check;
pub mod events;
pub mod run;
pub mod sweep;
pub mod unlock;
