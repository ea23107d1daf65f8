pub mod contexts;
pub mod events;
pub mod sessions;
