pub mod resolution_guard;

pub use resolution_guard::{current_thread, Entry, OwnerToken, ResolutionGuard};
