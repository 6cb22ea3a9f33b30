//! Session-scoped stores: the bounded event cache and the profile cache.

pub mod event;
pub mod profile;

pub use event::{EventRepository, ExportDocument};
pub use profile::ProfileRepository;
