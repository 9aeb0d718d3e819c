pub mod config;
pub mod media;
pub mod model;
pub mod slug;
pub mod source;
pub mod store;
pub mod sync;
