pub mod cache_storage;
pub mod control_channel;
pub mod disk;
pub mod download_manager;
pub mod fetcher;
pub mod object_store;
pub mod proxy;
