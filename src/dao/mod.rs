/// Device-scoped key-value cache surviving restarts.
pub mod local_cache;
/// Serializable entities shared by cache and store backends.
pub mod models;
/// Shared remote score store and its backends.
pub mod score_store;
/// Storage abstraction layer for database operations.
pub mod storage;
