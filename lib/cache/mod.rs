/// Cache eviction bookkeeping.
pub mod eviction;
/// Per-directory record containers.
pub mod folder;
/// Per-record-type tables of folders.
pub mod registry;
