pub mod invalidate;
pub mod keys;
pub mod lru;
pub mod watch;
