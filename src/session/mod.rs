mod watcher;

pub use watcher::{SessionWatcher, DEFAULT_GRACE_WINDOW};
