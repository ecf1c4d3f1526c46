use anyhow::{Context, Result};
use std::thread::{self, JoinHandle};

/// Spawn a named OS thread for a long-running loop
pub fn spawn_thread<F>(name: &str, func: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(func)
        .with_context(|| format!("Failed to spawn thread {name}"))
}

/// Join a loop thread, logging instead of propagating a panic
pub fn join_thread(name: &str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        log::error!("Thread {name} panicked");
    }
}
