pub mod file;
pub mod http;

pub use file::FileDefinitionSource;
pub use http::HttpDefinitionSource;

use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;

/// Hand out the change receiver once; later callers get a closed channel.
fn take_receiver(slot: &Mutex<Option<mpsc::Receiver<()>>>) -> mpsc::Receiver<()> {
    slot.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
        .unwrap_or_else(|| {
            tracing::warn!("Definition source is already watched");
            mpsc::channel(1).1
        })
}
