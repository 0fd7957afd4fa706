use async_trait::async_trait;
use eyre::Result;
use tokio::sync::mpsc;

use crate::config::models::ApiDefinition;

/// A repository of API definitions that can be loaded and watched.
#[async_trait]
pub trait DefinitionSource: Send + Sync {
    /// Load the full, current set of definitions.
    async fn load_definitions(&self) -> Result<Vec<ApiDefinition>>;

    /// Return a channel that signals when the definitions have changed.
    /// The receiver should trigger a rebuild by calling `load_definitions`.
    /// Only the first call returns a live receiver.
    fn watch(&self) -> mpsc::Receiver<()>;
}
