use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use eyre::{Context, Result};
use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::take_receiver;
use crate::{
    config::{loader::load_definitions, models::ApiDefinition},
    ports::definition_source::DefinitionSource,
};

/// Definitions read from the `apis` section of a local configuration file,
/// re-read whenever the file changes.
pub struct FileDefinitionSource {
    path: PathBuf,
    // kept alive for as long as the source exists
    _watcher: Option<notify::RecommendedWatcher>,
    update_tx: mpsc::Sender<()>,
    update_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl FileDefinitionSource {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let (tx, rx) = mpsc::channel(1);

        let mut source = Self {
            path: path.into(),
            _watcher: None,
            update_tx: tx,
            update_rx: Mutex::new(Some(rx)),
        };

        source.init_watcher()?;
        Ok(source)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_watcher(&mut self) -> Result<()> {
        let tx = self.update_tx.clone();
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| eyre::eyre!("Invalid definitions path: {}", self.path.display()))?
            .to_owned();

        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        if (event.kind.is_modify()
                            || event.kind.is_create()
                            || event.kind.is_remove())
                            && event
                                .paths
                                .iter()
                                .any(|p| p.file_name() == Some(&file_name))
                        {
                            tracing::debug!("Definitions file changed: {:?}", event.kind);
                            // a pending signal already covers this change
                            let _ = tx.try_send(());
                        }
                    }
                    Err(e) => tracing::error!("File watch error: {:?}", e),
                }
            })?;

        // watch the directory so editors that replace the file are seen
        let watch_dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        watcher
            .watch(watch_dir, RecursiveMode::NonRecursive)
            .wrap_err("Failed to watch definitions directory")?;

        self._watcher = Some(watcher);
        Ok(())
    }
}

#[async_trait]
impl DefinitionSource for FileDefinitionSource {
    async fn load_definitions(&self) -> Result<Vec<ApiDefinition>> {
        let path = self
            .path
            .to_str()
            .ok_or_else(|| eyre::eyre!("Invalid path: {}", self.path.display()))?;
        load_definitions(path).await
    }

    fn watch(&self) -> mpsc::Receiver<()> {
        take_receiver(&self.update_rx)
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::Write};

    use tempfile::tempdir;
    use tokio::time::{Duration, sleep};

    use super::*;

    fn write(path: &Path, content: &str) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }

    #[tokio::test]
    async fn test_file_definition_source() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("portico.yaml");

        write(
            &file_path,
            r#"
apis:
  - name: posts
    proxy:
      listen_path: "/posts/*"
      upstreams:
        targets:
          - target: "http://localhost:9000"
"#,
        )?;

        let source = FileDefinitionSource::new(&file_path)?;
        let apis = source.load_definitions().await?;
        assert_eq!(apis.len(), 1);
        assert_eq!(apis[0].proxy.listen_path, "/posts/*");

        let mut rx = source.watch();

        sleep(Duration::from_millis(100)).await;
        write(
            &file_path,
            r#"
apis:
  - name: posts
    proxy:
      listen_path: "/posts/*"
  - name: users
    proxy:
      listen_path: "/users/*"
"#,
        )?;

        let notification = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(notification.is_ok(), "Timed out waiting for change");
        assert!(
            notification.unwrap().is_some(),
            "Channel closed unexpectedly"
        );

        let apis = source.load_definitions().await?;
        assert_eq!(apis.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_second_watch_gets_closed_channel() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("portico.yaml");
        write(&file_path, "apis: []\n")?;

        let source = FileDefinitionSource::new(&file_path)?;
        let _first = source.watch();
        let mut second = source.watch();
        assert!(second.recv().await.is_none());
        Ok(())
    }
}
