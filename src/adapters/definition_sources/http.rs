use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use eyre::{Context, Result};
use reqwest::Client;
use tokio::sync::mpsc;

use super::take_receiver;
use crate::{config::models::ApiDefinition, ports::definition_source::DefinitionSource};

/// Definitions fetched from an HTTP endpoint returning a JSON array of API
/// definitions. The endpoint is polled and a change is signalled whenever the
/// returned document differs from the last one seen, whether it was seen by
/// the poller or by [`DefinitionSource::load_definitions`].
pub struct HttpDefinitionSource {
    url: String,
    client: Client,
    last_hash: Arc<Mutex<Option<u64>>>,
    update_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

fn digest(body: &Bytes) -> u64 {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    hasher.finish()
}

impl HttpDefinitionSource {
    /// Create the source and start polling. The first poll happens one
    /// interval after creation. Must be called within a Tokio runtime.
    pub fn new(url: String, poll_interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        let last_hash = Arc::new(Mutex::new(None));

        let source = Self {
            url: url.clone(),
            client: client.clone(),
            last_hash: last_hash.clone(),
            update_rx: Mutex::new(Some(rx)),
        };

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + poll_interval;
            let mut interval = tokio::time::interval_at(start, poll_interval);

            loop {
                interval.tick().await;
                if tx.is_closed() {
                    break;
                }

                match Self::fetch(&client, &url).await {
                    Ok(body) => {
                        let hash = digest(&body);
                        let previous = last_hash
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .replace(hash);
                        if previous.is_some_and(|last| last != hash) {
                            tracing::info!(url = %url, "Remote definitions changed");
                            let _ = tx.try_send(());
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to poll remote definitions: {:#}", e);
                    }
                }
            }
        });

        source
    }

    async fn fetch(client: &Client, url: &str) -> Result<Bytes> {
        let response = client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?
            .error_for_status()
            .context("Definitions endpoint returned an error")?;
        response
            .bytes()
            .await
            .context("Failed to read definitions body")
    }
}

#[async_trait]
impl DefinitionSource for HttpDefinitionSource {
    async fn load_definitions(&self) -> Result<Vec<ApiDefinition>> {
        let body = Self::fetch(&self.client, &self.url).await?;
        let apis = serde_json::from_slice(&body).context("Failed to parse definitions JSON")?;
        *self
            .last_hash
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(digest(&body));
        Ok(apis)
    }

    fn watch(&self) -> mpsc::Receiver<()> {
        take_receiver(&self.update_rx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{Json, Router, routing::get};
    use tokio::net::TcpListener;

    use super::*;
    use crate::config::models::Definition;

    type SharedApis = Arc<std::sync::Mutex<Vec<ApiDefinition>>>;

    async fn serve_definitions(state: SharedApis) -> Result<String> {
        let app = Router::new().route(
            "/apis",
            get(move || async move {
                let apis = state.lock().unwrap().clone();
                Json(apis)
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Ok(format!("http://{addr}/apis"))
    }

    fn posts() -> SharedApis {
        Arc::new(std::sync::Mutex::new(vec![ApiDefinition::new(
            "posts",
            Definition::new("/posts/*"),
        )]))
    }

    #[tokio::test]
    async fn test_http_definition_source() -> Result<()> {
        let state = posts();
        let url = serve_definitions(state.clone()).await?;
        let source = HttpDefinitionSource::new(url, Duration::from_millis(100));

        let apis = source.load_definitions().await?;
        assert_eq!(apis.len(), 1);
        assert_eq!(apis[0].name, "posts");

        let mut rx = source.watch();

        // let the poller see the unchanged document first
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(rx.try_recv().is_err(), "Unchanged document was signalled");

        state
            .lock()
            .unwrap()
            .push(ApiDefinition::new("users", Definition::new("/users/*")));

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
    async fn test_change_right_after_initial_load_is_signalled() -> Result<()> {
        let state = posts();
        let url = serve_definitions(state.clone()).await?;
        let source = HttpDefinitionSource::new(url, Duration::from_millis(200));
        let mut rx = source.watch();

        assert_eq!(source.load_definitions().await?.len(), 1);
        state
            .lock()
            .unwrap()
            .push(ApiDefinition::new("users", Definition::new("/users/*")));

        let notification = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(
            matches!(notification, Ok(Some(()))),
            "Change after the initial load was not signalled"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_to_load() {
        let source = HttpDefinitionSource::new(
            "http://127.0.0.1:9/apis".to_string(),
            Duration::from_secs(60),
        );
        assert!(source.load_definitions().await.is_err());
    }
}
