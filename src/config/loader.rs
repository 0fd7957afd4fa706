use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::{ApiDefinition, ServerConfig};

/// Load configuration from a file using the config crate
/// Supports multiple formats: YAML, JSON, TOML.
pub async fn load_config(config_path: &str) -> Result<ServerConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: &str) -> Result<ServerConfig> {
    let config_path = Path::new(config_path);

    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Yaml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let server_config: ServerConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(server_config)
}

/// Load only the API definitions section of a configuration file.
pub async fn load_definitions(config_path: &str) -> Result<Vec<ApiDefinition>> {
    Ok(load_config(config_path).await?.apis)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[tokio::test]
    async fn test_load_yaml_config() {
        let yaml_content = r#"
listen_addr: "127.0.0.1:3000"
log:
  level: debug
  format: pretty
apis:
  - name: posts
    proxy:
      listen_path: "/posts/*"
      strip_path: true
      upstreams:
        balancing: weight
        targets:
          - target: "http://backend:8080/posts"
            weight: 10
    plugins:
      - name: request_id
"#;

        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:3000");
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.apis.len(), 1);
        let proxy = &config.apis[0].proxy;
        assert!(proxy.strip_path);
        assert_eq!(proxy.upstreams.balancing, "weight");
        assert_eq!(proxy.upstreams.targets[0].weight, 10);
        assert_eq!(config.apis[0].plugins[0].name, "request_id");
    }

    #[tokio::test]
    async fn test_load_json_config() {
        let json_content = r#"
{
  "listen_addr": "127.0.0.1:3000",
  "proxy": { "upstream_timeout": "5s" },
  "apis": [
    {
      "name": "users",
      "proxy": {
        "listen_path": "/users/{id}",
        "methods": ["GET"],
        "upstreams": { "targets": [{ "target": "http://backend:8080/u/{id}" }] }
      }
    }
  ]
}
"#;

        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, "{}", json_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:3000");
        assert_eq!(config.proxy.upstream_timeout, "5s");
        assert_eq!(config.apis[0].proxy.methods, vec!["GET".to_string()]);
    }

    #[tokio::test]
    async fn test_load_definitions_only() {
        let toml_content = r#"
listen_addr = "127.0.0.1:3000"

[[apis]]
name = "echo"
[apis.proxy]
listen_path = "/echo"
[[apis.proxy.upstreams.targets]]
target = "http://localhost:9000"
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let apis = load_definitions(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(apis.len(), 1);
        assert_eq!(apis[0].proxy.listen_path, "/echo");
    }
}
