// End-to-end proxying through a real upstream and the hyper client adapter
use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{Json, Router, extract::Request, routing::get};
use portico::{
    GatewayService, HttpClientAdapter, HttpHandler,
    adapters::{MetricsStatsClient, builtin_plugins},
    config::{ApiDefinition, Definition, PluginConfig, ProxyConfig, Target},
    core::ProxyContext,
};
use reqwest::{StatusCode, header};
use serde_json::{Value, json};
use tokio::net::TcpListener;

async fn echo(req: Request) -> Json<Value> {
    let headers: serde_json::Map<String, Value> = req
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                json!(value.to_str().unwrap_or_default()),
            )
        })
        .collect();
    Json(json!({
        "method": req.method().as_str(),
        "path": req.uri().path(),
        "query": req.uri().query(),
        "headers": headers,
    }))
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

async fn upstream() -> SocketAddr {
    let app = Router::new()
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                "late"
            }),
        )
        .fallback(echo);
    spawn(app).await
}

async fn gateway_with(proxy: &ProxyConfig, apis: &[ApiDefinition]) -> SocketAddr {
    let context = ProxyContext::new(
        Arc::new(HttpClientAdapter::new(proxy).unwrap()),
        Arc::new(MetricsStatsClient::new()),
    );
    let gateway = Arc::new(GatewayService::new(context, builtin_plugins()));
    gateway.reload(apis).unwrap();

    spawn(Router::new().fallback_service(HttpHandler::new(gateway))).await
}

async fn gateway(apis: &[ApiDefinition]) -> SocketAddr {
    gateway_with(&ProxyConfig::default(), apis).await
}

fn api(name: &str, definition: Definition) -> ApiDefinition {
    ApiDefinition::new(name, definition)
}

async fn fetch(url: String) -> Value {
    let response = reqwest::get(url).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response.json().await.unwrap()
}

#[tokio::test]
async fn test_strip_path_merges_queries() {
    let up = upstream().await;
    let mut definition =
        Definition::new("/posts/*").with_target(Target::new(format!("http://{up}/api?src=gw")));
    definition.strip_path = true;
    let gw = gateway(&[api("posts", definition)]).await;

    let echoed = fetch(format!("http://{gw}/posts/1?x=1")).await;
    assert_eq!(echoed["path"], "/api/1");
    assert_eq!(echoed["query"], "src=gw&x=1");
    assert_eq!(echoed["method"], "GET");
}

#[tokio::test]
async fn test_path_params_are_interpolated() {
    let up = upstream().await;
    let mut definition = Definition::new("/users/{id}/*")
        .with_target(Target::new(format!("http://{up}/accounts/{{id}}")));
    definition.strip_path = true;
    let gw = gateway(&[api("users", definition)]).await;

    let echoed = fetch(format!("http://{gw}/users/42/orders")).await;
    assert_eq!(echoed["path"], "/accounts/42/orders");
}

#[tokio::test]
async fn test_append_path() {
    let up = upstream().await;
    let mut definition =
        Definition::new("/hello/*").with_target(Target::new(format!("http://{up}/greet")));
    definition.append_path = true;
    let gw = gateway(&[api("hello", definition)]).await;

    let echoed = fetch(format!("http://{gw}/hello/world")).await;
    assert_eq!(echoed["path"], "/greet/world");
}

#[tokio::test]
async fn test_target_path_used_unchanged_without_flags() {
    let up = upstream().await;
    let definition =
        Definition::new("/fixed/*").with_target(Target::new(format!("http://{up}/landing")));
    let gw = gateway(&[api("fixed", definition)]).await;

    let echoed = fetch(format!("http://{gw}/fixed/anything/at/all")).await;
    assert_eq!(echoed["path"], "/landing");
}

#[tokio::test]
async fn test_forwarding_headers() {
    let up = upstream().await;
    let mut definition = Definition::new("/h/*").with_target(Target::new(format!("http://{up}")));
    definition.strip_path = true;
    let gw = gateway(&[api("h", definition)]).await;

    let echoed = fetch(format!("http://{gw}/h/x")).await;
    let headers = &echoed["headers"];
    assert_eq!(headers["host"], up.to_string());
    assert_eq!(headers["x-forwarded-for"], "127.0.0.1");
    assert_eq!(headers["x-forwarded-host"], gw.to_string());
    assert_eq!(headers["x-forwarded-proto"], "http");
}

#[tokio::test]
async fn test_preserve_host() {
    let up = upstream().await;
    let mut definition = Definition::new("/p/*").with_target(Target::new(format!("http://{up}")));
    definition.preserve_host = true;
    let gw = gateway(&[api("p", definition)]).await;

    let response = reqwest::Client::new()
        .get(format!("http://{gw}/p/x"))
        .header(header::HOST, "api.example.com")
        .send()
        .await
        .unwrap();
    let echoed: Value = response.json().await.unwrap();
    assert_eq!(echoed["headers"]["host"], "api.example.com");
}

#[tokio::test]
async fn test_host_filter() {
    let up = upstream().await;
    let mut definition =
        Definition::new("/only/*").with_target(Target::new(format!("http://{up}")));
    definition.hosts = vec!["api.example.com".to_string()];
    let gw = gateway(&[api("only", definition)]).await;

    let client = reqwest::Client::new();
    let allowed = client
        .get(format!("http://{gw}/only/x"))
        .header(header::HOST, "API.example.com:8080")
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);

    let denied = client
        .get(format!("http://{gw}/only/x"))
        .header(header::HOST, "other.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_method_not_allowed() {
    let up = upstream().await;
    let definition = Definition::new("/ro")
        .with_target(Target::new(format!("http://{up}")))
        .with_methods(["GET"]);
    let gw = gateway(&[api("ro", definition)]).await;

    let response = reqwest::Client::new()
        .post(format!("http://{gw}/ro"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[header::ALLOW], "GET");

    let unknown = reqwest::get(format!("http://{gw}/nowhere")).await.unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    let body: Value = unknown.json().await.unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_weighted_balancing_only_reaches_weighted_targets() {
    let first = upstream().await;
    let second = upstream().await;
    let definition = Definition::new("/lb")
        .with_target(Target::weighted(format!("http://{first}"), 1))
        .with_target(Target::weighted(format!("http://{second}"), 0))
        .with_balancing("weight");
    let gw = gateway(&[api("lb", definition)]).await;

    for _ in 0..5 {
        let echoed = fetch(format!("http://{gw}/lb")).await;
        assert_eq!(echoed["headers"]["host"], first.to_string());
    }
}

#[tokio::test]
async fn test_round_robin_alternates() {
    let first = upstream().await;
    let second = upstream().await;
    let definition = Definition::new("/rr")
        .with_target(Target::new(format!("http://{first}")))
        .with_target(Target::new(format!("http://{second}")))
        .with_balancing("roundrobin");
    let gw = gateway(&[api("rr", definition)]).await;

    let a = fetch(format!("http://{gw}/rr")).await;
    let b = fetch(format!("http://{gw}/rr")).await;
    assert_ne!(a["headers"]["host"], b["headers"]["host"]);
}

#[tokio::test]
async fn test_plugins_transform_request_and_response() {
    let up = upstream().await;
    let definition = Definition::new("/plug").with_target(Target::new(format!("http://{up}")));
    let gw = gateway(&[api("plug", definition)
        .with_plugin(PluginConfig::new("request_id", Value::Null))
        .with_plugin(PluginConfig::new(
            "request_headers",
            json!({"add": {"x-gateway": "portico"}, "remove": ["x-secret"]}),
        ))
        .with_plugin(PluginConfig::new(
            "response_headers",
            json!({"add": {"x-served-by": "portico"}}),
        ))])
    .await;

    let response = reqwest::Client::new()
        .get(format!("http://{gw}/plug"))
        .header("x-secret", "hunter2")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-served-by"], "portico");
    let request_id = response.headers()["x-request-id"]
        .to_str()
        .unwrap()
        .to_string();

    let echoed: Value = response.json().await.unwrap();
    let headers = &echoed["headers"];
    assert_eq!(headers["x-gateway"], "portico");
    assert!(headers.get("x-secret").is_none());
    assert_eq!(headers["x-request-id"], request_id.as_str());
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    let definition = Definition::new("/down").with_target(Target::new("http://127.0.0.1:9"));
    let gw = gateway(&[api("down", definition)]).await;

    let response = reqwest::get(format!("http://{gw}/down")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_empty_upstream_list_is_bad_gateway() {
    let gw = gateway(&[api("empty", Definition::new("/empty"))]).await;

    let response = reqwest::get(format!("http://{gw}/empty")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_slow_upstream_is_gateway_timeout() {
    let up = upstream().await;
    let definition = Definition::new("/slow").with_target(Target::new(format!("http://{up}/slow")));
    let proxy = ProxyConfig {
        upstream_timeout: "200ms".to_string(),
        ..ProxyConfig::default()
    };
    let gw = gateway_with(&proxy, &[api("slow", definition)]).await;

    let response = reqwest::get(format!("http://{gw}/slow")).await.unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}
