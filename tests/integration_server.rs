use anyhow::{Context, Result, ensure};
use itemkeep::{
    admission::{AdmissionConfig, AdmissionController},
    api::{self, APP_USER_AGENT, AdmissionGate},
    auth::{
        CredentialHasher, HashingConfig, IdentityStore, MemoryIdentityStore,
        SessionAuthenticator, TokenCodec, TokenConfig,
    },
    items::MemoryItemStore,
};
use reqwest::{Client, StatusCode, header};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, task::JoinHandle};

const SECRET: &str = "integration-secret-that-is-long-enough";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
}

#[derive(Debug, Deserialize)]
struct ItemBody {
    title: String,
    is_done: bool,
}

#[derive(Debug, Deserialize)]
struct Detail {
    detail: String,
}

struct TestServer {
    base_url: String,
    client: Client,
    handle: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl TestServer {
    async fn start(max_calls: usize) -> Result<Self> {
        let store: Arc<dyn IdentityStore> = Arc::new(MemoryIdentityStore::new());
        let config = TokenConfig::new(SecretString::from(SECRET.to_string()), "HS256")?;
        let hasher = CredentialHasher::new(
            HashingConfig::new()
                .with_memory_kib(8)
                .with_iterations(1)
                .with_parallelism(1),
        )?;
        let authenticator = SessionAuthenticator::new(store, TokenCodec::new(&config), hasher);
        let admission = AdmissionController::new(AdmissionConfig::new(
            max_calls,
            Duration::from_secs(60),
            1_000,
        )?);

        let app = api::app(
            Arc::new(authenticator),
            Arc::new(MemoryItemStore::new()),
            AdmissionGate::new(Arc::new(admission)),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            let _ = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await;
        });

        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            base_url: format!("http://{addr}"),
            client,
            handle,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn login(&self, username: &str, password: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .post(self.url("/token"))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(format!("username={username}&password={password}"))
            .send()
            .await?)
    }

    async fn refresh(&self, token: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .get(self.url("/login"))
            .bearer_auth(token)
            .send()
            .await?)
    }
}

async fn token_from(response: reqwest::Response) -> Result<String> {
    let status = response.status();
    ensure!(status == StatusCode::OK, "unexpected status {status}");
    let body: TokenResponse = response.json().await.context("token response body")?;
    ensure!(body.token_type == "bearer", "token_type was {}", body.token_type);
    Ok(body.access_token)
}

#[tokio::test]
async fn session_lifecycle_over_http() -> Result<()> {
    let server = TestServer::start(100).await?;

    let health = server.client.get(server.url("/health")).send().await?;
    ensure!(health.status() == StatusCode::OK);
    ensure!(health.headers().contains_key("x-request-id"));

    let registered = server
        .client
        .post(server.url("/register"))
        .json(&json!({
            "username": "alice",
            "email": "alice@example.com",
            "password": "correct-horse",
        }))
        .send()
        .await?;
    token_from(registered).await?;

    let old = token_from(server.login("alice@example.com", "correct-horse").await?).await?;
    let refreshed = token_from(server.refresh(&old).await?).await?;

    let changed = server
        .client
        .put(server.url("/user/modify"))
        .bearer_auth(&refreshed)
        .json(&json!({ "password": "battery-staple" }))
        .send()
        .await?;
    let new = token_from(changed).await?;

    for stale in [&old, &refreshed] {
        let response = server.refresh(stale).await?;
        ensure!(response.status() == StatusCode::UNAUTHORIZED);
        let body: Detail = response.json().await?;
        ensure!(body.detail == "Could not validate user. Invalid token version.");
    }

    token_from(server.refresh(&new).await?).await?;

    let wrong = server.login("alice@example.com", "correct-horse").await?;
    ensure!(wrong.status() == StatusCode::UNAUTHORIZED);
    token_from(server.login("alice@example.com", "battery-staple").await?).await?;

    Ok(())
}

#[tokio::test]
async fn items_stay_with_their_owner_over_http() -> Result<()> {
    let server = TestServer::start(100).await?;

    let mut tokens = Vec::new();
    for (name, email) in [("alice", "alice@example.com"), ("bob", "bob@example.com")] {
        let registered = server
            .client
            .post(server.url("/register"))
            .json(&json!({ "username": name, "email": email, "password": "pw" }))
            .send()
            .await?;
        tokens.push(token_from(registered).await?);
    }
    let (alice, bob) = (&tokens[0], &tokens[1]);

    let created = server
        .client
        .post(server.url("/items"))
        .bearer_auth(alice)
        .json(&json!({ "title": "groceries" }))
        .send()
        .await?;
    ensure!(created.status() == StatusCode::OK);

    let done = server
        .client
        .put(server.url("/items/modify"))
        .bearer_auth(alice)
        .json(&json!({ "id": 0, "is_done": true }))
        .send()
        .await?;
    ensure!(done.status() == StatusCode::OK);
    let item: ItemBody = done.json().await?;
    ensure!(item.title == "groceries" && item.is_done);

    let foreign = server
        .client
        .get(server.url("/items/0"))
        .bearer_auth(bob)
        .send()
        .await?;
    ensure!(foreign.status() == StatusCode::NOT_FOUND);

    let listed: Vec<ItemBody> = server
        .client
        .get(server.url("/items"))
        .bearer_auth(alice)
        .send()
        .await?
        .json()
        .await?;
    ensure!(listed.len() == 1, "alice has {} items", listed.len());

    Ok(())
}

#[tokio::test]
async fn admission_limit_over_http() -> Result<()> {
    let server = TestServer::start(3).await?;

    for _ in 0..3 {
        let response = server.client.get(server.url("/health")).send().await?;
        ensure!(response.status() == StatusCode::OK);
    }

    let denied = server.client.get(server.url("/health")).send().await?;
    ensure!(denied.status() == StatusCode::TOO_MANY_REQUESTS);

    let retry_after: u64 = denied
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .context("missing Retry-After header")?;
    ensure!((1..=60).contains(&retry_after), "Retry-After was {retry_after}");

    let body: Detail = denied.json().await?;
    ensure!(body.detail.starts_with("Rate limit exceeded. Retry after"));

    Ok(())
}
