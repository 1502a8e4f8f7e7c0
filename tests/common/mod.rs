use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use custody::auth::jwt::JwtService;
use custody::config::AppConfig;
use custody::db;
use custody::permissions::{InMemoryCacheStore, Role, RoleSource, UserRoles};
use custody::repository::MemoryRepository;
use custody::routes;
use custody::state::{AppState, Repositories};
use custody::OrgId;
use http_body_util::BodyExt;
use serde::Serialize;
use serde_json::{json, Value};
use tower::util::ServiceExt;
use uuid::Uuid;

/// Role source counting upstream fetches per user. The delay widens the
/// window in which concurrent cache misses overlap.
pub struct FakeRoleSource {
    inner: Arc<MemoryRepository>,
    fetches: Mutex<HashMap<Uuid, usize>>,
    delay: Duration,
}

#[async_trait]
impl RoleSource for FakeRoleSource {
    async fn fetch_roles(&self, user_id: Uuid) -> Result<UserRoles> {
        {
            let mut fetches = self.fetches.lock().map_err(|_| anyhow!("poisoned"))?;
            *fetches.entry(user_id).or_default() += 1;
        }
        tokio::time::sleep(self.delay).await;
        self.inner.fetch_roles(user_id).await
    }
}

impl FakeRoleSource {
    pub fn fetches(&self, user_id: Uuid) -> usize {
        self.fetches
            .lock()
            .map(|fetches| fetches.get(&user_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct TestUser {
    pub id: Uuid,
    pub token: String,
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    repo: Arc<MemoryRepository>,
    roles: Arc<FakeRoleSource>,
    jwt: JwtService,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let config = AppConfig {
            database_url: "postgres://unused@localhost/custody".to_string(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            role_cache_ttl: Duration::from_secs(600),
            cors_allowed_origin: None,
        };

        let repo = Arc::new(MemoryRepository::default());
        let roles = Arc::new(FakeRoleSource {
            inner: repo.clone(),
            fetches: Mutex::new(HashMap::new()),
            delay: Duration::from_millis(25),
        });
        let role_source: Arc<dyn RoleSource> = roles.clone();
        let mut repos = Repositories::shared(repo.clone());
        repos.roles = role_source;

        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(
            config,
            jwt.clone(),
            repos,
            Arc::new(InMemoryCacheStore::default()),
        );
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            repo,
            roles,
            jwt,
        })
    }

    #[allow(dead_code)]
    pub fn repo(&self) -> Arc<MemoryRepository> {
        self.repo.clone()
    }

    #[allow(dead_code)]
    pub fn role_fetches(&self, user_id: Uuid) -> usize {
        self.roles.fetches(user_id)
    }

    /// A new user holding `role` in `org`.
    pub async fn user(&self, org: &str, role: Role) -> Result<TestUser> {
        let id = Uuid::new_v4();
        self.repo.grant(id, &OrgId::from(org), role).await;
        let token = self
            .jwt
            .generate_token(id, &format!("user-{org}"), chrono::Duration::minutes(30))?;
        Ok(TestUser { id, token })
    }

    /// Creates a waste form through the API and signs its emission.
    #[allow(dead_code)]
    pub async fn signed_waste_form(&self, emitter: &TestUser, fields: Value) -> Result<Uuid> {
        let id = self.waste_form(emitter, fields).await?;
        let response = self
            .post_json(
                &format!("/api/documents/{id}/sign"),
                &json!({ "checkpoint": "EMISSION" }),
                Some(&emitter.token),
            )
            .await?;
        anyhow::ensure!(
            response.status() == StatusCode::OK,
            "emission signature failed with status {}",
            response.status()
        );
        Ok(id)
    }

    #[allow(dead_code)]
    pub async fn waste_form(&self, creator: &TestUser, fields: Value) -> Result<Uuid> {
        let response = self
            .post_json(
                "/api/documents",
                &json!({ "family": "waste_form", "fields": fields }),
                Some(&creator.token),
            )
            .await?;
        anyhow::ensure!(
            response.status() == StatusCode::CREATED,
            "document creation failed with status {}",
            response.status()
        );
        let body = body_json(response.into_body()).await?;
        let id = body["document"]["id"]
            .as_str()
            .ok_or_else(|| anyhow!("document id missing"))?;
        Ok(Uuid::parse_str(id)?)
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PATCH, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PUT, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let builder = Request::builder().method(Method::DELETE).uri(path);
        let builder = if let Some(token) = token {
            builder.header("authorization", format!("Bearer {token}"))
        } else {
            builder
        };
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }
}

pub async fn body_json(body: Body) -> Result<Value> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    let bytes = collected.to_bytes();
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(&bytes)?)
}

/// Waste form values complete enough to sign the emission.
#[allow(dead_code)]
pub fn waste_form_fields(emitter: &str, transporter: &str, destination: &str) -> Value {
    json!({
        "emitterCompanySiret": emitter,
        "emitterCompanyName": "Acme",
        "emitterCompanyAddress": "1 rue de la Paix, Paris",
        "wasteCode": "16 06 01*",
        "wasteDescription": "lead batteries",
        "packagings": ["BENNE", "FUT"],
        "quantity": 1.5,
        "destinationCompanySiret": destination,
        "destinationPlannedOperationCode": "R 4",
        "transporterCompanySiret": transporter,
    })
}
