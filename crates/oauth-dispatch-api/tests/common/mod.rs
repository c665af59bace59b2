//! Shared test infrastructure for oauth-dispatch integration tests.
//!
//! These tests require a running PostgreSQL instance. Set DATABASE_URL and run:
//!   `cargo test -p oauth-dispatch-api -- --ignored --test-threads=1`
//!
//! Tests are #[ignore]d by default so `cargo test` doesn't require a live database.
//!
//! Tests run serially (--test-threads=1) to avoid DB state conflicts.
//! A single shared tokio runtime and Axum server are used across all tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

pub use chrono;
pub use oauth_dispatch_core::db;
pub use reqwest::{Client, StatusCode};
pub use serde_json;
pub use url;

use oauth_dispatch_api::routes;
use oauth_dispatch_api::server::AppState;
use oauth_dispatch_core::config::{
    Config, ConfigValue, DatabaseConfig, FeaturesConfig, MaintenanceConfig, ScopeDefinition,
    ScopesConfig, ServerConfig, TokensConfig,
};
use oauth_dispatch_core::{password, token};
use sqlx::PgPool;
use tokio::net::TcpListener;

pub const REDIRECT_URI: &str = "https://app.example.com/callback";
pub const PASSWORD: &str = "correct horse battery staple";

pub const PROFILE_DESCRIPTION: &str = "Know your name and username.";
pub const EMAIL_DESCRIPTION: &str = "Know your email address.";

static RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
static SERVER: OnceLock<TestServer> = OnceLock::new();

pub fn runtime() -> &'static tokio::runtime::Runtime {
    RT.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("failed to create tokio runtime")
    })
}

pub fn server() -> &'static TestServer {
    SERVER.get_or_init(|| runtime().block_on(TestServer::init()))
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub db: PgPool,
    pub config: Arc<Config>,
}

/// Registration options for a test application.
#[derive(Default)]
pub struct AppOptions<'a> {
    pub public: bool,
    pub restricted: bool,
    pub skip_authorization: bool,
    pub grant_scopes: &'a [&'a str],
    /// Registered redirect URIs; [`REDIRECT_URI`] alone when empty.
    pub redirect_uris: &'a [&'a str],
}

pub struct TestApp {
    pub application: db::Application,
    pub client_id: String,
    pub client_secret: Option<String>,
}

impl TestServer {
    async fn init() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set for integration tests");

        let db_config = DatabaseConfig {
            url: ConfigValue::Literal(database_url),
            max_connections: 10,
            schema: None,
        };

        let pool = db::connect(&db_config)
            .await
            .expect("failed to connect to database");
        db::migrate(&pool).await.expect("failed to run migrations");

        let definition = |name: &str, description: &str| ScopeDefinition {
            name: name.to_string(),
            description: description.to_string(),
        };

        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                cors_origins: vec![],
                cookie_domain: None,
                cookie_prefix: "dispatch".to_string(),
                secure_cookies: false,
            },
            database: db_config,
            tokens: TokensConfig::default(),
            scopes: ScopesConfig {
                definitions: vec![
                    definition("profile", PROFILE_DESCRIPTION),
                    definition("email", EMAIL_DESCRIPTION),
                    definition("user_id", "Know your user identifier."),
                ],
                default: vec!["profile".to_string(), "email".to_string()],
            },
            features: FeaturesConfig {
                enable_user_id_scope: true,
            },
            maintenance: MaintenanceConfig::default(),
        }
        .validated()
        .expect("invalid test config");

        let state = AppState::new(config.clone(), pool.clone());

        let app = axum::Router::new()
            .merge(routes::router())
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            addr,
            db: pool,
            config: Arc::new(config),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Fresh reqwest client per test, so cookies never bleed between tests.
    pub fn client(&self) -> Client {
        Client::builder()
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }

    /// Create an account with [`PASSWORD`] and `{username}@example.com`.
    pub async fn create_user(&self, username: &str) -> db::Account {
        let hash = password::hash_password(PASSWORD).unwrap();
        db::create_user(&self.db, username, &format!("{username}@example.com"), &hash)
            .await
            .expect("failed to create user")
    }

    pub async fn register_application(
        &self,
        owner: &db::Account,
        client_id: &str,
        opts: AppOptions<'_>,
    ) -> TestApp {
        let client_secret = (!opts.public).then(|| format!("{client_id}-secret"));
        let secret_hash = client_secret.as_deref().map(token::hash_token);
        let redirect_uris: Vec<String> = if opts.redirect_uris.is_empty() {
            vec![REDIRECT_URI.to_string()]
        } else {
            opts.redirect_uris.iter().map(|s| s.to_string()).collect()
        };

        let application = db::create_application(
            &self.db,
            &db::NewApplication {
                name: &format!("{client_id} app"),
                client_id,
                client_secret_hash: secret_hash.as_deref(),
                owner_id: owner.id,
                redirect_uris: &redirect_uris,
                skip_authorization: opts.skip_authorization,
                restricted: opts.restricted,
            },
        )
        .await
        .expect("failed to register application");

        if !opts.grant_scopes.is_empty() {
            let scopes: Vec<String> = opts.grant_scopes.iter().map(|s| s.to_string()).collect();
            db::set_application_access(&self.db, application.id, &scopes)
                .await
                .expect("failed to set application access");
        }

        TestApp {
            application,
            client_id: client_id.to_string(),
            client_secret,
        }
    }

    /// Store a token directly, bypassing the token endpoint.
    pub async fn store_token(
        &self,
        user: &db::Account,
        app: &TestApp,
        scopes: &[&str],
        expires_at: chrono::DateTime<chrono::Utc>,
    ) -> db::AccessToken {
        let (_, hash) = token::generate_token();
        let scopes: Vec<String> = scopes.iter().map(|s| s.to_string()).collect();
        db::store_access_token(&self.db, user.id, app.application.id, &hash, &scopes, expires_at)
            .await
            .expect("failed to store token")
    }

    pub async fn login(&self, client: &Client, identifier: &str, password: &str) -> reqwest::Response {
        client
            .post(self.url("/login"))
            .header("x-requested-with", "test")
            .form(&[("username", identifier), ("password", password)])
            .send()
            .await
            .unwrap()
    }

    /// GET the authorize endpoint for `app` with the given scope string.
    pub async fn authorize(
        &self,
        client: &Client,
        app: &TestApp,
        scope: &str,
        approval_prompt: Option<&str>,
    ) -> reqwest::Response {
        let mut query = vec![
            ("client_id", app.client_id.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("response_type", "code"),
            ("scope", scope),
            ("state", "xyz"),
        ];
        if let Some(prompt) = approval_prompt {
            query.push(("approval_prompt", prompt));
        }
        client
            .get(self.url("/oauth2/authorize/"))
            .query(&query)
            .send()
            .await
            .unwrap()
    }

    /// Render the approval page and return the form token embedded in it.
    pub async fn approval_form_token(&self, client: &Client, app: &TestApp, scope: &str) -> String {
        let resp = self.authorize(client, app, scope, Some("force")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let html = resp.text().await.unwrap();
        form_token_in(&html).expect("approval page has no csrf_token field")
    }

    /// POST to the token endpoint with the app's credentials added.
    pub async fn token_request(
        &self,
        app: &TestApp,
        params: &[(&str, &str)],
    ) -> reqwest::Response {
        let mut form: Vec<(&str, &str)> = vec![("client_id", app.client_id.as_str())];
        if let Some(secret) = &app.client_secret {
            form.push(("client_secret", secret.as_str()));
        }
        form.extend_from_slice(params);
        self.client()
            .post(self.url("/oauth2/access_token/"))
            .form(&form)
            .send()
            .await
            .unwrap()
    }

    /// Clean test data for isolation between serial tests.
    pub async fn cleanup(&self) {
        clean_database(&self.db).await;
    }
}

/// Pull a query parameter out of a redirect's Location header.
pub fn location_param(resp: &reqwest::Response, name: &str) -> Option<String> {
    let location = resp.headers().get("location")?.to_str().ok()?;
    let url = url::Url::parse(location).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.to_string())
}

/// Value of the hidden `csrf_token` input in an approval page.
pub fn form_token_in(html: &str) -> Option<String> {
    let marker = "name=\"csrf_token\" value=\"";
    let start = html.find(marker)? + marker.len();
    let len = html[start..].find('"')?;
    Some(html[start..start + len].to_string())
}

pub async fn clean_database(pool: &PgPool) {
    for table in [
        "sessions",
        "authorization_codes",
        "access_tokens",
        "application_access",
        "oauth_applications",
        "users",
    ] {
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(pool)
            .await
            .unwrap();
    }
}
