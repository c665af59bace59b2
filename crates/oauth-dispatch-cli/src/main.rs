use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use oauth_dispatch_core::db::{self, NewApplication};
use oauth_dispatch_core::{password, token};

#[derive(Parser)]
#[command(name = "oauth-dispatch", about = "OAuth2 provider with consent and scope policy")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server
    Serve,
    /// Run database migrations
    Migrate,
    /// Check config and database connectivity
    Validate,
    /// List all users
    ListUsers,
    /// Create a user account
    CreateUser {
        username: String,
        email: String,
        /// Account password
        #[arg(long, env = "OAUTH_DISPATCH_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Disable a user and end their sessions
    DeactivateUser {
        /// Username to disable
        username: String,
    },
    /// Delete every access token issued to a user
    RevokeTokens {
        /// Username whose tokens to revoke
        username: String,
    },
    /// Register a new OAuth application
    RegisterClient {
        /// Application display name
        name: String,
        /// Username of the owning account
        #[arg(long)]
        owner: String,
        /// Allowed redirect URI(s)
        #[arg(required = true, num_args = 1..)]
        redirect_uris: Vec<String>,
        /// Register a public client (no secret)
        #[arg(long)]
        public: bool,
        /// Issue already-expired tokens to this application
        #[arg(long)]
        restricted: bool,
        /// Never show the approval page for this application
        #[arg(long)]
        skip_authorization: bool,
        /// Extra scope the application may receive (repeatable)
        #[arg(long = "grant-scope")]
        grant_scopes: Vec<String>,
    },
    /// List registered OAuth applications
    ListClients,
    /// Remove an OAuth application
    RemoveClient {
        /// Client ID to remove
        client_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("oauth_dispatch=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();

    let config = oauth_dispatch_core::config::resolve_config(cli.config.as_deref())?;
    let pool = db::connect(&config.database).await?;

    match cli.command {
        Command::Serve => {
            db::migrate(&pool).await?;
            tracing::info!("migrations complete");
            oauth_dispatch_api::serve(config, pool).await?;
        }
        Command::Migrate => {
            db::migrate(&pool).await?;
            tracing::info!("migrations complete");
        }
        Command::Validate => {
            tracing::info!(
                scopes = config.scopes.definitions.len(),
                defaults = ?config.scopes.default,
                "config loaded successfully"
            );
            sqlx::query("SELECT 1").execute(&pool).await?;
            tracing::info!("database connection successful");
        }
        Command::ListUsers => {
            let users = db::list_users(&pool, 100, 0).await?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!("{:<38} {:<24} {:<32} {:<7} {}", "ID", "Username", "Email", "Active", "Created");
                println!("{}", "-".repeat(120));
                for user in &users {
                    println!(
                        "{:<38} {:<24} {:<32} {:<7} {}",
                        user.id, user.username, user.email, user.is_active,
                        user.created_at.format("%Y-%m-%d %H:%M"),
                    );
                }
                println!("\n{} user(s)", users.len());
            }
        }
        Command::CreateUser { username, email, password } => {
            if password.is_empty() {
                anyhow::bail!("password cannot be empty");
            }
            let hash = password::hash_password(&password)?;
            let user = db::create_user(&pool, &username, &email, &hash).await?;
            println!("User {} created ({})", user.username, user.id);
        }
        Command::DeactivateUser { username } => {
            let user = db::find_user_by_username(&pool, &username)
                .await?
                .ok_or_else(|| anyhow::anyhow!("user '{}' not found", username))?;
            db::set_user_active(&pool, user.id, false).await?;
            let ended = db::delete_sessions_for_user(&pool, user.id).await?;
            println!("{} deactivated ({} session(s) ended)", username, ended);
        }
        Command::RevokeTokens { username } => {
            let user = db::find_user_by_username(&pool, &username)
                .await?
                .ok_or_else(|| anyhow::anyhow!("user '{}' not found", username))?;
            let revoked = db::delete_tokens_for_user(&pool, user.id).await?;
            println!("{} token(s) revoked for {}", revoked, username);
        }
        Command::RegisterClient {
            name,
            owner,
            redirect_uris,
            public,
            restricted,
            skip_authorization,
            grant_scopes,
        } => {
            for scope in &grant_scopes {
                if !config.scopes.is_known(scope) {
                    anyhow::bail!("scope '{}' has no entry in scopes.definitions", scope);
                }
            }
            let owner = db::find_user_by_username(&pool, &owner)
                .await?
                .ok_or_else(|| anyhow::anyhow!("user '{}' not found", owner))?;

            let mut id_bytes = [0u8; 16];
            rand::RngCore::fill_bytes(&mut rand::rng(), &mut id_bytes);
            let client_id = hex::encode(id_bytes);

            let client_secret = (!public).then(|| {
                let mut secret_bytes = [0u8; 32];
                rand::RngCore::fill_bytes(&mut rand::rng(), &mut secret_bytes);
                hex::encode(secret_bytes)
            });
            let secret_hash = client_secret.as_deref().map(token::hash_token);

            let application = db::create_application(
                &pool,
                &NewApplication {
                    name: &name,
                    client_id: &client_id,
                    client_secret_hash: secret_hash.as_deref(),
                    owner_id: owner.id,
                    redirect_uris: &redirect_uris,
                    skip_authorization,
                    restricted,
                },
            )
            .await?;

            if !grant_scopes.is_empty() {
                db::set_application_access(&pool, application.id, &grant_scopes).await?;
            }

            println!("Application registered:");
            println!("  ID:            {}", application.id);
            println!("  Name:          {}", application.name);
            println!("  Owner:         {}", owner.username);
            println!("  Client type:   {}", application.client_type);
            println!("  Client ID:     {}", client_id);
            if let Some(secret) = &client_secret {
                println!("  Client Secret: {}", secret);
            }
            println!("  Redirect URIs: {:?}", application.redirect_uris);
            println!("  Restricted:    {}", application.restricted);
            println!("  Skip consent:  {}", application.skip_authorization);
            if !grant_scopes.is_empty() {
                println!("  Extra scopes:  {}", grant_scopes.join(" "));
            }
            if client_secret.is_some() {
                println!("\nSave the client secret, it cannot be retrieved later.");
            }
        }
        Command::ListClients => {
            let applications = db::list_applications(&pool).await?;
            if applications.is_empty() {
                println!("No applications registered.");
            } else {
                println!(
                    "{:<38} {:<24} {:<34} {:<13} {:<11} {}",
                    "ID", "Name", "Client ID", "Type", "Restricted", "Skip consent"
                );
                println!("{}", "-".repeat(132));
                for app in &applications {
                    println!(
                        "{:<38} {:<24} {:<34} {:<13} {:<11} {}",
                        app.id, app.name, app.client_id, app.client_type,
                        app.restricted, app.skip_authorization,
                    );
                }
                println!("\n{} application(s)", applications.len());
            }
        }
        Command::RemoveClient { client_id } => {
            let application = db::find_application_by_client_id(&pool, &client_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("application '{}' not found", client_id))?;
            db::delete_application(&pool, application.id).await?;
            println!("Application '{}' ({}) removed", application.name, client_id);
        }
    }

    Ok(())
}
