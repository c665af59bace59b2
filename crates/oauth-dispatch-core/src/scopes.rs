use crate::config::{Config, ScopesConfig};
use crate::db::{Application, ApplicationAccess};

/// Scope that exposes the learner's numeric identity to an application.
pub const USER_ID_SCOPE: &str = "user_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantType {
    AuthorizationCode,
    Password,
    ClientCredentials,
}

impl GrantType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "authorization_code" => Some(Self::AuthorizationCode),
            "password" => Some(Self::Password),
            "client_credentials" => Some(Self::ClientCredentials),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::Password => "password",
            Self::ClientCredentials => "client_credentials",
        }
    }
}

/// Split a space-delimited scope parameter, dropping repeats but keeping the
/// order the client asked in.
pub fn parse_scope(raw: &str) -> Vec<String> {
    let mut scopes: Vec<String> = Vec::new();
    for name in raw.split_whitespace() {
        if !scopes.iter().any(|s| s == name) {
            scopes.push(name.to_string());
        }
    }
    scopes
}

/// What scope decisions need to know about the client making a request.
pub trait RequestingClient {
    fn client_id(&self) -> &str;

    /// Whether the client's access record lets it receive `scope` on top of
    /// the ordinary defaults.
    fn grants_scope(&self, scope: &str) -> bool;
}

/// An application together with its (optional) access record.
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub application: Application,
    pub access: Option<ApplicationAccess>,
}

impl RequestingClient for ClientContext {
    fn client_id(&self) -> &str {
        &self.application.client_id
    }

    fn grants_scope(&self, scope: &str) -> bool {
        self.access
            .as_ref()
            .is_some_and(|a| a.scopes.iter().any(|s| s == scope))
    }
}

/// Requested scopes split by whether they may be granted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSelection {
    pub granted: Vec<String>,
    pub rejected: Vec<String>,
}

/// Default-scope computation and requested-scope filtering.
#[derive(Debug, Clone)]
pub struct ScopePolicy {
    defaults: Vec<String>,
    enable_user_id_scope: bool,
}

impl ScopePolicy {
    pub fn new(defaults: Vec<String>, enable_user_id_scope: bool) -> Self {
        let mut deduped: Vec<String> = Vec::with_capacity(defaults.len());
        for name in defaults {
            if !deduped.contains(&name) {
                deduped.push(name);
            }
        }
        Self {
            defaults: deduped,
            enable_user_id_scope,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.scopes.default.clone(),
            config.features.enable_user_id_scope,
        )
    }

    pub fn defaults(&self) -> &[String] {
        &self.defaults
    }

    /// Scopes to grant when a token request does not name any.
    ///
    /// Returns the configured defaults, plus `user_id` when the request named
    /// no scopes, the client's access record allows `user_id`, and the
    /// feature toggle is on.
    pub fn effective_default_scopes(
        &self,
        grant_type: GrantType,
        client: Option<&dyn RequestingClient>,
        requested: Option<&[String]>,
    ) -> Vec<String> {
        let mut scopes = self.defaults.clone();

        let requested_none = requested.is_none_or(|r| r.is_empty());
        if let Some(client) = client
            && requested_none
            && self.enable_user_id_scope
            && client.grants_scope(USER_ID_SCOPE)
            && !scopes.iter().any(|s| s == USER_ID_SCOPE)
        {
            tracing::debug!(
                client_id = client.client_id(),
                grant_type = grant_type.as_str(),
                "adding user_id to default scopes"
            );
            scopes.push(USER_ID_SCOPE.to_string());
        }
        scopes
    }

    /// Split `requested` into scopes that may be granted and scopes that may
    /// not. Unknown names are rejected; `user_id` additionally needs the
    /// feature toggle and the client's access record.
    pub fn select(
        &self,
        requested: &[String],
        known: &ScopesConfig,
        client: &dyn RequestingClient,
    ) -> ScopeSelection {
        let mut selection = ScopeSelection::default();
        for name in requested {
            let allowed = known.is_known(name)
                && (name != USER_ID_SCOPE
                    || (self.enable_user_id_scope && client.grants_scope(USER_ID_SCOPE)));
            if allowed {
                selection.granted.push(name.clone());
            } else {
                selection.rejected.push(name.clone());
            }
        }
        selection
    }
}
