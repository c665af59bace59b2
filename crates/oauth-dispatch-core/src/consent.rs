use chrono::{DateTime, Utc};

use crate::config::ScopesConfig;
use crate::db::{AccessToken, Account};
use crate::error::Result;
use crate::scopes::{ClientContext, ScopePolicy};
use crate::store::TokenLedger;

/// The `approval_prompt` authorize parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApprovalPrompt {
    /// Skip the approval page when a valid token already covers the request.
    Auto,
    #[default]
    Force,
}

impl ApprovalPrompt {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("auto") => Self::Auto,
            _ => Self::Force,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentDecision {
    /// Issue an authorization code and send the user straight back.
    RedirectWithCode,
    /// Render the approval page.
    ShowConsent {
        /// Grantable requested scopes the user has not approved before.
        pending: Vec<String>,
        /// Requested names that cannot be granted: no scope definition, or
        /// `user_id` without an access grant. Shown, never granted.
        unknown: Vec<String>,
    },
}

/// Decides whether an authorization request needs the approval page.
pub struct ConsentGate<'a> {
    known: &'a ScopesConfig,
    policy: &'a ScopePolicy,
}

impl<'a> ConsentGate<'a> {
    pub fn new(known: &'a ScopesConfig, policy: &'a ScopePolicy) -> Self {
        Self { known, policy }
    }

    pub async fn decide<L>(
        &self,
        ledger: &L,
        account: &Account,
        client: &ClientContext,
        requested: &[String],
        prompt: ApprovalPrompt,
    ) -> Result<ConsentDecision>
    where
        L: TokenLedger + ?Sized,
    {
        self.decide_at(ledger, account, client, requested, prompt, Utc::now())
            .await
    }

    pub async fn decide_at<L>(
        &self,
        ledger: &L,
        account: &Account,
        client: &ClientContext,
        requested: &[String],
        prompt: ApprovalPrompt,
        now: DateTime<Utc>,
    ) -> Result<ConsentDecision>
    where
        L: TokenLedger + ?Sized,
    {
        let application = &client.application;
        // Coverage is checked over grantable names only.
        let selection = self.policy.select(requested, self.known, client);
        let (known, unknown) = (selection.granted, selection.rejected);

        let decision = if application.restricted {
            // Any earlier token counts, expired or not. Tokens for restricted
            // applications are issued already expired, so this is the only
            // record of a prior approval until scopes are tracked per grant.
            let tokens = ledger.tokens_for(account.id, application.id).await?;
            if tokens.iter().any(|t| t.covers(&known)) {
                ConsentDecision::RedirectWithCode
            } else {
                ConsentDecision::ShowConsent {
                    pending: uncovered(&known, &tokens),
                    unknown,
                }
            }
        } else if application.skip_authorization {
            ConsentDecision::RedirectWithCode
        } else if prompt == ApprovalPrompt::Auto {
            let tokens = ledger.tokens_for(account.id, application.id).await?;
            let covered = tokens
                .iter()
                .any(|t| !t.is_expired(now) && t.covers(&known));
            if covered {
                ConsentDecision::RedirectWithCode
            } else {
                ConsentDecision::ShowConsent { pending: known, unknown }
            }
        } else {
            ConsentDecision::ShowConsent { pending: known, unknown }
        };

        tracing::info!(
            user_id = %account.id,
            client_id = %application.client_id,
            restricted = application.restricted,
            show_consent = matches!(decision, ConsentDecision::ShowConsent { .. }),
            "consent decision"
        );
        Ok(decision)
    }
}

/// Scopes in `requested` that no token in `tokens` was granted.
fn uncovered(requested: &[String], tokens: &[AccessToken]) -> Vec<String> {
    requested
        .iter()
        .filter(|s| !tokens.iter().any(|t| t.scopes.iter().any(|g| g == *s)))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use uuid::Uuid;

    use super::*;
    use crate::config::ScopeDefinition;
    use crate::db::{Application, ApplicationAccess, CLIENT_TYPE_CONFIDENTIAL};
    use crate::store::fake::MemoryStore;

    fn known() -> ScopesConfig {
        let definitions = [
            ("profile", "Know your name and username"),
            ("email", "Know your email address"),
            ("grades:read", "Read your grades"),
            ("user_id", "Know your user identifier"),
        ]
        .iter()
        .map(|(name, description)| ScopeDefinition {
            name: name.to_string(),
            description: description.to_string(),
        })
        .collect();
        ScopesConfig {
            definitions,
            default: vec![],
        }
    }

    fn policy() -> ScopePolicy {
        ScopePolicy::new(vec!["profile".to_string()], true)
    }

    fn account() -> Account {
        Account {
            id: Uuid::now_v7(),
            username: "lonestarr".to_string(),
            email: "lonestarr@winnebago.example".to_string(),
            password_hash: "x".to_string(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn client(owner: &Account, restricted: bool) -> ClientContext {
        ClientContext {
            application: Application {
                id: Uuid::now_v7(),
                name: "test restricted dot application".to_string(),
                client_id: "dot-restricted-app-client-id".to_string(),
                client_secret_hash: Some("hash".to_string()),
                client_type: CLIENT_TYPE_CONFIDENTIAL.to_string(),
                user_id: owner.id,
                redirect_uris: vec!["https://example.edx/redirect".to_string()],
                skip_authorization: false,
                restricted,
                created_at: Utc::now(),
            },
            access: None,
        }
    }

    fn token(
        account: &Account,
        app: &Application,
        scopes: &[&str],
        expires_at: DateTime<Utc>,
    ) -> AccessToken {
        AccessToken {
            id: Uuid::now_v7(),
            user_id: account.id,
            application_id: app.id,
            token_hash: Uuid::now_v7().to_string(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            expires_at,
            created_at: Utc::now(),
        }
    }

    fn scopes(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// Restricted app, one token for `profile` that expired 100 days ago.
    fn restricted_fixture() -> (MemoryStore, Account, ClientContext) {
        let user = account();
        let client = client(&user, true);
        let expired = token(
            &user,
            &client.application,
            &["profile"],
            Utc::now() - Duration::days(100),
        );
        let store = MemoryStore {
            tokens: vec![expired],
            ..MemoryStore::default()
        };
        (store, user, client)
    }

    #[tokio::test]
    async fn no_reprompting_with_expired_token() {
        let (store, user, client) = restricted_fixture();
        let (known, policy) = (known(), policy());
        let gate = ConsentGate::new(&known, &policy);
        let decision = gate
            .decide(&store, &user, &client, &scopes(&["profile"]), ApprovalPrompt::Force)
            .await
            .unwrap();
        assert_eq!(decision, ConsentDecision::RedirectWithCode);
    }

    #[tokio::test]
    async fn prompting_with_new_scope() {
        let (store, user, client) = restricted_fixture();
        let (known, policy) = (known(), policy());
        let gate = ConsentGate::new(&known, &policy);
        let decision = gate
            .decide(&store, &user, &client, &scopes(&["email"]), ApprovalPrompt::Force)
            .await
            .unwrap();
        assert_eq!(
            decision,
            ConsentDecision::ShowConsent {
                pending: scopes(&["email"]),
                unknown: vec![],
            }
        );
    }

    #[tokio::test]
    async fn pending_lists_only_uncovered_scopes() {
        let (store, user, client) = restricted_fixture();
        let (known, policy) = (known(), policy());
        let gate = ConsentGate::new(&known, &policy);
        let decision = gate
            .decide(&store, &user, &client, &scopes(&["profile", "email"]), ApprovalPrompt::Force)
            .await
            .unwrap();
        assert_eq!(
            decision,
            ConsentDecision::ShowConsent {
                pending: scopes(&["email"]),
                unknown: vec![],
            }
        );
    }

    #[tokio::test]
    async fn coverage_needs_a_single_token() {
        let user = account();
        let client = client(&user, true);
        let past = Utc::now() - Duration::days(1);
        let store = MemoryStore {
            tokens: vec![
                token(&user, &client.application, &["profile"], past),
                token(&user, &client.application, &["email"], past),
            ],
            ..MemoryStore::default()
        };
        let (known, policy) = (known(), policy());
        let gate = ConsentGate::new(&known, &policy);
        let decision = gate
            .decide(&store, &user, &client, &scopes(&["profile", "email"]), ApprovalPrompt::Force)
            .await
            .unwrap();
        // Each scope was approved once, so nothing is pending, yet no
        // single token covers both.
        assert_eq!(
            decision,
            ConsentDecision::ShowConsent {
                pending: vec![],
                unknown: vec![],
            }
        );
    }

    #[tokio::test]
    async fn unknown_scopes_ignored_for_coverage() {
        let (store, user, client) = restricted_fixture();
        let (known, policy) = (known(), policy());
        let gate = ConsentGate::new(&known, &policy);
        let decision = gate
            .decide(&store, &user, &client, &scopes(&["profile", "bogus"]), ApprovalPrompt::Force)
            .await
            .unwrap();
        assert_eq!(decision, ConsentDecision::RedirectWithCode);

        let decision = gate
            .decide(&store, &user, &client, &scopes(&["email", "bogus"]), ApprovalPrompt::Force)
            .await
            .unwrap();
        assert_eq!(
            decision,
            ConsentDecision::ShowConsent {
                pending: scopes(&["email"]),
                unknown: scopes(&["bogus"]),
            }
        );
    }

    #[tokio::test]
    async fn ungrantable_user_id_ignored_for_coverage() {
        let (store, user, client) = restricted_fixture();
        let (known, policy) = (known(), policy());
        let gate = ConsentGate::new(&known, &policy);
        let requested = scopes(&["profile", "user_id"]);

        // No access grant: user_id can never be issued, so the expired
        // profile token is enough.
        let decision = gate
            .decide(&store, &user, &client, &requested, ApprovalPrompt::Force)
            .await
            .unwrap();
        assert_eq!(decision, ConsentDecision::RedirectWithCode);

        // With the grant it is a real request and nothing covers it yet.
        let granted = ClientContext {
            access: Some(ApplicationAccess {
                application_id: client.application.id,
                scopes: scopes(&["user_id"]),
            }),
            ..client
        };
        let decision = gate
            .decide(&store, &user, &granted, &requested, ApprovalPrompt::Force)
            .await
            .unwrap();
        assert_eq!(
            decision,
            ConsentDecision::ShowConsent {
                pending: scopes(&["user_id"]),
                unknown: vec![],
            }
        );
    }

    #[tokio::test]
    async fn user_id_ungrantable_when_toggle_off() {
        let user = account();
        let client = client(&user, false);
        let store = MemoryStore::default();
        let known = known();
        let policy = ScopePolicy::new(vec!["profile".to_string()], false);
        let gate = ConsentGate::new(&known, &policy);
        let decision = gate
            .decide(&store, &user, &client, &scopes(&["profile", "user_id"]), ApprovalPrompt::Force)
            .await
            .unwrap();
        assert_eq!(
            decision,
            ConsentDecision::ShowConsent {
                pending: scopes(&["profile"]),
                unknown: scopes(&["user_id"]),
            }
        );
    }

    #[tokio::test]
    async fn other_users_tokens_do_not_count() {
        let (mut store, user, client) = restricted_fixture();
        let stranger = account();
        store.tokens = vec![token(&stranger, &client.application, &["profile"], Utc::now())];
        let (known, policy) = (known(), policy());
        let gate = ConsentGate::new(&known, &policy);
        let decision = gate
            .decide(&store, &user, &client, &scopes(&["profile"]), ApprovalPrompt::Force)
            .await
            .unwrap();
        assert!(matches!(decision, ConsentDecision::ShowConsent { .. }));
    }

    #[tokio::test]
    async fn decision_is_idempotent() {
        let (store, user, client) = restricted_fixture();
        let (known, policy) = (known(), policy());
        let gate = ConsentGate::new(&known, &policy);
        for requested in [scopes(&["profile"]), scopes(&["email"])] {
            let first = gate
                .decide(&store, &user, &client, &requested, ApprovalPrompt::Force)
                .await
                .unwrap();
            let second = gate
                .decide(&store, &user, &client, &requested, ApprovalPrompt::Force)
                .await
                .unwrap();
            assert_eq!(first, second);
        }
        assert_eq!(store.tokens.len(), 1);
    }

    #[tokio::test]
    async fn unrestricted_app_ignores_expired_tokens() {
        let user = account();
        let client = client(&user, false);
        let now = Utc::now();
        let store = MemoryStore {
            tokens: vec![token(
                &user,
                &client.application,
                &["profile"],
                now - Duration::days(100),
            )],
            ..MemoryStore::default()
        };
        let (known, policy) = (known(), policy());
        let gate = ConsentGate::new(&known, &policy);
        let decision = gate
            .decide_at(&store, &user, &client, &scopes(&["profile"]), ApprovalPrompt::Auto, now)
            .await
            .unwrap();
        assert_eq!(
            decision,
            ConsentDecision::ShowConsent {
                pending: scopes(&["profile"]),
                unknown: vec![],
            }
        );
    }

    #[tokio::test]
    async fn unrestricted_app_auto_prompt_uses_valid_token() {
        let user = account();
        let client = client(&user, false);
        let now = Utc::now();
        let store = MemoryStore {
            tokens: vec![token(
                &user,
                &client.application,
                &["profile", "email"],
                now + Duration::hours(1),
            )],
            ..MemoryStore::default()
        };
        let (known, policy) = (known(), policy());
        let gate = ConsentGate::new(&known, &policy);

        let auto = gate
            .decide_at(&store, &user, &client, &scopes(&["email"]), ApprovalPrompt::Auto, now)
            .await
            .unwrap();
        assert_eq!(auto, ConsentDecision::RedirectWithCode);

        let forced = gate
            .decide_at(&store, &user, &client, &scopes(&["email"]), ApprovalPrompt::Force, now)
            .await
            .unwrap();
        assert!(matches!(forced, ConsentDecision::ShowConsent { .. }));
    }

    #[tokio::test]
    async fn skip_authorization_redirects() {
        let user = account();
        let mut client = client(&user, false);
        client.application.skip_authorization = true;
        let store = MemoryStore::default();
        let (known, policy) = (known(), policy());
        let gate = ConsentGate::new(&known, &policy);
        let decision = gate
            .decide(&store, &user, &client, &scopes(&["grades:read"]), ApprovalPrompt::Force)
            .await
            .unwrap();
        assert_eq!(decision, ConsentDecision::RedirectWithCode);
    }

    #[test]
    fn approval_prompt_parsing() {
        assert_eq!(ApprovalPrompt::parse(Some("auto")), ApprovalPrompt::Auto);
        assert_eq!(ApprovalPrompt::parse(Some("force")), ApprovalPrompt::Force);
        assert_eq!(ApprovalPrompt::parse(Some("garbage")), ApprovalPrompt::Force);
        assert_eq!(ApprovalPrompt::parse(None), ApprovalPrompt::Force);
    }
}
