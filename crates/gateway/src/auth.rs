//! Bearer-token authentication.
//!
//! Tokens are validated against an OIDC-style identity provider: RS256
//! signatures checked against the tenant's JWKS (fetched once and cached
//! by key id, refetched on an unknown `kid`), expiry enforced, both v1 and
//! v2 issuer formats accepted, audience enforced when configured. The
//! validated claims become the request's [`AccessContext`].
//!
//! Two shims short-circuit validation: dev mode runs every request as a
//! synthetic admin, and token bypass builds the context from the request
//! body's user id with no roles.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;

use maestro_domain::access::AccessContext;
use maestro_domain::error::{Error, Result};

use crate::state::AppState;

const JWKS_URL_TEMPLATE: &str =
    "https://login.microsoftonline.com/{tenant_id}/discovery/v2.0/keys";
const ISSUER_V2_TEMPLATE: &str = "https://login.microsoftonline.com/{tenant_id}/v2.0";
const ISSUER_V1_TEMPLATE: &str = "https://sts.windows.net/{tenant_id}/";

/// Placeholder identity used in bypass mode when no request body carries a
/// user id (e.g. listing endpoints).
pub const BYPASS_USER: &str = "bypass-user";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Claims
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The token claims this service cares about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub upn: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Tenant id claim.
    #[serde(default)]
    pub tid: Option<String>,
    #[serde(default)]
    pub roles: Option<Vec<String>>,
}

/// Map validated claims onto an access context.
///
/// The user id prefers the human-readable claims and falls back to `sub`;
/// a token carrying none of them is rejected.
pub fn context_from_claims(claims: &Claims) -> Result<AccessContext> {
    let user_id = claims
        .preferred_username
        .as_ref()
        .or(claims.upn.as_ref())
        .or(claims.email.as_ref())
        .or(claims.sub.as_ref())
        .ok_or_else(|| Error::Auth("token has no usable identity claim".into()))?
        .clone();

    let mut ctx = AccessContext::new(user_id, claims.roles.clone().unwrap_or_default());
    ctx.email = claims.email.clone();
    ctx.tenant_id = claims.tid.clone();
    Ok(ctx)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Token verifier
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    kty: String,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

/// Validates bearer tokens against the identity provider's JWKS.
pub struct TokenVerifier {
    tenant_id: String,
    audience: Option<String>,
    keys: RwLock<HashMap<String, jsonwebtoken::DecodingKey>>,
    http: reqwest::Client,
}

impl TokenVerifier {
    pub fn new(tenant_id: impl Into<String>, audience: Option<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            audience,
            keys: RwLock::new(HashMap::new()),
            http: reqwest::Client::new(),
        }
    }

    fn jwks_url(&self) -> String {
        JWKS_URL_TEMPLATE.replace("{tenant_id}", &self.tenant_id)
    }

    /// Expected issuers, v2 first. Both formats are valid for one tenant.
    fn issuers(&self) -> [String; 2] {
        [
            ISSUER_V2_TEMPLATE.replace("{tenant_id}", &self.tenant_id),
            ISSUER_V1_TEMPLATE.replace("{tenant_id}", &self.tenant_id),
        ]
    }

    /// Validate a bearer token and build the caller's access context.
    pub async fn verify(&self, token: &str) -> Result<AccessContext> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| Error::Auth(format!("invalid token header: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| Error::Auth("token missing 'kid' in header".into()))?;

        let key = match self.cached_key(&kid) {
            Some(key) => key,
            None => {
                // Unknown kid: the provider may have rotated keys.
                self.refresh_keys().await?;
                self.cached_key(&kid).ok_or_else(|| {
                    Error::Auth(format!("signing key with kid '{kid}' not found in JWKS"))
                })?
            }
        };

        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::RS256);
        validation.set_issuer(&self.issuers());
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let data = jsonwebtoken::decode::<Claims>(token, &key, &validation)
            .map_err(|e| Error::Auth(format!("invalid token: {e}")))?;

        let ctx = context_from_claims(&data.claims)?;
        tracing::debug!(user_id = %ctx.user_id, roles = ?ctx.roles, "token validated");
        Ok(ctx)
    }

    fn cached_key(&self, kid: &str) -> Option<jsonwebtoken::DecodingKey> {
        self.keys.read().get(kid).cloned()
    }

    async fn refresh_keys(&self) -> Result<()> {
        let url = self.jwks_url();
        let jwks: Jwks = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Auth(format!("failed to fetch JWKS: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Auth(format!("failed to decode JWKS: {e}")))?;

        let mut keys = self.keys.write();
        keys.clear();
        for jwk in jwks.keys {
            let (Some(kid), Some(n), Some(e)) = (jwk.kid, jwk.n, jwk.e) else {
                continue;
            };
            if jwk.kty != "RSA" {
                continue;
            }
            match jsonwebtoken::DecodingKey::from_rsa_components(&n, &e) {
                Ok(key) => {
                    keys.insert(kid, key);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unusable JWKS entry");
                }
            }
        }
        tracing::info!(keys = keys.len(), "JWKS refreshed");
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Middleware
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Axum middleware that resolves the caller's [`AccessContext`] and
/// attaches it to the request. Attach via
/// `axum::middleware::from_fn_with_state`.
pub async fn require_access(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let ctx = if state.config.auth.dev_mode {
        AccessContext::dev_admin()
    } else if state.config.auth.bypass_token {
        // Handlers with a request body substitute the declared user id.
        AccessContext::bypass(BYPASS_USER)
    } else {
        let token = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or("");
        if token.is_empty() {
            return unauthorized("missing or invalid Authorization header");
        }
        let Some(verifier) = &state.verifier else {
            return unauthorized("token validation is not configured");
        };
        match verifier.verify(token).await {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::warn!(error = %e, "token validation failed");
                return unauthorized(&e.to_string());
            }
        }
    };

    req.extensions_mut().insert(ctx);
    next.run(req).await
}

/// Resolve the context a body-bearing handler should act as: in bypass
/// mode the request body's `user_id` wins (with no roles), otherwise the
/// middleware-resolved context is authoritative.
pub fn effective_context(state: &AppState, ctx: AccessContext, body_user_id: &str) -> AccessContext {
    if state.config.auth.bypass_token && !state.config.auth.dev_mode && !body_user_id.is_empty() {
        AccessContext::bypass(body_user_id)
    } else {
        ctx
    }
}

fn unauthorized(message: &str) -> Response {
    (
        axum::http::StatusCode::UNAUTHORIZED,
        axum::Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
