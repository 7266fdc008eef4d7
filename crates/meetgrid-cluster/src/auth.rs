//! Service-to-service authorization for the RPC surface.
//!
//! Every call carries the caller's service id in `x-meetgrid-service` and a
//! bearer token in `authorization`. The server asks an [`Authorizer`]
//! whether that pair may call a route of a given [`Scope`].
//!
//! The bundled [`HmacAuthorizer`] accepts `hex(HMAC-SHA256(master, "scope:service_id"))`
//! tokens. The same authorizer issues tokens for outgoing calls, so every
//! process holding the master secret can both sign and verify.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use http::HeaderMap;
use sha2::Sha256;
use tracing::{debug, warn};
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

pub const SERVICE_HEADER: &str = "x-meetgrid-service";
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// What a call is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Worker registration and heartbeats (worker → coordinator).
    WorkerRegistry,
    /// Offering a meeting to a controller (coordinator → MC).
    MeetingAssign,
    /// MH replacement requests (MC → coordinator).
    MeetingReplace,
    /// Operator routes on the coordinator.
    Operator,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::WorkerRegistry => "worker:registry",
            Scope::MeetingAssign => "meeting:assign",
            Scope::MeetingReplace => "meeting:replace",
            Scope::Operator => "operator",
        }
    }
}

/// Decides whether a caller may use a scope.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, service_id: &str, token: &str, scope: Scope) -> bool;
}

/// Accepts every call. Used when no master secret is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _service_id: &str, _token: &str, _scope: Scope) -> bool {
        true
    }
}

/// Shared signing secret. Zeroed on drop, never printed.
pub struct MasterSecret(Zeroizing<Vec<u8>>);

impl MasterSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Zeroizing::new(bytes.into()))
    }

    fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterSecret([REDACTED])")
    }
}

/// HMAC-SHA256 token issuer and verifier.
#[derive(Debug)]
pub struct HmacAuthorizer {
    secret: MasterSecret,
}

impl HmacAuthorizer {
    pub fn new(secret: MasterSecret) -> Self {
        Self { secret }
    }

    /// Token for `service_id` calling routes of `scope`.
    pub fn issue(&self, service_id: &str, scope: Scope) -> String {
        hex::encode(self.mac(service_id, scope).finalize().into_bytes())
    }

    fn mac(&self, service_id: &str, scope: Scope) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose())
            .expect("HMAC accepts keys of any length");
        mac.update(scope.as_str().as_bytes());
        mac.update(b":");
        mac.update(service_id.as_bytes());
        mac
    }
}

impl Authorizer for HmacAuthorizer {
    fn authorize(&self, service_id: &str, token: &str, scope: Scope) -> bool {
        let Ok(presented) = hex::decode(token) else {
            return false;
        };
        // Constant-time comparison.
        self.mac(service_id, scope).verify_slice(&presented).is_ok()
    }
}

/// Server-side authorizer for a process: the HMAC issuer when a secret is
/// configured, otherwise allow-all with a warning.
pub fn authorizer_for(issuer: Option<Arc<HmacAuthorizer>>) -> Arc<dyn Authorizer> {
    match issuer {
        Some(issuer) => issuer as Arc<dyn Authorizer>,
        None => {
            warn!("no master secret configured, RPC authorization is disabled");
            Arc::new(AllowAll)
        }
    }
}

/// Identity and token source for outgoing calls.
#[derive(Clone, Debug)]
pub struct ClientCredentials {
    service_id: String,
    issuer: Option<Arc<HmacAuthorizer>>,
}

impl ClientCredentials {
    pub fn new(service_id: impl Into<String>, issuer: Option<Arc<HmacAuthorizer>>) -> Self {
        Self {
            service_id: service_id.into(),
            issuer,
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Headers to attach to a call of `scope`.
    pub fn headers(&self, scope: Scope) -> Vec<(&'static str, String)> {
        let token = self
            .issuer
            .as_ref()
            .map(|issuer| issuer.issue(&self.service_id, scope))
            .unwrap_or_default();
        vec![
            (SERVICE_HEADER, self.service_id.clone()),
            (AUTHORIZATION_HEADER, format!("Bearer {token}")),
        ]
    }
}

/// Check request headers against `authorizer`. Returns the caller's
/// service id on success.
pub fn authorize_headers(
    headers: &HeaderMap,
    authorizer: &dyn Authorizer,
    scope: Scope,
) -> Option<String> {
    let service_id = headers
        .get(SERVICE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let token = headers
        .get(AUTHORIZATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();

    if authorizer.authorize(service_id, token, scope) {
        Some(service_id.to_string())
    } else {
        debug!(%service_id, scope = scope.as_str(), "call not authorized");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn authorizer() -> HmacAuthorizer {
        HmacAuthorizer::new(MasterSecret::new(b"test-master-secret".to_vec()))
    }

    #[test]
    fn issued_token_verifies_only_for_its_scope_and_service() {
        let auth = authorizer();
        let token = auth.issue("mc-1", Scope::WorkerRegistry);

        assert!(auth.authorize("mc-1", &token, Scope::WorkerRegistry));
        assert!(!auth.authorize("mc-1", &token, Scope::MeetingAssign));
        assert!(!auth.authorize("mc-2", &token, Scope::WorkerRegistry));
        assert!(!auth.authorize("mc-1", "not-hex", Scope::WorkerRegistry));
    }

    #[test]
    fn different_secret_rejects() {
        let other = HmacAuthorizer::new(MasterSecret::new(b"other".to_vec()));
        let token = other.issue("mc-1", Scope::WorkerRegistry);
        assert!(!authorizer().authorize("mc-1", &token, Scope::WorkerRegistry));
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = MasterSecret::new(b"hunter2".to_vec());
        let printed = format!("{secret:?} {:?}", authorizer());
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("test-master-secret"));
        assert!(printed.contains("REDACTED"));
    }

    #[test]
    fn headers_round_trip_through_authorize_headers() {
        let issuer = Arc::new(authorizer());
        let creds = ClientCredentials::new("gc-1", Some(issuer.clone()));

        let mut headers = HeaderMap::new();
        for (name, value) in creds.headers(Scope::MeetingAssign) {
            headers.insert(name, HeaderValue::from_str(&value).unwrap());
        }

        assert_eq!(
            authorize_headers(&headers, issuer.as_ref(), Scope::MeetingAssign),
            Some("gc-1".to_string())
        );
        assert_eq!(
            authorize_headers(&headers, issuer.as_ref(), Scope::Operator),
            None
        );
    }

    #[test]
    fn authorizer_for_falls_back_to_allow_all() {
        let open = authorizer_for(None);
        assert!(open.authorize("anyone", "", Scope::Operator));

        let issuer = Arc::new(authorizer());
        let closed = authorizer_for(Some(issuer.clone()));
        assert!(!closed.authorize("anyone", "", Scope::Operator));
        let token = issuer.issue("anyone", Scope::Operator);
        assert!(closed.authorize("anyone", &token, Scope::Operator));
    }

    #[test]
    fn missing_headers_are_rejected_unless_allow_all() {
        let headers = HeaderMap::new();
        assert!(authorize_headers(&headers, &authorizer(), Scope::Operator).is_none());
        assert!(authorize_headers(&headers, &AllowAll, Scope::Operator).is_some());
    }
}
