// ── Hivecore: Provider Auth ────────────────────────────────────────────────
// Resolves credentials from the shared auth file (owned by an external login
// command), auto-refreshing expired OAuth tokens. The enclosing JSON object
// may contain unrelated entries and is preserved on write-back.
//
// Concurrency: token refresh is single-flight — one in-flight HTTPS refresh,
// all concurrent callers await it and re-read the result. Smoke-test state
// is per provider and survives until the next refresh.

use crate::atoms::constants::{ANTHROPIC_KEY_ENV, SKIP_SMOKE_TEST_ENV};
use crate::atoms::error::{CoreError, CoreResult};
use crate::atoms::types::{truncate_utf8, ProviderKind};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Auth-file key for the OpenAI OAuth entry.
const OPENAI_ENTRY: &str = "openai-codex";

/// Auth-file key for the Anthropic entry (env var takes precedence).
const ANTHROPIC_ENTRY: &str = "anthropic";

/// OAuth token endpoint for refresh grants.
const OPENAI_TOKEN_URL: &str = "https://auth.openai.com/oauth/token";

/// Used when the access token carries no client_id claim.
const FALLBACK_CLIENT_ID: &str = "app_hivecore_default_client";

/// Tokens within this window of expiry trigger a non-fatal warning.
const EXPIRY_WARN_MS: i64 = 24 * 60 * 60 * 1_000;

/// One provider's entry in the auth file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthEntry {
    pub access: String,
    #[serde(default)]
    pub refresh: String,
    /// Milliseconds since the epoch.
    #[serde(default)]
    pub expires: i64,
}

impl OAuthEntry {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires < now_ms
    }

    pub fn expires_soon(&self, now_ms: i64) -> bool {
        !self.is_expired(now_ms) && self.expires - now_ms < EXPIRY_WARN_MS
    }
}

/// Provider smoke-test progression. Failed blocks calls until a refresh
/// resets it.
#[derive(Debug, Clone)]
enum SmokeState {
    NotRun,
    Passed,
    Failed(String),
}

pub struct AuthManager {
    path: PathBuf,
    http: reqwest::Client,
    /// Single-flight guard for token refresh.
    refresh_lock: tokio::sync::Mutex<()>,
    /// HTTPS refresh requests actually issued (observability + tests).
    refresh_count: AtomicU64,
    /// Per-provider smoke gates. Holding the gate during the probe
    /// deduplicates concurrent first calls.
    smoke: [Arc<tokio::sync::Mutex<SmokeState>>; 2],
    skip_smoke: bool,
}

impl AuthManager {
    pub fn new(path: PathBuf, http: reqwest::Client, skip_smoke: bool) -> Self {
        let env_skip = std::env::var(SKIP_SMOKE_TEST_ENV).as_deref() == Ok("1");
        AuthManager {
            path,
            http,
            refresh_lock: tokio::sync::Mutex::new(()),
            refresh_count: AtomicU64::new(0),
            smoke: [
                Arc::new(tokio::sync::Mutex::new(SmokeState::NotRun)),
                Arc::new(tokio::sync::Mutex::new(SmokeState::NotRun)),
            ],
            skip_smoke: skip_smoke || env_skip,
        }
    }

    pub fn auth_path(&self) -> &PathBuf {
        &self.path
    }

    /// HTTPS refresh requests issued so far.
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::Relaxed)
    }

    // ── Auth file I/O ──────────────────────────────────────────────────────

    /// Read one provider's entry. Missing file or entry → Ok(None).
    pub fn read_entry(&self, key: &str) -> CoreResult<Option<OAuthEntry>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let root: Value = serde_json::from_str(&raw)?;
        match root.get(key) {
            Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
            None => Ok(None),
        }
    }

    /// Write one provider's entry, preserving every other key in the file.
    pub fn write_entry(&self, key: &str, entry: &OAuthEntry) -> CoreResult<()> {
        let mut root: Value = if self.path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&self.path)?)?
        } else {
            Value::Object(Default::default())
        };
        root[key] = serde_json::to_value(entry)?;
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&root)?)?;
        Ok(())
    }

    // ── Token resolution ───────────────────────────────────────────────────

    /// Resolve a valid OpenAI access token, refreshing if expired.
    pub async fn openai_access_token(&self) -> CoreResult<String> {
        let now = now_ms();
        let entry = self.read_entry(OPENAI_ENTRY)?.ok_or_else(|| {
            CoreError::AuthMissing(format!(
                "No '{}' credentials in {:?} — run the login command to authenticate",
                OPENAI_ENTRY, self.path
            ))
        })?;

        if entry.expires_soon(now) {
            warn!(
                "[auth] openai token expires in under 24h ({}ms left)",
                entry.expires - now
            );
        }
        if !entry.is_expired(now) {
            return Ok(entry.access);
        }

        self.refresh_openai(entry).await
    }

    /// Single-flight refresh: the first caller does the HTTPS exchange,
    /// everyone else blocks on the lock and then re-reads the fresh entry.
    async fn refresh_openai(&self, stale: OAuthEntry) -> CoreResult<String> {
        let _guard = self.refresh_lock.lock().await;

        // Double-check: a concurrent caller may have refreshed while we
        // waited for the lock.
        if let Some(current) = self.read_entry(OPENAI_ENTRY)? {
            if !current.is_expired(now_ms()) {
                return Ok(current.access);
            }
        }

        let client_id =
            client_id_from_jwt(&stale.access).unwrap_or_else(|| FALLBACK_CLIENT_ID.to_string());
        info!("[auth] Refreshing expired openai token");
        self.refresh_count.fetch_add(1, Ordering::Relaxed);

        let resp = self
            .http
            .post(OPENAI_TOKEN_URL)
            .json(&serde_json::json!({
                "grant_type": "refresh_token",
                "refresh_token": stale.refresh,
                "client_id": client_id,
            }))
            .send()
            .await
            .map_err(|e| CoreError::AuthRefreshFailed(format!("refresh request failed: {}", e)))?;

        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        if !(200..300).contains(&status) {
            return Err(CoreError::AuthRefreshFailed(format!(
                "refresh endpoint returned {}: {}",
                status,
                truncate_utf8(&body, 200)
            )));
        }

        let parsed: Value = serde_json::from_str(&body)
            .map_err(|e| CoreError::AuthRefreshFailed(format!("malformed refresh response: {}", e)))?;
        let access = parsed["access_token"]
            .as_str()
            .ok_or_else(|| CoreError::AuthRefreshFailed("refresh response missing access_token".into()))?
            .to_string();
        let refresh = parsed["refresh_token"]
            .as_str()
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(stale.refresh);
        let expires_in = parsed["expires_in"].as_i64().unwrap_or(3600);

        let fresh = OAuthEntry {
            access: access.clone(),
            refresh,
            expires: now_ms() + expires_in * 1_000,
        };
        self.write_entry(OPENAI_ENTRY, &fresh)?;

        // New credentials: the provider must re-validate.
        self.reset_smoke(ProviderKind::OpenAi).await;
        Ok(access)
    }

    /// Resolve the Anthropic key: environment first, then the auth file.
    pub fn anthropic_key(&self) -> CoreResult<String> {
        if let Ok(key) = std::env::var(ANTHROPIC_KEY_ENV) {
            if !key.is_empty() {
                return Ok(key);
            }
        }
        match self.read_entry(ANTHROPIC_ENTRY)? {
            Some(entry) => Ok(entry.access),
            None => Err(CoreError::AuthMissing(format!(
                "Set {} or add an '{}' entry to {:?}",
                ANTHROPIC_KEY_ENV, ANTHROPIC_ENTRY, self.path
            ))),
        }
    }

    // ── Smoke tests ────────────────────────────────────────────────────────

    /// Run the one-time provider validation behind a per-provider gate.
    /// `probe` issues the minimal completion; it runs at most once per
    /// process (per refresh). A recorded failure short-circuits every
    /// subsequent call until `reset_smoke`.
    pub async fn ensure_smoke<F, Fut>(&self, kind: ProviderKind, probe: F) -> CoreResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<String>>,
    {
        if self.skip_smoke {
            return Ok(());
        }
        let gate = self.smoke_gate(kind);
        let mut state = gate.lock().await;
        match state.clone() {
            SmokeState::Passed => return Ok(()),
            SmokeState::Failed(msg) => {
                return Err(CoreError::SmokeTestFailed {
                    provider: kind.as_str().into(),
                    message: msg,
                })
            }
            SmokeState::NotRun => {}
        }

        info!("[auth] Running {} smoke test", kind);
        match probe().await {
            Ok(text) if text.contains("AUTH_OK") => {
                *state = SmokeState::Passed;
                Ok(())
            }
            Ok(text) => {
                let msg = format!("unexpected reply: {}", truncate_utf8(&text, 100));
                *state = SmokeState::Failed(msg.clone());
                Err(CoreError::SmokeTestFailed {
                    provider: kind.as_str().into(),
                    message: msg,
                })
            }
            Err(e) => {
                let msg = e.to_string();
                *state = SmokeState::Failed(msg.clone());
                Err(CoreError::SmokeTestFailed {
                    provider: kind.as_str().into(),
                    message: msg,
                })
            }
        }
    }

    /// Forget the smoke verdict (called after a refresh brings new auth).
    pub async fn reset_smoke(&self, kind: ProviderKind) {
        *self.smoke_gate(kind).lock().await = SmokeState::NotRun;
    }

    fn smoke_gate(&self, kind: ProviderKind) -> Arc<tokio::sync::Mutex<SmokeState>> {
        let idx = match kind {
            ProviderKind::Anthropic => 0,
            ProviderKind::OpenAi => 1,
        };
        Arc::clone(&self.smoke[idx])
    }
}

/// Extract the `client_id` claim from a JWT's payload segment.
fn client_id_from_jwt(token: &str) -> Option<String> {
    let payload_b64 = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    claims["client_id"].as_str().map(|s| s.to_string())
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_at(path: PathBuf) -> AuthManager {
        AuthManager::new(path, reqwest::Client::new(), true)
    }

    fn fake_jwt(claims: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
        format!("{}.{}.sig", header, payload)
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_at(dir.path().join("auth.json"));
        assert!(mgr.read_entry(OPENAI_ENTRY).unwrap().is_none());
    }

    #[test]
    fn write_preserves_unrelated_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(&path, r#"{"other-tool": {"token": "keep-me"}}"#).unwrap();

        let mgr = manager_at(path.clone());
        let entry = OAuthEntry {
            access: "a".into(),
            refresh: "r".into(),
            expires: 123,
        };
        mgr.write_entry(OPENAI_ENTRY, &entry).unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["other-tool"]["token"], "keep-me");
        assert_eq!(raw[OPENAI_ENTRY]["access"], "a");

        let read = mgr.read_entry(OPENAI_ENTRY).unwrap().unwrap();
        assert_eq!(read.expires, 123);
    }

    #[test]
    fn expiry_windows() {
        let entry = OAuthEntry {
            access: "a".into(),
            refresh: "r".into(),
            expires: 1_000_000,
        };
        assert!(entry.is_expired(1_000_001));
        assert!(!entry.is_expired(999_999));
        // Inside the 24h warning window but not expired.
        assert!(entry.expires_soon(1_000_000 - 60_000));
        // Far from expiry.
        assert!(!entry.expires_soon(1_000_000 - 2 * EXPIRY_WARN_MS));
    }

    #[test]
    fn jwt_client_id_extraction() {
        let token = fake_jwt(&serde_json::json!({"client_id": "app_123", "sub": "u"}));
        assert_eq!(client_id_from_jwt(&token), Some("app_123".into()));

        let no_claim = fake_jwt(&serde_json::json!({"sub": "u"}));
        assert_eq!(client_id_from_jwt(&no_claim), None);
        assert_eq!(client_id_from_jwt("not-a-jwt"), None);
    }

    #[tokio::test]
    async fn missing_entry_is_auth_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_at(dir.path().join("auth.json"));
        let err = mgr.openai_access_token().await.unwrap_err();
        assert!(matches!(err, CoreError::AuthMissing(_)));
        assert!(err.to_string().contains("login"));
    }

    #[tokio::test]
    async fn valid_token_returned_without_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_at(dir.path().join("auth.json"));
        mgr.write_entry(
            OPENAI_ENTRY,
            &OAuthEntry {
                access: "live-token".into(),
                refresh: "r".into(),
                expires: now_ms() + 10 * EXPIRY_WARN_MS,
            },
        )
        .unwrap();
        assert_eq!(mgr.openai_access_token().await.unwrap(), "live-token");
        assert_eq!(mgr.refresh_count(), 0);
    }

    #[tokio::test]
    async fn smoke_gate_passes_caches_and_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = AuthManager::new(dir.path().join("auth.json"), reqwest::Client::new(), false);

        // First probe passes; second call never re-probes.
        let runs = Arc::new(AtomicU64::new(0));
        for _ in 0..2 {
            let counter = Arc::clone(&runs);
            mgr.ensure_smoke(ProviderKind::OpenAi, move || async move {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok("AUTH_OK".to_string())
            })
            .await
            .unwrap();
        }
        assert_eq!(runs.load(Ordering::Relaxed), 1);

        // Anthropic gate is independent and records failure.
        let err = mgr
            .ensure_smoke(ProviderKind::Anthropic, || async { Ok("huh?".to_string()) })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SmokeTestFailed { .. }));

        // Failure is sticky until reset: the probe must not run again.
        let reruns = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&reruns);
        let err = mgr
            .ensure_smoke(ProviderKind::Anthropic, move || async move {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok("AUTH_OK".to_string())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SmokeTestFailed { .. }));
        assert_eq!(reruns.load(Ordering::Relaxed), 0);

        mgr.reset_smoke(ProviderKind::Anthropic).await;
        mgr.ensure_smoke(ProviderKind::Anthropic, || async { Ok("AUTH_OK".to_string()) })
            .await
            .unwrap();
    }
}
