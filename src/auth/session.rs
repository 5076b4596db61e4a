//! Session lifecycle: login, validation with silent refresh, rotation,
//! logout.
//!
//! Per user the session moves `Anonymous → Authenticated → {Valid,
//! SilentlyRefreshed, Invalidated} → Anonymous`. Refresh tokens rotate on
//! every use: the presented token id is revoked before a replacement is
//! minted, and the compare-and-revoke in the [`RevocationStore`] guarantees
//! that two concurrent refreshes of the same token produce exactly one
//! winner.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::brute_force::BruteForceGuard;
use super::cookies::{CookieOptions, CookieStore, SameSite};
use super::device::{fingerprints_compatible, DeviceInfo};
use super::error::AuthError;
use super::revocation::{RefreshTokenRecord, RevocationStore};
use super::token::{Claims, TokenCodec, TokenForm, TokenIdentity};
use super::users::{verify_password, AuthUser, UserRepository};

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

const ACCESS_TTL_SECONDS: i64 = 15 * 60;
const REFRESH_TTL_BROWSER_SECONDS: i64 = 7 * 24 * 60 * 60;
const REFRESH_TTL_INSTALLED_SECONDS: i64 = 30 * 24 * 60 * 60;
/// Cookie lifetime padding over token expiry, tolerating client clock skew.
const COOKIE_GRACE_SECONDS: i64 = 60;

/// TTL and cookie policy. Defaults match production; tests shorten the
/// failure delay.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub access_ttl_seconds: i64,
    pub refresh_ttl_browser_seconds: i64,
    pub refresh_ttl_installed_seconds: i64,
    pub cookie_grace_seconds: i64,
    /// Flat pause after any failed login, blunting timing-based enumeration.
    pub failure_delay: Duration,
    pub secure_cookies: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            access_ttl_seconds: ACCESS_TTL_SECONDS,
            refresh_ttl_browser_seconds: REFRESH_TTL_BROWSER_SECONDS,
            refresh_ttl_installed_seconds: REFRESH_TTL_INSTALLED_SECONDS,
            cookie_grace_seconds: COOKIE_GRACE_SECONDS,
            failure_delay: Duration::from_secs(1),
            secure_cookies: false,
        }
    }
}

impl SessionPolicy {
    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }
}

/// Derived per-request session; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Refresh-token id this session descends from.
    pub id: String,
    pub user_id: Uuid,
    pub fingerprint: String,
    pub installed: bool,
    pub expires_at: i64,
    /// True when this request silently rotated the tokens.
    pub refreshed: bool,
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: AuthUser,
    pub session_id: String,
    pub installed: bool,
}

pub struct SessionBroker {
    codec: TokenCodec,
    revocations: Arc<dyn RevocationStore>,
    users: Arc<dyn UserRepository>,
    guard: Arc<BruteForceGuard>,
    policy: SessionPolicy,
}

impl SessionBroker {
    #[must_use]
    pub fn new(
        codec: TokenCodec,
        revocations: Arc<dyn RevocationStore>,
        users: Arc<dyn UserRepository>,
        guard: Arc<BruteForceGuard>,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            codec,
            revocations,
            users,
            guard,
            policy,
        }
    }

    /// Authenticate `identifier`/`password` and establish a session.
    ///
    /// # Errors
    /// `RateLimited` when the identifier is locked out, `InvalidCredentials`
    /// for every credential failure (unknown user, bad password, inactive
    /// account — indistinguishable by design), `Internal` on storage faults.
    pub async fn login(
        &self,
        cookies: &mut dyn CookieStore,
        device: &DeviceInfo,
        identifier: &str,
        password: &str,
    ) -> Result<LoginOutcome, AuthError> {
        if let Err(retry_after) = self.guard.check(identifier).await {
            return Err(AuthError::RateLimited {
                retry_after_seconds: retry_after.as_secs().max(1),
            });
        }

        let record = self
            .users
            .find_for_login(identifier)
            .await
            .context("login lookup failed")?;

        let user = match record {
            Some(record)
                if record.user.active && verify_password(&record.password_hash, password) =>
            {
                record.user
            }
            _ => {
                self.guard.record_failure(identifier).await;
                tokio::time::sleep(self.policy.failure_delay).await;
                return Err(AuthError::InvalidCredentials);
            }
        };

        self.guard.record_success(identifier).await;

        let identity = self.identity_for(user.id, device);
        let refresh_ttl = self.refresh_ttl(device.installed);

        let refresh = self
            .codec
            .sign_refresh(&identity, refresh_ttl, TokenForm::Plain);
        let access = self.codec.sign(
            &identity,
            self.policy.access_ttl_seconds,
            Some(refresh.jti.clone()),
            TokenForm::Plain,
        );

        self.revocations
            .insert(&RefreshTokenRecord {
                jti: refresh.jti.clone(),
                user_id: user.id,
                fingerprint: device.fingerprint.clone(),
                expires_at: refresh.exp,
                revoked: false,
            })
            .await
            .context("failed to persist refresh token")?;

        self.set_session_cookies(
            cookies,
            &access.token.to_wire(),
            &refresh.token.to_wire(),
            refresh_ttl,
        );

        debug!(user_id = %user.id, session_id = %refresh.jti, installed = device.installed, "login succeeded");

        Ok(LoginOutcome {
            session_id: refresh.jti,
            installed: device.installed,
            user,
        })
    }

    /// Resolve the current session, silently refreshing when the access
    /// token is absent or invalid. `None` means anonymous.
    ///
    /// # Errors
    /// Only storage faults propagate; token failures collapse to `None`.
    pub async fn get_session(
        &self,
        cookies: &mut dyn CookieStore,
        device: &DeviceInfo,
    ) -> Result<Option<(AuthUser, Session)>, AuthError> {
        let verified = cookies
            .get(ACCESS_COOKIE)
            .and_then(|token| self.codec.verify(&token, None));

        let (claims, refreshed) = match verified {
            Some(claims) => (claims, false),
            None => match self.refresh(cookies, device).await? {
                Some(claims) => (claims, true),
                None => return Ok(None),
            },
        };

        let user = self
            .users
            .find_by_id(claims.sub)
            .await
            .context("session user lookup failed")?;

        let user = match user {
            Some(user) if user.active => user,
            _ => {
                // Deactivated mid-session: drop the access token and treat
                // the caller as anonymous.
                cookies.delete(ACCESS_COOKIE);
                return Ok(None);
            }
        };

        let session = Session {
            id: claims.jti.clone().unwrap_or_default(),
            user_id: claims.sub,
            fingerprint: claims.fp,
            installed: claims.installed,
            expires_at: claims.exp,
            refreshed,
        };

        Ok(Some((user, session)))
    }

    /// Rotate the refresh token and mint a new access token.
    ///
    /// Returns the claims of the new access token, or `None` when the
    /// refresh token is missing, invalid, revoked, replayed, or bound to an
    /// incompatible device.
    ///
    /// # Errors
    /// Only storage faults propagate.
    pub async fn refresh(
        &self,
        cookies: &mut dyn CookieStore,
        device: &DeviceInfo,
    ) -> Result<Option<Claims>, AuthError> {
        let Some(token) = cookies.get(REFRESH_COOKIE) else {
            return Ok(None);
        };

        let Some(claims) = self.codec.verify(&token, None) else {
            cookies.delete(REFRESH_COOKIE);
            return Ok(None);
        };
        let Some(jti) = claims.jti.clone() else {
            cookies.delete(REFRESH_COOKIE);
            return Ok(None);
        };

        let active = self
            .revocations
            .is_active(&jti)
            .await
            .context("refresh token state check failed")?;
        if !active {
            warn!(user_id = %claims.sub, jti, "refresh token replayed or revoked");
            cookies.delete(REFRESH_COOKIE);
            return Ok(None);
        }

        if !fingerprints_compatible(&claims.fp, &device.fingerprint, claims.installed) {
            // Browser sessions bind hard to the device; treat a mismatch as
            // theft and burn the token.
            warn!(user_id = %claims.sub, jti, "refresh fingerprint mismatch, revoking");
            let _ = self.revocations.revoke(&jti).await;
            cookies.delete(ACCESS_COOKIE);
            cookies.delete(REFRESH_COOKIE);
            return Ok(None);
        }
        if claims.fp != device.fingerprint {
            warn!(user_id = %claims.sub, jti, "installed-app fingerprint drift tolerated");
        }

        // Rotation: revoking the old id is the commit point. Losing the
        // compare-and-revoke race means another request already rotated this
        // token; do not mint and do not clobber its cookies.
        let rotated = self
            .revocations
            .revoke(&jti)
            .await
            .context("refresh token rotation failed")?;
        if !rotated {
            warn!(user_id = %claims.sub, jti, "lost refresh rotation race");
            return Ok(None);
        }

        let identity = TokenIdentity {
            sub: claims.sub,
            fingerprint: device.fingerprint.clone(),
            pwa: claims.pwa,
            installed: claims.installed,
        };
        let refresh_ttl = self.refresh_ttl(claims.installed);

        let new_refresh = self
            .codec
            .sign_refresh(&identity, refresh_ttl, TokenForm::Plain);
        let new_access = self.codec.sign(
            &identity,
            self.policy.access_ttl_seconds,
            Some(new_refresh.jti.clone()),
            TokenForm::Plain,
        );

        self.revocations
            .insert(&RefreshTokenRecord {
                jti: new_refresh.jti.clone(),
                user_id: claims.sub,
                fingerprint: device.fingerprint.clone(),
                expires_at: new_refresh.exp,
                revoked: false,
            })
            .await
            .context("failed to persist rotated refresh token")?;

        self.set_session_cookies(
            cookies,
            &new_access.token.to_wire(),
            &new_refresh.token.to_wire(),
            refresh_ttl,
        );

        let access_claims = self
            .codec
            .verify(&new_access.token.to_wire(), None)
            .context("freshly minted access token failed verification")?;

        debug!(user_id = %claims.sub, old = jti, new = new_refresh.jti, "refresh rotation complete");

        Ok(Some(access_claims))
    }

    /// End the current session. The refresh cookie is decoded (not
    /// verified) so even an expired token still gets its id revoked; both
    /// cookies are deleted regardless.
    pub async fn logout(&self, cookies: &mut dyn CookieStore) {
        if let Some(jti) = cookies
            .get(REFRESH_COOKIE)
            .and_then(|token| self.codec.decode(&token))
            .and_then(|claims| claims.jti)
        {
            if let Err(err) = self.revocations.revoke(&jti).await {
                warn!(jti, "failed to revoke refresh token on logout: {err}");
            }
        }
        cookies.delete(ACCESS_COOKIE);
        cookies.delete(REFRESH_COOKIE);
    }

    /// Revoke every session of `user_id` and clear stored device tokens.
    ///
    /// # Errors
    /// Propagates storage faults; cookies are deleted regardless.
    pub async fn logout_all(
        &self,
        cookies: &mut dyn CookieStore,
        user_id: Uuid,
    ) -> Result<(), AuthError> {
        let revoked = self
            .revocations
            .revoke_all(user_id)
            .await
            .context("failed to revoke user sessions");

        if let Err(err) = self.users.clear_device_tokens(user_id).await {
            warn!(user_id = %user_id, "failed to clear device tokens: {err}");
        }

        cookies.delete(ACCESS_COOKIE);
        cookies.delete(REFRESH_COOKIE);

        let count = revoked?;
        debug!(user_id = %user_id, count, "logout-all complete");
        Ok(())
    }

    fn identity_for(&self, sub: Uuid, device: &DeviceInfo) -> TokenIdentity {
        TokenIdentity {
            sub,
            fingerprint: device.fingerprint.clone(),
            pwa: device.display_mode == "standalone",
            installed: device.installed,
        }
    }

    fn refresh_ttl(&self, installed: bool) -> i64 {
        if installed {
            self.policy.refresh_ttl_installed_seconds
        } else {
            self.policy.refresh_ttl_browser_seconds
        }
    }

    fn set_session_cookies(
        &self,
        cookies: &mut dyn CookieStore,
        access: &str,
        refresh: &str,
        refresh_ttl: i64,
    ) {
        let grace = self.policy.cookie_grace_seconds;
        cookies.set(
            ACCESS_COOKIE,
            access,
            &CookieOptions::new(self.policy.access_ttl_seconds + grace)
                .same_site(SameSite::Lax)
                .secure(self.policy.secure_cookies),
        );
        cookies.set(
            REFRESH_COOKIE,
            refresh,
            &CookieOptions::new(refresh_ttl + grace)
                .same_site(SameSite::Strict)
                .secure(self.policy.secure_cookies),
        );
    }

    #[cfg(test)]
    pub(crate) fn codec(&self) -> &TokenCodec {
        &self.codec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::cookies::RequestCookies;
    use crate::auth::device::fingerprint;
    use crate::auth::revocation::MemoryRevocationStore;
    use crate::auth::users::test_support::{login_record, MemoryUserRepository};
    use crate::auth::users::LoginRecord;

    const BROWSER_UA: &str =
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 Chrome/120.0 Safari/537.36";
    const WEBVIEW_UA: &str =
        "Mozilla/5.0 (Linux; Android 13; Pixel 7; wv) AppleWebKit/537.36 Chrome/120.0";

    fn browser_device(width: u32) -> DeviceInfo {
        DeviceInfo {
            fingerprint: fingerprint(BROWSER_UA, "browser", Some(width), false),
            user_agent: BROWSER_UA.to_string(),
            display_mode: "browser".to_string(),
            viewport_width: Some(width),
            installed: false,
        }
    }

    fn installed_device(width: u32) -> DeviceInfo {
        DeviceInfo {
            fingerprint: fingerprint(WEBVIEW_UA, "standalone", Some(width), true),
            user_agent: WEBVIEW_UA.to_string(),
            display_mode: "standalone".to_string(),
            viewport_width: Some(width),
            installed: true,
        }
    }

    struct Harness {
        broker: Arc<SessionBroker>,
        revocations: Arc<MemoryRevocationStore>,
        users: Arc<MemoryUserRepository>,
    }

    fn harness(records: Vec<LoginRecord>) -> Harness {
        let revocations = Arc::new(MemoryRevocationStore::new());
        let users = Arc::new(MemoryUserRepository::new(records));
        let policy = SessionPolicy {
            failure_delay: Duration::from_millis(0),
            ..SessionPolicy::default()
        };
        let broker = Arc::new(SessionBroker::new(
            TokenCodec::new("signing-secret", "encryption-secret").expect("codec"),
            revocations.clone(),
            users.clone(),
            BruteForceGuard::new(),
            policy,
        ));
        Harness {
            broker,
            revocations,
            users,
        }
    }

    fn teacher() -> Vec<LoginRecord> {
        vec![login_record("ada@school.example", "ada", "pa55word", true)]
    }

    #[tokio::test]
    async fn login_issues_verifiable_tokens_and_persists_refresh_id() {
        let h = harness(teacher());
        let mut cookies = RequestCookies::default();
        let device = browser_device(1920);

        let outcome = h
            .broker
            .login(&mut cookies, &device, "ada@school.example", "pa55word")
            .await
            .expect("login");

        let access = cookies.get(ACCESS_COOKIE).expect("access cookie");
        let claims = h.broker.codec().verify(&access, None).expect("verifies");
        assert_eq!(claims.sub, outcome.user.id);
        assert_eq!(claims.jti.as_deref(), Some(outcome.session_id.as_str()));

        assert!(h
            .revocations
            .is_active(&outcome.session_id)
            .await
            .expect("store"));
    }

    #[tokio::test]
    async fn login_by_username_works() {
        let h = harness(teacher());
        let mut cookies = RequestCookies::default();
        let outcome = h
            .broker
            .login(&mut cookies, &browser_device(1920), "ada", "pa55word")
            .await
            .expect("login");
        assert_eq!(outcome.user.username, "ada");
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let h = harness(vec![
            login_record("ada@school.example", "ada", "pa55word", true),
            login_record("off@school.example", "off", "pa55word", false),
        ]);
        let device = browser_device(1920);

        for (identifier, password) in [
            ("ada@school.example", "wrong"),
            ("ghost@school.example", "pa55word"),
            ("off@school.example", "pa55word"),
        ] {
            let mut cookies = RequestCookies::default();
            let err = h
                .broker
                .login(&mut cookies, &device, identifier, password)
                .await
                .expect_err("must fail");
            assert!(matches!(err, AuthError::InvalidCredentials));
            assert!(cookies.pending().is_empty(), "no cookies on failure");
        }
    }

    #[tokio::test]
    async fn fifth_failure_reports_invalid_sixth_reports_rate_limited() {
        let h = harness(teacher());
        let device = browser_device(1920);

        for attempt in 1..=5 {
            let mut cookies = RequestCookies::default();
            let err = h
                .broker
                .login(&mut cookies, &device, "ada@school.example", "wrong")
                .await
                .expect_err("fails");
            assert!(
                matches!(err, AuthError::InvalidCredentials),
                "attempt {attempt} still reports invalid credentials"
            );
        }

        let mut cookies = RequestCookies::default();
        let err = h
            .broker
            .login(&mut cookies, &device, "ada@school.example", "pa55word")
            .await
            .expect_err("locked");
        match err {
            AuthError::RateLimited {
                retry_after_seconds,
            } => assert!(retry_after_seconds > 0),
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_session_returns_user_right_after_login() {
        let h = harness(teacher());
        let mut cookies = RequestCookies::default();
        let device = browser_device(1920);

        let outcome = h
            .broker
            .login(&mut cookies, &device, "ada@school.example", "pa55word")
            .await
            .expect("login");

        let (user, session) = h
            .broker
            .get_session(&mut cookies, &device)
            .await
            .expect("no fault")
            .expect("authenticated");
        assert_eq!(user.id, outcome.user.id);
        assert_eq!(session.id, outcome.session_id);
        assert!(!session.refreshed);
    }

    #[tokio::test]
    async fn expired_access_token_triggers_silent_refresh() {
        let h = harness(teacher());
        let mut cookies = RequestCookies::default();
        let device = browser_device(1920);

        let outcome = h
            .broker
            .login(&mut cookies, &device, "ada@school.example", "pa55word")
            .await
            .expect("login");

        // Swap in an access token whose exp is already in the past.
        let identity = TokenIdentity {
            sub: outcome.user.id,
            fingerprint: device.fingerprint.clone(),
            pwa: false,
            installed: false,
        };
        let expired = h
            .broker
            .codec()
            .sign(&identity, -30, Some(outcome.session_id.clone()), TokenForm::Plain);
        cookies.set(
            ACCESS_COOKIE,
            &expired.token.to_wire(),
            &CookieOptions::new(60),
        );

        let (user, session) = h
            .broker
            .get_session(&mut cookies, &device)
            .await
            .expect("no fault")
            .expect("refreshed session");
        assert_eq!(user.id, outcome.user.id);
        assert!(session.refreshed);
        assert_ne!(session.id, outcome.session_id, "rotation changed the id");

        // The original refresh token is now revoked.
        assert!(!h
            .revocations
            .is_active(&outcome.session_id)
            .await
            .expect("store"));
    }

    #[tokio::test]
    async fn rotated_refresh_token_is_rejected_on_replay() {
        let h = harness(teacher());
        let mut cookies = RequestCookies::default();
        let device = browser_device(1920);

        h.broker
            .login(&mut cookies, &device, "ada@school.example", "pa55word")
            .await
            .expect("login");
        let stolen = cookies.get(REFRESH_COOKIE).expect("refresh cookie");

        assert!(h
            .broker
            .refresh(&mut cookies, &device)
            .await
            .expect("no fault")
            .is_some());

        // Replay the pre-rotation token from a fresh request.
        let mut replay = RequestCookies::default();
        replay.set(REFRESH_COOKIE, &stolen, &CookieOptions::new(60));
        assert!(h
            .broker
            .refresh(&mut replay, &device)
            .await
            .expect("no fault")
            .is_none());
    }

    #[tokio::test]
    async fn concurrent_refreshes_rotate_exactly_once() {
        let h = harness(teacher());
        let mut cookies = RequestCookies::default();
        let device = browser_device(1920);

        h.broker
            .login(&mut cookies, &device, "ada@school.example", "pa55word")
            .await
            .expect("login");
        let token = cookies.get(REFRESH_COOKIE).expect("refresh cookie");

        let mut handles = Vec::new();
        for _ in 0..6 {
            let broker = Arc::clone(&h.broker);
            let device = device.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                let mut cookies = RequestCookies::default();
                cookies.set(REFRESH_COOKIE, &token, &CookieOptions::new(60));
                broker
                    .refresh(&mut cookies, &device)
                    .await
                    .expect("no fault")
                    .is_some()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.expect("join") {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn browser_fingerprint_mismatch_is_fatal() {
        let h = harness(teacher());
        let mut cookies = RequestCookies::default();

        let outcome = h
            .broker
            .login(&mut cookies, &browser_device(1920), "ada@school.example", "pa55word")
            .await
            .expect("login");

        // Same UA, different viewport: exact-match rule fails for browsers.
        let drifted = browser_device(390);
        assert!(h
            .broker
            .refresh(&mut cookies, &drifted)
            .await
            .expect("no fault")
            .is_none());
        assert!(!h
            .revocations
            .is_active(&outcome.session_id)
            .await
            .expect("store"));
    }

    #[tokio::test]
    async fn installed_app_fingerprint_drift_is_tolerated() {
        let h = harness(teacher());
        let mut cookies = RequestCookies::default();

        h.broker
            .login(&mut cookies, &installed_device(412), "ada@school.example", "pa55word")
            .await
            .expect("login");

        let drifted = installed_device(915);
        let claims = h
            .broker
            .refresh(&mut cookies, &drifted)
            .await
            .expect("no fault")
            .expect("tolerated");
        assert_eq!(claims.fp, drifted.fingerprint, "new baseline fingerprint");
        assert!(claims.installed);
    }

    #[tokio::test]
    async fn inactive_user_session_is_dropped() {
        let mut records = teacher();
        records.push(login_record("off@school.example", "off", "pa55word", false));
        let h = harness(records);
        let device = browser_device(1920);

        // Mint a session for the inactive user directly; login would refuse.
        let inactive_id = h
            .users
            .find_for_login("off")
            .await
            .expect("lookup")
            .expect("record")
            .user
            .id;
        let identity = TokenIdentity {
            sub: inactive_id,
            fingerprint: device.fingerprint.clone(),
            pwa: false,
            installed: false,
        };
        let access = h
            .broker
            .codec()
            .sign(&identity, 900, Some("sess".to_string()), TokenForm::Plain);

        let mut cookies = RequestCookies::default();
        cookies.set(ACCESS_COOKIE, &access.token.to_wire(), &CookieOptions::new(960));

        assert!(h
            .broker
            .get_session(&mut cookies, &device)
            .await
            .expect("no fault")
            .is_none());
    }

    #[tokio::test]
    async fn logout_revokes_even_expired_refresh_tokens() {
        let h = harness(teacher());
        let mut cookies = RequestCookies::default();
        let device = browser_device(1920);

        let outcome = h
            .broker
            .login(&mut cookies, &device, "ada@school.example", "pa55word")
            .await
            .expect("login");

        // Replace the refresh cookie with an expired token carrying the
        // same id; logout decodes rather than verifies.
        let identity = TokenIdentity {
            sub: outcome.user.id,
            fingerprint: device.fingerprint.clone(),
            pwa: false,
            installed: false,
        };
        let expired = h.broker.codec().sign(
            &identity,
            -30,
            Some(outcome.session_id.clone()),
            TokenForm::Plain,
        );
        cookies.set(REFRESH_COOKIE, &expired.token.to_wire(), &CookieOptions::new(60));

        h.broker.logout(&mut cookies).await;

        assert!(!h
            .revocations
            .is_active(&outcome.session_id)
            .await
            .expect("store"));
        assert_eq!(cookies.get(ACCESS_COOKIE), None);
        assert_eq!(cookies.get(REFRESH_COOKIE), None);
    }

    #[tokio::test]
    async fn logout_all_revokes_every_session_and_clears_device_tokens() {
        let h = harness(teacher());
        let device = browser_device(1920);

        let mut first = RequestCookies::default();
        let outcome = h
            .broker
            .login(&mut first, &device, "ada@school.example", "pa55word")
            .await
            .expect("login");
        let mut second = RequestCookies::default();
        let other = h
            .broker
            .login(&mut second, &device, "ada@school.example", "pa55word")
            .await
            .expect("login");

        h.broker
            .logout_all(&mut first, outcome.user.id)
            .await
            .expect("logout all");

        assert!(!h.revocations.is_active(&outcome.session_id).await.expect("store"));
        assert!(!h.revocations.is_active(&other.session_id).await.expect("store"));
        assert!(h.users.device_tokens_cleared(outcome.user.id).await);
    }
}
