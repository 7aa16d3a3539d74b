//! TOTP second factor.
//!
//! ```text
//! Unconfigured --begin_setup--> PendingVerification --confirm_setup--> Active
//!      ^                                                                 |
//!      +------------------------------ disable --------------------------+
//! ```
//!
//! A pending secret lives only in this process, keyed by user, until it is
//! confirmed or expires. Confirming commits it to the caller's [`OtpRecord`],
//! which encrypts it when converted for storage.
//!
//! Each login attempt is checked in order against the replay guard (the most
//! recent success used the same code in the same time-step), the rate limiter
//! (too many failures in the window), then the code itself. Replay and rate
//! limiting both answer [`Verification::Throttled`]. Every attempt is
//! appended to the [`AuthLog`], which is the only state those checks read.
//! Throttled attempts are logged with their own flag and do not count
//! toward the failure limit.

pub mod log;
pub mod record;
pub mod totp;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::error::{Result, TipguardError};

pub use log::{AuthLog, AuthenticationLogEntry, MemoryAuthLog, SqliteAuthLog};
pub use record::{OtpRecord, StoredOtpRecord, TOTP_SECRET_DOMAIN};

/// Where a user is in the two-factor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwoFactorState {
    Unconfigured,
    PendingVerification,
    Active,
}

/// Outcome of one login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Accepted,
    WrongCode,
    /// Replay or rate limit. The two are deliberately indistinguishable.
    Throttled,
}

/// Limits applied to setup and login.
#[derive(Debug, Clone)]
pub struct TwoFactorPolicy {
    /// Failures within `failure_window` at which further attempts are throttled.
    /// Attempts answered with [`Verification::Throttled`] are not failures.
    pub max_failures: u32,
    pub failure_window: Duration,
    /// Time-steps accepted either side of the current one
    pub skew_steps: u64,
    /// How long an unconfirmed setup secret survives
    pub pending_ttl: Duration,
    /// Issuer shown in authenticator apps
    pub issuer: String,
}

impl Default for TwoFactorPolicy {
    fn default() -> Self {
        Self {
            max_failures: 5,
            failure_window: Duration::seconds(30),
            skew_steps: 1,
            pending_ttl: Duration::minutes(10),
            issuer: crate::config::DEFAULT_APP_NAME.to_string(),
        }
    }
}

/// Secret and enrolment URI handed to the user during setup.
pub struct SetupChallenge {
    pub secret: Zeroizing<String>,
    pub provisioning_uri: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for SetupChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetupChallenge")
            .field("secret", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

struct PendingSecret {
    secret: Zeroizing<String>,
    expires_at: DateTime<Utc>,
}

/// Two-factor state machine over an authentication log.
pub struct TwoFactor<L: AuthLog> {
    log: L,
    policy: TwoFactorPolicy,
    pending: Mutex<HashMap<i64, PendingSecret>>,
}

impl<L: AuthLog> TwoFactor<L> {
    pub fn new(log: L) -> Self {
        Self::with_policy(log, TwoFactorPolicy::default())
    }

    pub fn with_policy(log: L, policy: TwoFactorPolicy) -> Self {
        Self {
            log,
            policy,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn policy(&self) -> &TwoFactorPolicy {
        &self.policy
    }

    pub fn state(&self, record: &OtpRecord) -> Result<TwoFactorState> {
        self.state_at(record, Utc::now())
    }

    pub fn state_at(&self, record: &OtpRecord, now: DateTime<Utc>) -> Result<TwoFactorState> {
        if record.is_committed() {
            return Ok(TwoFactorState::Active);
        }
        let mut pending = self.lock_pending()?;
        Ok(match Self::live_pending(&mut pending, record.user_id(), now) {
            Some(_) => TwoFactorState::PendingVerification,
            None => TwoFactorState::Unconfigured,
        })
    }

    /// Start setup with a fresh secret. Any earlier pending secret is replaced.
    pub fn begin_setup(&self, record: &OtpRecord, account: &str) -> Result<SetupChallenge> {
        self.begin_setup_at(record, account, Utc::now())
    }

    pub fn begin_setup_at(
        &self,
        record: &OtpRecord,
        account: &str,
        now: DateTime<Utc>,
    ) -> Result<SetupChallenge> {
        if record.is_committed() {
            return Err(TipguardError::Validation(
                "Two-factor authentication is already enabled".to_string(),
            ));
        }
        let secret = totp::generate_secret()?;
        let expires_at = now + self.policy.pending_ttl;
        let provisioning_uri = totp::provisioning_uri(&secret, account, &self.policy.issuer)?;

        let mut pending = self.lock_pending()?;
        pending.retain(|_, entry| entry.expires_at > now);
        pending.insert(
            record.user_id(),
            PendingSecret {
                secret: secret.clone(),
                expires_at,
            },
        );
        info!(user_id = record.user_id(), "Two-factor setup started");

        Ok(SetupChallenge {
            secret,
            provisioning_uri,
            expires_at,
        })
    }

    /// Check `code` against the pending secret and commit it on success.
    ///
    /// A wrong code returns `Ok(false)` and leaves the setup pending.
    pub fn confirm_setup(&self, record: &mut OtpRecord, code: &str) -> Result<bool> {
        self.confirm_setup_at(record, code, Utc::now())
    }

    pub fn confirm_setup_at(
        &self,
        record: &mut OtpRecord,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut pending = self.lock_pending()?;
        let secret = Self::live_pending(&mut pending, record.user_id(), now)
            .ok_or_else(|| TipguardError::Validation("No pending two-factor setup".to_string()))?;

        let key = totp::decode_secret(secret)?;
        if !totp::verify(&key, code, unix_secs(now), self.policy.skew_steps) {
            return Ok(false);
        }

        if let Some(confirmed) = pending.remove(&record.user_id()) {
            record.commit(confirmed.secret);
        }
        info!(user_id = record.user_id(), "Two-factor authentication enabled");
        Ok(true)
    }

    /// Verify a login code for an account with two-factor enabled.
    pub fn verify_login(&self, record: &OtpRecord, code: &str) -> Result<Verification> {
        self.verify_login_at(record, code, Utc::now())
    }

    pub fn verify_login_at(
        &self,
        record: &OtpRecord,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Verification> {
        let user_id = record.user_id();
        let secret = record.secret().ok_or_else(|| {
            TipguardError::Validation("Two-factor authentication is not enabled".to_string())
        })?;
        let step = step_of(now);

        if self.is_replay(user_id, code, step)? || self.is_rate_limited(user_id, now)? {
            warn!(user_id, "Two-factor attempt throttled");
            self.log
                .append(&AuthenticationLogEntry::throttled(user_id, now))?;
            return Ok(Verification::Throttled);
        }

        let key = totp::decode_secret(secret)?;
        if totp::verify(&key, code, unix_secs(now), self.policy.skew_steps) {
            self.log
                .append(&AuthenticationLogEntry::success(user_id, code, step, now))?;
            Ok(Verification::Accepted)
        } else {
            self.log
                .append(&AuthenticationLogEntry::failure(user_id, now))?;
            Ok(Verification::WrongCode)
        }
    }

    /// Turn two-factor off, dropping the committed and any pending secret.
    pub fn disable(&self, record: &mut OtpRecord) -> Result<()> {
        record.clear();
        self.lock_pending()?.remove(&record.user_id());
        info!(user_id = record.user_id(), "Two-factor authentication disabled");
        Ok(())
    }

    fn is_replay(&self, user_id: i64, code: &str, step: u64) -> Result<bool> {
        Ok(self.log.last_success(user_id)?.is_some_and(|last| {
            last.time_step == Some(step) && last.otp_code.as_deref() == Some(code)
        }))
    }

    fn is_rate_limited(&self, user_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let since = now - self.policy.failure_window;
        Ok(self.log.failures_since(user_id, since)? >= self.policy.max_failures)
    }

    fn lock_pending(&self) -> Result<MutexGuard<'_, HashMap<i64, PendingSecret>>> {
        self.pending
            .lock()
            .map_err(|_| TipguardError::Storage("Pending setup store poisoned".to_string()))
    }

    /// The unexpired pending secret for `user_id`, dropping an expired one.
    fn live_pending<'a>(
        pending: &'a mut HashMap<i64, PendingSecret>,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Option<&'a str> {
        if pending
            .get(&user_id)
            .is_some_and(|entry| entry.expires_at <= now)
        {
            pending.remove(&user_id);
        }
        pending.get(&user_id).map(|entry| entry.secret.as_str())
    }
}

fn unix_secs(now: DateTime<Utc>) -> u64 {
    now.timestamp().max(0) as u64
}

fn step_of(now: DateTime<Utc>) -> u64 {
    totp::time_step(unix_secs(now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        // Start of a time-step, so +/- a few seconds stays in it
        Utc.timestamp_opt(1_700_000_010 + secs, 0).unwrap()
    }

    fn code_for(secret: &str, now: DateTime<Utc>) -> String {
        let key = totp::decode_secret(secret).unwrap();
        totp::code_at(&key, now.timestamp() as u64).unwrap()
    }

    fn enrolled(two_factor: &TwoFactor<MemoryAuthLog>) -> (OtpRecord, String) {
        let mut record = OtpRecord::new(1).unwrap();
        let challenge = two_factor.begin_setup_at(&record, "alice", at(0)).unwrap();
        let secret = challenge.secret.to_string();
        assert!(two_factor
            .confirm_setup_at(&mut record, &code_for(&secret, at(0)), at(0))
            .unwrap());
        (record, secret)
    }

    #[test]
    fn test_setup_lifecycle() {
        let two_factor = TwoFactor::new(MemoryAuthLog::new());
        let mut record = OtpRecord::new(1).unwrap();
        assert_eq!(
            two_factor.state_at(&record, at(0)).unwrap(),
            TwoFactorState::Unconfigured
        );

        let challenge = two_factor.begin_setup_at(&record, "alice", at(0)).unwrap();
        assert!(challenge.provisioning_uri.starts_with("otpauth://totp/"));
        assert_eq!(
            two_factor.state_at(&record, at(0)).unwrap(),
            TwoFactorState::PendingVerification
        );
        assert!(!record.is_committed());

        let valid = code_for(&challenge.secret, at(0));
        let wrong = if valid == "123456" { "654321" } else { "123456" };
        assert!(!two_factor
            .confirm_setup_at(&mut record, wrong, at(0))
            .unwrap());
        assert_eq!(
            two_factor.state_at(&record, at(1)).unwrap(),
            TwoFactorState::PendingVerification
        );

        let code = code_for(&challenge.secret, at(1));
        assert!(two_factor.confirm_setup_at(&mut record, &code, at(1)).unwrap());
        assert_eq!(
            two_factor.state_at(&record, at(1)).unwrap(),
            TwoFactorState::Active
        );

        two_factor.disable(&mut record).unwrap();
        assert_eq!(
            two_factor.state_at(&record, at(2)).unwrap(),
            TwoFactorState::Unconfigured
        );
    }

    #[test]
    fn test_pending_secret_expires() {
        let two_factor = TwoFactor::new(MemoryAuthLog::new());
        let mut record = OtpRecord::new(1).unwrap();
        let challenge = two_factor.begin_setup_at(&record, "alice", at(0)).unwrap();
        let later = at(0) + Duration::minutes(10);
        assert_eq!(
            two_factor.state_at(&record, later).unwrap(),
            TwoFactorState::Unconfigured
        );
        let code = code_for(&challenge.secret, later);
        assert!(matches!(
            two_factor.confirm_setup_at(&mut record, &code, later),
            Err(TipguardError::Validation(_))
        ));
    }

    #[test]
    fn test_setup_rejected_when_active() {
        let two_factor = TwoFactor::new(MemoryAuthLog::new());
        let (record, _) = enrolled(&two_factor);
        assert!(two_factor.begin_setup_at(&record, "alice", at(5)).is_err());
    }

    #[test]
    fn test_login_accepts_valid_code_and_logs() {
        let two_factor = TwoFactor::new(MemoryAuthLog::new());
        let (record, secret) = enrolled(&two_factor);
        let now = at(40);
        assert_eq!(
            two_factor
                .verify_login_at(&record, &code_for(&secret, now), now)
                .unwrap(),
            Verification::Accepted
        );
        let last = two_factor.log().last_success(1).unwrap().unwrap();
        assert_eq!(last.time_step, Some(step_of(now)));
    }

    #[test]
    fn test_wrong_and_malformed_codes() {
        let two_factor = TwoFactor::new(MemoryAuthLog::new());
        let (record, secret) = enrolled(&two_factor);
        let now = at(40);
        let valid = code_for(&secret, now);
        let wrong = if valid == "123456" { "654321" } else { "123456" };
        assert_eq!(
            two_factor.verify_login_at(&record, wrong, now).unwrap(),
            Verification::WrongCode
        );
        assert_eq!(
            two_factor.verify_login_at(&record, "abc", now).unwrap(),
            Verification::WrongCode
        );
        assert_eq!(two_factor.log().failures_since(1, at(0)).unwrap(), 2);
    }

    #[test]
    fn test_login_without_secret_is_validation_error() {
        let two_factor = TwoFactor::new(MemoryAuthLog::new());
        let record = OtpRecord::new(1).unwrap();
        assert!(matches!(
            two_factor.verify_login_at(&record, "123456", at(0)),
            Err(TipguardError::Validation(_))
        ));
    }

    #[test]
    fn test_replay_in_same_step_throttled() {
        let two_factor = TwoFactor::new(MemoryAuthLog::new());
        let (record, secret) = enrolled(&two_factor);
        let now = at(30);
        let code = code_for(&secret, now);
        assert_eq!(
            two_factor.verify_login_at(&record, &code, now).unwrap(),
            Verification::Accepted
        );
        assert_eq!(
            two_factor
                .verify_login_at(&record, &code, now + Duration::seconds(5))
                .unwrap(),
            Verification::Throttled
        );
    }

    #[test]
    fn test_same_code_in_next_step_allowed() {
        let two_factor = TwoFactor::new(MemoryAuthLog::new());
        let (record, secret) = enrolled(&two_factor);
        let now = at(30);
        let code = code_for(&secret, now);
        two_factor.verify_login_at(&record, &code, now).unwrap();
        assert_eq!(
            two_factor
                .verify_login_at(&record, &code, now + Duration::seconds(30))
                .unwrap(),
            Verification::Accepted
        );
    }

    #[test]
    fn test_rate_limit_and_recovery() {
        let two_factor = TwoFactor::new(MemoryAuthLog::new());
        let (record, secret) = enrolled(&two_factor);
        let start = at(60);
        let valid = code_for(&secret, start);
        let wrong = if valid == "123456" { "654321" } else { "123456" };
        for i in 0..5 {
            let now = start + Duration::seconds(i);
            assert_eq!(
                two_factor.verify_login_at(&record, wrong, now).unwrap(),
                Verification::WrongCode
            );
        }

        let sixth = start + Duration::seconds(5);
        assert_eq!(
            two_factor
                .verify_login_at(&record, &code_for(&secret, sixth), sixth)
                .unwrap(),
            Verification::Throttled
        );

        let later = sixth + Duration::seconds(31);
        assert_eq!(
            two_factor
                .verify_login_at(&record, &code_for(&secret, later), later)
                .unwrap(),
            Verification::Accepted
        );
    }

    #[test]
    fn test_failures_of_other_users_do_not_throttle() {
        let two_factor = TwoFactor::new(MemoryAuthLog::new());
        let (record, secret) = enrolled(&two_factor);
        for i in 0..5 {
            two_factor
                .log()
                .append(&AuthenticationLogEntry::failure(2, at(60 + i)))
                .unwrap();
        }
        let now = at(66);
        assert_eq!(
            two_factor
                .verify_login_at(&record, &code_for(&secret, now), now)
                .unwrap(),
            Verification::Accepted
        );
    }

    #[test]
    fn test_begin_setup_sweeps_abandoned_setups() {
        let two_factor = TwoFactor::new(MemoryAuthLog::new());
        for user_id in 1..=3 {
            let record = OtpRecord::new(user_id).unwrap();
            two_factor.begin_setup_at(&record, "user", at(0)).unwrap();
        }
        assert_eq!(two_factor.lock_pending().unwrap().len(), 3);

        let later = at(0) + Duration::minutes(11);
        let record = OtpRecord::new(4).unwrap();
        two_factor.begin_setup_at(&record, "dave", later).unwrap();

        let pending = two_factor.lock_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending.contains_key(&4));
    }

    #[test]
    fn test_throttled_attempts_do_not_extend_lockout() {
        let two_factor = TwoFactor::new(MemoryAuthLog::new());
        let (record, secret) = enrolled(&two_factor);
        let start = at(60);
        let valid = code_for(&secret, start);
        let wrong = if valid == "123456" { "654321" } else { "123456" };
        for i in 0..5 {
            two_factor
                .verify_login_at(&record, wrong, start + Duration::seconds(i))
                .unwrap();
        }
        // Retries while locked out
        for i in 5..25 {
            let now = start + Duration::seconds(i);
            assert_eq!(
                two_factor.verify_login_at(&record, wrong, now).unwrap(),
                Verification::Throttled
            );
        }
        assert_eq!(
            two_factor
                .log()
                .failures_since(1, start - Duration::seconds(1))
                .unwrap(),
            5
        );

        // Lockout ends 30 s after the last real failure
        let later = start + Duration::seconds(35);
        assert_eq!(
            two_factor
                .verify_login_at(&record, &code_for(&secret, later), later)
                .unwrap(),
            Verification::Accepted
        );
    }

    #[test]
    fn test_replayed_code_does_not_count_as_failure() {
        let two_factor = TwoFactor::new(MemoryAuthLog::new());
        let (record, secret) = enrolled(&two_factor);
        let now = at(30);
        let code = code_for(&secret, now);
        two_factor.verify_login_at(&record, &code, now).unwrap();
        for i in 1..=6 {
            assert_eq!(
                two_factor
                    .verify_login_at(&record, &code, now + Duration::seconds(i))
                    .unwrap(),
                Verification::Throttled
            );
        }
        assert_eq!(two_factor.log().failures_since(1, at(0)).unwrap(), 0);
        let entries = two_factor.log().entries(1).unwrap();
        assert_eq!(entries.iter().filter(|e| e.throttled).count(), 6);
    }
}
