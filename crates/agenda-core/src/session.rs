use anyhow::{Context, anyhow};
use chrono_tz::Tz;
use tracing::{debug, info};
use uuid::Uuid;

use crate::account::{Profile, ProfileStatus};
use crate::backend::Backend;
use crate::config::Config;
use crate::datetime::resolve_timezone;

/// Who is acting and in which timezone. Built once per invocation and
/// passed to every command handler.
#[derive(Debug, Clone)]
pub struct Session {
    pub profile: Profile,
    pub professional_id: u64,
    pub timezone: Tz,
}

impl Session {
    pub fn new(profile: Profile, timezone: Tz) -> Self {
        Self {
            professional_id: profile.professional_id,
            profile,
            timezone,
        }
    }

    /// Resolves the acting profile from the `profile` config key (a UUID or
    /// an email). With no key set, the only active profile in the store is
    /// used.
    #[tracing::instrument(skip(cfg, backend))]
    pub fn resolve(cfg: &Config, backend: &dyn Backend) -> anyhow::Result<Self> {
        let timezone = resolve_timezone(cfg.get("timezone").as_deref());
        let profiles = backend
            .profiles()
            .context("failed to load profiles")?;

        let profile = match cfg.get("profile") {
            Some(key) => {
                let key = key.trim().to_string();
                let by_id = Uuid::parse_str(&key).ok();
                profiles
                    .into_iter()
                    .find(|p| Some(p.id) == by_id || p.email.eq_ignore_ascii_case(&key))
                    .ok_or_else(|| anyhow!("no profile matches '{key}'"))?
            }
            None => {
                let mut active: Vec<Profile> = profiles
                    .into_iter()
                    .filter(|p| p.status == ProfileStatus::Active)
                    .collect();
                match active.len() {
                    0 => {
                        return Err(anyhow!(
                            "no profiles yet; run 'professional-init NAME EMAIL' first"
                        ));
                    }
                    1 => active.remove(0),
                    n => {
                        return Err(anyhow!(
                            "{n} active profiles found; set rc.profile=EMAIL to choose one"
                        ));
                    }
                }
            }
        };

        if profile.status != ProfileStatus::Active {
            return Err(anyhow!("profile {} is inactive", profile.email));
        }

        info!(
            profile = %profile.email,
            professional = profile.professional_id,
            timezone = %timezone,
            "resolved session"
        );
        Ok(Self::new(profile, timezone))
    }

    pub fn require_admin(&self) -> anyhow::Result<()> {
        if self.profile.is_admin() {
            Ok(())
        } else {
            Err(anyhow!(
                "permission denied: {} is not an administrator",
                self.profile.email
            ))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestToken(u64);

/// Hands out increasing request tokens and accepts only the response to the
/// most recent one.
#[derive(Debug, Clone, Default)]
pub struct FetchSequencer {
    issued: u64,
    applied: u64,
}

impl FetchSequencer {
    pub fn begin(&mut self) -> RequestToken {
        self.issued += 1;
        debug!(token = self.issued, "issued fetch token");
        RequestToken(self.issued)
    }

    /// Marks every outstanding token stale.
    pub fn invalidate(&mut self) {
        self.issued += 1;
    }

    pub fn accept(&mut self, token: RequestToken) -> bool {
        if token.0 != self.issued || token.0 <= self.applied {
            return false;
        }
        self.applied = token.0;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::FetchSequencer;

    #[test]
    fn only_latest_token_is_accepted_once() {
        let mut seq = FetchSequencer::default();
        let a = seq.begin();
        let b = seq.begin();
        assert!(a < b);
        assert!(!seq.accept(a));
        assert!(seq.accept(b));
        assert!(!seq.accept(b));
    }

    #[test]
    fn invalidate_drops_outstanding() {
        let mut seq = FetchSequencer::default();
        let a = seq.begin();
        seq.invalidate();
        assert!(!seq.accept(a));
        let b = seq.begin();
        assert!(seq.accept(b));
    }
}
