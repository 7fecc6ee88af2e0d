//! Session identity and liveness for hooked browsers.

use std::net::IpAddr;

use chrono::Utc;
use snare_core::config::RestrictionsConfig;
use snare_core::{filters, Error, Result};
use snare_storage::{BrowserStore, HookedBrowser, LogStore};
use tracing::{debug, info};

/// A browser whose last check-in is older than this is considered dormant;
/// its next check-in raises a liveness event.
pub const DORMANCY_GAP_SECS: i64 = 60;

pub fn is_online(browser: &HookedBrowser, now: i64) -> bool {
    now - browser.lastseen <= DORMANCY_GAP_SECS
}

/// Owns hooked-browser identity: admission of the peer address, session
/// creation and liveness bookkeeping on every check-in.
#[derive(Clone)]
pub struct SessionRegistry {
    browsers: BrowserStore,
    logs: LogStore,
    restrictions: RestrictionsConfig,
}

impl SessionRegistry {
    pub fn new(browsers: BrowserStore, logs: LogStore, restrictions: RestrictionsConfig) -> Self {
        Self { browsers, logs, restrictions }
    }

    /// Network-level admission. The peer must land in at least one permitted
    /// subnet and in no excluded subnet; an empty permit list rejects
    /// everything.
    pub fn admit(&self, addr: IpAddr) -> bool {
        let admitted = filters::ip_admitted(
            addr,
            &self.restrictions.permitted_hooking_subnets,
            &self.restrictions.excluded_hooking_subnets,
        );
        if !admitted {
            debug!(%addr, "check-in rejected by hooking restrictions");
        }
        admitted
    }

    pub fn check_in(
        &self,
        token: Option<&str>,
        ip: &str,
        domain: Option<&str>,
    ) -> Result<(HookedBrowser, bool)> {
        self.check_in_at(token, ip, domain, Utc::now().timestamp())
    }

    /// Resolves or creates the session for a check-in. Returns the session
    /// row and whether it is new. An unknown or absent token always mints a
    /// fresh server-side session; agent-supplied identifiers are never
    /// trusted as identity.
    pub fn check_in_at(
        &self,
        token: Option<&str>,
        ip: &str,
        domain: Option<&str>,
        now: i64,
    ) -> Result<(HookedBrowser, bool)> {
        if let Some(token) = token {
            if let Some(existing) = self.browsers.by_session(token)? {
                let prev_lastseen = self.browsers.touch_check_in(existing.id, ip, domain, now)?;
                if now - prev_lastseen > DORMANCY_GAP_SECS {
                    self.logs.register(
                        "Hook",
                        &format!("{} appears to have come back online", ip),
                        existing.id,
                    )?;
                }
                let updated = self
                    .browsers
                    .by_id(existing.id)?
                    .ok_or_else(|| Error::NotFound(format!("hooked browser id {}", existing.id)))?;
                return Ok((updated, false));
            }
        }

        let session = uuid::Uuid::new_v4().simple().to_string();
        let browser = self.browsers.create(&session, ip, domain, now)?;
        self.logs.register(
            "Hook",
            &format!("New browser hooked from {}", ip),
            browser.id,
        )?;
        info!(id = browser.id, ip = %ip, "new browser hooked");
        Ok((browser, true))
    }

    pub fn by_token(&self, token: &str) -> Result<Option<HookedBrowser>> {
        self.browsers.by_session(token)
    }

    /// Internal-caller lookup; absence is a programmer error, not a protocol
    /// condition.
    pub fn by_id(&self, id: i64) -> Result<HookedBrowser> {
        self.browsers
            .by_id(id)?
            .ok_or_else(|| Error::NotFound(format!("hooked browser id {}", id)))
    }

    pub fn list(&self) -> Result<Vec<HookedBrowser>> {
        self.browsers.all()
    }
}
