//! Reconciliation: full re-polls of issuers that have not synced recently.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use credsync_core::{IssuerId, IssuerProfile, StoreResult, SyncState};
use tracing::{info, instrument};

use crate::poller::{Poller, SweepReport};
use crate::stores::SyncStores;

/// Issuers accepting external credentials whose last successful sync is
/// missing or older than `threshold`.
#[must_use]
pub fn select_stale(
    issuers: Vec<IssuerProfile>,
    states: &[SyncState],
    now: DateTime<Utc>,
    threshold: Duration,
) -> Vec<IssuerProfile> {
    let last_sync: HashMap<IssuerId, Option<DateTime<Utc>>> = states
        .iter()
        .map(|s| (s.issuer_id, s.last_successful_sync_at))
        .collect();

    issuers
        .into_iter()
        .filter(|issuer| issuer.accept_external)
        .filter(|issuer| match last_sync.get(&issuer.id).copied().flatten() {
            Some(at) => now - at > threshold,
            None => true,
        })
        .collect()
}

pub struct Reconciler {
    poller: Arc<Poller>,
    stores: SyncStores,
    threshold: Duration,
}

impl Reconciler {
    pub fn new(poller: Arc<Poller>, stores: SyncStores, threshold: Duration) -> Self {
        Self {
            poller,
            stores,
            threshold,
        }
    }

    #[must_use]
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub async fn find_stale_issuers(&self, now: DateTime<Utc>) -> StoreResult<Vec<IssuerProfile>> {
        let issuers = self.stores.issuers.list_external_issuers().await?;
        let states = self.stores.sync_state.list_sync_states().await?;
        Ok(select_stale(issuers, &states, now, self.threshold))
    }

    /// Full-sync every stale issuer.
    #[instrument(skip(self))]
    pub async fn run(&self) -> StoreResult<SweepReport> {
        if !self.poller.is_enabled() {
            info!("External sync disabled, skipping reconciliation");
            return Ok(SweepReport::default());
        }

        let stale = self.find_stale_issuers(Utc::now()).await?;
        info!(
            stale = stale.len(),
            threshold_hours = self.threshold.num_hours(),
            "Starting reconciliation"
        );
        Ok(self.poller.poll_issuers(&stale, true).await)
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("threshold_hours", &self.threshold.num_hours())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer(name: &str) -> IssuerProfile {
        IssuerProfile {
            id: IssuerId::new(),
            name: name.into(),
            provider: "nsdc".into(),
            registry_id: Some(format!("{name}-reg")),
            accept_external: true,
            jwks_url: None,
        }
    }

    fn state(issuer: &IssuerProfile, at: Option<DateTime<Utc>>) -> SyncState {
        SyncState {
            issuer_id: issuer.id,
            provider: issuer.provider.clone(),
            last_successful_sync_at: at,
        }
    }

    #[test]
    fn test_stale_selection() {
        let now = Utc::now();
        let recent = issuer("recent");
        let old = issuer("old");
        let never = issuer("never");
        let states = vec![
            state(&recent, Some(now - Duration::hours(1))),
            state(&old, Some(now - Duration::hours(25))),
        ];

        let stale = select_stale(
            vec![recent.clone(), old.clone(), never.clone()],
            &states,
            now,
            Duration::hours(24),
        );
        let ids: Vec<_> = stale.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![old.id, never.id]);
    }

    #[test]
    fn test_opted_out_issuers_excluded() {
        let now = Utc::now();
        let mut opted_out = issuer("opted-out");
        opted_out.accept_external = false;

        let stale = select_stale(vec![opted_out], &[], now, Duration::hours(24));
        assert!(stale.is_empty());
    }

    #[test]
    fn test_state_with_no_timestamp_is_stale() {
        let now = Utc::now();
        let pending = issuer("pending");
        let states = vec![state(&pending, None)];

        let stale = select_stale(vec![pending.clone()], &states, now, Duration::hours(24));
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, pending.id);
    }
}
