//! Leader election among the contexts of one learner.
//!
//! Leadership is re-derived continuously from heartbeat liveness; there is no
//! lease to release. The rules:
//!
//! - A follower that has heard no heartbeat for the silence window (plus its
//!   own random jitter) promotes itself.
//! - A leader that hears a heartbeat outranking its own last heartbeat
//!   demotes immediately. Equal sequences are ordered by context id. State
//!   broadcasts spend sequences too but never take part in the comparison, so
//!   two leaders with the same cadence tie and the id decides.
//! - A context claiming leadership (by silence or on user input) continues its
//!   sequence above the highest one it has observed, so a claim outranks the
//!   incumbent.
//!
//! All methods take `now`; nothing here reads the clock or does I/O.

use chrono::{DateTime, Duration, Utc};
use rand::prelude::*;
use rand_pcg::Mcg128Xsl64;
use serde::{Deserialize, Serialize};

use super::ids::ContextId;
use crate::storage::SyncConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Follower,
    Leader,
}

/// One heartbeat's worth of leadership claim. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadershipClaim {
    pub holder: ContextId,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
}

impl LeadershipClaim {
    /// Whether this claim wins against `(sequence, holder)`.
    pub fn outranks(&self, sequence: u64, holder: &ContextId) -> bool {
        (self.sequence, &self.holder) > (sequence, holder)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadershipChange {
    Promoted { reason: PromotionReason },
    Demoted { by: ContextId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionReason {
    Silence,
    Claim,
}

#[derive(Debug)]
pub struct LeadershipCoordinator {
    me: ContextId,
    role: Role,
    heartbeat_interval: Duration,
    silence_window: Duration,
    jitter: Duration,
    /// Last sequence this context used for a broadcast.
    sequence: u64,
    /// Sequence of the last heartbeat this context sent.
    heartbeat_sequence: u64,
    highest_observed: u64,
    /// Start of the current quiet period: attach time or last heartbeat heard.
    quiet_since: DateTime<Utc>,
    last_heartbeat_sent: Option<DateTime<Utc>>,
    known_leader: Option<ContextId>,
}

impl LeadershipCoordinator {
    pub fn new(me: ContextId, config: &SyncConfig, now: DateTime<Utc>) -> Self {
        let jitter = election_jitter(&me, config);
        tracing::debug!(context = %me, jitter_ms = jitter.num_milliseconds(), "leadership coordinator attached");
        Self {
            me,
            role: Role::Follower,
            heartbeat_interval: config.heartbeat_interval(),
            silence_window: config.silence_window(),
            jitter,
            sequence: 0,
            heartbeat_sequence: 0,
            highest_observed: 0,
            quiet_since: now,
            last_heartbeat_sent: None,
            known_leader: None,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn context_id(&self) -> &ContextId {
        &self.me
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    /// Last sequence used by this context.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Sequence carried by the last heartbeat sent, 0 before the first.
    pub fn heartbeat_sequence(&self) -> u64 {
        self.heartbeat_sequence
    }

    pub fn highest_observed(&self) -> u64 {
        self.highest_observed
    }

    pub fn known_leader(&self) -> Option<&ContextId> {
        self.known_leader.as_ref()
    }

    pub fn jitter(&self) -> Duration {
        self.jitter
    }

    /// When a follower will promote itself if it keeps hearing nothing.
    pub fn election_deadline(&self) -> DateTime<Utc> {
        self.quiet_since + self.silence_window + self.jitter
    }

    // ── Inputs ───────────────────────────────────────────────────────

    /// Allocate the sequence for a locally originated broadcast.
    pub fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Record that another context broadcast with `sequence`.
    pub fn observe_sequence(&mut self, sequence: u64) {
        self.highest_observed = self.highest_observed.max(sequence);
    }

    /// Handle another context's heartbeat.
    ///
    /// Liveness is measured with the local receive time, not the sender's
    /// timestamp, so clock skew between devices cannot trigger elections.
    pub fn observe_heartbeat(
        &mut self,
        claim: &LeadershipClaim,
        now: DateTime<Utc>,
    ) -> Option<LeadershipChange> {
        if claim.holder == self.me {
            return None;
        }
        self.observe_sequence(claim.sequence);

        match self.role {
            Role::Leader => {
                if claim.outranks(self.heartbeat_sequence, &self.me) {
                    self.demote(claim.holder.clone(), now);
                    return Some(LeadershipChange::Demoted {
                        by: claim.holder.clone(),
                    });
                }
                tracing::debug!(
                    context = %self.me,
                    rival = %claim.holder,
                    rival_sequence = claim.sequence,
                    own_sequence = self.heartbeat_sequence,
                    "ignoring outranked heartbeat"
                );
                None
            }
            Role::Follower => {
                self.quiet_since = now;
                self.known_leader = Some(claim.holder.clone());
                None
            }
        }
    }

    /// Handle a leader's resignation: the election deadline moves to now
    /// (plus jitter) instead of a full silence window later.
    pub fn observe_resign(&mut self, holder: &ContextId, sequence: u64, now: DateTime<Utc>) {
        self.observe_sequence(sequence);
        if self.known_leader.as_ref() == Some(holder) {
            self.known_leader = None;
            self.quiet_since = now - self.silence_window;
        }
    }

    /// Promote if the leader has been silent for too long.
    pub fn check_silence(&mut self, now: DateTime<Utc>) -> Option<LeadershipChange> {
        if self.is_leader() || now < self.election_deadline() {
            return None;
        }
        Some(self.promote(now, PromotionReason::Silence))
    }

    /// Take leadership on user intent. No-op if already leader.
    pub fn claim(&mut self, now: DateTime<Utc>) -> Option<LeadershipChange> {
        if self.is_leader() {
            return None;
        }
        Some(self.promote(now, PromotionReason::Claim))
    }

    pub fn heartbeat_due(&self, now: DateTime<Utc>) -> bool {
        self.is_leader()
            && self
                .last_heartbeat_sent
                .map_or(true, |sent| now - sent >= self.heartbeat_interval)
    }

    /// Produce this leader's next heartbeat, or `None` for a follower.
    pub fn heartbeat(&mut self, now: DateTime<Utc>) -> Option<LeadershipClaim> {
        if !self.is_leader() {
            return None;
        }
        let sequence = self.next_sequence();
        self.heartbeat_sequence = sequence;
        self.last_heartbeat_sent = Some(now);
        Some(LeadershipClaim {
            holder: self.me.clone(),
            timestamp: now,
            sequence,
        })
    }

    /// Step down voluntarily. Returns the claim to announce, if we were leader.
    pub fn resign(&mut self, now: DateTime<Utc>) -> Option<LeadershipClaim> {
        if !self.is_leader() {
            return None;
        }
        self.role = Role::Follower;
        self.known_leader = None;
        self.last_heartbeat_sent = None;
        self.quiet_since = now;
        let sequence = self.next_sequence();
        tracing::info!(context = %self.me, sequence, "resigned leadership");
        Some(LeadershipClaim {
            holder: self.me.clone(),
            timestamp: now,
            sequence,
        })
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn promote(&mut self, now: DateTime<Utc>, reason: PromotionReason) -> LeadershipChange {
        self.role = Role::Leader;
        self.sequence = self.sequence.max(self.highest_observed);
        self.known_leader = Some(self.me.clone());
        self.last_heartbeat_sent = None;
        tracing::info!(
            context = %self.me,
            ?reason,
            sequence = self.sequence,
            at = %now,
            "promoted to leader"
        );
        LeadershipChange::Promoted { reason }
    }

    fn demote(&mut self, by: ContextId, now: DateTime<Utc>) {
        tracing::info!(context = %self.me, superseded_by = %by, "demoted to follower");
        self.role = Role::Follower;
        self.last_heartbeat_sent = None;
        self.quiet_since = now;
        self.known_leader = Some(by);
    }
}

fn election_jitter(me: &ContextId, config: &SyncConfig) -> Duration {
    if config.election_jitter_ms == 0 {
        return Duration::zero();
    }
    let mut rng = match config.election_seed {
        0 => Mcg128Xsl64::from_entropy(),
        seed => {
            // Mix the context id in so contexts sharing a seed still spread out.
            let mixed = me
                .as_str()
                .bytes()
                .fold(seed, |acc, b| acc.rotate_left(5) ^ u64::from(b));
            Mcg128Xsl64::seed_from_u64(mixed)
        }
    };
    let ms = rng.gen_range(0..=config.election_jitter_ms);
    Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}
