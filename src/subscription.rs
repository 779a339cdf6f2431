//! COV subscription lifecycle
//!
//! Tracks the state of every change-of-value subscription this client holds.
//! The manager owns no sockets; the client performs the SubscribeCOV I/O and
//! reports outcomes here, while inbound notifications are gated on the
//! subscription being active. Expired subscriptions silently discard
//! notifications until renewed.

use crate::codec::CovNotification;
use crate::error::{BacnetError, BacnetResult};
use crate::object::ObjectIdentifier;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, trace};

/// Identifies one subscription: the subscriber-chosen process id plus the
/// monitored object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub process_id: u32,
    pub object_id: ObjectIdentifier,
}

/// Lifecycle of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// SubscribeCOV sent, ack outstanding
    Requested,
    /// Acknowledged and within its lifetime
    Active,
    /// Lifetime elapsed without renewal
    Expired,
    /// Explicitly cancelled
    Cancelled,
}

#[derive(Debug, Clone)]
struct Subscription {
    state: SubscriptionState,
    confirmed: bool,
    /// None means indefinite (lifetime 0 on the wire)
    lifetime: Option<Duration>,
    /// Start of the current lifetime window (set on activation and renewal)
    active_since: DateTime<Utc>,
}

impl Subscription {
    fn deadline(&self) -> Option<DateTime<Utc>> {
        let lifetime = self.lifetime?;
        let lifetime = ChronoDuration::from_std(lifetime).ok()?;
        Some(self.active_since + lifetime)
    }

    fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.deadline().is_some_and(|d| now >= d)
    }
}

/// Tracks every subscription held by one client
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    subscriptions: Mutex<HashMap<SubscriptionKey, Subscription>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut HashMap<SubscriptionKey, Subscription>) -> R) -> R {
        let mut guard = match self.subscriptions.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Record an outgoing SubscribeCOV before its ack arrives
    pub fn begin(&self, key: SubscriptionKey, confirmed: bool, lifetime: Option<Duration>) {
        self.with(|subs| {
            subs.insert(
                key,
                Subscription {
                    state: SubscriptionState::Requested,
                    confirmed,
                    lifetime,
                    active_since: Utc::now(),
                },
            );
        });
        trace!(?key, confirmed, ?lifetime, "subscription requested");
    }

    /// Mark a subscription active after its SimpleAck
    pub fn activate(&self, key: &SubscriptionKey) -> BacnetResult<()> {
        self.with(|subs| {
            let sub = subs
                .get_mut(key)
                .ok_or_else(|| BacnetError::protocol("no such subscription"))?;
            sub.state = SubscriptionState::Active;
            sub.active_since = Utc::now();
            Ok(())
        })
    }

    /// Restart the lifetime window after a renewal ack; an expired
    /// subscription becomes active again under the new lifetime
    pub fn renew(&self, key: &SubscriptionKey, lifetime: Option<Duration>) -> BacnetResult<()> {
        self.with(|subs| {
            let sub = subs
                .get_mut(key)
                .ok_or_else(|| BacnetError::protocol("no such subscription"))?;
            sub.state = SubscriptionState::Active;
            sub.lifetime = lifetime;
            sub.active_since = Utc::now();
            Ok(())
        })
    }

    /// Mark a subscription cancelled (the entry stays queryable)
    pub fn cancel(&self, key: &SubscriptionKey) {
        self.with(|subs| {
            if let Some(sub) = subs.get_mut(key) {
                sub.state = SubscriptionState::Cancelled;
            }
        });
        debug!(?key, "subscription cancelled");
    }

    /// Drop a subscription entirely (used when the request itself failed)
    pub fn remove(&self, key: &SubscriptionKey) {
        self.with(|subs| {
            subs.remove(key);
        });
    }

    /// Current state, applying lazy expiry
    pub fn state(&self, key: &SubscriptionKey) -> Option<SubscriptionState> {
        let now = Utc::now();
        self.with(|subs| {
            let sub = subs.get_mut(key)?;
            if sub.state == SubscriptionState::Active && sub.is_past_deadline(now) {
                sub.state = SubscriptionState::Expired;
            }
            Some(sub.state)
        })
    }

    /// Seconds left before expiry; `None` for indefinite or non-active
    /// subscriptions
    pub fn remaining(&self, key: &SubscriptionKey) -> Option<Duration> {
        let now = Utc::now();
        self.with(|subs| {
            let sub = subs.get(key)?;
            if sub.state != SubscriptionState::Active {
                return None;
            }
            let deadline = sub.deadline()?;
            (deadline - now).to_std().ok()
        })
    }

    /// Whether the subscription asked for confirmed notifications
    pub fn is_confirmed(&self, key: &SubscriptionKey) -> Option<bool> {
        self.with(|subs| subs.get(key).map(|s| s.confirmed))
    }

    /// Keys of every subscription currently active
    pub fn active_keys(&self) -> Vec<SubscriptionKey> {
        let now = Utc::now();
        self.with(|subs| {
            subs.iter_mut()
                .filter_map(|(key, sub)| {
                    if sub.state == SubscriptionState::Active && sub.is_past_deadline(now) {
                        sub.state = SubscriptionState::Expired;
                    }
                    (sub.state == SubscriptionState::Active).then_some(*key)
                })
                .collect()
        })
    }

    /// Gate an inbound notification: `true` to deliver, `false` to discard
    ///
    /// Only an active, unexpired subscription accepts notifications.
    pub fn accepts(&self, notification: &CovNotification) -> bool {
        let key = SubscriptionKey {
            process_id: notification.process_id,
            object_id: notification.object_id,
        };
        match self.state(&key) {
            Some(SubscriptionState::Active) => true,
            other => {
                trace!(?key, state = ?other, "discarding notification");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectType;
    use crate::value::BacnetValue;

    fn key() -> SubscriptionKey {
        SubscriptionKey {
            process_id: 1,
            object_id: ObjectIdentifier::new(ObjectType::AnalogInput, 1).unwrap(),
        }
    }

    fn notification_for(key: SubscriptionKey) -> CovNotification {
        CovNotification {
            process_id: key.process_id,
            device_id: ObjectIdentifier::device(999_999).unwrap(),
            object_id: key.object_id,
            time_remaining: 0,
            values: vec![(85, BacnetValue::Real(72.5))],
        }
    }

    #[test]
    fn test_lifecycle_requested_active_cancelled() {
        let mgr = SubscriptionManager::new();
        let k = key();

        mgr.begin(k, false, Some(Duration::from_secs(3600)));
        assert_eq!(mgr.state(&k), Some(SubscriptionState::Requested));
        assert!(!mgr.accepts(&notification_for(k)));

        mgr.activate(&k).unwrap();
        assert_eq!(mgr.state(&k), Some(SubscriptionState::Active));
        assert!(mgr.accepts(&notification_for(k)));

        mgr.cancel(&k);
        assert_eq!(mgr.state(&k), Some(SubscriptionState::Cancelled));
        assert!(!mgr.accepts(&notification_for(k)));
    }

    #[test]
    fn test_expiry_without_renewal() {
        let mgr = SubscriptionManager::new();
        let k = key();

        mgr.begin(k, false, Some(Duration::from_millis(0)));
        mgr.activate(&k).unwrap();

        // Zero lifetime as a Duration expires immediately
        assert_eq!(mgr.state(&k), Some(SubscriptionState::Expired));
        assert!(!mgr.accepts(&notification_for(k)));
        assert_eq!(mgr.remaining(&k), None);

        // Renewal brings it back under a fresh lifetime
        mgr.renew(&k, Some(Duration::from_secs(300))).unwrap();
        assert_eq!(mgr.state(&k), Some(SubscriptionState::Active));
        assert!(mgr.remaining(&k).unwrap() <= Duration::from_secs(300));
    }

    #[test]
    fn test_indefinite_lifetime_never_expires() {
        let mgr = SubscriptionManager::new();
        let k = key();

        mgr.begin(k, true, None);
        mgr.activate(&k).unwrap();
        assert_eq!(mgr.state(&k), Some(SubscriptionState::Active));
        assert_eq!(mgr.remaining(&k), None);
        assert_eq!(mgr.is_confirmed(&k), Some(true));
        assert!(mgr.accepts(&notification_for(k)));
    }

    #[test]
    fn test_unknown_subscription_discards() {
        let mgr = SubscriptionManager::new();
        assert!(!mgr.accepts(&notification_for(key())));
        assert!(mgr.activate(&key()).is_err());
    }

    #[test]
    fn test_active_keys_filters_expired() {
        let mgr = SubscriptionManager::new();
        let k1 = key();
        let k2 = SubscriptionKey {
            process_id: 2,
            ..key()
        };

        mgr.begin(k1, false, None);
        mgr.activate(&k1).unwrap();
        mgr.begin(k2, false, Some(Duration::from_millis(0)));
        mgr.activate(&k2).unwrap();

        assert_eq!(mgr.active_keys(), vec![k1]);
    }
}
