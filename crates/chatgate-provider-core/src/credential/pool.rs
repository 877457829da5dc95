use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, info};

use chatgate_common::unix_now;

use super::state::{
    Credential, CredentialHandle, CredentialId, CredentialState, CredentialValue, Outcome,
};

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Failures before a credential cools down.
    pub failure_threshold: u32,
    /// Cool-down duration in seconds.
    pub recovery_timeout_secs: i64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounts {
    pub active: usize,
    pub cooldown: usize,
    pub disabled: usize,
}

#[derive(Debug)]
struct Entry {
    provider_id: String,
    credential: Credential,
    state: CredentialState,
    failure_count: u32,
    last_failure_at: Option<i64>,
    last_success_at: Option<i64>,
    insertion_index: usize,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<CredentialId, Entry>,
    by_provider: HashMap<String, Vec<CredentialId>>,
    /// Round-robin cursor per provider, advanced on every checkout.
    cursors: HashMap<String, usize>,
    next_id: CredentialId,
    next_insertion: usize,
}

/// Per-provider rotating credential pool with failure scoring and cool-down.
///
/// All state lives behind one lock; critical sections are O(credentials),
/// which stays small. The pool owns every mutation — callers only ever hold
/// weak [`CredentialHandle`]s and must return them via [`report`].
///
/// [`report`]: CredentialPool::report
pub struct CredentialPool {
    inner: Mutex<Inner>,
    config: PoolConfig,
}

impl CredentialPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            config,
        }
    }

    pub fn insert(&self, provider_id: impl Into<String>, credential: Credential) -> CredentialId {
        let provider_id = provider_id.into();
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        let insertion_index = inner.next_insertion;
        inner.next_insertion += 1;
        inner.entries.insert(
            id,
            Entry {
                provider_id: provider_id.clone(),
                credential,
                state: CredentialState::Active,
                failure_count: 0,
                last_failure_at: None,
                last_success_at: None,
                insertion_index,
            },
        );
        inner.by_provider.entry(provider_id).or_default().push(id);
        id
    }

    /// Synthesize an ephemeral guest credential for a provider whose pool is
    /// empty. Permitted only when the operator enabled anonymous mode; the
    /// caller enforces that.
    pub fn synthesize_guest(&self, provider_id: &str) -> CredentialHandle {
        let id = self.insert(
            provider_id,
            Credential {
                value: CredentialValue::SessionRef,
                priority: i32::MIN,
                ephemeral: true,
            },
        );
        info!(provider = provider_id, credential = id, "synthesized guest credential");
        CredentialHandle {
            id,
            provider_id: provider_id.to_string(),
            value: CredentialValue::SessionRef,
            ephemeral: true,
        }
    }

    /// Highest-priority active credential, round-robin among equal priority.
    /// Never blocks: an empty pool answers `None`.
    pub fn checkout(&self, provider_id: &str) -> Option<CredentialHandle> {
        let mut inner = self.lock();
        let ids = inner.by_provider.get(provider_id)?.clone();

        // Stable ordering among active entries:
        // (priority desc, last_success_at desc, insertion_index asc).
        let mut active: Vec<(i32, i64, usize, CredentialId)> = ids
            .iter()
            .filter_map(|id| {
                let entry = inner.entries.get(id)?;
                matches!(entry.state, CredentialState::Active).then(|| {
                    (
                        entry.credential.priority,
                        entry.last_success_at.unwrap_or(i64::MIN),
                        entry.insertion_index,
                        *id,
                    )
                })
            })
            .collect();
        if active.is_empty() {
            return None;
        }
        active.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then(b.1.cmp(&a.1))
                .then(a.2.cmp(&b.2))
        });

        let top_priority = active[0].0;
        let group: Vec<CredentialId> = active
            .iter()
            .take_while(|row| row.0 == top_priority)
            .map(|row| row.3)
            .collect();
        let cursor = inner.cursors.entry(provider_id.to_string()).or_insert(0);
        let chosen = group[*cursor % group.len()];
        *cursor = cursor.wrapping_add(1);

        let entry = inner.entries.get(&chosen)?;
        Some(CredentialHandle {
            id: chosen,
            provider_id: entry.provider_id.clone(),
            value: entry.credential.value.clone(),
            ephemeral: entry.credential.ephemeral,
        })
    }

    /// Return a checked-out handle with its outcome.
    pub fn report(&self, handle: &CredentialHandle, outcome: Outcome) {
        let now = unix_now();
        let mut inner = self.lock();
        let Some(entry) = inner.entries.get_mut(&handle.id) else {
            return;
        };
        match outcome {
            Outcome::Success => {
                entry.last_success_at = Some(now);
            }
            Outcome::TransientFailure => {
                entry.failure_count = entry.failure_count.saturating_add(1);
                entry.last_failure_at = Some(now);
            }
            Outcome::AuthFailure => {
                if entry.credential.ephemeral {
                    // Guest sessions are worthless once rejected.
                    debug!(credential = handle.id, "discarding rejected guest credential");
                    inner.entries.remove(&handle.id);
                    if let Some(ids) = inner.by_provider.get_mut(&handle.provider_id) {
                        ids.retain(|id| *id != handle.id);
                    }
                    return;
                }
                // One auth failure alone trips the cool-down.
                entry.failure_count = entry
                    .failure_count
                    .saturating_add(self.config.failure_threshold);
                entry.last_failure_at = Some(now);
            }
        }
        if matches!(entry.state, CredentialState::Active)
            && entry.failure_count >= self.config.failure_threshold
        {
            debug!(
                credential = handle.id,
                provider = %handle.provider_id,
                failures = entry.failure_count,
                "credential entering cool-down"
            );
            entry.state = CredentialState::Cooldown;
        }
    }

    /// Periodic maintenance: promote credentials whose cool-down elapsed.
    /// Counters reset only here and on operator re-enable.
    pub fn tick(&self, now: i64) {
        let mut inner = self.lock();
        for (id, entry) in inner.entries.iter_mut() {
            if !matches!(entry.state, CredentialState::Cooldown) {
                continue;
            }
            let Some(last_failure_at) = entry.last_failure_at else {
                continue;
            };
            if now - last_failure_at >= self.config.recovery_timeout_secs {
                debug!(credential = *id, "credential recovered from cool-down");
                entry.state = CredentialState::Active;
                entry.failure_count = 0;
            }
        }
    }

    /// Operator switch. Disabling is terminal until re-enabled; enabling
    /// resets counters like a recovery does.
    pub fn set_enabled(&self, id: CredentialId, enabled: bool) {
        let mut inner = self.lock();
        let Some(entry) = inner.entries.get_mut(&id) else {
            return;
        };
        if enabled {
            entry.state = CredentialState::Active;
            entry.failure_count = 0;
        } else {
            entry.state = CredentialState::Disabled;
        }
    }

    pub fn state(&self, id: CredentialId) -> Option<CredentialState> {
        self.lock().entries.get(&id).map(|entry| entry.state)
    }

    pub fn failure_count(&self, id: CredentialId) -> Option<u32> {
        self.lock().entries.get(&id).map(|entry| entry.failure_count)
    }

    pub fn counts(&self, provider_id: &str) -> PoolCounts {
        let inner = self.lock();
        let mut counts = PoolCounts::default();
        let Some(ids) = inner.by_provider.get(provider_id) else {
            return counts;
        };
        for id in ids {
            match inner.entries.get(id).map(|entry| entry.state) {
                Some(CredentialState::Active) => counts.active += 1,
                Some(CredentialState::Cooldown) => counts.cooldown += 1,
                Some(CredentialState::Disabled) => counts.disabled += 1,
                None => {}
            }
        }
        counts
    }

    pub fn providers(&self) -> Vec<String> {
        let inner = self.lock();
        let mut providers: Vec<String> = inner.by_provider.keys().cloned().collect();
        providers.sort();
        providers
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Entries are plain data; a poisoned lock means a panic mid-update,
        // and continuing with the current state is still coherent.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Parse a `<data>/tokens/<provider>.tokens` file: one credential per line,
/// `#` comments, optional `priority=N` field before the token.
pub fn parse_token_lines(text: &str) -> Vec<Credential> {
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut priority = 0i32;
        let mut token = line;
        if let Some((head, tail)) = line.split_once(char::is_whitespace)
            && let Some(value) = head.strip_prefix("priority=")
            && let Ok(parsed) = value.parse::<i32>()
        {
            priority = parsed;
            token = tail.trim();
        }
        if token.is_empty() {
            continue;
        }
        out.push(Credential::token(token).with_priority(priority));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_lines_skip_comments_and_blank_lines() {
        let creds = parse_token_lines("# fleet A\n\ntok-1\npriority=5 tok-2\n");
        assert_eq!(creds.len(), 2);
        assert_eq!(creds[0], Credential::token("tok-1"));
        assert_eq!(creds[1], Credential::token("tok-2").with_priority(5));
    }

    #[test]
    fn equal_priority_rotates_round_robin() {
        let pool = CredentialPool::new(PoolConfig::default());
        let a = pool.insert("glm", Credential::token("a"));
        let b = pool.insert("glm", Credential::token("b"));

        let first = pool.checkout("glm").unwrap();
        let second = pool.checkout("glm").unwrap();
        let third = pool.checkout("glm").unwrap();
        assert_eq!(first.id, a);
        assert_eq!(second.id, b);
        assert_eq!(third.id, a);
    }

    #[test]
    fn higher_priority_wins() {
        let pool = CredentialPool::new(PoolConfig::default());
        pool.insert("glm", Credential::token("low"));
        let high = pool.insert("glm", Credential::token("high").with_priority(10));
        for _ in 0..4 {
            assert_eq!(pool.checkout("glm").unwrap().id, high);
        }
    }
}
