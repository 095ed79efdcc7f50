//! In-memory backend for tests
//!
//! Mirrors the production backend closely enough to exercise the runtime:
//! keys expire, set-if-absent and compare-and-delete are atomic under the
//! write lock, and streams implement real consumer-group semantics with
//! per-consumer pending entries and idle-based reclaim.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::{BackendError, BackendResult, KvBackend, StreamMessage};

#[derive(Debug, Clone)]
struct Expiring {
    value: String,
    expires_at: Option<Instant>,
}

impl Expiring {
    fn live(&self) -> bool {
        self.expires_at.map(|at| Instant::now() < at).unwrap_or(true)
    }
}

#[derive(Debug, Clone)]
struct PendingEntry {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
    index: usize,
}

#[derive(Debug, Default)]
struct GroupState {
    cursor: usize,
    pending: HashMap<String, PendingEntry>,
}

#[derive(Debug, Default)]
struct StreamState {
    entries: Vec<StreamMessage>,
    next_seq: u64,
    groups: HashMap<String, GroupState>,
}

/// In-memory [`KvBackend`] implementation.
#[derive(Default)]
pub struct MemoryBackend {
    strings: RwLock<HashMap<String, Expiring>>,
    hashes: RwLock<HashMap<String, HashMap<String, String>>>,
    hash_expiry: RwLock<HashMap<String, Instant>>,
    sets: RwLock<HashMap<String, BTreeSet<String>>>,
    lists: RwLock<HashMap<String, Vec<String>>>,
    streams: RwLock<HashMap<String, StreamState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    async fn hash_live(&self, key: &str) -> bool {
        let expiry = self.hash_expiry.read().await;
        expiry.get(key).map(|at| Instant::now() < *at).unwrap_or(true)
    }
}

fn glob_match(pattern: &str, key: &str) -> bool {
    // Supports '*' as the only wildcard, which is all the stores use.
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }
    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    // Pattern ended with '*'
    parts.last().map(|p| p.is_empty()).unwrap_or(false) || rest.is_empty()
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> BackendResult<Option<String>> {
        let strings = self.strings.read().await;
        Ok(strings
            .get(key)
            .filter(|e| e.live())
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> BackendResult<()> {
        self.strings.write().await.insert(
            key.to_string(),
            Expiring {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> BackendResult<()> {
        self.strings.write().await.insert(
            key.to_string(),
            Expiring {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> BackendResult<bool> {
        let mut strings = self.strings.write().await;
        if strings.get(key).map(|e| e.live()).unwrap_or(false) {
            return Ok(false);
        }
        strings.insert(
            key.to_string(),
            Expiring {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        self.strings.write().await.remove(key);
        self.hashes.write().await.remove(key);
        self.hash_expiry.write().await.remove(key);
        self.sets.write().await.remove(key);
        self.lists.write().await.remove(key);
        Ok(())
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> BackendResult<bool> {
        let mut strings = self.strings.write().await;
        match strings.get(key) {
            Some(e) if e.live() && e.value == expected => {
                strings.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn key_exists(&self, key: &str) -> BackendResult<bool> {
        if self
            .strings
            .read()
            .await
            .get(key)
            .map(|e| e.live())
            .unwrap_or(false)
        {
            return Ok(true);
        }
        Ok(self.hashes.read().await.contains_key(key) && self.hash_live(key).await)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> BackendResult<()> {
        let mut strings = self.strings.write().await;
        if let Some(entry) = strings.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
            return Ok(());
        }
        drop(strings);
        if self.hashes.read().await.contains_key(key) {
            self.hash_expiry
                .write()
                .await
                .insert(key.to_string(), Instant::now() + ttl);
        }
        Ok(())
    }

    async fn hash_incr(&self, key: &str, field: &str, by: i64) -> BackendResult<i64> {
        if !self.hash_live(key).await {
            self.hashes.write().await.remove(key);
            self.hash_expiry.write().await.remove(key);
        }
        let mut hashes = self.hashes.write().await;
        let hash = hashes.entry(key.to_string()).or_default();
        let current: i64 = hash
            .get(field)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let next = current + by;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn hash_set(&self, key: &str, entries: &[(&str, &str)]) -> BackendResult<()> {
        let mut hashes = self.hashes.write().await;
        let hash = hashes.entry(key.to_string()).or_default();
        for (field, value) in entries {
            hash.insert(field.to_string(), value.to_string());
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> BackendResult<HashMap<String, String>> {
        if !self.hash_live(key).await {
            return Ok(HashMap::new());
        }
        Ok(self.hashes.read().await.get(key).cloned().unwrap_or_default())
    }

    async fn set_add(&self, key: &str, member: &str) -> BackendResult<()> {
        self.sets
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> BackendResult<()> {
        if let Some(set) = self.sets.write().await.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> BackendResult<Vec<String>> {
        Ok(self
            .sets
            .read()
            .await
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_push(&self, key: &str, value: &str) -> BackendResult<()> {
        self.lists
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
        Ok(())
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> BackendResult<Vec<String>> {
        let lists = self.lists.read().await;
        let Some(list) = lists.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as isize;
        let norm = |i: isize| -> isize {
            if i < 0 {
                (len + i).max(0)
            } else {
                i
            }
        };
        let from = norm(start).min(len) as usize;
        let to = (norm(stop) + 1).clamp(0, len) as usize;
        if from >= to {
            return Ok(Vec::new());
        }
        Ok(list[from..to].to_vec())
    }

    async fn list_set(&self, key: &str, index: isize, value: &str) -> BackendResult<()> {
        let mut lists = self.lists.write().await;
        let list = lists
            .get_mut(key)
            .ok_or_else(|| BackendError::not_found(key))?;
        let len = list.len() as isize;
        let idx = if index < 0 { len + index } else { index };
        if idx < 0 || idx >= len {
            return Err(BackendError::backend(format!(
                "index {index} out of range for list {key}"
            )));
        }
        list[idx as usize] = value.to_string();
        Ok(())
    }

    async fn scan_keys(&self, pattern: &str) -> BackendResult<Vec<String>> {
        let mut found = BTreeSet::new();
        for key in self.strings.read().await.keys() {
            if glob_match(pattern, key) {
                found.insert(key.clone());
            }
        }
        for key in self.hashes.read().await.keys() {
            if glob_match(pattern, key) {
                found.insert(key.clone());
            }
        }
        for key in self.sets.read().await.keys() {
            if glob_match(pattern, key) {
                found.insert(key.clone());
            }
        }
        for key in self.lists.read().await.keys() {
            if glob_match(pattern, key) {
                found.insert(key.clone());
            }
        }
        Ok(found.into_iter().collect())
    }

    async fn stream_append(
        &self,
        stream: &str,
        fields: &[(&str, &str)],
    ) -> BackendResult<String> {
        let mut streams = self.streams.write().await;
        let state = streams.entry(stream.to_string()).or_default();
        state.next_seq += 1;
        let id = format!("{}-0", state.next_seq);
        let fields: HashMap<String, String> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        state.entries.push(StreamMessage {
            id: id.clone(),
            fields,
        });
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> BackendResult<()> {
        let mut streams = self.streams.write().await;
        let state = streams.entry(stream.to_string()).or_default();
        state.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        _block: Duration,
        count: usize,
    ) -> BackendResult<Vec<StreamMessage>> {
        let mut streams = self.streams.write().await;
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| BackendError::not_found(stream))?;
        let total = state.entries.len();
        let group_state = state
            .groups
            .get_mut(group)
            .ok_or_else(|| BackendError::backend(format!("no such group {group}")))?;

        let mut delivered = Vec::new();
        while group_state.cursor < total && delivered.len() < count {
            let index = group_state.cursor;
            let entry = state.entries[index].clone();
            group_state.pending.insert(
                entry.id.clone(),
                PendingEntry {
                    consumer: consumer.to_string(),
                    delivered_at: Instant::now(),
                    delivery_count: 1,
                    index,
                },
            );
            delivered.push(entry);
            group_state.cursor += 1;
        }
        Ok(delivered)
    }

    async fn auto_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> BackendResult<Vec<StreamMessage>> {
        let mut streams = self.streams.write().await;
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| BackendError::not_found(stream))?;
        let entries = state.entries.clone();
        let group_state = state
            .groups
            .get_mut(group)
            .ok_or_else(|| BackendError::backend(format!("no such group {group}")))?;

        let now = Instant::now();
        let mut eligible: Vec<(usize, String)> = group_state
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.delivered_at) >= min_idle)
            .map(|(id, p)| (p.index, id.clone()))
            .collect();
        eligible.sort();

        let mut claimed = Vec::new();
        for (index, id) in eligible.into_iter().take(count) {
            if let Some(pending) = group_state.pending.get_mut(&id) {
                pending.consumer = consumer.to_string();
                pending.delivered_at = now;
                pending.delivery_count += 1;
            }
            claimed.push(entries[index].clone());
        }
        Ok(claimed)
    }

    async fn ack(&self, stream: &str, group: &str, message_id: &str) -> BackendResult<()> {
        let mut streams = self.streams.write().await;
        if let Some(state) = streams.get_mut(stream) {
            if let Some(group_state) = state.groups.get_mut(group) {
                group_state.pending.remove(message_id);
            }
        }
        Ok(())
    }

    async fn pending_count(&self, stream: &str, group: &str) -> BackendResult<u64> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.len() as u64)
            .unwrap_or(0))
    }

    async fn stream_range(&self, stream: &str, count: usize) -> BackendResult<Vec<StreamMessage>> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(stream)
            .map(|s| s.entries.iter().take(count).cloned().collect())
            .unwrap_or_default())
    }

    async fn stream_len(&self, stream: &str) -> BackendResult<u64> {
        let streams = self.streams.read().await;
        Ok(streams.get(stream).map(|s| s.entries.len() as u64).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_if_absent_respects_ttl() {
        let backend = MemoryBackend::new();
        assert!(backend
            .set_if_absent("k", "a", Duration::from_millis(20))
            .await
            .unwrap());
        assert!(!backend
            .set_if_absent("k", "b", Duration::from_millis(20))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(backend
            .set_if_absent("k", "c", Duration::from_secs(1))
            .await
            .unwrap());
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn delete_if_equals_only_matches_holder() {
        let backend = MemoryBackend::new();
        backend.set("lock", "token-a").await.unwrap();
        assert!(!backend.delete_if_equals("lock", "token-b").await.unwrap());
        assert!(backend.delete_if_equals("lock", "token-a").await.unwrap());
        assert_eq!(backend.get("lock").await.unwrap(), None);
    }

    #[tokio::test]
    async fn groups_track_pending_until_ack() {
        let backend = MemoryBackend::new();
        backend.ensure_group("s", "g").await.unwrap();
        backend.stream_append("s", &[("event", "{}")]).await.unwrap();

        let msgs = backend
            .read_group("s", "g", "c1", Duration::ZERO, 10)
            .await
            .unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(backend.pending_count("s", "g").await.unwrap(), 1);

        backend.ack("s", "g", &msgs[0].id).await.unwrap();
        assert_eq!(backend.pending_count("s", "g").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn auto_claim_hands_idle_messages_to_peer() {
        let backend = MemoryBackend::new();
        backend.ensure_group("s", "g").await.unwrap();
        backend.stream_append("s", &[("event", "{}")]).await.unwrap();

        let msgs = backend
            .read_group("s", "g", "c1", Duration::ZERO, 10)
            .await
            .unwrap();
        assert_eq!(msgs.len(), 1);

        // Not yet idle long enough.
        let claimed = backend
            .auto_claim("s", "g", "c2", Duration::from_secs(60), 10)
            .await
            .unwrap();
        assert!(claimed.is_empty());

        tokio::time::sleep(Duration::from_millis(15)).await;
        let claimed = backend
            .auto_claim("s", "g", "c2", Duration::from_millis(10), 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, msgs[0].id);
    }

    #[tokio::test]
    async fn groups_are_independent_cursors() {
        let backend = MemoryBackend::new();
        backend.ensure_group("s", "g1").await.unwrap();
        backend.ensure_group("s", "g2").await.unwrap();
        backend.stream_append("s", &[("event", "a")]).await.unwrap();

        let a = backend
            .read_group("s", "g1", "c", Duration::ZERO, 10)
            .await
            .unwrap();
        let b = backend
            .read_group("s", "g2", "c", Duration::ZERO, 10)
            .await
            .unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn glob_patterns() {
        assert!(glob_match("audit:project:*:info", "audit:project:p1:info"));
        assert!(!glob_match("audit:project:*:info", "audit:project:p1:backlog"));
        assert!(glob_match("audit:*", "audit:anything"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exact2"));
    }
}
