//! Thread-safe in-memory [`KvStore`] implementation for local development and tests.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	store::{Fields, KvStore, StoreError, StoreFuture, StoreKey},
};

const SWEEP_EVERY: u64 = 256;

type StoreMap = Arc<RwLock<HashMap<StoreKey, Entry>>>;

#[derive(Clone, Debug)]
enum Value {
	Fields(Fields),
	Counter(u64),
}

#[derive(Clone, Debug)]
struct Entry {
	value: Value,
	expires_at: OffsetDateTime,
}

/// In-process backend with lazy TTL expiry.
///
/// Every mutation holds the write lock for its whole read-modify-write, which gives the same
/// per-key atomicity a shared backend provides. Expired entries are dropped when their key is
/// touched, and every 256th mutation sweeps the whole map, so keys that are never touched again
/// (past rate-limit windows, abandoned sessions) do not accumulate. [`advance`](Self::advance)
/// shifts the store's clock so expiry can be exercised without sleeping.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
	map: StoreMap,
	skew: Arc<Mutex<Duration>>,
	mutations: Arc<AtomicU64>,
}
impl MemoryStore {
	/// Moves the store's notion of "now" forward.
	pub fn advance(&self, by: Duration) {
		*self.skew.lock() += by;
	}

	/// Remaining TTL for `key`, if it is live.
	pub fn remaining_ttl(&self, key: &StoreKey) -> Option<Duration> {
		let now = self.now();

		self.map.read().get(key).filter(|e| e.expires_at > now).map(|e| e.expires_at - now)
	}

	/// Number of live keys.
	pub fn live_keys(&self) -> usize {
		let now = self.now();

		self.map.read().values().filter(|e| e.expires_at > now).count()
	}

	/// Number of stored entries, expired ones not yet swept included.
	pub fn stored_keys(&self) -> usize {
		self.map.read().len()
	}

	/// Drops every expired entry and returns how many were removed.
	pub fn purge_expired(&self) -> usize {
		let now = self.now();

		Self::sweep(&mut self.map.write(), now)
	}

	fn now(&self) -> OffsetDateTime {
		OffsetDateTime::now_utc() + *self.skew.lock()
	}

	fn sweep_if_due(&self, now: OffsetDateTime) {
		if self.mutations.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
			Self::sweep(&mut self.map.write(), now);
		}
	}

	fn sweep(map: &mut HashMap<StoreKey, Entry>, now: OffsetDateTime) -> usize {
		let before = map.len();

		map.retain(|_, e| e.expires_at > now);

		before - map.len()
	}

	fn purge_key(map: &mut HashMap<StoreKey, Entry>, now: OffsetDateTime, key: &StoreKey) {
		if map.get(key).is_some_and(|e| e.expires_at <= now) {
			map.remove(key);
		}
	}

	fn put_now(map: StoreMap, now: OffsetDateTime, key: StoreKey, fields: Fields, ttl: Duration) {
		map.write().insert(key, Entry { value: Value::Fields(fields), expires_at: now + ttl });
	}

	fn get_all_now(
		map: StoreMap,
		now: OffsetDateTime,
		key: &StoreKey,
	) -> Result<Option<Fields>, StoreError> {
		let mut guard = map.write();

		Self::purge_key(&mut guard, now, key);

		match guard.get(key) {
			Some(Entry { value: Value::Fields(fields), .. }) => Ok(Some(fields.clone())),
			Some(Entry { value: Value::Counter(_), .. }) =>
				Err(StoreError::serialization(format!("{key:?} holds a counter, not a field map"))),
			None => Ok(None),
		}
	}

	fn set_fields_now(
		map: StoreMap,
		now: OffsetDateTime,
		key: &StoreKey,
		updates: Fields,
		ttl: Duration,
	) -> Result<bool, StoreError> {
		let mut guard = map.write();

		Self::purge_key(&mut guard, now, key);

		let Some(entry) = guard.get_mut(key) else {
			return Ok(false);
		};
		let Value::Fields(fields) = &mut entry.value else {
			return Err(StoreError::serialization(format!(
				"{key:?} holds a counter, not a field map"
			)));
		};

		fields.extend(updates);
		entry.expires_at = now + ttl;

		Ok(true)
	}

	fn increment_field_now(
		map: StoreMap,
		now: OffsetDateTime,
		key: &StoreKey,
		field: &str,
		delta: i64,
	) -> Result<Option<i64>, StoreError> {
		let mut guard = map.write();

		Self::purge_key(&mut guard, now, key);

		let Some(entry) = guard.get_mut(key) else {
			return Ok(None);
		};
		let Value::Fields(fields) = &mut entry.value else {
			return Err(StoreError::serialization(format!(
				"{key:?} holds a counter, not a field map"
			)));
		};
		let current = match fields.get(field) {
			Some(raw) => raw.parse::<i64>().map_err(StoreError::serialization)?,
			None => 0,
		};
		let next = current + delta;

		fields.insert(field.to_owned(), next.to_string());

		Ok(Some(next))
	}

	fn increment_counter_now(
		map: StoreMap,
		now: OffsetDateTime,
		key: &StoreKey,
		window: Duration,
	) -> Result<u64, StoreError> {
		let mut guard = map.write();
		let entry = guard
			.entry(key.clone())
			.and_modify(|e| {
				if e.expires_at <= now {
					*e = Entry { value: Value::Counter(0), expires_at: now + window };
				}
			})
			.or_insert_with(|| Entry { value: Value::Counter(0), expires_at: now + window });
		let Value::Counter(count) = &mut entry.value else {
			return Err(StoreError::serialization(format!(
				"{key:?} holds a field map, not a counter"
			)));
		};

		*count += 1;

		Ok(*count)
	}

	fn delete_now(map: StoreMap, now: OffsetDateTime, key: &StoreKey) -> bool {
		map.write().remove(key).is_some_and(|e| e.expires_at > now)
	}
}
impl KvStore for MemoryStore {
	fn put<'a>(&'a self, key: &'a StoreKey, fields: Fields, ttl: Duration) -> StoreFuture<'a, ()> {
		let map = self.map.clone();
		let now = self.now();

		Box::pin(async move {
			self.sweep_if_due(now);
			Self::put_now(map, now, key.to_owned(), fields, ttl);

			Ok(())
		})
	}

	fn get_all<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, Option<Fields>> {
		let map = self.map.clone();
		let now = self.now();

		Box::pin(async move { Self::get_all_now(map, now, key) })
	}

	fn set_fields<'a>(
		&'a self,
		key: &'a StoreKey,
		fields: Fields,
		ttl: Duration,
	) -> StoreFuture<'a, bool> {
		let map = self.map.clone();
		let now = self.now();

		Box::pin(async move {
			self.sweep_if_due(now);

			Self::set_fields_now(map, now, key, fields, ttl)
		})
	}

	fn increment_field<'a>(
		&'a self,
		key: &'a StoreKey,
		field: &'a str,
		delta: i64,
	) -> StoreFuture<'a, Option<i64>> {
		let map = self.map.clone();
		let now = self.now();

		Box::pin(async move {
			self.sweep_if_due(now);

			Self::increment_field_now(map, now, key, field, delta)
		})
	}

	fn increment_counter<'a>(
		&'a self,
		key: &'a StoreKey,
		window: Duration,
	) -> StoreFuture<'a, u64> {
		let map = self.map.clone();
		let now = self.now();

		Box::pin(async move {
			self.sweep_if_due(now);

			Self::increment_counter_now(map, now, key, window)
		})
	}

	fn delete<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, bool> {
		let map = self.map.clone();
		let now = self.now();

		Box::pin(async move { Ok(Self::delete_now(map, now, key)) })
	}
}
