//! Occurrence cache -- materialized occurrence rows for range queries.
//!
//! Each field value of an entity is expanded into rows keyed by
//! `(entity id, delta, occurrence index)`. A range query then returns every entity
//! with at least one row overlapping the queried window, without expanding rules at
//! query time.
//!
//! The backing store is an external collaborator behind [`OccurrenceStore`];
//! [`MemoryStore`] is the in-process implementation.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{PrecreateInterval, DEFAULT_MAX_ROWS_PER_VALUE, DEFAULT_PRECREATE};
use crate::error::Result;
use crate::granularity::{self, Granularity};
use crate::occurrence::Occurrence;
use crate::value::RecurringDateValue;

pub type EntityId = u64;

/// One cached occurrence of one field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceRow {
    pub entity_id: EntityId,
    pub delta: u32,
    pub index: u32,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl OccurrenceRow {
    pub fn occurrence(&self) -> Occurrence {
        Occurrence::new(self.start, self.end)
    }
}

/// Row storage used by [`OccurrenceCache`].
pub trait OccurrenceStore {
    /// Rows of one field value, ordered by index.
    fn get(&self, entity_id: EntityId, delta: u32) -> Result<Vec<OccurrenceRow>>;

    /// Every row of an entity, ordered by delta then index.
    fn entity_rows(&self, entity_id: EntityId) -> Result<Vec<OccurrenceRow>>;

    /// Insert a row, replacing any row with the same key.
    fn put(&mut self, row: OccurrenceRow) -> Result<()>;

    fn delete_by_entity(&mut self, entity_id: EntityId) -> Result<()>;

    /// Ids of entities with a row where `start <= window_end && end >= window_start`,
    /// sorted and without duplicates.
    fn query_overlap(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<EntityId>>;
}

type RowKey = (EntityId, u32, u32);

/// In-memory [`OccurrenceStore`] with a start-time index.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    rows: BTreeMap<RowKey, OccurrenceRow>,
    by_start: BTreeSet<(DateTime<Utc>, RowKey)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl OccurrenceStore for MemoryStore {
    fn get(&self, entity_id: EntityId, delta: u32) -> Result<Vec<OccurrenceRow>> {
        Ok(self
            .rows
            .range((entity_id, delta, 0)..=(entity_id, delta, u32::MAX))
            .map(|(_, row)| *row)
            .collect())
    }

    fn entity_rows(&self, entity_id: EntityId) -> Result<Vec<OccurrenceRow>> {
        Ok(self
            .rows
            .range((entity_id, 0, 0)..=(entity_id, u32::MAX, u32::MAX))
            .map(|(_, row)| *row)
            .collect())
    }

    fn put(&mut self, row: OccurrenceRow) -> Result<()> {
        let key = (row.entity_id, row.delta, row.index);
        if let Some(old) = self.rows.insert(key, row) {
            self.by_start.remove(&(old.start, key));
        }
        self.by_start.insert((row.start, key));
        Ok(())
    }

    fn delete_by_entity(&mut self, entity_id: EntityId) -> Result<()> {
        let keys: Vec<RowKey> = self
            .rows
            .range((entity_id, 0, 0)..=(entity_id, u32::MAX, u32::MAX))
            .map(|(key, _)| *key)
            .collect();
        for key in keys {
            if let Some(row) = self.rows.remove(&key) {
                self.by_start.remove(&(row.start, key));
            }
        }
        Ok(())
    }

    fn query_overlap(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<EntityId>> {
        let upper = (window_end, (EntityId::MAX, u32::MAX, u32::MAX));
        let ids: BTreeSet<EntityId> = self
            .by_start
            .range(..=upper)
            .filter_map(|(_, key)| self.rows.get(key))
            .filter(|row| row.end >= window_start)
            .map(|row| row.entity_id)
            .collect();
        Ok(ids.into_iter().collect())
    }
}

/// Limits applied when materializing occurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Horizon past "now" up to which infinite rules are materialized.
    pub precreate: Option<PrecreateInterval>,
    /// Upper bound on rows written for a single field value. Infinite rules bounded
    /// by `precreate` are not subject to it.
    pub max_rows_per_value: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            precreate: DEFAULT_PRECREATE.parse().ok(),
            max_rows_per_value: DEFAULT_MAX_ROWS_PER_VALUE,
        }
    }
}

/// Outcome of [`OccurrenceCache::sync_entity`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// False when the values were unchanged and the rows were left alone.
    pub rebuilt: bool,
    pub rows_written: usize,
    /// Deltas that had rows dropped by `max_rows_per_value`.
    pub capped_deltas: Vec<u32>,
    /// Deltas that could not be expanded and have no rows.
    pub failed_deltas: Vec<u32>,
}

/// Delete-then-insert of one entity's rows as a unit.
///
/// The entity's rows are snapshotted before deletion. Unless [`Rebuild::commit`] is
/// reached, dropping the guard puts the snapshot back.
struct Rebuild<'a, S: OccurrenceStore> {
    store: &'a mut S,
    entity_id: EntityId,
    snapshot: Vec<OccurrenceRow>,
    committed: bool,
}

impl<'a, S: OccurrenceStore> Rebuild<'a, S> {
    fn begin(store: &'a mut S, entity_id: EntityId) -> Result<Self> {
        let snapshot = store.entity_rows(entity_id)?;
        store.delete_by_entity(entity_id)?;
        Ok(Self {
            store,
            entity_id,
            snapshot,
            committed: false,
        })
    }

    fn put(&mut self, row: OccurrenceRow) -> Result<()> {
        self.store.put(row)
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl<S: OccurrenceStore> Drop for Rebuild<'_, S> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        tracing::warn!(entity_id = self.entity_id, "occurrence rebuild aborted, restoring previous rows");
        if let Err(e) = self.store.delete_by_entity(self.entity_id) {
            tracing::error!(entity_id = self.entity_id, error = %e, "failed to clear partial rebuild");
        }
        for row in self.snapshot.drain(..) {
            if let Err(e) = self.store.put(row) {
                tracing::error!(entity_id = self.entity_id, error = %e, "failed to restore occurrence row");
            }
        }
    }
}

/// What the cache knows about an entity since its last rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Synced {
    fingerprints: Vec<(u32, u64)>,
    /// Once `now` passes this, rows of infinite rules are regenerated to move the
    /// precreate window forward.
    refresh_after: Option<DateTime<Utc>>,
}

impl Synced {
    fn is_current(&self, fingerprints: &[(u32, u64)], now: DateTime<Utc>) -> bool {
        self.fingerprints == fingerprints && self.refresh_after.is_none_or(|at| now <= at)
    }
}

/// Materialized occurrences over an [`OccurrenceStore`].
#[derive(Debug)]
pub struct OccurrenceCache<S> {
    store: S,
    config: CacheConfig,
    synced: HashMap<EntityId, Synced>,
}

impl<S: OccurrenceStore> OccurrenceCache<S> {
    pub fn new(store: S, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            synced: HashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Bring the rows of `entity_id` in line with its current field values, numbering
    /// them as deltas `0..values.len()`.
    ///
    /// Nothing happens when the values are unchanged since the last sync and the
    /// precreate window still reaches far enough. Otherwise every row of the entity
    /// is replaced in one rebuild. A value that fails to expand is logged and left
    /// without rows; it never fails the sync.
    ///
    /// # Errors
    /// Only store failures are returned, after the previous rows have been restored.
    pub fn sync_entity(
        &mut self,
        entity_id: EntityId,
        values: &[RecurringDateValue],
        now: DateTime<Utc>,
    ) -> Result<SyncReport> {
        let items: Vec<(u32, &RecurringDateValue)> = (0u32..).zip(values).collect();
        self.sync(entity_id, &items, now)
    }

    /// Like [`sync_entity`](Self::sync_entity), for values stored under their own
    /// delta numbers. Deltas must be distinct.
    pub fn sync_entity_deltas(
        &mut self,
        entity_id: EntityId,
        values: &[(u32, RecurringDateValue)],
        now: DateTime<Utc>,
    ) -> Result<SyncReport> {
        let items: Vec<(u32, &RecurringDateValue)> =
            values.iter().map(|(delta, value)| (*delta, value)).collect();
        self.sync(entity_id, &items, now)
    }

    #[tracing::instrument(skip(self, values, now), fields(values = values.len()))]
    fn sync(
        &mut self,
        entity_id: EntityId,
        values: &[(u32, &RecurringDateValue)],
        now: DateTime<Utc>,
    ) -> Result<SyncReport> {
        let fingerprints: Vec<(u32, u64)> = values
            .iter()
            .map(|(delta, value)| (*delta, value.fingerprint()))
            .collect();
        if self
            .synced
            .get(&entity_id)
            .is_some_and(|synced| synced.is_current(&fingerprints, now))
        {
            tracing::debug!("values unchanged, keeping cached occurrences");
            return Ok(SyncReport::default());
        }

        let mut report = SyncReport {
            rebuilt: true,
            ..SyncReport::default()
        };
        let mut refresh_after: Option<DateTime<Utc>> = None;
        let mut rebuild = Rebuild::begin(&mut self.store, entity_id)?;

        for &(delta, value) in values {
            let expanded = match materialize(value, now, &self.config) {
                Ok(expanded) => expanded,
                Err(e) => {
                    tracing::warn!(delta, error = %e, "could not expand value, caching no occurrences");
                    report.failed_deltas.push(delta);
                    continue;
                }
            };
            if expanded.capped {
                report.capped_deltas.push(delta);
            }
            if let Some(horizon) = expanded.horizon {
                let at = now + (horizon - now) / 2;
                refresh_after = Some(refresh_after.map_or(at, |current| current.min(at)));
            }
            for (index, occ) in (0u32..).zip(expanded.occurrences) {
                rebuild.put(OccurrenceRow {
                    entity_id,
                    delta,
                    index,
                    start: occ.start,
                    end: occ.end,
                })?;
                report.rows_written += 1;
            }
        }

        rebuild.commit();
        self.synced.insert(
            entity_id,
            Synced {
                fingerprints,
                refresh_after,
            },
        );
        tracing::info!(rows = report.rows_written, "rebuilt cached occurrences");
        Ok(report)
    }

    /// Drop every row of an entity, e.g. when it is deleted.
    pub fn remove_entity(&mut self, entity_id: EntityId) -> Result<()> {
        self.synced.remove(&entity_id);
        self.store.delete_by_entity(entity_id)
    }

    /// Cached occurrences of one field value.
    pub fn occurrences_for(&self, entity_id: EntityId, delta: u32) -> Result<Vec<Occurrence>> {
        Ok(self
            .store
            .get(entity_id, delta)?
            .iter()
            .map(OccurrenceRow::occurrence)
            .collect())
    }

    /// Entities with an occurrence overlapping `[window_start, window_end]`, both ends
    /// inclusive. An inverted window matches nothing.
    pub fn find_entities_overlapping(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<EntityId>> {
        if window_start > window_end {
            return Ok(Vec::new());
        }
        self.store.query_overlap(window_start, window_end)
    }

    /// Entities with an occurrence inside the period a partial date stands for, such
    /// as every entity occurring in `2023-09` at month granularity.
    pub fn find_entities_in(
        &self,
        granularity: Granularity,
        input: &str,
        timezone: &str,
    ) -> Result<Vec<EntityId>> {
        let (smallest, largest) = granularity::range(granularity, input, timezone)?;
        self.find_entities_overlapping(smallest, largest)
    }
}

struct Materialized {
    occurrences: Vec<Occurrence>,
    capped: bool,
    /// End of the precreate window an infinite rule was expanded to.
    horizon: Option<DateTime<Utc>>,
}

/// Expand one value for caching.
///
/// Infinite rules run up to `now + precreate`. Everything else is expanded in full
/// unless it exceeds the row cap, in which case the rows nearest `now` are kept.
fn materialize(
    value: &RecurringDateValue,
    now: DateTime<Utc>,
    config: &CacheConfig,
) -> Result<Materialized> {
    let helper = value.helper()?;
    let cap = config.max_rows_per_value;

    if helper.is_infinite() {
        if let Some(horizon) = config.precreate.and_then(|p| p.after(now)) {
            return Ok(Materialized {
                occurrences: helper.generate(None, Some(horizon)).collect(),
                capped: false,
                horizon: Some(horizon),
            });
        }
        tracing::warn!(cap, "infinite rule without a precreate horizon, capping by row count");
    }

    let (occurrences, capped) = keep_nearest(helper.generate(None, None), now, cap);
    if capped {
        tracing::warn!(cap, "occurrence row cap reached, cache is partial");
    }
    Ok(Materialized {
        occurrences,
        capped,
        horizon: None,
    })
}

/// Keep at most `cap` occurrences around `now`. Rows that ended before `now` make
/// room for later ones; generation stops once `cap` rows not yet over are held.
fn keep_nearest(
    occurrences: impl Iterator<Item = Occurrence>,
    now: DateTime<Utc>,
    cap: usize,
) -> (Vec<Occurrence>, bool) {
    let mut kept: VecDeque<Occurrence> = VecDeque::new();
    let mut capped = false;
    for occ in occurrences {
        if kept.len() >= cap {
            capped = true;
            match kept.front() {
                Some(oldest) if oldest.end < now => {
                    kept.pop_front();
                }
                _ => break,
            }
        }
        kept.push_back(occ);
    }
    (kept.into(), capped)
}
