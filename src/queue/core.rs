use crate::clock::{to_chrono, SharedClock};
use crate::events::{EngineEvent, EventBus};
use crate::queue::csv::{parse_records, write_record};
use crate::queue::metrics::{record_operation, QUEUE_METRICS};
use crate::queue::{ItemStatus, NewItem, QueueConfig, QueueError, QueueResult, QueuedItem};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of a bulk add or CSV import
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkAddReport {
    pub added: Vec<Uuid>,
    pub duplicates: Vec<String>,
    pub invalid: usize,
    pub rejected_full: usize,
}

/// What `fail` did with the item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailOutcome {
    /// Back to pending; `retry_count` is the number of retries used so far
    Requeued { retry_count: u32 },
    /// Terminal failure requested by the caller
    Failed,
    /// Terminal failure because the retry budget is spent
    RetryExhausted { attempts: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub total_retries: u64,
    pub average_priority: f64,
    pub oldest_pending_at: Option<DateTime<Utc>>,
    pub computed_at: Option<DateTime<Utc>>,
}

/// Full queue state for persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub items: Vec<QueuedItem>,
    pub exported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped_duplicates: usize,
    pub skipped_full: usize,
    /// Items that were mid-flight when exported and came back as pending
    pub reset_to_pending: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Descending priority; insertion order within a priority
    items: Vec<QueuedItem>,
    /// Normalised value to item id
    index: HashMap<String, Uuid>,
}

impl QueueState {
    fn position(&self, id: Uuid) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    fn insert_sorted(&mut self, item: QueuedItem) {
        let at = self
            .items
            .partition_point(|existing| existing.priority >= item.priority);
        self.items.insert(at, item);
    }

    fn sort(&mut self) {
        // stable, keeps arrival order within a priority
        self.items.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    fn remove_at(&mut self, at: usize) -> QueuedItem {
        let item = self.items.remove(at);
        if self.index.get(&item.key()) == Some(&item.id) {
            self.index.remove(&item.key());
        }
        item
    }
}

/// Stats tagged with the mutation generation they were computed in
struct CachedStats {
    computed_at: DateTime<Utc>,
    generation: u64,
    stats: QueueStats,
}

enum AddRejection {
    Empty,
    Duplicate(String),
    Full,
}

/// Priority-ordered, deduplicated keyword queue
pub struct KeywordQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    stats_cache: Mutex<Option<CachedStats>>,
    /// Bumped by every mutation
    generation: AtomicU64,
    clock: SharedClock,
    events: EventBus,
}

impl KeywordQueue {
    pub fn new(config: QueueConfig, clock: SharedClock, events: EventBus) -> QueueResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: Mutex::new(QueueState::default()),
            stats_cache: Mutex::new(None),
            generation: AtomicU64::new(0),
            clock,
            events,
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn invalidate_stats(&self) {
        let mut cache = self.stats_cache.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        *cache = None;
    }

    fn build_item(&self, input: NewItem, value: String, now: DateTime<Utc>) -> QueuedItem {
        QueuedItem {
            id: Uuid::new_v4(),
            value,
            priority: input.priority.unwrap_or(self.config.default_priority),
            status: ItemStatus::Pending,
            retry_count: 0,
            max_retries: input.max_retries.unwrap_or(self.config.default_max_retries),
            added_at: now,
            started_at: None,
            finished_at: None,
            last_error: None,
            metadata: input.metadata,
        }
    }

    /// Validate an input against the current state; returns the trimmed value
    fn admit(&self, state: &QueueState, input: &NewItem) -> Result<String, AddRejection> {
        let value = input.value.trim();
        if value.is_empty() {
            return Err(AddRejection::Empty);
        }
        if self.config.deduplicate && state.index.contains_key(&QueuedItem::normalize(value)) {
            return Err(AddRejection::Duplicate(value.to_string()));
        }
        if state.items.len() >= self.config.max_size {
            return Err(AddRejection::Full);
        }
        Ok(value.to_string())
    }

    /// Add one keyword
    pub fn try_add(&self, input: impl Into<NewItem>) -> QueueResult<QueuedItem> {
        let input = input.into();
        let now = self.clock.now();
        let item = {
            let mut state = self.state.lock();
            let value = self.admit(&state, &input).map_err(|rejection| match rejection {
                AddRejection::Empty => QueueError::EmptyValue,
                AddRejection::Duplicate(value) => QueueError::Duplicate(value),
                AddRejection::Full => QueueError::Full {
                    max_size: self.config.max_size,
                },
            })?;

            let item = self.build_item(input, value, now);
            state.index.insert(item.key(), item.id);
            state.insert_sorted(item.clone());
            item
        };

        self.invalidate_stats();
        record_operation("add");
        debug!(item_id = %item.id, value = %item.value, priority = item.priority, "Keyword queued");
        Ok(item)
    }

    /// Add one keyword, returning `None` when it is blank, a duplicate or the queue is full
    pub fn add(&self, input: impl Into<NewItem>) -> Option<QueuedItem> {
        match self.try_add(input) {
            Ok(item) => Some(item),
            Err(err) => {
                debug!(error = %err, "Keyword not queued");
                None
            }
        }
    }

    /// Add many keywords with a single sort at the end
    pub fn add_bulk<I, T>(&self, inputs: I) -> BulkAddReport
    where
        I: IntoIterator<Item = T>,
        T: Into<NewItem>,
    {
        let inputs: Vec<NewItem> = inputs.into_iter().map(Into::into).collect();
        let now = self.clock.now();
        let mut report = BulkAddReport::default();

        {
            let mut state = self.state.lock();
            for chunk in inputs.chunks(self.config.bulk_chunk_size) {
                state.items.reserve(chunk.len());
                for input in chunk {
                    match self.admit(&state, input) {
                        Ok(value) => {
                            let item = self.build_item(input.clone(), value, now);
                            state.index.insert(item.key(), item.id);
                            report.added.push(item.id);
                            state.items.push(item);
                        }
                        Err(AddRejection::Empty) => report.invalid += 1,
                        Err(AddRejection::Duplicate(value)) => report.duplicates.push(value),
                        Err(AddRejection::Full) => report.rejected_full += 1,
                    }
                }
            }
            if !report.added.is_empty() {
                state.sort();
            }
        }

        self.invalidate_stats();
        record_operation("add_bulk");
        info!(
            added = report.added.len(),
            duplicates = report.duplicates.len(),
            invalid = report.invalid,
            rejected_full = report.rejected_full,
            "Bulk add finished"
        );
        report
    }

    /// Take the highest-priority pending item and mark it processing
    pub fn next(&self) -> Option<QueuedItem> {
        self.next_batch(1).into_iter().next()
    }

    /// Take up to `count` pending items in priority order
    pub fn next_batch(&self, count: usize) -> Vec<QueuedItem> {
        let now = self.clock.now();
        let taken: Vec<QueuedItem> = {
            let mut state = self.state.lock();
            state
                .items
                .iter_mut()
                .filter(|item| item.status == ItemStatus::Pending)
                .take(count)
                .map(|item| {
                    item.status = ItemStatus::Processing;
                    item.started_at = Some(now);
                    item.clone()
                })
                .collect()
        };

        if !taken.is_empty() {
            self.invalidate_stats();
            record_operation("next");
        }
        taken
    }

    fn with_processing<R>(
        &self,
        id: Uuid,
        to: ItemStatus,
        f: impl FnOnce(&mut QueuedItem) -> R,
    ) -> QueueResult<R> {
        let mut state = self.state.lock();
        let item = state
            .items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or(QueueError::NotFound(id))?;
        if item.status != ItemStatus::Processing {
            return Err(QueueError::InvalidTransition {
                id,
                from: item.status,
                to,
            });
        }
        Ok(f(item))
    }

    /// Mark a processing item completed
    pub fn complete(&self, id: Uuid) -> QueueResult<QueuedItem> {
        let now = self.clock.now();
        let item = self.with_processing(id, ItemStatus::Completed, |item| {
            item.status = ItemStatus::Completed;
            item.finished_at = Some(now);
            item.clone()
        })?;

        self.invalidate_stats();
        record_operation("complete");
        debug!(item_id = %id, value = %item.value, "Keyword completed");
        Ok(item)
    }

    /// Hand a processing item back untouched, keeping its retry budget and place
    pub fn release(&self, id: Uuid) -> QueueResult<QueuedItem> {
        let item = self.with_processing(id, ItemStatus::Pending, |item| {
            item.status = ItemStatus::Pending;
            item.started_at = None;
            item.clone()
        })?;

        self.invalidate_stats();
        record_operation("release");
        debug!(item_id = %id, "Keyword released without an attempt");
        Ok(item)
    }

    /// Record a failure; requeue while retries remain and `should_retry` is set
    pub fn fail(&self, id: Uuid, error: Option<&str>, should_retry: bool) -> QueueResult<FailOutcome> {
        let now = self.clock.now();
        let (outcome, item) = self.with_processing(id, ItemStatus::Failed, |item| {
            item.last_error = error.map(str::to_string);
            let outcome = if should_retry && item.can_retry() {
                item.retry_count += 1;
                item.status = ItemStatus::Pending;
                item.started_at = None;
                FailOutcome::Requeued {
                    retry_count: item.retry_count,
                }
            } else {
                item.status = ItemStatus::Failed;
                item.finished_at = Some(now);
                if should_retry {
                    FailOutcome::RetryExhausted {
                        attempts: item.retry_count + 1,
                    }
                } else {
                    FailOutcome::Failed
                }
            };
            (outcome, item.clone())
        })?;

        self.invalidate_stats();
        match outcome {
            FailOutcome::Requeued { retry_count } => {
                record_operation("requeue");
                debug!(item_id = %id, retry_count, "Keyword requeued");
            }
            FailOutcome::Failed | FailOutcome::RetryExhausted { .. } => {
                record_operation("fail");
                warn!(item_id = %id, value = %item.value, error = ?error, "Keyword failed");
                self.events.publish(EngineEvent::QueueItemFailed {
                    item_id: id,
                    value: item.value.clone(),
                    attempts: item.retry_count + 1,
                    error: item.last_error.clone(),
                });
            }
        }
        Ok(outcome)
    }

    pub fn remove(&self, id: Uuid) -> Option<QueuedItem> {
        let removed = {
            let mut state = self.state.lock();
            let at = state.position(id)?;
            state.remove_at(at)
        };
        self.invalidate_stats();
        record_operation("remove");
        Some(removed)
    }

    /// Remove every item; returns how many were removed
    pub fn clear(&self) -> usize {
        let removed = {
            let mut state = self.state.lock();
            let count = state.items.len();
            state.items.clear();
            state.index.clear();
            count
        };
        self.invalidate_stats();
        info!(removed, "Queue cleared");
        removed
    }

    pub fn clear_completed(&self) -> usize {
        self.remove_where(|item| item.status == ItemStatus::Completed)
    }

    fn remove_where(&self, predicate: impl Fn(&QueuedItem) -> bool) -> usize {
        let removed = {
            let mut state = self.state.lock();
            let before = state.items.len();
            let (gone, kept): (Vec<_>, Vec<_>) =
                std::mem::take(&mut state.items).into_iter().partition(|i| predicate(i));
            state.items = kept;
            for item in &gone {
                state.index.remove(&item.key());
            }
            before - state.items.len()
        };
        if removed > 0 {
            self.invalidate_stats();
        }
        removed
    }

    /// Move every failed item back to pending with a fresh retry budget
    pub fn retry_failed(&self) -> usize {
        self.reset_status(ItemStatus::Failed, true)
    }

    /// Move items stuck in processing (for example after a crash) back to pending
    pub fn reset_processing(&self) -> usize {
        self.reset_status(ItemStatus::Processing, false)
    }

    fn reset_status(&self, from: ItemStatus, clear_retries: bool) -> usize {
        let count = {
            let mut state = self.state.lock();
            let mut count = 0;
            for item in state.items.iter_mut().filter(|i| i.status == from) {
                item.status = ItemStatus::Pending;
                item.started_at = None;
                item.finished_at = None;
                if clear_retries {
                    item.retry_count = 0;
                    item.last_error = None;
                }
                count += 1;
            }
            count
        };
        if count > 0 {
            self.invalidate_stats();
            info!(count, from = %from, "Queue items reset to pending");
        }
        count
    }

    pub fn update_priority(&self, id: Uuid, priority: i32) -> QueueResult<QueuedItem> {
        let item = {
            let mut state = self.state.lock();
            let at = state.position(id).ok_or(QueueError::NotFound(id))?;
            let mut item = state.items.remove(at);
            item.priority = priority;
            state.insert_sorted(item.clone());
            item
        };
        self.invalidate_stats();
        Ok(item)
    }

    pub fn get(&self, id: Uuid) -> Option<QueuedItem> {
        let state = self.state.lock();
        state.items.iter().find(|item| item.id == id).cloned()
    }

    /// Case-insensitive lookup by value
    pub fn find_by_value(&self, value: &str) -> Option<QueuedItem> {
        let key = QueuedItem::normalize(value);
        let state = self.state.lock();
        state.items.iter().find(|item| item.key() == key).cloned()
    }

    /// Items in queue order, optionally filtered by status
    pub fn list(&self, status: Option<ItemStatus>) -> Vec<QueuedItem> {
        let state = self.state.lock();
        state
            .items
            .iter()
            .filter(|item| status.map_or(true, |s| item.status == s))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        let state = self.state.lock();
        state
            .items
            .iter()
            .filter(|item| item.status == ItemStatus::Pending)
            .count()
    }

    /// Counts by status; reused for `stats_ttl_ms` unless the queue changes
    pub fn stats(&self) -> QueueStats {
        let now = self.clock.now();
        // read before scanning so a racing mutation leaves this result stale
        let generation = self.generation.load(Ordering::Acquire);
        {
            let cache = self.stats_cache.lock();
            if let Some(cached) = cache.as_ref() {
                if cached.generation == generation
                    && now - cached.computed_at < to_chrono(self.config.stats_ttl())
                {
                    return cached.stats.clone();
                }
            }
        }

        let stats = {
            let state = self.state.lock();
            let mut stats = QueueStats {
                total: state.items.len(),
                computed_at: Some(now),
                ..Default::default()
            };
            let mut priority_sum: i64 = 0;
            for item in &state.items {
                match item.status {
                    ItemStatus::Pending => {
                        stats.pending += 1;
                        stats.oldest_pending_at = Some(match stats.oldest_pending_at {
                            Some(oldest) => oldest.min(item.added_at),
                            None => item.added_at,
                        });
                    }
                    ItemStatus::Processing => stats.processing += 1,
                    ItemStatus::Completed => stats.completed += 1,
                    ItemStatus::Failed => stats.failed += 1,
                }
                stats.total_retries += item.retry_count as u64;
                priority_sum += item.priority as i64;
            }
            if stats.total > 0 {
                stats.average_priority = priority_sum as f64 / stats.total as f64;
            }
            stats
        };

        for (status, count) in [
            (ItemStatus::Pending, stats.pending),
            (ItemStatus::Processing, stats.processing),
            (ItemStatus::Completed, stats.completed),
            (ItemStatus::Failed, stats.failed),
        ] {
            QUEUE_METRICS
                .items
                .with_label_values(&[&status.to_string()])
                .set(count as f64);
        }

        let mut cache = self.stats_cache.lock();
        if self.generation.load(Ordering::Acquire) == generation {
            *cache = Some(CachedStats {
                computed_at: now,
                generation,
                stats: stats.clone(),
            });
        }
        stats
    }

    pub fn export_state(&self) -> QueueSnapshot {
        QueueSnapshot {
            items: self.list(None),
            exported_at: self.clock.now(),
        }
    }

    /// Load a snapshot. Without `merge` the queue is cleared first.
    /// Items exported while processing come back as pending.
    pub fn import_state(&self, snapshot: QueueSnapshot, merge: bool) -> ImportSummary {
        let mut summary = ImportSummary::default();
        {
            let mut state = self.state.lock();
            if !merge {
                state.items.clear();
                state.index.clear();
            }

            for chunk in snapshot.items.chunks(self.config.bulk_chunk_size) {
                for item in chunk {
                    let key = item.key();
                    if (self.config.deduplicate && state.index.contains_key(&key))
                        || state.items.iter().any(|existing| existing.id == item.id)
                    {
                        summary.skipped_duplicates += 1;
                        continue;
                    }
                    if state.items.len() >= self.config.max_size {
                        summary.skipped_full += 1;
                        continue;
                    }

                    let mut item = item.clone();
                    if item.status == ItemStatus::Processing {
                        item.status = ItemStatus::Pending;
                        item.started_at = None;
                        summary.reset_to_pending += 1;
                    }
                    state.index.insert(key, item.id);
                    state.items.push(item);
                    summary.imported += 1;
                }
            }
            state.sort();
        }

        self.invalidate_stats();
        info!(
            imported = summary.imported,
            skipped_duplicates = summary.skipped_duplicates,
            skipped_full = summary.skipped_full,
            "Queue state imported"
        );
        summary
    }

    /// `keyword,priority,status,retry_count` rows in queue order
    pub fn export_csv(&self, include_header: bool) -> String {
        let mut out = String::new();
        if include_header {
            out.push_str("keyword,priority,status,retry_count\n");
        }
        for item in self.list(None) {
            let priority = item.priority.to_string();
            let status = item.status.to_string();
            let retries = item.retry_count.to_string();
            out.push_str(&write_record(&[&item.value, &priority, &status, &retries]));
            out.push('\n');
        }
        out
    }

    /// Import `keyword[,priority]` rows. A first row whose first cell is
    /// `keyword` is treated as a header. Extra columns are ignored.
    pub fn import_csv(&self, text: &str) -> QueueResult<BulkAddReport> {
        let records = parse_records(text)?;
        let mut inputs = Vec::with_capacity(records.len());
        let mut invalid = 0;

        for (i, (line, fields)) in records.into_iter().enumerate() {
            let first = fields.first().map(|f| f.trim()).unwrap_or_default();
            if i == 0 && first.eq_ignore_ascii_case("keyword") {
                continue;
            }

            let mut input = NewItem::new(first);
            match fields.get(1).map(|p| p.trim()).filter(|p| !p.is_empty()) {
                Some(raw) => match raw.parse::<i32>() {
                    Ok(priority) => input = input.with_priority(priority),
                    Err(_) => {
                        warn!(line, priority = %raw, "Skipping CSV row with invalid priority");
                        invalid += 1;
                        continue;
                    }
                },
                None => {}
            }
            inputs.push(input);
        }

        let mut report = self.add_bulk(inputs);
        report.invalid += invalid;
        Ok(report)
    }
}

impl std::fmt::Debug for KeywordQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordQueue")
            .field("config", &self.config)
            .field("len", &self.len())
            .finish()
    }
}
