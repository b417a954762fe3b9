use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info};

use githarvest_core::{EntityKind, Record, RecordStore};

struct Inner {
    buffers: HashMap<EntityKind, Vec<Record>>,
    written: HashMap<EntityKind, u64>,
    last_flush: Instant,
}

/// Buffers records per entity type and writes each buffer in one
/// transaction, either when it reaches `batch_size` or when the flush
/// interval elapses. Flushes run inline under the writer's lock, so writes
/// to the same rows are naturally serialized.
pub struct BatchWriter {
    store: Arc<dyn RecordStore>,
    batch_size: usize,
    flush_interval: Duration,
    inner: Mutex<Inner>,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn RecordStore>, batch_size: usize, flush_interval: Duration) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            flush_interval,
            inner: Mutex::new(Inner {
                buffers: HashMap::new(),
                written: HashMap::new(),
                last_flush: Instant::now(),
            }),
        }
    }

    pub async fn submit(&self, record: Record) -> githarvest_core::Result<()> {
        let mut inner = self.inner.lock().await;
        let kind = record.kind();
        let buffered = {
            let buffer = inner.buffers.entry(kind).or_default();
            buffer.push(record);
            buffer.len()
        };

        if buffered >= self.batch_size {
            self.flush_kind(&mut inner, kind).await?;
        } else if inner.last_flush.elapsed() >= self.flush_interval {
            self.flush_open_buffers(&mut inner).await?;
        }
        Ok(())
    }

    /// Drain every buffer and report total records written per entity type.
    pub async fn flush_all(&self) -> githarvest_core::Result<HashMap<EntityKind, u64>> {
        let mut inner = self.inner.lock().await;
        self.flush_open_buffers(&mut inner).await?;
        Ok(inner.written.clone())
    }

    async fn flush_open_buffers(&self, inner: &mut Inner) -> githarvest_core::Result<()> {
        // Entities before links, so links never reference rows a later
        // buffer was still holding.
        for kind in EntityKind::ALL {
            if inner.buffers.get(&kind).map_or(false, |b| !b.is_empty()) {
                self.flush_kind(inner, kind).await?;
            }
        }
        inner.last_flush = Instant::now();
        Ok(())
    }

    async fn flush_kind(&self, inner: &mut Inner, kind: EntityKind) -> githarvest_core::Result<()> {
        let records = match inner.buffers.get_mut(&kind) {
            Some(buffer) if !buffer.is_empty() => std::mem::take(buffer),
            _ => return Ok(()),
        };

        debug!(kind = kind.as_str(), count = records.len(), "flushing batch");
        match self.store.upsert_batch(kind, &records).await {
            Ok(written) => {
                *inner.written.entry(kind).or_insert(0) += written;
                Ok(())
            }
            Err(err) => {
                // The transaction rolled back; keep the records so a retry
                // can flush them again.
                info!(kind = kind.as_str(), error = %err, "batch flush failed, buffering for retry");
                let buffer = inner.buffers.entry(kind).or_default();
                let mut restored = records;
                restored.append(buffer);
                *buffer = restored;
                Err(err)
            }
        }
    }
}
