//! External sort view with run generation and k-way merge.

use std::sync::{Arc, Mutex};

use tabula_core::config::EngineConfig;
use tabula_core::hash::Cachetag;
use tabula_core::key::{KeyPositions, KeySpec};
use tabula_core::schema::Header;
use tabula_core::types::Row;
use tabula_mem::{SpillChunk, SpillManager};

use crate::merge::merge_sorted;
use crate::traits::{OpError, Result, RowStream, Scan, SharedRows, Table, TableRef};

use super::run::{sort_rows, RunGenerator};

/// Upper bound on the rows reserved up front for one run buffer.
const RESERVE_ROWS: usize = 4096;

/// Sort parameters shared by every operator that sorts its input.
#[derive(Debug, Clone)]
pub struct SortOptions {
    /// Rows held in memory before spilling; `None` sorts fully in memory.
    pub buffer_size: Option<usize>,
    /// Where chunks go. Without a spill manager sorting stays in memory.
    pub spill: Option<Arc<SpillManager>>,
    pub cache: bool,
}

impl Default for SortOptions {
    fn default() -> Self {
        Self {
            buffer_size: None,
            spill: None,
            cache: true,
        }
    }
}

impl SortOptions {
    /// Options from engine configuration, building the spill manager it names.
    pub fn from_config(cfg: &EngineConfig) -> Result<Self> {
        let spill = match cfg.buffer_size {
            Some(_) => Some(Arc::new(tabula_io::build_spill_manager(cfg)?)),
            None => None,
        };
        Ok(Self {
            buffer_size: cfg.buffer_size,
            spill,
            cache: cfg.cache,
        })
    }

    pub fn spill_to(mut self, spill: Arc<SpillManager>, buffer_size: usize) -> Self {
        self.spill = Some(spill);
        self.buffer_size = Some(buffer_size);
        self
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }
}

enum Content {
    Memory(Arc<Vec<Row>>),
    Chunks(Arc<Vec<Arc<SpillChunk>>>),
}

/// Result of one sort, kept for replay while the fingerprint holds.
struct SortCache {
    tag: Cachetag,
    header: Header,
    content: Content,
}

/// External sort view.
///
/// Reads up to `buffer_size` rows. If the source ends first the rows are
/// sorted in memory; otherwise every buffer is sorted and written as a spill
/// chunk and the chunks are k-way merged. With caching enabled and a
/// fingerprint available, later scans replay the sorted rows or re-merge the
/// chunks without sorting again.
pub struct SortView {
    source: TableRef,
    key: KeySpec,
    reverse: bool,
    opts: SortOptions,
    cached: Mutex<Option<SortCache>>,
}

impl SortView {
    pub fn new(source: TableRef, key: impl Into<KeySpec>) -> Self {
        Self {
            source,
            key: key.into(),
            reverse: false,
            opts: SortOptions::default(),
            cached: Mutex::new(None),
        }
    }

    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn buffer_size(mut self, buffer_size: Option<usize>) -> Self {
        self.opts.buffer_size = buffer_size;
        self
    }

    pub fn spill(mut self, spill: Arc<SpillManager>) -> Self {
        self.opts.spill = Some(spill);
        self
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.opts.cache = cache;
        self
    }

    pub fn with_options(mut self, opts: SortOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Apply buffer size, spill location and caching from engine config.
    pub fn configure(self, cfg: &EngineConfig) -> Result<Self> {
        Ok(self.with_options(SortOptions::from_config(cfg)?))
    }

    /// Number of spill chunks held by the cache, for inspection.
    pub fn cached_chunks(&self) -> usize {
        match self.cached.lock() {
            Ok(guard) => match guard.as_ref().map(|c| &c.content) {
                Some(Content::Chunks(chunks)) => chunks.len(),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    fn replay(&self, content: &Content, positions: KeyPositions) -> RowStream {
        match content {
            Content::Memory(rows) => Box::new(SharedRows::new(Arc::clone(rows))),
            Content::Chunks(chunks) => Box::new(self.merge_chunks(chunks, positions)),
        }
    }

    fn merge_chunks(
        &self,
        chunks: &[Arc<SpillChunk>],
        positions: KeyPositions,
    ) -> impl Iterator<Item = Result<Row>> + Send {
        tracing::debug!(chunks = chunks.len(), reverse = self.reverse, "merging spill chunks");
        let streams: Vec<RowStream> = chunks
            .iter()
            .map(|c| Box::new(c.reader().map(|r| r.map_err(OpError::from))) as RowStream)
            .collect();
        merge_sorted(positions, self.reverse, streams)
    }

    /// Run the sort over a fresh pass of the source.
    fn sort(&self, rows: RowStream, positions: &KeyPositions) -> Result<Content> {
        let spill = match (&self.opts.spill, self.opts.buffer_size) {
            (Some(spill), Some(limit)) => Some((spill, limit.max(1))),
            _ => None,
        };
        let Some((spill, limit)) = spill else {
            let rows = rows.collect::<Result<Vec<_>>>()?;
            return Ok(Content::Memory(Arc::new(sort_rows(rows, positions, self.reverse)?)));
        };

        let mut rows = rows.peekable();
        let mut gen = RunGenerator::new(positions.clone(), self.reverse);
        loop {
            let mut buffer = Vec::with_capacity(limit.min(RESERVE_ROWS));
            while buffer.len() < limit {
                match rows.next() {
                    Some(row) => buffer.push(row?),
                    None => break,
                }
            }
            let exhausted = rows.peek().is_none();
            if exhausted && gen.is_empty() {
                return Ok(Content::Memory(Arc::new(sort_rows(
                    buffer,
                    positions,
                    self.reverse,
                )?)));
            }
            gen.flush_run(buffer, spill)?;
            if exhausted {
                break;
            }
        }
        tracing::debug!(
            source = self.source.name(),
            rows = gen.spilled_rows(),
            buffer_size = limit,
            "sort spilled to disk"
        );
        Ok(Content::Chunks(Arc::new(gen.finalize())))
    }
}

impl Table for SortView {
    fn name(&self) -> &'static str {
        "sort"
    }

    fn scan(&self) -> Result<Scan> {
        let tag = if self.opts.cache { self.cachetag() } else { None };

        if let Some(tag) = &tag {
            let guard = self
                .cached
                .lock()
                .map_err(|_| OpError::Exec("sort cache lock poisoned".into()))?;
            if let Some(hit) = guard.as_ref().filter(|c| &c.tag == tag) {
                tracing::debug!(source = self.source.name(), "sort cache hit");
                let positions = self.key.resolve(&hit.header)?;
                return Ok(Scan {
                    header: hit.header.clone(),
                    rows: self.replay(&hit.content, positions),
                });
            }
        }

        let scan = self.source.scan()?;
        let header = scan.header;
        let positions = self.key.resolve(&header)?;
        let content = self.sort(scan.rows, &positions)?;
        let rows = self.replay(&content, positions);

        if let Some(tag) = tag {
            let mut guard = self
                .cached
                .lock()
                .map_err(|_| OpError::Exec("sort cache lock poisoned".into()))?;
            // Replacing a stale entry drops its chunks once no merge reads them.
            *guard = Some(SortCache {
                tag,
                header: header.clone(),
                content,
            });
        }
        Ok(Scan { header, rows })
    }

    fn header(&self) -> Result<Header> {
        self.source.header()
    }

    fn cachetag(&self) -> Option<Cachetag> {
        let src = self.source.cachetag()?;
        Cachetag::builder("sort")
            .tag(&src)
            .param(&self.key)
            .ok()?
            .param(&self.reverse)
            .ok()
            .map(|b| b.finish())
    }
}

/// `source` sorted by `key`, as a shared table.
pub fn sorted(source: TableRef, key: KeySpec, reverse: bool, opts: &SortOptions) -> TableRef {
    Arc::new(
        SortView::new(source, key)
            .reverse(reverse)
            .with_options(opts.clone()),
    )
}
