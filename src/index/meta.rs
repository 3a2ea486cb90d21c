//! Event Meta Index
//!
//! Indexes per-event metadata: the schema name (equality strategy) and
//! the timestamp (arithmetic strategy at seconds granularity). Persists
//! as `name.idx` and `timestamp.idx` under its directory.

use crate::bitmap::{
    ArithmeticIndex, BitmapIndex, Bitstream, DefaultBitstream, EqualityIndex, TIME_GRANULARITY,
};
use crate::event::Event;
use crate::expr::{Expr, Extractor, Predicate};
use crate::index::{codec, lookup_tree, EventIndex, Hits, IndexError, IndexResult};
use crate::value::{Value, ValueKind};
use std::path::{Path, PathBuf};

pub struct EventMetaIndex<B: Bitstream = DefaultBitstream> {
    dir: PathBuf,
    name: BitmapIndex<B>,
    timestamp: BitmapIndex<B>,
    /// Whether `scan()` saw persisted files to append to.
    exists: bool,
}

impl<B: Bitstream> EventMetaIndex<B> {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let mut name = BitmapIndex::Equality(EqualityIndex::new(ValueKind::String));
        let mut timestamp = BitmapIndex::Arithmetic(ArithmeticIndex::new(
            ValueKind::Timestamp,
            TIME_GRANULARITY,
        ));
        // ID 0 is not a valid event.
        name.append(1, false);
        timestamp.append(1, false);
        name.checkpoint();
        timestamp.checkpoint();
        Self {
            dir: dir.into(),
            name,
            timestamp,
            exists: false,
        }
    }

    fn name_path(&self) -> PathBuf {
        self.dir.join("name.idx")
    }

    fn timestamp_path(&self) -> PathBuf {
        self.dir.join("timestamp.idx")
    }

    /// Whether an index is still in its default-constructed state (just
    /// the reserved zero bit).
    fn pristine(index: &BitmapIndex<B>) -> bool {
        index.size() == 1
    }

    fn hydrate(
        &mut self,
        path: &Path,
        want: ValueKind,
        which: &str,
    ) -> IndexResult<Option<BitmapIndex<B>>> {
        if !path.exists() {
            return Ok(None);
        }
        let loaded = codec::load_index_file(path, Some(want))?;
        if let Some(index) = &loaded {
            tracing::debug!(bits = index.size(), "loaded {} index", which);
        }
        Ok(loaded)
    }

    pub fn scan(&mut self) -> IndexResult<()> {
        if self.name_path().exists() || self.timestamp_path().exists() {
            self.exists = true;
        }
        Ok(())
    }

    /// Pre-load the persistent indexes referenced by an AST, unless the
    /// in-memory instances already carry data.
    pub fn load(&mut self, ast: &Expr) -> IndexResult<()> {
        if !self.exists {
            return Ok(());
        }
        for p in ast.predicates() {
            match p.lhs.as_extractor() {
                Some(Extractor::Name) if Self::pristine(&self.name) => {
                    if let Some(index) =
                        self.hydrate(&self.name_path(), ValueKind::String, "name")?
                    {
                        self.name = index;
                    }
                }
                Some(Extractor::Timestamp) if Self::pristine(&self.timestamp) => {
                    if let Some(index) =
                        self.hydrate(&self.timestamp_path(), ValueKind::Timestamp, "time")?
                    {
                        self.timestamp = index;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn index(&mut self, event: &Event) -> IndexResult<()> {
        if self.exists && Self::pristine(&self.timestamp) {
            tracing::debug!("appending to existing event meta data");
            if let Some(index) = self.hydrate(&self.name_path(), ValueKind::String, "name")? {
                self.name = index;
            }
            if let Some(index) =
                self.hydrate(&self.timestamp_path(), ValueKind::Timestamp, "time")?
            {
                self.timestamp = index;
            }
            if self.name.size() != self.timestamp.size() {
                return Err(IndexError::Skew(format!(
                    "name has {} bits, timestamp {}",
                    self.name.size(),
                    self.timestamp.size()
                )));
            }
        }
        self.timestamp
            .push_back(&Value::Timestamp(event.timestamp), event.id)?;
        self.name
            .push_back(&Value::String(event.name.clone()), event.id)?;
        Ok(())
    }

    pub fn save(&mut self) -> IndexResult<()> {
        if self.timestamp.appended() == 0 && self.name.appended() == 0 {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir)?;

        codec::write_index_file(&self.timestamp_path(), &self.timestamp)?;
        tracing::debug!(bits = self.timestamp.size(), "stored timestamp index");

        codec::write_index_file(&self.name_path(), &self.name)?;
        tracing::debug!(bits = self.name.size(), "stored name index");

        self.timestamp.checkpoint();
        self.name.checkpoint();
        self.exists = true;
        Ok(())
    }

    /// The id frontier both metadata indexes cover.
    pub fn frontier(&self) -> u64 {
        self.name.size().min(self.timestamp.size())
    }

    pub fn lookup(&self, ast: &Expr) -> Option<Hits<B>> {
        let hits = lookup_tree(ast, self.frontier(), &|p| self.leaf(p));
        if hits.is_none() {
            tracing::debug!(ast = %ast, "meta index found no result");
        }
        hits
    }

    fn leaf(&self, p: &Predicate) -> Option<Hits<B>> {
        let value = p.rhs.as_constant()?;
        match p.lhs.as_extractor()? {
            Extractor::Name => self.name.lookup(p.op, value).map(Hits::exact),
            Extractor::Timestamp => self.timestamp.lookup(p.op, value).map(Hits::exact),
            // Everything else - including the id extractor - is answered
            // by other layers.
            _ => None,
        }
    }
}

impl EventIndex for EventMetaIndex<DefaultBitstream> {
    fn scan(&mut self) -> IndexResult<()> {
        EventMetaIndex::scan(self)
    }

    fn load(&mut self, ast: &Expr) -> IndexResult<()> {
        EventMetaIndex::load(self, ast)
    }

    fn index(&mut self, event: &Event) -> IndexResult<()> {
        EventMetaIndex::index(self, event)
    }

    fn save(&mut self) -> IndexResult<()> {
        EventMetaIndex::save(self)
    }

    fn lookup(&self, ast: &Expr) -> Option<Hits<DefaultBitstream>> {
        EventMetaIndex::lookup(self, ast)
    }

    fn description(&self) -> &'static str {
        "event-meta-index"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr;
    use tempfile::tempdir;

    fn event(id: u64, name: &str, ts: i64) -> Event {
        Event::new(id, name, ts, vec![Value::Count(id)])
    }

    #[test]
    fn test_index_and_lookup() {
        let dir = tempdir().unwrap();
        let mut meta = EventMetaIndex::<DefaultBitstream>::new(dir.path());

        meta.index(&event(1, "bro::conn", 1_000_000_000)).unwrap();
        meta.index(&event(2, "bro::http", 2_000_000_000)).unwrap();
        meta.index(&event(3, "bro::conn", 3_000_000_000)).unwrap();

        let hits = meta
            .lookup(&expr::parse("&name == \"bro::conn\"").unwrap())
            .unwrap();
        assert_eq!(hits.bits.ones(), vec![1, 3]);
        assert!(hits.exact);

        let hits = meta
            .lookup(&expr::parse("&time > 1970-01-01+00:00:01").unwrap())
            .unwrap();
        assert_eq!(hits.bits.ones(), vec![2, 3]);
    }

    #[test]
    fn test_id_gaps_pad_with_false() {
        let dir = tempdir().unwrap();
        let mut meta = EventMetaIndex::<DefaultBitstream>::new(dir.path());
        meta.index(&event(5, "bro::conn", 1_000_000_000)).unwrap();
        assert_eq!(meta.frontier(), 6);
        let hits = meta
            .lookup(&expr::parse("&name == \"bro::conn\"").unwrap())
            .unwrap();
        assert_eq!(hits.bits.ones(), vec![5]);
    }

    #[test]
    fn test_save_load_cycle() {
        let dir = tempdir().unwrap();
        {
            let mut meta = EventMetaIndex::<DefaultBitstream>::new(dir.path());
            meta.index(&event(1, "bro::conn", 1_000_000_000)).unwrap();
            meta.index(&event(2, "bro::http", 2_000_000_000)).unwrap();
            meta.save().unwrap();
        }
        assert!(dir.path().join("name.idx").exists());
        assert!(dir.path().join("timestamp.idx").exists());

        let mut meta = EventMetaIndex::<DefaultBitstream>::new(dir.path());
        meta.scan().unwrap();
        let ast = expr::parse("&name == \"bro::http\"").unwrap();
        meta.load(&ast).unwrap();
        let hits = meta.lookup(&ast).unwrap();
        assert_eq!(hits.bits.ones(), vec![2]);
    }

    #[test]
    fn test_reindex_appends_to_persisted_state() {
        let dir = tempdir().unwrap();
        {
            let mut meta = EventMetaIndex::<DefaultBitstream>::new(dir.path());
            meta.index(&event(1, "bro::conn", 1_000_000_000)).unwrap();
            meta.save().unwrap();
        }
        let mut meta = EventMetaIndex::<DefaultBitstream>::new(dir.path());
        meta.scan().unwrap();
        meta.index(&event(2, "bro::conn", 2_000_000_000)).unwrap();
        let hits = meta
            .lookup(&expr::parse("&name == \"bro::conn\"").unwrap())
            .unwrap();
        assert_eq!(hits.bits.ones(), vec![1, 2]);
    }

    #[test]
    fn test_save_is_incremental() {
        let dir = tempdir().unwrap();
        let mut meta = EventMetaIndex::<DefaultBitstream>::new(dir.path());
        // Nothing appended yet: no files written.
        meta.save().unwrap();
        assert!(!dir.path().join("name.idx").exists());

        meta.index(&event(1, "bro::conn", 1_000_000_000)).unwrap();
        meta.save().unwrap();
        assert!(dir.path().join("name.idx").exists());

        // A second save with nothing new leaves the files untouched.
        let before = std::fs::metadata(dir.path().join("name.idx"))
            .unwrap()
            .modified()
            .unwrap();
        meta.save().unwrap();
        let after = std::fs::metadata(dir.path().join("name.idx"))
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_unsupported_ast_yields_none() {
        let dir = tempdir().unwrap();
        let mut meta = EventMetaIndex::<DefaultBitstream>::new(dir.path());
        meta.index(&event(1, "bro::conn", 1_000_000_000)).unwrap();
        // An offset predicate is data-index business.
        assert!(meta.lookup(&expr::parse("@0 == 42").unwrap()).is_none());
    }
}
