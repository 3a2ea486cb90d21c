//! Event Data Index
//!
//! Indexes the typed leaves of event records, one bitmap index per
//! record offset. Files persist as `@<offset>.idx` (the comma-joined
//! path), each carrying the value kind of the column so a directory scan
//! can classify files without loading them.
//!
//! Indexing walks an event's record depth-first with a running offset:
//! nested records are descended, containers (vectors, sets, tables) and
//! kinds without an index strategy are skipped, and the offset cursor
//! advances over every field so sibling positions stay stable. The pair
//! (offset, value kind) uniquely determines a persistent file.

use crate::bitmap::{BitmapIndex, Bitstream, DefaultBitstream};
use crate::event::Event;
use crate::expr::{Expr, Extractor, Predicate, RelOp};
use crate::index::{codec, lookup_tree, EventIndex, Hits, IndexError, IndexResult};
use crate::value::{Offset, Value, ValueKind};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

pub struct EventDataIndex<B: Bitstream = DefaultBitstream> {
    dir: PathBuf,
    /// Offset → owned bitmap index.
    offsets: BTreeMap<Offset, BitmapIndex<B>>,
    /// Value kind → offsets of the loaded indexes handling that kind.
    types: HashMap<ValueKind, BTreeSet<Offset>>,
    /// Value kind → persistent files observed by `scan()`.
    files: HashMap<ValueKind, BTreeSet<PathBuf>>,
    exists: bool,
}

impl<B: Bitstream> EventDataIndex<B> {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            offsets: BTreeMap::new(),
            types: HashMap::new(),
            files: HashMap::new(),
            exists: false,
        }
    }

    fn pathify(&self, offset: &Offset) -> PathBuf {
        self.dir.join(format!("@{}.idx", offset))
    }

    /// The offset encoded in a file's basename, if it is one of ours.
    fn offset_of_path(path: &Path) -> Option<Offset> {
        let stem = path.file_stem()?.to_str()?;
        stem.strip_prefix('@')?.parse().ok()
    }

    /// Traverse the directory, recording each file's value kind from its
    /// header.
    pub fn scan(&mut self) -> IndexResult<()> {
        if !self.dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("idx") {
                continue;
            }
            if Self::offset_of_path(&path).is_none() {
                tracing::warn!(path = %path.display(), "skipping file with invalid offset");
                continue;
            }
            match codec::read_kind(&path)? {
                Some(kind) => {
                    self.files.entry(kind).or_default().insert(path);
                }
                None => codec::quarantine(&path, "unreadable header")?,
            }
        }
        self.exists = !self.files.is_empty();
        Ok(())
    }

    /// Pre-load the files an AST references: offset extractors hydrate
    /// their single file, type extractors hydrate every file registered
    /// for the kind of the predicate's constant.
    pub fn load(&mut self, ast: &Expr) -> IndexResult<()> {
        for p in ast.predicates() {
            // Normalization guarantees the constant is on the RHS, so
            // its kind pre-selects files.
            let expected = p.rhs.as_constant().map(Value::kind);
            match p.lhs.as_extractor() {
                Some(Extractor::Offset(offset)) => {
                    if self.offsets.contains_key(offset) {
                        continue;
                    }
                    let path = self.pathify(offset);
                    if path.exists() {
                        self.load_file(&path, expected)?;
                    }
                }
                Some(Extractor::Type(kind)) => {
                    let pending: Vec<PathBuf> = self
                        .files
                        .get(kind)
                        .map(|paths| paths.iter().cloned().collect())
                        .unwrap_or_default();
                    for path in pending {
                        self.load_file(&path, None)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Hydrate one `@<offset>.idx` file into `offsets`/`types`.
    fn load_file(&mut self, path: &Path, expected: Option<ValueKind>) -> IndexResult<bool> {
        let Some(offset) = Self::offset_of_path(path) else {
            codec::quarantine(path, "invalid offset in file name")?;
            return Ok(false);
        };
        if self.offsets.contains_key(&offset) {
            return Ok(true);
        }
        let Some(index) = codec::load_index_file::<B>(path, expected)? else {
            // Quarantined: drop the stale registration.
            for paths in self.files.values_mut() {
                paths.remove(path);
            }
            return Ok(false);
        };
        tracing::debug!(
            offset = %offset,
            bits = index.size(),
            "loaded data index"
        );
        self.types.entry(index.kind()).or_default().insert(offset.clone());
        self.offsets.insert(offset, index);
        Ok(true)
    }

    pub fn index(&mut self, event: &Event) -> IndexResult<()> {
        if event.is_empty() {
            return Ok(());
        }
        let mut offset = Offset::root();
        self.index_record(&event.data, event.id, &mut offset)?;
        // Align every index with the id frontier so all bitmaps agree on
        // their bit length after each event.
        let frontier = event.id + 1;
        for index in self.offsets.values_mut() {
            let size = index.size();
            if size < frontier {
                index.append(frontier - size, false);
            }
        }
        Ok(())
    }

    fn index_record(&mut self, record: &[Value], id: u64, offset: &mut Offset) -> IndexResult<()> {
        for value in record {
            match value {
                Value::None => {}
                Value::Record(inner) => {
                    if !inner.is_empty() {
                        offset.push(0);
                        self.index_record(inner, id, offset)?;
                        offset.pop();
                    }
                }
                v if !v.kind().is_container() => self.index_leaf(v, id, offset)?,
                // Vectors, sets, and tables are walked over but not
                // indexed.
                _ => {}
            }
            offset.bump();
        }
        Ok(())
    }

    fn index_leaf(&mut self, value: &Value, id: u64, offset: &Offset) -> IndexResult<()> {
        if !self.offsets.contains_key(offset) {
            // A persistent index for this offset may exist from an
            // earlier run; append to it rather than shadowing it.
            if let Some(path) = self.registered_file(offset) {
                tracing::debug!(path = %path.display(), "appending to persisted index");
                self.load_file(&path, None)?;
            }
        }
        if let Some(index) = self.offsets.get_mut(offset) {
            if index.kind() != value.kind() {
                return Err(IndexError::TypeMismatch {
                    offset: offset.to_string(),
                    want: index.kind(),
                    got: value.kind(),
                });
            }
            index.push_back(value, id)?;
            return Ok(());
        }
        // First sighting of this offset: create an index, with the
        // reserved zero bit pre-filled.
        let Some(mut index) = BitmapIndex::for_kind(value.kind()) else {
            // No strategy for this kind (e.g. subnet); skip the leaf.
            return Ok(());
        };
        index.append(1, false);
        index.push_back(value, id)?;
        self.types
            .entry(value.kind())
            .or_default()
            .insert(offset.clone());
        self.offsets.insert(offset.clone(), index);
        Ok(())
    }

    fn registered_file(&self, offset: &Offset) -> Option<PathBuf> {
        self.files
            .values()
            .flatten()
            .find(|path| Self::offset_of_path(path).as_ref() == Some(offset))
            .cloned()
    }

    pub fn save(&mut self) -> IndexResult<()> {
        for (offset, index) in &mut self.offsets {
            if index.is_empty() || index.appended() == 0 {
                continue;
            }
            std::fs::create_dir_all(&self.dir)?;
            let path = self.dir.join(format!("@{}.idx", offset));
            codec::write_index_file(&path, index)?;
            index.checkpoint();
            self.files.entry(index.kind()).or_default().insert(path);
            tracing::debug!(offset = %offset, bits = index.size(), "stored data index");
        }
        self.exists = !self.files.is_empty();
        Ok(())
    }

    /// The id frontier covered by the loaded indexes.
    pub fn frontier(&self) -> u64 {
        self.offsets.values().map(BitmapIndex::size).max().unwrap_or(0)
    }

    pub fn lookup(&self, ast: &Expr) -> Option<Hits<B>> {
        let hits = lookup_tree(ast, self.frontier(), &|p| self.leaf(p));
        if hits.is_none() {
            tracing::debug!(ast = %ast, "data index found no result");
        }
        hits
    }

    fn leaf(&self, p: &Predicate) -> Option<Hits<B>> {
        let value = p.rhs.as_constant()?;
        match p.lhs.as_extractor()? {
            Extractor::Offset(offset) => match self.offsets.get(offset) {
                Some(index) => index
                    .lookup(p.op, value)
                    .map(|bits| Hits::exact(bits.padded(self.frontier()))),
                // No index at this offset: no event carries the field.
                None => Some(Hits::exact(B::new().padded(self.frontier()))),
            },
            Extractor::Type(kind) => self.lookup_type(*kind, p.op, value),
            _ => None,
        }
    }

    /// OR-reduce a lookup across every index handling a value kind.
    fn lookup_type(&self, kind: ValueKind, op: RelOp, value: &Value) -> Option<Hits<B>> {
        let Some(offsets) = self.types.get(&kind) else {
            return Some(Hits::exact(B::new().padded(self.frontier())));
        };
        let mut acc = B::new().padded(self.frontier());
        for offset in offsets {
            let index = self.offsets.get(offset)?;
            acc = acc.or(&index.lookup(op, value)?);
        }
        Some(Hits::exact(acc))
    }
}

impl EventIndex for EventDataIndex<DefaultBitstream> {
    fn scan(&mut self) -> IndexResult<()> {
        EventDataIndex::scan(self)
    }

    fn load(&mut self, ast: &Expr) -> IndexResult<()> {
        EventDataIndex::load(self, ast)
    }

    fn index(&mut self, event: &Event) -> IndexResult<()> {
        EventDataIndex::index(self, event)
    }

    fn save(&mut self) -> IndexResult<()> {
        EventDataIndex::save(self)
    }

    fn lookup(&self, ast: &Expr) -> Option<Hits<DefaultBitstream>> {
        EventDataIndex::lookup(self, ast)
    }

    fn description(&self) -> &'static str {
        "event-data-index"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr;
    use tempfile::tempdir;

    fn conn_event(id: u64, orig: &str, resp: &str, bytes: u64) -> Event {
        Event::new(
            id,
            "bro::conn",
            id as i64 * 1_000_000_000,
            vec![
                Value::Address(orig.parse().unwrap()),
                Value::Record(vec![
                    Value::Address(resp.parse().unwrap()),
                    Value::Count(bytes),
                ]),
                Value::String("tcp".into()),
            ],
        )
    }

    #[test]
    fn test_index_tiny_event_and_lookup() {
        let dir = tempdir().unwrap();
        let mut data = EventDataIndex::<DefaultBitstream>::new(dir.path());
        let event = Event::new(
            1,
            "t",
            1_000_000_000,
            vec![Value::Count(42), Value::String("ok".into())],
        );
        data.index(&event).unwrap();

        let hits = data.lookup(&expr::parse(":count == 42").unwrap()).unwrap();
        assert_eq!(hits.bits.ones(), vec![1]);
    }

    #[test]
    fn test_nested_offsets_and_type_reduction() {
        let dir = tempdir().unwrap();
        let mut data = EventDataIndex::<DefaultBitstream>::new(dir.path());
        data.index(&conn_event(1, "10.0.0.1", "192.168.0.1", 100))
            .unwrap();
        data.index(&conn_event(2, "10.0.0.2", "10.0.0.9", 2000))
            .unwrap();

        // Offset lookups address one column.
        let hits = data.lookup(&expr::parse("@0 == 10.0.0.1").unwrap()).unwrap();
        assert_eq!(hits.bits.ones(), vec![1]);
        let hits = data.lookup(&expr::parse("@1,1 > 500").unwrap()).unwrap();
        assert_eq!(hits.bits.ones(), vec![2]);

        // A type lookup OR-reduces across both address columns.
        let hits = data
            .lookup(&expr::parse(":addr in 10.0.0.0/8").unwrap())
            .unwrap();
        assert_eq!(hits.bits.ones(), vec![1, 2]);
    }

    #[test]
    fn test_empty_record_indexes_nothing() {
        let dir = tempdir().unwrap();
        let mut data = EventDataIndex::<DefaultBitstream>::new(dir.path());
        data.index(&Event::new(1, "t", 0, vec![])).unwrap();
        assert_eq!(data.frontier(), 0);
        assert!(data.offsets.is_empty());
    }

    #[test]
    fn test_containers_are_skipped_but_advance_offsets() {
        let dir = tempdir().unwrap();
        let mut data = EventDataIndex::<DefaultBitstream>::new(dir.path());
        let event = Event::new(
            1,
            "t",
            0,
            vec![
                Value::Vector(vec![Value::Count(1)]),
                Value::Count(7),
                Value::None,
                Value::String("last".into()),
            ],
        );
        data.index(&event).unwrap();

        // The vector at offset 0 and the none at offset 2 produced no
        // index, but the later fields kept their positions.
        assert!(data.offsets.get(&"0".parse().unwrap()).is_none());
        assert!(data.offsets.get(&"1".parse().unwrap()).is_some());
        assert!(data.offsets.get(&"2".parse().unwrap()).is_none());
        let hits = data
            .lookup(&expr::parse("@3 == \"last\"").unwrap())
            .unwrap();
        assert_eq!(hits.bits.ones(), vec![1]);
    }

    #[test]
    fn test_bit_lengths_align_after_index() {
        let dir = tempdir().unwrap();
        let mut data = EventDataIndex::<DefaultBitstream>::new(dir.path());
        data.index(&Event::new(1, "t", 0, vec![Value::Count(1), Value::Count(2)]))
            .unwrap();
        // The second event carries fewer fields; the missing column must
        // still end up frontier-aligned.
        data.index(&Event::new(2, "t", 0, vec![Value::Count(3)]))
            .unwrap();
        for index in data.offsets.values() {
            assert_eq!(index.size(), 3);
        }
    }

    #[test]
    fn test_save_scan_load_cycle() {
        let dir = tempdir().unwrap();
        {
            let mut data = EventDataIndex::<DefaultBitstream>::new(dir.path());
            data.index(&conn_event(1, "10.0.0.1", "192.168.0.1", 100))
                .unwrap();
            data.index(&conn_event(2, "10.0.0.2", "10.0.0.9", 2000))
                .unwrap();
            data.save().unwrap();
        }
        assert!(dir.path().join("@0.idx").exists());
        assert!(dir.path().join("@1,0.idx").exists());
        assert!(dir.path().join("@1,1.idx").exists());
        assert!(dir.path().join("@2.idx").exists());

        let mut data = EventDataIndex::<DefaultBitstream>::new(dir.path());
        data.scan().unwrap();
        // Scan alone loads nothing.
        assert!(data.offsets.is_empty());

        let ast = expr::parse("@1,1 > 500").unwrap();
        data.load(&ast).unwrap();
        assert_eq!(data.offsets.len(), 1);
        let hits = data.lookup(&ast).unwrap();
        assert_eq!(hits.bits.ones(), vec![2]);

        // Type extractors hydrate every file of the kind.
        let ast = expr::parse(":addr == 10.0.0.2").unwrap();
        data.load(&ast).unwrap();
        let hits = data.lookup(&ast).unwrap();
        assert_eq!(hits.bits.ones(), vec![2]);
    }

    #[test]
    fn test_reindex_appends_to_persisted_column() {
        let dir = tempdir().unwrap();
        {
            let mut data = EventDataIndex::<DefaultBitstream>::new(dir.path());
            data.index(&conn_event(1, "10.0.0.1", "192.168.0.1", 100))
                .unwrap();
            data.save().unwrap();
        }
        let mut data = EventDataIndex::<DefaultBitstream>::new(dir.path());
        data.scan().unwrap();
        data.index(&conn_event(2, "10.0.0.2", "10.0.0.9", 2000))
            .unwrap();

        let hits = data
            .lookup(&expr::parse(":addr in 10.0.0.0/8").unwrap())
            .unwrap();
        assert_eq!(hits.bits.ones(), vec![1, 2]);
    }

    #[test]
    fn test_type_change_is_an_error() {
        let dir = tempdir().unwrap();
        let mut data = EventDataIndex::<DefaultBitstream>::new(dir.path());
        data.index(&Event::new(1, "t", 0, vec![Value::Count(1)]))
            .unwrap();
        let err = data
            .index(&Event::new(2, "t", 0, vec![Value::String("oops".into())]))
            .unwrap_err();
        assert!(matches!(err, IndexError::TypeMismatch { .. }));
    }

    #[test]
    fn test_unknown_offset_is_empty_not_unsupported() {
        let dir = tempdir().unwrap();
        let mut data = EventDataIndex::<DefaultBitstream>::new(dir.path());
        data.index(&Event::new(1, "t", 0, vec![Value::Count(1)]))
            .unwrap();
        let hits = data.lookup(&expr::parse("@9 == 1").unwrap()).unwrap();
        assert!(hits.bits.ones().is_empty());
        assert!(hits.exact);
    }
}
