//! Index File Codec
//!
//! On-disk framing for archived bitmap indexes:
//!
//! ```text
//! magic (4) | version (u16) | value-kind (u16) | blob | crc32 (u32)
//! ```
//!
//! The crc covers everything after the magic. The value kind is
//! duplicated outside the blob so `scan()` can classify a file from its
//! fixed-size header without reading the payload.
//!
//! Recovery policy: I/O failures retry once and then propagate; files
//! failing magic/version/crc or carrying the wrong value type are
//! quarantined (renamed with a `.bad` suffix) and skipped.

use crate::bitmap::{BitmapIndex, Bitstream};
use crate::index::{IndexError, IndexResult};
use crate::value::ValueKind;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

pub const MAGIC: [u8; 4] = *b"VGIX";
pub const VERSION: u16 = 1;

const HEADER_LEN: usize = 8;

/// Archive a bitmap index to `path`, overwriting any previous image.
pub fn write_index_file<B: Bitstream>(path: &Path, index: &BitmapIndex<B>) -> IndexResult<()> {
    let blob = index
        .to_blob()
        .map_err(|e| IndexError::Serialization(e.to_string()))?;
    let mut buf = Vec::with_capacity(HEADER_LEN + blob.len() + 4);
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&(index.kind() as u16).to_le_bytes());
    buf.extend_from_slice(&blob);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf[MAGIC.len()..]);
    buf.extend_from_slice(&hasher.finalize().to_le_bytes());

    with_io_retry(|| std::fs::write(path, &buf))?;
    Ok(())
}

/// Read back the value kind from a file's fixed header, without touching
/// the payload. `None` means the header is not ours (corrupt).
pub fn read_kind(path: &Path) -> IndexResult<Option<ValueKind>> {
    let mut header = [0u8; HEADER_LEN];
    let read = with_io_retry(|| {
        let mut file = File::open(path)?;
        file.read_exact(&mut header)
    });
    match read {
        Ok(()) => {}
        Err(IndexError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Ok(None);
        }
        Err(e) => return Err(e),
    }
    if header[..4] != MAGIC {
        return Ok(None);
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != VERSION {
        return Ok(None);
    }
    Ok(ValueKind::from_u16(u16::from_le_bytes([header[6], header[7]])))
}

/// Load an archived bitmap index. Corruption (bad magic, version, crc,
/// or blob) quarantines the file and yields `Ok(None)`; only I/O errors
/// propagate. When `expected` is given, a kind mismatch counts as
/// corruption too.
pub fn load_index_file<B: Bitstream>(
    path: &Path,
    expected: Option<ValueKind>,
) -> IndexResult<Option<BitmapIndex<B>>> {
    let bytes = with_io_retry(|| std::fs::read(path))?;
    match decode(&bytes, expected) {
        Ok(index) => Ok(Some(index)),
        Err(reason) => {
            quarantine(path, reason)?;
            Ok(None)
        }
    }
}

fn decode<B: Bitstream>(
    bytes: &[u8],
    expected: Option<ValueKind>,
) -> Result<BitmapIndex<B>, &'static str> {
    if bytes.len() < HEADER_LEN + 4 || bytes[..4] != MAGIC {
        return Err("bad magic");
    }
    if u16::from_le_bytes([bytes[4], bytes[5]]) != VERSION {
        return Err("unsupported version");
    }
    let body = &bytes[..bytes.len() - 4];
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&body[MAGIC.len()..]);
    let stored = u32::from_le_bytes(bytes[bytes.len() - 4..].try_into().map_err(|_| "bad crc")?);
    if hasher.finalize() != stored {
        return Err("checksum mismatch");
    }
    let kind = ValueKind::from_u16(u16::from_le_bytes([bytes[6], bytes[7]]))
        .ok_or("unknown value kind")?;
    if let Some(want) = expected {
        if kind != want {
            return Err("value type mismatch");
        }
    }
    let index = BitmapIndex::from_blob(&body[HEADER_LEN..]).ok_or("malformed payload")?;
    if index.kind() != kind {
        return Err("value type mismatch");
    }
    Ok(index)
}

/// Rename a damaged file out of the way so the index keeps running with
/// an empty in-memory instance.
pub fn quarantine(path: &Path, reason: &str) -> IndexResult<()> {
    let mut bad = path.as_os_str().to_owned();
    bad.push(".bad");
    let bad = PathBuf::from(bad);
    tracing::warn!(
        path = %path.display(),
        quarantined = %bad.display(),
        reason,
        "quarantining corrupt index file"
    );
    with_io_retry(|| std::fs::rename(path, &bad))?;
    Ok(())
}

/// Run an I/O operation, retrying once on failure.
fn with_io_retry<T>(mut op: impl FnMut() -> std::io::Result<T>) -> IndexResult<T> {
    match op() {
        Ok(v) => Ok(v),
        Err(first) => {
            tracing::debug!(error = %first, "retrying failed index I/O");
            op().map_err(IndexError::Io)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::{DefaultBitstream, EqualityIndex};
    use crate::value::Value;
    use tempfile::tempdir;

    type Index = BitmapIndex<DefaultBitstream>;

    fn sample() -> Index {
        let mut idx = Index::Equality(EqualityIndex::new(ValueKind::String));
        idx.append(1, false);
        idx.push_back(&Value::String("conn".into()), 1).unwrap();
        idx.push_back(&Value::String("http".into()), 2).unwrap();
        idx
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("name.idx");
        let idx = sample();

        write_index_file(&path, &idx).unwrap();
        assert_eq!(read_kind(&path).unwrap(), Some(ValueKind::String));

        let back: Index = load_index_file(&path, Some(ValueKind::String))
            .unwrap()
            .unwrap();
        assert_eq!(back.size(), idx.size());
        assert_eq!(back.appended(), 0);
        assert_eq!(
            back.lookup(crate::expr::RelOp::Equal, &Value::String("conn".into())),
            idx.lookup(crate::expr::RelOp::Equal, &Value::String("conn".into()))
        );
    }

    #[test]
    fn test_deterministic_second_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("name.idx");
        let idx = sample();

        write_index_file(&path, &idx).unwrap();
        let first = std::fs::read(&path).unwrap();

        let back: Index = load_index_file::<DefaultBitstream>(&path, None)
            .unwrap()
            .unwrap();
        write_index_file(&path, &back).unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_corruption_quarantines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.idx");
        let idx = sample();
        write_index_file(&path, &idx).unwrap();

        // Flip a payload byte: crc check must fail.
        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let loaded = load_index_file::<DefaultBitstream>(&path, None).unwrap();
        assert!(loaded.is_none());
        assert!(!path.exists());
        assert!(path.with_extension("idx.bad").exists());
    }

    #[test]
    fn test_type_mismatch_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("name.idx");
        write_index_file(&path, &sample()).unwrap();

        let loaded =
            load_index_file::<DefaultBitstream>(&path, Some(ValueKind::Count)).unwrap();
        assert!(loaded.is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_read_kind_rejects_foreign_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foreign.idx");
        std::fs::write(&path, b"not an index at all").unwrap();
        assert_eq!(read_kind(&path).unwrap(), None);

        let tiny = dir.path().join("tiny.idx");
        std::fs::write(&tiny, b"xy").unwrap();
        assert_eq!(read_kind(&tiny).unwrap(), None);
    }
}
