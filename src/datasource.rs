//! `DataSource` / `DataView` — the byte-provenance abstraction behind the
//! parser and serializer (`spec.md` §3, §4.1 component C1).
//!
//! Grounded on `examples/original_source/Packer/DataSource.h`: the original
//! `DataSource`/`DataView`/`MemoryDataSource` split, carried over verbatim in
//! spirit. The C++ original uses an intrusive `SharedPtr`/`map`/`unmap` pair
//! because a `DataView` must pin a mapping (e.g. a memory-mapped file) alive
//! for its lifetime; here that's expressed as `Rc<dyn DataSource>` shared
//! ownership (single-threaded per `spec.md` §5) plus ordinary borrow rules,
//! with no explicit unmap step needed.

use crate::error::Error;
use std::fs::File;
use std::io::{Read as _, Seek, SeekFrom};
use std::path::Path;
use std::rc::Rc;

/// A byte-addressable source a [`DataView`] can be read out of.
///
/// Implementors are free to back this with a file, an in-memory buffer, or
/// (for the loader side) a live process image; the parser only ever calls
/// [`DataSource::read`].
pub trait DataSource {
    /// Total number of bytes available from this source, if known.
    fn len(&self) -> u64;

    /// Read `size` bytes starting at `offset`. Returns
    /// [`Error::OffsetOutOfRange`] if the requested range runs past [`DataSource::len`].
    fn read(&self, offset: u64, size: usize) -> Result<Vec<u8>, Error>;

    /// `true` iff [`DataSource::len`] is zero.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A `(source, offset, size)` triple, cheap to clone and to carve sub-views
/// out of (`examples/original_source/Packer/DataSource.h`'s `DataView::getView`).
#[derive(Clone)]
pub struct DataView {
    source: Rc<dyn DataSource>,
    offset: u64,
    size: usize,
}

impl DataView {
    /// Build a view over the whole of `source`.
    pub fn whole(source: Rc<dyn DataSource>) -> Self {
        let size = source.len() as usize;
        DataView {
            source,
            offset: 0,
            size,
        }
    }

    /// Build a view over `[offset, offset + size)` of `source`.
    pub fn new(source: Rc<dyn DataSource>, offset: u64, size: usize) -> Self {
        DataView {
            source,
            offset,
            size,
        }
    }

    /// Byte offset of this view within the underlying source.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Length of this view, in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Materialize this view's bytes.
    pub fn bytes(&self) -> Result<Vec<u8>, Error> {
        self.source.read(self.offset, self.size)
    }

    /// Carve a sub-view relative to this one's start, mirroring
    /// `DataView::getView` in the original source.
    pub fn view(&self, offset: u64, size: usize) -> DataView {
        DataView::new(Rc::clone(&self.source), self.offset + offset, size)
    }
}

/// A `DataSource` backed by an in-memory buffer
/// (`examples/original_source/Packer/DataSource.h`'s `MemoryDataSource`).
pub struct MemoryDataSource {
    memory: Vec<u8>,
}

impl MemoryDataSource {
    /// Wrap an owned buffer.
    pub fn new(memory: Vec<u8>) -> Self {
        MemoryDataSource { memory }
    }
}

impl DataSource for MemoryDataSource {
    fn len(&self) -> u64 {
        self.memory.len() as u64
    }

    fn read(&self, offset: u64, size: usize) -> Result<Vec<u8>, Error> {
        let start = offset as usize;
        let end = start
            .checked_add(size)
            .filter(|&end| end <= self.memory.len())
            .ok_or(Error::OffsetOutOfRange {
                offset: offset as usize,
                len: self.memory.len(),
            })?;
        Ok(self.memory[start..end].to_vec())
    }
}

/// A `DataSource` backed by a file on disk, read lazily rather than mapped
/// wholesale into memory.
pub struct FileDataSource {
    file: std::cell::RefCell<File>,
    len: u64,
}

impl FileDataSource {
    /// Open `path` for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = File::open(path).map_err(Error::Io)?;
        let len = file.metadata().map_err(Error::Io)?.len();
        Ok(FileDataSource {
            file: std::cell::RefCell::new(file),
            len,
        })
    }
}

impl DataSource for FileDataSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read(&self, offset: u64, size: usize) -> Result<Vec<u8>, Error> {
        if offset.checked_add(size as u64).map_or(true, |end| end > self.len) {
            return Err(Error::OffsetOutOfRange {
                offset: offset as usize,
                len: self.len as usize,
            });
        }
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(offset)).map_err(Error::Io)?;
        let mut buf = vec![0u8; size];
        file.read_exact(&mut buf).map_err(Error::Io)?;
        Ok(buf)
    }
}
