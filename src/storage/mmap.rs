//! # Memory-Mapped Persistent Region
//!
//! `MmapRegion` maps a table file shared and read-write into the process. All
//! handles over the same file, in any process, see each other's stores
//! through the kernel page cache without copies or syscalls.
//!
//! ## File Format
//!
//! ```text
//! Offset 0:      header (4096 bytes, see `storage::header`)
//! Offset 4096:   record 0
//! Offset 4096+w: record 1
//! ...
//! ```
//!
//! The file length is rounded up to `ALLOCATION_GRANULARITY`. The mapping
//! covers exactly `HEADER_SIZE + capacity × width` bytes, so a handle never
//! touches file bytes beyond the capacity it was told about.
//!
//! ## Creation
//!
//! A new table is initialized under a temporary name and then hard-linked to
//! its final path. The link fails if the path exists, so two processes racing
//! to create the same table cannot both succeed, and no process can ever
//! observe a half-written header.
//!
//! ## Remapping
//!
//! Growth only appends, so every offset below the old capacity is preserved by
//! a remap. Other handles keep their smaller mapping, which stays valid, until
//! they call `refresh()`.
//!
//! ## Safety Considerations
//!
//! Concurrent processes write the same pages. Record bytes are plain memory
//! and are only ever read below a count loaded with Acquire ordering; all
//! coordination goes through the atomic header fields.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use eyre::Result;
use memmap2::{Mmap, MmapMut, MmapOptions};

use super::header::{HeaderInfo, HeaderPrefix, SharedHeader};
use super::region::{region_len, Region};
use crate::config::{ALLOCATION_GRANULARITY, HEADER_SIZE, MAX_RECORD_ID};
use crate::error::TableError;

#[derive(Debug)]
pub struct MmapRegion {
    path: PathBuf,
    file: File,
    mmap: MmapMut,
    width: usize,
    capacity: u64,
}

impl MmapRegion {
    /// Creates a new table file. Fails if `path` already exists.
    pub fn create<P: AsRef<Path>>(
        path: P,
        width: usize,
        fingerprint: u64,
        capacity: u64,
    ) -> Result<Self> {
        let path = path.as_ref();
        Self::create_new(path, width, fingerprint, capacity)?
            .ok_or_else(|| unavailable(path, "file already exists".to_string()))
    }

    /// `create` that reports an existing file as `Ok(None)`.
    pub fn create_new(
        path: &Path,
        width: usize,
        fingerprint: u64,
        capacity: u64,
    ) -> Result<Option<Self>> {
        if width == 0 || capacity > MAX_RECORD_ID + 1 {
            return Err(unavailable(
                path,
                format!("cannot hold {} records of width {}", capacity, width),
            ));
        }

        let tmp_path = temp_path(path);
        let result = Self::initialize(&tmp_path, width, fingerprint, capacity).and_then(|file| {
            match fs::hard_link(&tmp_path, path) {
                Ok(()) => Ok(Some(file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
                Err(e) => Err(unavailable(
                    path,
                    format!("failed to publish new table file: {}", e),
                )),
            }
        });
        let _ = fs::remove_file(&tmp_path);

        let Some(file) = result? else {
            return Ok(None);
        };
        let mmap = map(&file, path, capacity, width)?;

        Ok(Some(Self {
            path: path.to_path_buf(),
            file,
            mmap,
            width,
            capacity,
        }))
    }

    fn initialize(tmp_path: &Path, width: usize, fingerprint: u64, capacity: u64) -> Result<File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(tmp_path)
            .map_err(|e| unavailable(tmp_path, format!("failed to create file: {}", e)))?;

        let file_len = file_len(capacity, width)?;
        file.set_len(file_len).map_err(|e| {
            unavailable(
                tmp_path,
                format!("failed to set file size to {} bytes: {}", file_len, e),
            )
        })?;

        let mut mmap = map(&file, tmp_path, capacity, width)?;
        SharedHeader::initialize(
            &mut mmap[..HEADER_SIZE],
            HeaderPrefix::new(width, fingerprint),
            capacity,
        );
        mmap.flush()
            .map_err(|e| unavailable(tmp_path, format!("failed to flush header: {}", e)))?;

        Ok(file)
    }

    /// Opens an existing table file created with the same record width and
    /// layout fingerprint.
    pub fn open<P: AsRef<Path>>(path: P, width: usize, fingerprint: u64) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| unavailable(path, format!("failed to open: {}", e)))?;

        let file_size = file
            .metadata()
            .map_err(|e| unavailable(path, format!("failed to read metadata: {}", e)))?
            .len();

        if file_size < HEADER_SIZE as u64 {
            return Err(unavailable(
                path,
                format!("file is {} bytes, smaller than the header", file_size),
            ));
        }

        let header_map = map(&file, path, 0, width.max(1))?;
        let prefix = HeaderPrefix::from_bytes(&header_map[..])?;

        if prefix.record_width() != width {
            return Err(unavailable(
                path,
                format!(
                    "record width {} does not match layout width {}",
                    prefix.record_width(),
                    width
                ),
            ));
        }
        if prefix.fingerprint() != fingerprint {
            return Err(unavailable(
                path,
                format!(
                    "layout fingerprint {:#018x} does not match {:#018x}",
                    prefix.fingerprint(),
                    fingerprint
                ),
            ));
        }

        // SAFETY: the mapping is page-aligned, HEADER_SIZE long, and its
        // prefix was validated above.
        let header = unsafe { &*(header_map.as_ptr() as *const SharedHeader) };
        let capacity = header.capacity();
        let count = header.count();

        if count > capacity || capacity > MAX_RECORD_ID + 1 {
            return Err(unavailable(
                path,
                format!("corrupt header: count {} capacity {}", count, capacity),
            ));
        }

        let needed = region_len(capacity, width)? as u64;
        if file_size < needed {
            return Err(unavailable(
                path,
                format!(
                    "file is {} bytes, capacity {} needs {}",
                    file_size, capacity, needed
                ),
            ));
        }

        drop(header_map);
        let mmap = map(&file, path, capacity, width)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            mmap,
            width,
            capacity,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn file(&self) -> &File {
        &self.file
    }

    /// Replaces the mapping with one covering `new_capacity` records. The
    /// file must already be at least that large.
    pub fn remap(&mut self, new_capacity: u64) -> Result<()> {
        if new_capacity <= self.capacity {
            return Ok(());
        }

        let file_size = self.file_size()?;
        let needed = region_len(new_capacity, self.width)? as u64;
        if file_size < needed {
            return Err(unavailable(
                &self.path,
                format!(
                    "cannot remap to {} bytes, file is {} bytes",
                    needed, file_size
                ),
            ));
        }

        // Remapping requires &mut self, so no slice into the old mapping is
        // alive. The old mapping is unmapped when it is dropped here.
        self.mmap = map(&self.file, &self.path, new_capacity, self.width)?;
        self.capacity = new_capacity;

        Ok(())
    }

    /// Remaps to the capacity currently published in the header.
    pub fn refresh(&mut self) -> Result<bool> {
        let published = self.header().capacity();
        if published <= self.capacity {
            return Ok(false);
        }
        self.remap(published)?;
        Ok(true)
    }

    pub fn file_size(&self) -> Result<u64> {
        let metadata = self
            .file
            .metadata()
            .map_err(|e| unavailable(&self.path, format!("failed to read metadata: {}", e)))?;
        Ok(metadata.len())
    }

    pub fn prefetch_records(&self, from: u64, to: u64) {
        let to = to.min(self.capacity);
        if from >= to {
            return;
        }

        let start = HEADER_SIZE + from as usize * self.width;
        let page_start = start - start % ALLOCATION_GRANULARITY;
        let end = HEADER_SIZE + to as usize * self.width;

        #[cfg(unix)]
        // SAFETY: madvise with MADV_WILLNEED is only a hint. The range starts
        // on a page boundary inside the mapping (the mapping itself is
        // page-aligned and HEADER_SIZE is a multiple of the page size) and
        // ends at most at HEADER_SIZE + capacity × width, the mapping length.
        unsafe {
            libc::madvise(
                self.mmap.as_ptr().add(page_start) as *mut libc::c_void,
                end - page_start,
                libc::MADV_WILLNEED,
            );
        }
        #[cfg(not(unix))]
        let _ = (page_start, end);
    }
}

impl Region for MmapRegion {
    fn header(&self) -> &SharedHeader {
        // SAFETY: the mapping is page-aligned and at least HEADER_SIZE long,
        // and the header was validated (open) or initialized (create). The
        // header is only mutated through its atomic fields.
        unsafe { &*(self.mmap.as_ptr() as *const SharedHeader) }
    }

    fn records(&self) -> &[u8] {
        &self.mmap[HEADER_SIZE..HEADER_SIZE + self.capacity as usize * self.width]
    }

    fn split_mut(&mut self) -> (&SharedHeader, &mut [u8]) {
        let len = self.capacity as usize * self.width;
        let (head, tail) = self.mmap.split_at_mut(HEADER_SIZE);
        // SAFETY: `head` is the page-aligned first HEADER_SIZE bytes of the
        // mapping, holding a validated header, and is disjoint from `tail`.
        let header = unsafe { &*(head.as_ptr() as *const SharedHeader) };
        (header, &mut tail[..len])
    }

    fn record_width(&self) -> usize {
        self.width
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn is_persistent(&self) -> bool {
        true
    }

    fn sync(&self) -> Result<()> {
        self.mmap
            .flush()
            .map_err(|e| unavailable(&self.path, format!("failed to sync mapping: {}", e)))
    }
}

/// Reads the header of a table file without knowing its layout.
pub fn read_header_info<P: AsRef<Path>>(path: P) -> Result<HeaderInfo> {
    let path = path.as_ref();

    let file = File::open(path).map_err(|e| unavailable(path, format!("failed to open: {}", e)))?;
    let file_size = file
        .metadata()
        .map_err(|e| unavailable(path, format!("failed to read metadata: {}", e)))?
        .len();
    if file_size < HEADER_SIZE as u64 {
        return Err(unavailable(path, "file is smaller than the header".to_string()));
    }

    // SAFETY: read-only shared mapping of the header page. Other processes
    // may write the atomic fields concurrently; they are only read with
    // atomic loads.
    let mmap = unsafe {
        MmapOptions::new()
            .len(HEADER_SIZE)
            .map(&file)
            .map_err(|e| unavailable(path, format!("failed to map header: {}", e)))?
    };
    HeaderPrefix::from_bytes(&mmap[..])?;

    Ok(HeaderInfo::from(header_of(&mmap)))
}

fn header_of(mmap: &Mmap) -> &SharedHeader {
    // SAFETY: the mapping is page-aligned and HEADER_SIZE long, and the
    // prefix was validated by the caller.
    unsafe { &*(mmap.as_ptr() as *const SharedHeader) }
}

fn map(file: &File, path: &Path, capacity: u64, width: usize) -> Result<MmapMut> {
    let len = region_len(capacity, width)?;

    // SAFETY: MmapMut::map_mut is unsafe because the file can be modified
    // outside this process. Sharing the file between processes is the point
    // of this region: record bytes are only read below a count published with
    // Release ordering, the header is accessed through atomics, and the file
    // is never truncated below a published capacity.
    unsafe {
        MmapOptions::new()
            .len(len)
            .map_mut(file)
            .map_err(|e| unavailable(path, format!("failed to memory-map: {}", e)))
    }
}

/// File length for `capacity` records, rounded to the allocation granularity.
pub fn file_len(capacity: u64, width: usize) -> Result<u64> {
    let len = region_len(capacity, width)? as u64;
    let granularity = ALLOCATION_GRANULARITY as u64;
    Ok(len.div_ceil(granularity) * granularity)
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
}

fn unavailable(path: &Path, msg: String) -> eyre::Report {
    TableError::StorageUnavailable(format!("'{}': {}", path.display(), msg)).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::tempdir;

    const WIDTH: usize = 40;
    const FINGERPRINT: u64 = 0x5eed;

    #[test]
    fn create_new_table_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quotes.mmt");

        let region = MmapRegion::create(&path, WIDTH, FINGERPRINT, 4).unwrap();

        assert_eq!(region.capacity(), 4);
        assert_eq!(region.header().capacity(), 4);
        assert_eq!(region.records().len(), 4 * WIDTH);
        assert_eq!(region.file_size().unwrap(), 8192);
        assert!(region.is_persistent());
    }

    #[test]
    fn create_fails_when_file_exists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quotes.mmt");
        MmapRegion::create(&path, WIDTH, FINGERPRINT, 4).unwrap();

        let err = MmapRegion::create(&path, WIDTH, FINGERPRINT, 4).unwrap_err();

        assert_eq!(TableError::kind_of(&err), Some(ErrorKind::StorageUnavailable));
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn create_new_reports_an_existing_file_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quotes.mmt");
        let first = MmapRegion::create(&path, WIDTH, FINGERPRINT, 4).unwrap();

        let second = MmapRegion::create_new(&path, WIDTH, FINGERPRINT, 8).unwrap();

        assert!(second.is_none());
        assert_eq!(first.header().capacity(), 4);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn create_new_propagates_real_failures() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("quotes.mmt");

        let err = MmapRegion::create_new(&path, WIDTH, FINGERPRINT, 4).unwrap_err();

        assert_eq!(TableError::kind_of(&err), Some(ErrorKind::StorageUnavailable));
        assert!(err.to_string().contains("failed to create file"));
    }

    #[test]
    fn open_existing_table_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quotes.mmt");

        {
            let mut region = MmapRegion::create(&path, WIDTH, FINGERPRINT, 4).unwrap();
            let (header, records) = region.split_mut();
            records[WIDTH] = 0xAB;
            header.publish_count(2);
            region.sync().unwrap();
        }

        let region = MmapRegion::open(&path, WIDTH, FINGERPRINT).unwrap();

        assert_eq!(region.capacity(), 4);
        assert_eq!(region.header().count(), 2);
        assert_eq!(region.record(1).unwrap()[0], 0xAB);
    }

    #[test]
    fn open_rejects_mismatched_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quotes.mmt");
        MmapRegion::create(&path, WIDTH, FINGERPRINT, 4).unwrap();

        let wrong_width = MmapRegion::open(&path, WIDTH + 1, FINGERPRINT).unwrap_err();
        let wrong_fields = MmapRegion::open(&path, WIDTH, FINGERPRINT + 1).unwrap_err();

        assert!(wrong_width.to_string().contains("record width"));
        assert!(wrong_fields.to_string().contains("fingerprint"));
    }

    #[test]
    fn open_rejects_foreign_and_missing_files() {
        let dir = tempdir().unwrap();
        let foreign = dir.path().join("foreign.bin");
        fs::write(&foreign, vec![0x11u8; 8192]).unwrap();

        let err = MmapRegion::open(&foreign, WIDTH, FINGERPRINT).unwrap_err();
        assert_eq!(TableError::kind_of(&err), Some(ErrorKind::StorageUnavailable));

        let err = MmapRegion::open(dir.path().join("missing"), WIDTH, FINGERPRINT).unwrap_err();
        assert_eq!(TableError::kind_of(&err), Some(ErrorKind::StorageUnavailable));
    }

    #[test]
    fn open_rejects_truncated_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quotes.mmt");
        MmapRegion::create(&path, WIDTH, FINGERPRINT, 200).unwrap();

        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(HEADER_SIZE as u64 + 10).unwrap();

        let err = MmapRegion::open(&path, WIDTH, FINGERPRINT).unwrap_err();
        assert!(err.to_string().contains("needs"));
    }

    #[test]
    fn remap_preserves_existing_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quotes.mmt");
        let mut region = MmapRegion::create(&path, WIDTH, FINGERPRINT, 2).unwrap();

        region.split_mut().1[0] = 0xCA;
        region.file().set_len(file_len(300, WIDTH).unwrap()).unwrap();
        region.remap(300).unwrap();

        assert_eq!(region.capacity(), 300);
        assert_eq!(region.record(0).unwrap()[0], 0xCA);
        assert!(region.record(299).is_ok());
    }

    #[test]
    fn remap_beyond_file_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quotes.mmt");
        let mut region = MmapRegion::create(&path, WIDTH, FINGERPRINT, 2).unwrap();

        assert!(region.remap(10_000).is_err());
        assert_eq!(region.capacity(), 2);
    }

    #[test]
    fn refresh_follows_published_capacity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quotes.mmt");
        let mut writer = MmapRegion::create(&path, WIDTH, FINGERPRINT, 2).unwrap();
        let mut reader = MmapRegion::open(&path, WIDTH, FINGERPRINT).unwrap();

        writer.file().set_len(file_len(500, WIDTH).unwrap()).unwrap();
        writer.remap(500).unwrap();
        writer.header().publish_capacity(500);

        assert_eq!(reader.capacity(), 2);
        assert!(reader.refresh().unwrap());
        assert_eq!(reader.capacity(), 500);
        assert!(!reader.refresh().unwrap());
    }

    #[test]
    fn header_info_reads_without_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quotes.mmt");
        let region = MmapRegion::create(&path, WIDTH, FINGERPRINT, 7).unwrap();
        region.header().publish_count(3);

        let info = read_header_info(&path).unwrap();

        assert_eq!(info.record_width, WIDTH);
        assert_eq!(info.fingerprint, FINGERPRINT);
        assert_eq!(info.count, 3);
        assert_eq!(info.capacity, 7);
    }
}
