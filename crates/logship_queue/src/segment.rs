//! Append-only segment files and durable cursor metadata.
//!
//! A queue's on-disk state is a run of length-prefixed segment files
//! plus one metadata file recording the read/write cursors and the
//! pending record count (depth). The store assumes exclusive access;
//! the queue actor is the only caller and serializes every operation.

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Size of the big-endian length prefix in front of every record.
const LENGTH_PREFIX: u64 = 4;

/// Segment files and cursor state for one queue.
#[derive(Debug)]
pub struct SegmentStore {
    name: String,
    dir: PathBuf,
    config: QueueConfig,

    /// Records written but not yet committed-read. Kept signed so a
    /// corrupted metadata file can be detected at the tail instead of
    /// wrapping around.
    depth: i64,
    read_seg: u64,
    read_offset: u64,
    write_seg: u64,
    write_offset: u64,

    /// Tentative next read position, committed by [`SegmentStore::advance`].
    next_read_seg: u64,
    next_read_offset: u64,

    read_file: Option<BufReader<File>>,
    write_file: Option<File>,
    dirty: bool,
}

impl SegmentStore {
    /// Opens (or creates) the store for `name` under `dir`.
    ///
    /// A present metadata file restores the durable cursors. An absent
    /// file is a fresh queue; an unreadable file is logged and treated
    /// as fresh (zeroed cursors).
    pub fn open(name: impl Into<String>, dir: impl AsRef<Path>, config: QueueConfig) -> QueueResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut store = Self {
            name: name.into(),
            dir,
            config,
            depth: 0,
            read_seg: 0,
            read_offset: 0,
            write_seg: 0,
            write_offset: 0,
            next_read_seg: 0,
            next_read_offset: 0,
            read_file: None,
            write_file: None,
            dirty: false,
        };

        match store.load_metadata() {
            Ok(()) => {}
            Err(err) => {
                warn!(
                    queue = %store.name,
                    error = %err,
                    "failed to load queue metadata, starting with zeroed cursors"
                );
            }
        }

        Ok(store)
    }

    /// Queue name this store belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of records written but not yet committed-read.
    pub fn depth(&self) -> i64 {
        self.depth
    }

    /// Whether unread bytes exist between the read and write cursors.
    pub fn has_unread(&self) -> bool {
        self.read_seg < self.write_seg || self.read_offset < self.write_offset
    }

    /// Whether a metadata sync is due.
    ///
    /// Routine appends do not set this; the caller drives syncs from
    /// its write count and periodic tick. Segment transitions and
    /// recovery events set it themselves.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Forces a metadata sync on the next [`SegmentStore::sync`] call.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Appends one length-prefixed record to the current write segment.
    ///
    /// Returns the byte offset the record starts at. If the write
    /// offset crosses the soft cap afterwards, the segment is rotated
    /// and a metadata sync is forced before returning.
    ///
    /// # Errors
    ///
    /// `InvalidSize` when the payload is outside the configured bounds;
    /// transient I/O errors are propagated to the caller.
    pub fn append(&mut self, data: &[u8]) -> QueueResult<u64> {
        let len = data.len() as u64;
        if len < self.config.min_msg_size || len > self.config.max_msg_size {
            return Err(QueueError::InvalidSize {
                len,
                min: self.config.min_msg_size,
                max: self.config.max_msg_size,
            });
        }

        if self.write_file.is_none() {
            let path = self.segment_path(self.write_seg);
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
            debug!(queue = %self.name, path = %path.display(), "opened write segment");
            if self.write_offset > 0 {
                file.seek(SeekFrom::Start(self.write_offset))?;
            }
            self.write_file = Some(file);
        }

        let offset = self.write_offset;
        let mut frame = Vec::with_capacity(data.len() + LENGTH_PREFIX as usize);
        frame.extend_from_slice(&u32::try_from(len).unwrap_or(u32::MAX).to_be_bytes());
        frame.extend_from_slice(data);

        // One write call per record; a partial frame is handled by the
        // corruption path on read.
        if let Some(file) = self.write_file.as_mut() {
            if let Err(err) = file.write_all(&frame) {
                self.write_file = None;
                return Err(err.into());
            }
        }

        self.write_offset += LENGTH_PREFIX + len;
        self.depth += 1;

        if self.write_offset > self.config.max_bytes_per_file {
            self.write_seg += 1;
            self.write_offset = 0;
            self.write_file = None;
            // Sync every time a new write segment starts.
            self.sync()?;
        }

        Ok(offset)
    }

    /// Resets the read offset when the backing file shrank beneath it.
    ///
    /// A truncated segment means the bytes the cursor points at are
    /// gone; resuming from file start is a bounded, logged data loss.
    pub fn truncation_check(&mut self) -> QueueResult<()> {
        let path = self.segment_path(self.read_seg);
        let size = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            // Absent file is handled by the read path.
            Err(_) => return Ok(()),
        };
        if size < self.read_offset {
            warn!(
                queue = %self.name,
                segment = self.read_seg,
                read_offset = self.read_offset,
                file_size = size,
                "read segment truncated, resetting read offset to 0 (data loss)"
            );
            self.read_offset = 0;
            self.next_read_seg = self.read_seg;
            self.next_read_offset = 0;
            self.read_file = None;
            self.dirty = true;
        }
        Ok(())
    }

    /// Reads the record at the read cursor and computes the tentative
    /// next position, without committing it.
    ///
    /// # Errors
    ///
    /// - `EndOfSegment` when the current (rotated) segment is exhausted;
    ///   the read cursor has already rolled to the next segment and the
    ///   caller should simply retry.
    /// - `Corrupt` when the length prefix is out of range or the file
    ///   ends mid-record; the caller recovers via
    ///   [`SegmentStore::handle_corruption`].
    /// - Other I/O errors are transient and propagated.
    pub fn read_next(&mut self) -> QueueResult<Vec<u8>> {
        if self.read_file.is_none() {
            let path = self.segment_path(self.read_seg);
            let mut file = match OpenOptions::new().read(true).open(&path) {
                Ok(file) => file,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    return Err(QueueError::corrupt(
                        self.read_seg,
                        self.read_offset,
                        "read segment file missing",
                    ));
                }
                Err(err) => return Err(err.into()),
            };
            debug!(queue = %self.name, path = %path.display(), "opened read segment");
            if self.read_offset > 0 {
                file.seek(SeekFrom::Start(self.read_offset))?;
            }
            self.read_file = Some(BufReader::new(file));
        }

        // A rotated segment with no bytes left at the cursor is simply
        // exhausted; roll to the next segment and let the caller retry.
        if self.read_seg < self.write_seg {
            let size = fs::metadata(self.segment_path(self.read_seg))
                .map(|m| m.len())
                .unwrap_or(0);
            if self.read_offset >= size {
                self.read_file = None;
                self.read_seg += 1;
                self.read_offset = 0;
                self.next_read_seg = self.read_seg;
                self.next_read_offset = 0;
                self.dirty = true;
                return Err(QueueError::EndOfSegment);
            }
        }

        let reader = self.read_file.as_mut().ok_or(QueueError::EndOfSegment)?;

        let mut prefix = [0u8; 4];
        if let Err(err) = reader.read_exact(&mut prefix) {
            self.read_file = None;
            return Err(QueueError::corrupt(
                self.read_seg,
                self.read_offset,
                format!("failed to read length prefix: {err}"),
            ));
        }
        let msg_size = u64::from(u32::from_be_bytes(prefix));

        if msg_size < self.config.min_msg_size || msg_size > self.config.max_msg_size {
            // No reasonable guarantee on where the next record begins.
            self.read_file = None;
            return Err(QueueError::corrupt(
                self.read_seg,
                self.read_offset,
                format!("invalid message read size ({msg_size})"),
            ));
        }

        let mut payload = vec![0u8; msg_size as usize];
        if let Err(err) = reader.read_exact(&mut payload) {
            self.read_file = None;
            return Err(QueueError::corrupt(
                self.read_seg,
                self.read_offset,
                format!("failed to read payload of {msg_size} bytes: {err}"),
            ));
        }

        self.next_read_offset = self.read_offset + LENGTH_PREFIX + msg_size;
        self.next_read_seg = self.read_seg;

        if self.next_read_offset > self.config.max_bytes_per_file {
            self.read_file = None;
            self.next_read_seg += 1;
            self.next_read_offset = 0;
        }

        Ok(payload)
    }

    /// Commits the tentative next read position, decrementing depth.
    ///
    /// When the read segment number changed, the fully-consumed prior
    /// segment file is deleted and metadata is marked dirty. Always
    /// ends with a tail consistency check.
    pub fn advance(&mut self) {
        let old_read_seg = self.read_seg;
        self.read_seg = self.next_read_seg;
        self.read_offset = self.next_read_offset;
        self.depth -= 1;

        if old_read_seg != self.next_read_seg {
            // Sync every time a new segment starts being read.
            self.dirty = true;
            let path = self.segment_path(old_read_seg);
            if let Err(err) = fs::remove_file(&path) {
                warn!(
                    queue = %self.name,
                    path = %path.display(),
                    error = %err,
                    "failed to remove consumed segment"
                );
            }
        }

        self.tail_consistency_check();
    }

    /// Verifies depth and cursor agreement once the reader caught up
    /// with the writer; forces `depth = 0` and resynchronizes cursors
    /// on any mismatch (logged data-loss event).
    fn tail_consistency_check(&mut self) {
        if self.read_seg < self.write_seg || self.read_offset < self.write_offset {
            return;
        }

        if self.depth != 0 {
            if self.depth < 0 {
                warn!(
                    queue = %self.name,
                    depth = self.depth,
                    "negative depth at tail, metadata corruption, resetting to 0"
                );
            } else {
                warn!(
                    queue = %self.name,
                    depth = self.depth,
                    "positive depth at tail, data loss, resetting to 0"
                );
            }
            self.depth = 0;
            self.dirty = true;
        }

        if self.read_seg != self.write_seg || self.read_offset != self.write_offset {
            warn!(
                queue = %self.name,
                read_seg = self.read_seg,
                read_offset = self.read_offset,
                write_seg = self.write_seg,
                write_offset = self.write_offset,
                "cursor mismatch at tail, skipping to a fresh segment"
            );
            if let Err(err) = self.reset_to_current_tail() {
                warn!(queue = %self.name, error = %err, "failed to reset to current tail");
            }
            self.dirty = true;
        }
    }

    /// Deletes all segment files from the read through the write
    /// sequence number and starts a fresh write segment with zeroed
    /// cursors.
    fn reset_to_current_tail(&mut self) -> QueueResult<()> {
        self.read_file = None;
        self.write_file = None;

        let mut result = Ok(());
        for seq in self.read_seg..=self.write_seg {
            let path = self.segment_path(seq);
            if let Err(err) = fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        queue = %self.name,
                        path = %path.display(),
                        error = %err,
                        "failed to remove segment file"
                    );
                    result = Err(err.into());
                }
            }
        }

        self.write_seg += 1;
        self.write_offset = 0;
        self.read_seg = self.write_seg;
        self.read_offset = 0;
        self.next_read_seg = self.write_seg;
        self.next_read_offset = 0;
        self.depth = 0;

        result
    }

    /// Recovers from a corrupt read segment.
    ///
    /// The offending segment is renamed with a `.bad` suffix and the
    /// read cursor jumps to the start of the next segment, abandoning
    /// every unread record in the corrupted file. When the corrupted
    /// segment is also the current write segment, the write segment is
    /// abandoned too and a fresh one is opened.
    pub fn handle_corruption(&mut self) {
        if self.read_seg == self.write_seg {
            self.write_file = None;
            self.write_seg += 1;
            self.write_offset = 0;
        }

        let bad_path = self.segment_path(self.read_seg);
        let rename_path = bad_path.with_extension("dat.bad");

        warn!(
            queue = %self.name,
            segment = self.read_seg,
            offset = self.read_offset,
            bad_file = %rename_path.display(),
            "jumping to next segment and saving bad segment file (data loss)"
        );

        self.read_file = None;
        if let Err(err) = fs::rename(&bad_path, &rename_path) {
            warn!(
                queue = %self.name,
                path = %bad_path.display(),
                error = %err,
                "failed to rename bad segment file"
            );
        }

        self.read_seg += 1;
        self.read_offset = 0;
        self.next_read_seg = self.read_seg;
        self.next_read_offset = 0;
        self.dirty = true;
    }

    /// Deletes all segment files and the metadata file, resetting all
    /// cursors and depth to zero.
    pub fn empty(&mut self) -> QueueResult<()> {
        let result = self.reset_to_current_tail();

        match fs::remove_file(self.metadata_path()) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(queue = %self.name, error = %err, "failed to remove metadata file");
                return Err(err.into());
            }
        }

        result
    }

    /// Fsyncs the open write segment, then atomically persists
    /// metadata and clears the dirty flag.
    pub fn sync(&mut self) -> QueueResult<()> {
        if let Some(file) = self.write_file.as_ref() {
            if let Err(err) = file.sync_all() {
                self.write_file = None;
                return Err(err.into());
            }
        }

        self.persist_metadata()?;
        self.dirty = false;
        Ok(())
    }

    /// Closes any open segment file handles.
    pub fn close_files(&mut self) {
        self.read_file = None;
        self.write_file = None;
    }

    /// Path of the segment file with the given sequence number.
    pub fn segment_path(&self, seq: u64) -> PathBuf {
        self.dir.join(format!("{}.segment.{seq:06}.dat", self.name))
    }

    /// Path of the metadata file.
    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(format!("{}.segment.meta.dat", self.name))
    }

    /// Persists metadata via atomic replace: write a temp file, fsync
    /// it, rename over the live file. A crash mid-write never corrupts
    /// the previously committed metadata.
    fn persist_metadata(&self) -> QueueResult<()> {
        let path = self.metadata_path();
        let tmp_path = self.dir.join(format!(
            "{}.segment.meta.dat.{}.tmp",
            self.name,
            std::process::id()
        ));

        let mut file = File::create(&tmp_path)?;
        file.write_all(
            format!(
                "{}\n{},{}\n{},{}\n",
                self.depth, self.read_seg, self.read_offset, self.write_seg, self.write_offset
            )
            .as_bytes(),
        )?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Restores cursors from the metadata file.
    ///
    /// Absence is a fresh queue, not an error.
    fn load_metadata(&mut self) -> QueueResult<()> {
        let text = match fs::read_to_string(self.metadata_path()) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let mut lines = text.lines();
        let depth = lines
            .next()
            .and_then(|line| line.trim().parse::<i64>().ok())
            .ok_or_else(|| QueueError::metadata("missing or invalid depth line"))?;
        let (read_seg, read_offset) = parse_cursor(lines.next())
            .ok_or_else(|| QueueError::metadata("missing or invalid read cursor line"))?;
        let (write_seg, write_offset) = parse_cursor(lines.next())
            .ok_or_else(|| QueueError::metadata("missing or invalid write cursor line"))?;

        self.depth = depth;
        self.read_seg = read_seg;
        self.read_offset = read_offset;
        self.write_seg = write_seg;
        self.write_offset = write_offset;
        self.next_read_seg = read_seg;
        self.next_read_offset = read_offset;

        Ok(())
    }
}

/// Parses a `seq,offset` metadata line.
fn parse_cursor(line: Option<&str>) -> Option<(u64, u64)> {
    let line = line?;
    let (seq, offset) = line.trim().split_once(',')?;
    Some((seq.parse().ok()?, offset.parse().ok()?))
}
