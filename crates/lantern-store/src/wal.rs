use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::SyncMode;
use crate::error::{StoreError, StoreResult};
use crate::record::WalRecord;

/// Header size: 4 bytes length + 4 bytes CRC.
pub(crate) const HEADER_SIZE: usize = 8;

/// Records recovered from a log, and the length of its intact prefix.
#[derive(Debug, Default)]
pub struct Replay {
    pub records: Vec<WalRecord>,
    /// Byte length of the entries that decoded; anything after is a torn
    /// tail.
    pub valid_len: u64,
}

/// Crash-recoverable write-ahead log of entity store mutations.
///
/// On-disk format, repeated:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized WalRecord)]
/// ```
///
/// Replay reads the file front to back. A partial header, a length running
/// past the end of the file, or a bad checksum on the final entry mark a
/// torn tail and end replay. A bad entry with intact entries after it is
/// corruption.
///
/// The log has no lock of its own: the store's writer mutex owns it.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: BufWriter<File>,
    offset: u64,
    sync: SyncMode,
}

impl WriteAheadLog {
    /// Open (or create) the log for appending.
    pub fn open(path: &Path, sync: SyncMode) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let offset = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            offset,
            sync,
        })
    }

    /// Open the log for appending after cutting it back to `valid_len`, the
    /// intact prefix found by [`WriteAheadLog::replay`].
    pub fn open_at(path: &Path, sync: SyncMode, valid_len: u64) -> StoreResult<Self> {
        match fs::metadata(path) {
            Ok(meta) if meta.len() > valid_len => {
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(valid_len)?;
                file.sync_all()?;
                warn!(
                    discarded = meta.len() - valid_len,
                    valid_len, "discarded torn WAL tail"
                );
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Self::open(path, sync)
    }

    /// Append a record. Returns the byte offset of the entry.
    pub fn append(&mut self, record: &WalRecord) -> StoreResult<u64> {
        let payload =
            bincode::serialize(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let length = u32::try_from(payload.len())
            .map_err(|_| StoreError::Serialization("WAL record exceeds 4 GiB".into()))?;
        let crc = crc32fast::hash(&payload);
        let entry_offset = self.offset;

        self.writer.write_all(&length.to_le_bytes())?;
        self.writer.write_all(&crc.to_le_bytes())?;
        self.writer.write_all(&payload)?;
        self.writer.flush()?;
        if self.sync == SyncMode::EveryWrite {
            self.writer.get_ref().sync_all()?;
        }

        self.offset += HEADER_SIZE as u64 + payload.len() as u64;
        debug!(offset = entry_offset, len = payload.len(), "WAL append");
        Ok(entry_offset)
    }

    /// Read every record from the log at `path`.
    ///
    /// A missing file yields no records. Fails with `StoreCorrupted` when an
    /// entry other than the last fails its checksum, or when any
    /// checksummed entry does not decode.
    pub fn replay(path: &Path) -> StoreResult<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e.into()),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();
        let mut offset: u64 = 0;

        while offset + HEADER_SIZE as u64 <= file_len {
            let mut header = [0u8; HEADER_SIZE];
            reader.read_exact(&mut header)?;
            let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

            let end = offset + HEADER_SIZE as u64 + length as u64;
            if length == 0 || end > file_len {
                warn!(offset, length, file_len, "torn WAL entry; stopping replay");
                break;
            }

            let mut payload = vec![0u8; length as usize];
            reader.read_exact(&mut payload)?;

            let actual_crc = crc32fast::hash(&payload);
            if actual_crc != expected_crc {
                if end == file_len {
                    warn!(offset, "checksum mismatch on final WAL entry; stopping replay");
                    break;
                }
                return Err(StoreError::StoreCorrupted(format!(
                    "WAL entry at offset {offset} failed its checksum \
                     (expected {expected_crc:08x}, got {actual_crc:08x})"
                )));
            }

            let record = bincode::deserialize::<WalRecord>(&payload).map_err(|e| {
                StoreError::StoreCorrupted(format!("WAL entry at offset {offset}: {e}"))
            })?;
            replay.records.push(record);
            offset = end;
            replay.valid_len = offset;
        }

        debug!(
            recovered = replay.records.len(),
            valid_len = replay.valid_len,
            "WAL replay complete"
        );
        Ok(replay)
    }

    /// Drop every entry. Called once a snapshot covers them.
    pub fn truncate(&mut self) -> StoreResult<()> {
        self.writer.flush()?;
        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.sync_all()?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.offset = 0;
        debug!("WAL truncated");
        Ok(())
    }

    /// Current size of the log in bytes.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for WriteAheadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteAheadLog")
            .field("path", &self.path)
            .field("offset", &self.offset)
            .finish()
    }
}
