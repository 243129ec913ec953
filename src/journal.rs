//! Append-only journal of [`Event`]s.
//!
//! File layout: an 8-byte header (`CBJ` magic + version byte + 4 reserved),
//! then entries of `[u32 len][u32 crc32][bincode payload]`, little-endian.
//! A torn or corrupt tail (crash mid-write) ends replay at the last good entry.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::model::Event;

const MAGIC: [u8; 3] = *b"CBJ";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 8;
/// Entries larger than this are treated as corruption.
const MAX_ENTRY_LEN: usize = 16 * 1024 * 1024;

fn header() -> [u8; HEADER_LEN] {
    let mut h = [0u8; HEADER_LEN];
    h[..3].copy_from_slice(&MAGIC);
    h[3] = VERSION;
    h
}

fn encode_entry(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    writer.write_all(&payload)?;
    Ok(())
}

/// Open for append. A file too short to hold a header (new, empty, or cut
/// off mid-header) replays as empty, so it is reset to a fresh header.
fn open_append(path: &Path) -> io::Result<(BufWriter<File>, u64)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    let mut len = writer.get_ref().metadata()?.len();
    if len < HEADER_LEN as u64 {
        writer.get_ref().set_len(0)?;
        writer.write_all(&header())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        len = HEADER_LEN as u64;
    }
    Ok((writer, len))
}

pub struct Journal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length at the last successful sync.
    synced_len: u64,
    unsynced: u64,
    appends_since_compact: u64,
    /// Set when a failed batch could not be rolled back. Cleared by compaction.
    poisoned: bool,
    #[cfg(test)]
    fail_appends: u32,
}

impl Journal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let (writer, synced_len) = open_append(path)?;
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            synced_len,
            unsynced: 0,
            appends_since_compact: 0,
            poisoned: false,
            #[cfg(test)]
            fail_appends: 0,
        })
    }

    /// Buffer one entry. Nothing is durable until `sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("journal unusable after a failed rollback"));
        }
        #[cfg(test)]
        if self.fail_appends > 0 {
            self.fail_appends -= 1;
            return Err(io::Error::other("simulated write failure"));
        }
        encode_entry(&mut self.writer, event)?;
        self.unsynced += 1;
        Ok(())
    }

    pub fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.synced_len = self.writer.get_ref().metadata()?.len();
        self.appends_since_compact += self.unsynced;
        self.unsynced = 0;
        Ok(())
    }

    /// Discard everything written or buffered since the last successful
    /// sync, so later entries never sit behind a partial frame.
    pub fn rollback(&mut self) -> io::Result<()> {
        self.poisoned = true;
        let (fresh, _) = open_append(&self.path)?;
        // `into_parts` hands back the file without flushing the stale buffer.
        let (file, _unwritten) = std::mem::replace(&mut self.writer, fresh).into_parts();
        file.set_len(self.synced_len)?;
        file.sync_all()?;
        self.unsynced = 0;
        self.poisoned = false;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the journal with `events`: write a sibling temp file, fsync,
    /// rename over the live file, reopen.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("journal.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            writer.write_all(&header())?;
            for event in events {
                encode_entry(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let (writer, synced_len) = open_append(&self.path)?;
        self.writer = writer;
        self.synced_len = synced_len;
        self.unsynced = 0;
        self.appends_since_compact = 0;
        self.poisoned = false;
        Ok(())
    }

    /// Read every intact entry. A missing file is an empty journal; a file
    /// with a foreign header is an error.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);

        let mut head = [0u8; HEADER_LEN];
        match reader.read_exact(&mut head) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }
        if head[..3] != MAGIC || head[3] != VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not a version {VERSION} journal", path.display()),
            ));
        }

        let mut events = Vec::new();
        let mut frame = [0u8; 8];
        loop {
            match reader.read_exact(&mut frame) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
            let crc = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
            if len > MAX_ENTRY_LEN {
                warn!("journal entry length {len} out of range, stopping replay");
                break;
            }

            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!("torn journal tail after {} entries", events.len());
                    break;
                }
                Err(e) => return Err(e),
            }
            if crc32fast::hash(&payload) != crc {
                warn!("journal checksum mismatch after {} entries", events.len());
                break;
            }
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!("undecodable journal entry after {} entries: {e}", events.len());
                    break;
                }
            }
        }
        Ok(events)
    }
}

// ── Group-commit writer ──────────────────────────────────

enum Command {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
    #[cfg(test)]
    FailAppends { count: u32 },
}

/// Cloneable handle to the writer task that owns the [`Journal`].
#[derive(Clone)]
pub struct JournalWriter {
    tx: mpsc::Sender<Command>,
}

impl JournalWriter {
    /// Spawn the writer task. Must be called inside a Tokio runtime.
    pub fn spawn(journal: Journal) -> Self {
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(writer_loop(journal, rx));
        Self { tx }
    }

    /// Durably append one event. Resolves once its batch is fsynced.
    pub async fn append(&self, event: &Event) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        self.send(Command::Append {
            event: event.clone(),
            response,
        })
        .await?;
        rx.await.map_err(|_| writer_gone())?
    }

    pub async fn compact(&self, events: Vec<Event>) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        self.send(Command::Compact { events, response }).await?;
        rx.await.map_err(|_| writer_gone())?
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (response, rx) = oneshot::channel();
        if self.send(Command::AppendsSinceCompact { response }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Make the next `count` appends fail before touching the file.
    #[cfg(test)]
    pub async fn fail_next_appends(&self, count: u32) {
        let _ = self.send(Command::FailAppends { count }).await;
    }

    async fn send(&self, cmd: Command) -> io::Result<()> {
        self.tx.send(cmd).await.map_err(|_| writer_gone())
    }
}

fn writer_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "journal writer shut down")
}

/// Block for the first append, drain whatever else is already queued, then
/// pay for a single fsync and answer the whole batch.
async fn writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<Command>) {
    while let Some(cmd) = rx.recv().await {
        let mut pending = Some(cmd);
        while let Some(cmd) = pending.take() {
            match cmd {
                Command::Append { event, response } => {
                    let mut batch = vec![(event, response)];
                    loop {
                        match rx.try_recv() {
                            Ok(Command::Append { event, response }) => batch.push((event, response)),
                            Ok(other) => {
                                pending = Some(other);
                                break;
                            }
                            Err(_) => break,
                        }
                    }
                    commit_batch(&mut journal, batch);
                }
                Command::Compact { events, response } => {
                    let _ = response.send(journal.compact(&events));
                }
                Command::AppendsSinceCompact { response } => {
                    let _ = response.send(journal.appends_since_compact());
                }
                #[cfg(test)]
                Command::FailAppends { count } => journal.fail_appends = count,
            }
        }
    }
    debug!("journal writer for {} stopped", journal.path().display());
}

fn commit_batch(journal: &mut Journal, batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = journal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    if result.is_ok() {
        result = journal.sync();
    }
    if let Err(e) = &result {
        warn!("journal batch of {} failed: {e}", batch.len());
        if let Err(e) = journal.rollback() {
            warn!("journal rollback failed, refusing further appends: {e}");
        }
    }
    metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}
