use crate::error::Error;
use crate::resolver::{NodeKey, SequenceResolver};
use rustix::fs::{FlockOperation, flock};
use rustix::io::Errno;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

const LOCK_RETRY_INTERVAL: Duration = Duration::from_micros(50);

/// Keeps one counter file per node under a directory and serializes access to
/// it with an exclusive `flock`.
///
/// Processes on the same machine that point at the same directory share
/// counters without any other coordination service.
#[derive(Debug, Clone)]
pub struct FileLockResolver {
    dir: PathBuf,
    lock_timeout: Duration,
}

impl FileLockResolver {
    /// Creates `dir` if it does not exist yet.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::ResolverUnavailable(Box::new(e)))?;
        Ok(Self {
            dir,
            lock_timeout: Duration::from_millis(100),
        })
    }

    /// Sets how long to keep retrying a held lock before giving up.
    pub fn lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, node: NodeKey) -> PathBuf {
        self.dir.join(format!("{node}.seq"))
    }

    fn lock(&self, file: &File) -> Result<(), Error> {
        let started = Instant::now();
        loop {
            match flock(file, FlockOperation::NonBlockingLockExclusive) {
                Ok(()) => return Ok(()),
                Err(e) if e == Errno::WOULDBLOCK || e == Errno::INTR => {
                    if started.elapsed() >= self.lock_timeout {
                        tracing::warn!(timeout = ?self.lock_timeout, "sequence file lock timed out");
                        return Err(Error::ResolverTimeout(self.lock_timeout));
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => return Err(Error::ResolverUnavailable(Box::new(e))),
            }
        }
    }
}

/// Parses the `bucket sequence` pair stored in a counter file.
fn parse_counter(content: &str) -> Option<(i64, u64)> {
    let mut parts = content.split_whitespace();
    let bucket = parts.next()?.parse().ok()?;
    let sequence = parts.next()?.parse().ok()?;
    Some((bucket, sequence))
}

/// Advances the counter for `bucket`. A bucket older than the one on file
/// gets `max_sequence + 1` and leaves the file alone, so the caller waits for
/// a later bucket instead of reissuing sequences.
fn next_sequence(file: &mut File, bucket: i64, max_sequence: u64) -> std::io::Result<u64> {
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    let sequence = match parse_counter(&content) {
        Some((last, _)) if bucket < last => return Ok(max_sequence + 1),
        Some((last, sequence)) if last == bucket => sequence + 1,
        _ => 0,
    };

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    write!(file, "{bucket} {sequence}")?;
    file.flush()?;
    Ok(sequence)
}

impl SequenceResolver for FileLockResolver {
    fn sequence(&self, node: NodeKey, bucket: i64) -> Result<u64, Error> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.path(node))
            .map_err(|e| Error::ResolverUnavailable(Box::new(e)))?;

        self.lock(&file)?;
        let result = next_sequence(&mut file, bucket, node.max_sequence());
        if let Err(e) = flock(&file, FlockOperation::Unlock) {
            tracing::warn!(%node, error = %e, "failed to unlock sequence file");
        }
        result.map_err(|e| Error::ResolverUnavailable(Box::new(e)))
    }

    fn reset(&self, node: NodeKey) -> Result<(), Error> {
        match fs::remove_file(self.path(node)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::ResolverUnavailable(Box::new(e))),
        }
    }

    fn name(&self) -> &'static str {
        "File"
    }
}
