use crate::error::{Error, ErrorKind, Result};
use crate::event::Events;
use crate::logging::{self, Logger};
use crate::threading::handler::Handler;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;

/// Access mode fixed at construction. Read/write sharing makes no sense at
/// this level: there is a single shared read/write position per handle.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Mode {
    /// Read only.
    Read,
    /// Create or truncate, write; also grants deletion.
    Write,
    /// Create if needed, append.
    Append,
    /// Deletion only.
    Delete,
}

/// Hook run on the decoding track for data read through `IOFile`. Taking the
/// buffer out captures the data: no `Readen` event is delivered for it. A
/// positive return value requests an immediate follow-up read of that size;
/// 0 ends the chain.
pub trait FileDecoder: Send {
    fn decode(&mut self, buffer: &mut Option<Vec<u8>>, end: bool) -> u32;
}

/// Events a file raises on its owner handler thread.
pub enum FileEvent {
    Readen { buffer: Vec<u8>, end: bool },
    Flush { deletion: bool },
    Error(Error),
}

/// A path with read/write operations, usable directly or asynchronously
/// through `IOFile`. Counters are atomics observable from any thread; the
/// mutating operations run on the file's pinned io track.
pub struct File {
    pub(crate) log: Logger,
    path: PathBuf,
    mode: Mode,
    handle: Mutex<Option<fs::File>>,
    loaded: AtomicBool,
    size: AtomicU64,
    readen: AtomicU64,
    written: AtomicU64,
    queueing: AtomicU64,
    flushing: AtomicBool,
    pub(crate) io_track: AtomicU16,
    pub(crate) decoding_track: AtomicU16,
    pending: Mutex<VecDeque<Vec<u8>>>,
    pub(crate) decoder: Mutex<Option<Box<dyn FileDecoder>>>,
    error: Mutex<Option<Error>>,
    events: Events<FileEvent>,
}

impl File {
    pub fn new<'a, P: Into<PathBuf>, L: Into<Option<&'a Logger>>>(
        path: P,
        mode: Mode,
        log: L,
    ) -> File {
        let path = path.into();
        let log = match log.into() {
            Some(log) => log.new(logging::o!("component" => "file")),
            None => Logger::root(logging::Discard, logging::o!()),
        };

        File {
            log,
            path,
            mode,
            handle: Mutex::new(None),
            loaded: AtomicBool::new(false),
            size: AtomicU64::new(0),
            readen: AtomicU64::new(0),
            written: AtomicU64::new(0),
            queueing: AtomicU64::new(0),
            flushing: AtomicBool::new(false),
            io_track: AtomicU16::new(0),
            decoding_track: AtomicU16::new(0),
            pending: Mutex::new(VecDeque::new()),
            decoder: Mutex::new(None),
            error: Mutex::new(None),
            events: Events::new(),
        }
    }

    #[inline]
    pub fn events(&self) -> &Events<FileEvent> {
        &self.events
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[inline]
    pub fn loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Size recorded at load time.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Bytes read from disk so far, decoder captures included.
    #[inline]
    pub fn readen(&self) -> u64 {
        self.readen.load(Ordering::Acquire)
    }

    /// Bytes written to disk so far.
    #[inline]
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Acquire)
    }

    /// Bytes accepted for writing but not yet on disk.
    #[inline]
    pub fn queueing(&self) -> u64 {
        self.queueing.load(Ordering::Acquire)
    }

    pub fn set_decoder(&self, decoder: Box<dyn FileDecoder>) {
        *self.decoder.lock() = Some(decoder);
    }

    pub fn last_error(&self) -> Option<Error> {
        self.error.lock().clone()
    }

    /// Open the handle per mode and stat the path — as expensive as a
    /// attributes fetch, nothing more. Idempotent once it succeeded.
    pub fn load(&self) -> Result<()> {
        if self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        self.fail_fast()?;

        if self.mode == Mode::Delete {
            let meta = fs::metadata(&self.path)
                .map_err(|err| self.record(classify(err, ErrorKind::Intern)))?;
            self.size.store(meta.len(), Ordering::Release);
            self.loaded.store(true, Ordering::Release);
            return Ok(());
        }

        let mut options = fs::OpenOptions::new();
        match self.mode {
            Mode::Read => options.read(true),
            Mode::Write => options.write(true).create(true).truncate(true),
            Mode::Append => options.append(true).create(true),
            Mode::Delete => unreachable!(),
        };

        let handle = options
            .open(&self.path)
            .map_err(|err| self.record(classify(err, ErrorKind::Intern)))?;
        let meta = handle
            .metadata()
            .map_err(|err| self.record(classify(err, ErrorKind::Intern)))?;

        logging::debug!(self.log, "loaded"; "path" => %self.path.display(), "size" => meta.len());

        self.size.store(meta.len(), Ordering::Release);
        *self.handle.lock() = Some(handle);
        self.loaded.store(true, Ordering::Release);

        Ok(())
    }

    /// Read from the current position. Only meaningful in `Read` mode; runs
    /// on the io track when driven by `IOFile`.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if self.mode != Mode::Read {
            return Err(Error::new(ErrorKind::Argument, "file not open for reading"));
        }
        self.fail_fast()?;
        self.load()?;

        let mut handle = self.handle.lock();
        let handle = match handle.as_mut() {
            Some(handle) => handle,
            None => return Err(Error::new(ErrorKind::Intern, "file handle missing")),
        };

        loop {
            match handle.read(buf) {
                Ok(count) => {
                    self.readen.fetch_add(count as u64, Ordering::AcqRel);
                    return Ok(count);
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(self.record(classify(err, ErrorKind::System))),
            }
        }
    }

    /// Write at the mode's position (truncated start or append). Forbidden in
    /// `Read`/`Delete` mode.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        if !matches!(self.mode, Mode::Write | Mode::Append) {
            return Err(Error::new(ErrorKind::Argument, "file not open for writing"));
        }
        self.fail_fast()?;
        self.load()?;

        let mut handle = self.handle.lock();
        let handle = match handle.as_mut() {
            Some(handle) => handle,
            None => return Err(Error::new(ErrorKind::Intern, "file handle missing")),
        };

        match handle.write_all(data) {
            Ok(()) => {
                self.written.fetch_add(data.len() as u64, Ordering::AcqRel);
                Ok(())
            }
            Err(err) => Err(self.record(classify(err, ErrorKind::System))),
        }
    }

    /// Unlink the path. Requires `Write` or `Delete` mode. Once the deletion
    /// succeeded the file is terminally unusable: every further operation
    /// fails with the recorded error.
    pub fn erase(&self) -> Result<()> {
        if !matches!(self.mode, Mode::Write | Mode::Delete) {
            return Err(Error::new(ErrorKind::Argument, "file not open for deletion"));
        }
        self.fail_fast()?;

        fs::remove_file(&self.path).map_err(|err| self.record(classify(err, ErrorKind::System)))?;

        logging::debug!(self.log, "erased"; "path" => %self.path.display());

        *self.handle.lock() = None;
        *self.error.lock() = Some(Error::new(ErrorKind::System, "file erased"));

        Ok(())
    }

    /// Move the read position. `Read` mode only; counters are unaffected.
    pub fn reset(&self, position: u64) -> Result<()> {
        if self.mode != Mode::Read {
            return Err(Error::new(ErrorKind::Argument, "reset on a non-reading file"));
        }
        self.fail_fast()?;
        self.load()?;

        let mut handle = self.handle.lock();
        match handle.as_mut() {
            Some(handle) => handle
                .seek(SeekFrom::Start(position))
                .map(|_| ())
                .map_err(|err| self.record(classify(err, ErrorKind::System))),
            None => Err(Error::new(ErrorKind::Intern, "file handle missing")),
        }
    }

    pub(crate) fn queue_write(&self, data: &[u8]) {
        self.queueing.fetch_add(data.len() as u64, Ordering::AcqRel);
        self.pending.lock().push_back(data.to_vec());
    }

    pub(crate) fn next_chunk(&self) -> Option<Vec<u8>> {
        self.pending.lock().pop_front()
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    pub(crate) fn mark_drained(&self, count: u64) {
        self.queueing.fetch_sub(count, Ordering::AcqRel);
    }

    /// Drop everything still pending, keeping the queueing counter honest.
    pub(crate) fn clear_pending(&self) {
        let mut pending = self.pending.lock();
        let dropped: u64 = pending.iter().map(|chunk| chunk.len() as u64).sum();
        pending.clear();
        self.queueing.fetch_sub(dropped, Ordering::AcqRel);
    }

    pub(crate) fn begin_flush(&self) -> bool {
        self.flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn end_flush(&self) {
        self.flushing.store(false, Ordering::Release);
    }

    pub(crate) fn fail_fast(&self) -> Result<()> {
        match self.error.lock().as_ref() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn record(&self, err: Error) -> Error {
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(err.clone());
        }
        err
    }

    /// Raise `event` on the owner handler thread, keeping the subject alive
    /// until the completion ran.
    pub(crate) fn post(file: &Arc<File>, handler: &Arc<Handler>, event: FileEvent) {
        let subject = file.clone();
        handler.queue(move || {
            subject.events.raise(&event);
            Ok(())
        });
    }
}

/// NotFound and PermissionDenied keep their taxonomy bucket; everything else
/// falls into the operation's own class.
fn classify(err: io::Error, fallback: ErrorKind) -> Error {
    let kind = match err.kind() {
        io::ErrorKind::NotFound => ErrorKind::Unfound,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => fallback,
    };

    match err.raw_os_error() {
        Some(code) => Error::with_code(kind, code, err.to_string()),
        None => Error::new(kind, err.to_string()),
    }
}
