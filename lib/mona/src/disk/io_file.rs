use crate::disk::file::{File, FileEvent, Mode};
use crate::error::{Error, ErrorKind, Result};
use crate::logging::{self, Logger};
use crate::threading::handler::Handler;
use crate::threading::pool::ThreadPool;
use crate::threading::queue::Runner;
use std::sync::Arc;

pub const DEFAULT_READ_SIZE: u32 = 65536;

/// Asynchronous file pipeline. There is no readiness notifier for disks:
/// operations queue runners straight onto the file's io track, keeping all
/// disk mutations of one file totally ordered, while an optional decoder
/// stage runs on a separate decoding track. Completions funnel through the
/// owner handler like everything else.
pub struct IOFile {
    pool: Arc<ThreadPool>,
    handler: Arc<Handler>,
    log: Logger,
}

impl IOFile {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(
        pool: Arc<ThreadPool>,
        handler: Arc<Handler>,
        log: L,
    ) -> IOFile {
        let log = match log.into() {
            Some(log) => log.new(logging::o!("component" => "io-file")),
            None => Logger::root(logging::Discard, logging::o!()),
        };

        IOFile { pool, handler, log }
    }

    /// Schedule one buffer-sized read from the current position.
    pub fn read(&self, file: &Arc<File>) -> Result<()> {
        self.read_sized(file, DEFAULT_READ_SIZE)
    }

    /// Schedule a read of `size` bytes. The result arrives as a `Readen`
    /// completion — or feeds the decoder first, which may capture it or
    /// request the next read immediately.
    pub fn read_sized(&self, file: &Arc<File>, size: u32) -> Result<()> {
        if file.mode() != Mode::Read {
            return Err(Error::new(ErrorKind::Argument, "file not open for reading"));
        }
        file.fail_fast()?;

        logging::trace!(self.log, "scheduling read"; "path" => %file.path().display(), "size" => size);

        let runner = Box::new(FileReadRunner {
            file: file.clone(),
            pool: self.pool.clone(),
            handler: self.handler.clone(),
            size,
        });
        self.pool.queue(&file.io_track, runner);

        Ok(())
    }

    /// Append `data` to the write queue and make sure a write runner is
    /// draining it. `Flush { deletion: false }` fires once the queue ran
    /// empty. An empty write is legal and merely creates the file.
    pub fn write(&self, file: &Arc<File>, data: &[u8]) -> Result<()> {
        if !matches!(file.mode(), Mode::Write | Mode::Append) {
            return Err(Error::new(ErrorKind::Argument, "file not open for writing"));
        }
        file.fail_fast()?;

        file.queue_write(data);

        if file.begin_flush() {
            let runner = Box::new(FileWriteRunner {
                file: file.clone(),
                handler: self.handler.clone(),
            });
            self.pool.queue(&file.io_track, runner);
        }

        Ok(())
    }

    /// Schedule the unlink. On success `Flush { deletion: true }` fires and
    /// the file becomes terminally unusable.
    pub fn erase(&self, file: &Arc<File>) -> Result<()> {
        if !matches!(file.mode(), Mode::Write | Mode::Delete) {
            return Err(Error::new(ErrorKind::Argument, "file not open for deletion"));
        }
        file.fail_fast()?;

        logging::trace!(self.log, "scheduling erase"; "path" => %file.path().display());

        let runner = Box::new(FileEraseRunner {
            file: file.clone(),
            handler: self.handler.clone(),
        });
        self.pool.queue(&file.io_track, runner);

        Ok(())
    }
}

struct FileReadRunner {
    file: Arc<File>,
    pool: Arc<ThreadPool>,
    handler: Arc<Handler>,
    size: u32,
}

impl Runner for FileReadRunner {
    fn name(&self) -> &'static str {
        "file-read"
    }

    fn run(&mut self) -> Result<()> {
        let size = self.size.max(1) as usize;
        let mut buf = vec![0u8; size];

        match self.file.read(&mut buf) {
            Ok(count) => {
                buf.truncate(count);
                let end = count < size || self.file.readen() >= self.file.size();

                let has_decoder = self.file.decoder.lock().is_some();
                if has_decoder {
                    let runner = Box::new(FileDecodeRunner {
                        file: self.file.clone(),
                        pool: self.pool.clone(),
                        handler: self.handler.clone(),
                        buffer: Some(buf),
                        end,
                    });
                    self.pool.queue(&self.file.decoding_track, runner);
                } else {
                    File::post(&self.file, &self.handler, FileEvent::Readen { buffer: buf, end });
                }
            }
            Err(err) => File::post(&self.file, &self.handler, FileEvent::Error(err)),
        }

        Ok(())
    }
}

/// Decoder stage, pinned to its own track so decoding can overlap with the
/// next disk read.
struct FileDecodeRunner {
    file: Arc<File>,
    pool: Arc<ThreadPool>,
    handler: Arc<Handler>,
    buffer: Option<Vec<u8>>,
    end: bool,
}

impl Runner for FileDecodeRunner {
    fn name(&self) -> &'static str {
        "file-decode"
    }

    fn run(&mut self) -> Result<()> {
        let mut slot = self.buffer.take();

        let next = {
            let mut decoder = self.file.decoder.lock();
            match decoder.as_mut() {
                Some(decoder) => decoder.decode(&mut slot, self.end),
                None => 0,
            }
        };

        // A taken buffer means captured: no delivery.
        if let Some(buffer) = slot {
            File::post(
                &self.file,
                &self.handler,
                FileEvent::Readen {
                    buffer,
                    end: self.end,
                },
            );
        }

        if next > 0 && !self.end {
            let runner = Box::new(FileReadRunner {
                file: self.file.clone(),
                pool: self.pool.clone(),
                handler: self.handler.clone(),
                size: next,
            });
            self.pool.queue(&self.file.io_track, runner);
        }

        Ok(())
    }
}

struct FileWriteRunner {
    file: Arc<File>,
    handler: Arc<Handler>,
}

impl Runner for FileWriteRunner {
    fn name(&self) -> &'static str {
        "file-write"
    }

    fn run(&mut self) -> Result<()> {
        let file = &self.file;

        loop {
            while let Some(chunk) = file.next_chunk() {
                match file.write(&chunk) {
                    Ok(()) => file.mark_drained(chunk.len() as u64),
                    Err(err) => {
                        file.mark_drained(chunk.len() as u64);
                        file.clear_pending();
                        file.end_flush();
                        File::post(file, &self.handler, FileEvent::Error(err));
                        return Ok(());
                    }
                }
            }

            file.end_flush();

            // A producer may have queued between the drain and the flag
            // store.
            if !file.has_pending() {
                break;
            }
            if !file.begin_flush() {
                return Ok(());
            }
        }

        File::post(file, &self.handler, FileEvent::Flush { deletion: false });
        Ok(())
    }
}

struct FileEraseRunner {
    file: Arc<File>,
    handler: Arc<Handler>,
}

impl Runner for FileEraseRunner {
    fn name(&self) -> &'static str {
        "file-erase"
    }

    fn run(&mut self) -> Result<()> {
        match self.file.erase() {
            Ok(()) => File::post(&self.file, &self.handler, FileEvent::Flush { deletion: true }),
            Err(err) => File::post(&self.file, &self.handler, FileEvent::Error(err)),
        }

        Ok(())
    }
}
