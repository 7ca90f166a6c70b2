use std::fmt;
use std::io::{self, Write};
#[cfg(unix)]
use std::os::fd::RawFd;

use crate::region::{Region, RegionId};

enum Sink<'r> {
    Memory,
    #[cfg(unix)]
    Fd(RawFd),
    Writer(Box<dyn Write + 'r>),
}

/// Append-oriented byte sink over region-backed storage.
///
/// A buffer bound to a descriptor or writer flushes itself whenever it fills
/// up. A memory-only buffer has nowhere to flush to: overflowing it, or
/// flushing it while non-empty, sets the error flag. The flag is sticky and
/// every later append is a no-op, so callers check once at the end.
pub struct WriteBuffer<'r> {
    region: RegionId,
    buf: &'r mut [u8],
    len: usize,
    sink: Sink<'r>,
    error: bool,
}

impl<'r> WriteBuffer<'r> {
    fn new(region: &'r Region, capacity: usize, sink: Sink<'r>) -> Self {
        WriteBuffer {
            region: region.id(),
            buf: region.alloc_bytes(capacity),
            len: 0,
            sink,
            error: false,
        }
    }

    pub fn memory(region: &'r Region, capacity: usize) -> Self {
        Self::new(region, capacity, Sink::Memory)
    }

    /// Binds to a raw descriptor the caller keeps open. It is never closed
    /// by the buffer.
    #[cfg(unix)]
    pub fn fd(fd: RawFd, region: &'r Region, capacity: usize) -> Self {
        Self::new(region, capacity, Sink::Fd(fd))
    }

    pub fn writer(writer: Box<dyn Write + 'r>, region: &'r Region, capacity: usize) -> Self {
        Self::new(region, capacity, Sink::Writer(writer))
    }

    pub fn stderr(region: &'r Region, capacity: usize) -> Self {
        #[cfg(unix)]
        {
            Self::fd(libc::STDERR_FILENO, region, capacity)
        }
        #[cfg(not(unix))]
        {
            Self::writer(Box::new(io::stderr()), region, capacity)
        }
    }

    pub fn stdout(region: &'r Region, capacity: usize) -> Self {
        #[cfg(unix)]
        {
            Self::fd(libc::STDOUT_FILENO, region, capacity)
        }
        #[cfg(not(unix))]
        {
            Self::writer(Box::new(io::stdout()), region, capacity)
        }
    }

    pub fn region_id(&self) -> RegionId {
        self.region
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn is_bound(&self) -> bool {
        !matches!(self.sink, Sink::Memory)
    }

    pub fn is_errored(&self) -> bool {
        self.error
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn append(&mut self, mut src: &[u8]) {
        if self.buf.is_empty() && !src.is_empty() {
            self.write_through(src);
            return;
        }
        while !self.error && !src.is_empty() {
            let avail = self.buf.len() - self.len;
            let amount = avail.min(src.len());
            self.buf[self.len..self.len + amount].copy_from_slice(&src[..amount]);
            self.len += amount;
            src = &src[amount..];
            if !src.is_empty() {
                self.flush();
            }
        }
    }

    pub fn append_str(&mut self, s: &str) {
        self.append(s.as_bytes());
    }

    pub fn append_byte(&mut self, b: u8) {
        self.append(&[b]);
    }

    pub fn append_long(&mut self, x: i64) {
        let mut digits = itoa::Buffer::new();
        self.append(digits.format(x).as_bytes());
    }

    pub fn flush(&mut self) {
        if self.error || self.len == 0 {
            return;
        }
        let pending = &self.buf[..self.len];
        let ok = match &mut self.sink {
            Sink::Memory => {
                self.error = true;
                return;
            }
            #[cfg(unix)]
            Sink::Fd(fd) => write_fd(*fd, pending),
            Sink::Writer(w) => w.write_all(pending).and_then(|()| w.flush()).is_ok(),
        };
        self.error = !ok;
        self.len = 0;
    }

    fn write_through(&mut self, src: &[u8]) {
        if self.error {
            return;
        }
        let ok = match &mut self.sink {
            Sink::Memory => false,
            #[cfg(unix)]
            Sink::Fd(fd) => write_fd(*fd, src),
            Sink::Writer(w) => w.write_all(src).is_ok(),
        };
        self.error = !ok;
    }

    /// Flushes a bound buffer and reports whether anything went wrong since
    /// it was created.
    pub fn finish(mut self) -> anyhow::Result<()> {
        if self.is_bound() {
            self.flush();
        }
        if self.error {
            anyhow::bail!("write buffer failed ({} bytes unflushed)", self.len);
        }
        Ok(())
    }
}

impl Drop for WriteBuffer<'_> {
    fn drop(&mut self) {
        if self.is_bound() {
            self.flush();
        }
    }
}

impl Write for WriteBuffer<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf);
        if self.error {
            return Err(io::Error::other("write buffer errored"));
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        WriteBuffer::flush(self);
        if self.error {
            return Err(io::Error::other("write buffer errored"));
        }
        Ok(())
    }
}

impl fmt::Write for WriteBuffer<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.append_str(s);
        if self.error {
            return Err(fmt::Error);
        }
        Ok(())
    }
}

impl fmt::Debug for WriteBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sink = match &self.sink {
            Sink::Memory => "memory".to_string(),
            #[cfg(unix)]
            Sink::Fd(fd) => format!("fd {fd}"),
            Sink::Writer(_) => "writer".to_string(),
        };
        f.debug_struct("WriteBuffer")
            .field("sink", &sink)
            .field("len", &self.len)
            .field("capacity", &self.buf.len())
            .field("error", &self.error)
            .finish()
    }
}

#[cfg(unix)]
fn write_fd(fd: RawFd, mut bytes: &[u8]) -> bool {
    while !bytes.is_empty() {
        // SAFETY: `bytes` is a valid readable slice for its whole length.
        let n = unsafe { libc::write(fd, bytes.as_ptr().cast(), bytes.len()) };
        if n < 0 {
            if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return false;
        }
        if n == 0 {
            return false;
        }
        bytes = &bytes[n as usize..];
    }
    true
}
