use std::ffi::OsStr;
use std::fmt;

use crate::buffer::WriteBuffer;
use crate::region::{Region, RegionId};
use crate::seq::Seq;

pub const COMMAND_DEFAULT_CAPACITY: usize = 16;

/// `argv` of one process invocation, built inside a caller-chosen region.
pub struct Command<'r> {
    args: Seq<'r, &'r [u8]>,
}

impl<'r> Command<'r> {
    pub fn new(region: &'r Region) -> Self {
        Command {
            args: Seq::with_capacity(region, COMMAND_DEFAULT_CAPACITY),
        }
    }

    pub fn region_id(&self) -> RegionId {
        self.args.region().id()
    }

    pub fn arg(&mut self, arg: &'r [u8]) -> &mut Self {
        self.args.push(arg);
        self
    }

    pub fn arg_copy(&mut self, arg: impl AsRef<[u8]>) -> &mut Self {
        let arg = self.args.region().alloc_copy(arg.as_ref());
        self.arg(arg)
    }

    /// Copies an OS string into the command's region. On unix the raw bytes
    /// are kept; elsewhere the argument is converted lossily to UTF-8.
    pub fn arg_os(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        #[cfg(unix)]
        {
            use std::os::unix::ffi::OsStrExt as _;
            self.arg_copy(arg.as_ref().as_bytes())
        }
        #[cfg(not(unix))]
        {
            self.arg_copy(arg.as_ref().to_string_lossy().as_bytes())
        }
    }

    pub fn args<I>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = &'r [u8]>,
    {
        self.args.extend(args);
        self
    }

    pub fn argv(&self) -> &[&'r [u8]] {
        self.args.as_slice()
    }

    pub fn program(&self) -> Option<&'r [u8]> {
        self.args.get(0).copied()
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Appends the space-joined arguments to `buf`; returns the number of
    /// bytes rendered.
    pub fn render(&self, buf: &mut WriteBuffer<'_>) -> usize {
        let mut rendered = 0;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                buf.append_byte(b' ');
                rendered += 1;
            }
            buf.append(arg);
            rendered += arg.len();
        }
        rendered
    }

    pub fn render_to_vec(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                out.push(b' ');
            }
            out.extend_from_slice(arg);
        }
        out
    }
}

impl fmt::Debug for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.args.iter().map(|a| String::from_utf8_lossy(a)))
            .finish()
    }
}

impl fmt::Display for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.render_to_vec()))
    }
}
