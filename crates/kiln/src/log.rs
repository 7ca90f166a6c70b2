//! Level-tagged diagnostic lines: `[ERROR]: message\n`.
//!
//! Every line is flushed as soon as it ends so interleaving with child
//! process output on the same stream stays line-accurate.

use std::fmt;

use crate::buffer::WriteBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Error,
    Info,
}

impl Level {
    pub fn tag(self) -> &'static str {
        match self {
            Level::Error => "[ERROR]: ",
            Level::Info => "[INFO]: ",
        }
    }
}

pub fn log_begin(buf: &mut WriteBuffer<'_>, level: Level, prefix: &str) {
    buf.append_str(level.tag());
    buf.append_str(prefix);
}

pub fn log_end(buf: &mut WriteBuffer<'_>, suffix: &str) {
    buf.append_str(suffix);
    buf.append_byte(b'\n');
    buf.flush();
}

pub fn log_emit(buf: &mut WriteBuffer<'_>, level: Level, msg: &str) {
    log_begin(buf, level, msg);
    log_end(buf, "");
}

pub fn log_fmt(buf: &mut WriteBuffer<'_>, level: Level, args: fmt::Arguments<'_>) {
    log_begin(buf, level, "");
    let _ = fmt::Write::write_fmt(buf, args);
    log_end(buf, "");
}

#[macro_export]
macro_rules! log_info {
    ($buf:expr, $($arg:tt)*) => {
        $crate::log::log_fmt($buf, $crate::log::Level::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($buf:expr, $($arg:tt)*) => {
        $crate::log::log_fmt($buf, $crate::log::Level::Error, format_args!($($arg)*))
    };
}
