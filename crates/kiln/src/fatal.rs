use std::fmt;

use crate::buffer::WriteBuffer;
use crate::log::{log_fmt, Level};

pub const FATAL_EXIT_STATUS: i32 = 1;

/// Logs `msg` as an error and terminates the process.
pub fn die(log: Option<&mut WriteBuffer<'_>>, msg: fmt::Arguments<'_>) -> ! {
    match log {
        Some(log) => {
            log_fmt(log, Level::Error, msg);
            log.flush();
        }
        None => eprintln!("{}{msg}", Level::Error.tag()),
    }
    std::process::exit(FATAL_EXIT_STATUS)
}
