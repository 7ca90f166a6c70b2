use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;

use crate::buffer::WriteBuffer;
use crate::{log_error, log_info};

pub fn mkdir_if_not_exists(dir: impl AsRef<Path>, log: &mut WriteBuffer<'_>) -> bool {
    let dir = dir.as_ref();
    match fs::create_dir(dir) {
        Ok(()) => {
            log_info!(log, "Created directory \"{}\"", dir.display());
            true
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => true,
        Err(err) => {
            log_error!(log, "Could not create directory \"{}\": {err}", dir.display());
            false
        }
    }
}

pub fn rename(from: impl AsRef<Path>, to: impl AsRef<Path>, log: &mut WriteBuffer<'_>) -> bool {
    let (from, to) = (from.as_ref(), to.as_ref());
    match fs::rename(from, to) {
        Ok(()) => true,
        Err(err) => {
            log_error!(
                log,
                "Could not rename {} to {}: {err}",
                from.display(),
                to.display()
            );
            false
        }
    }
}

/// Creates or truncates `path`. New files are executable on unix so freshly
/// written tools can be run directly.
pub fn open_for_write(path: impl AsRef<Path>, log: &mut WriteBuffer<'_>) -> Option<File> {
    let path = path.as_ref();
    let mut opts = OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o755);
    }
    match opts.open(path) {
        Ok(f) => Some(f),
        Err(err) => {
            log_error!(log, "Could not open file {}: {err}", path.display());
            None
        }
    }
}

pub fn close(file: File, log: &mut WriteBuffer<'_>) -> bool {
    match file.sync_all() {
        Ok(()) => true,
        Err(err) => {
            log_error!(log, "Could not close file: {err}");
            false
        }
    }
}
