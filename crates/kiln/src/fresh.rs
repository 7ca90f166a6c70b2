use std::io;
use std::path::Path;
use std::time::SystemTime;

use crate::buffer::WriteBuffer;
use crate::log_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    MustRebuild,
    Fresh,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    Exists,
    Missing,
    Error,
}

fn modified(path: &Path) -> io::Result<SystemTime> {
    std::fs::metadata(path)?.modified()
}

/// Compares the modification time of `output` against its inputs.
///
/// A missing output must be rebuilt without looking at the inputs. Inputs
/// are stat'ed in order: the first one strictly newer than the output decides
/// `MustRebuild`, and a stat failure reached before that is an `Error`.
/// Equal timestamps count as fresh.
pub fn needs_rebuild<P: AsRef<Path>>(
    output: impl AsRef<Path>,
    inputs: &[P],
    log: &mut WriteBuffer<'_>,
) -> Freshness {
    let output = output.as_ref();
    let output_time = match modified(output) {
        Ok(t) => t,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Freshness::MustRebuild,
        Err(err) => {
            log_error!(log, "Could not stat {}: {err}", output.display());
            return Freshness::Error;
        }
    };

    for input in inputs {
        let input = input.as_ref();
        match modified(input) {
            Ok(t) if t > output_time => return Freshness::MustRebuild,
            Ok(_) => {}
            Err(err) => {
                log_error!(log, "Could not stat {}: {err}", input.display());
                return Freshness::Error;
            }
        }
    }
    Freshness::Fresh
}

pub fn needs_rebuild1(
    output: impl AsRef<Path>,
    input: impl AsRef<Path>,
    log: &mut WriteBuffer<'_>,
) -> Freshness {
    needs_rebuild(output, &[input.as_ref()], log)
}

pub fn file_exists(path: impl AsRef<Path>, log: &mut WriteBuffer<'_>) -> Existence {
    let path = path.as_ref();
    match std::fs::symlink_metadata(path) {
        Ok(_) => Existence::Exists,
        Err(err) if err.kind() == io::ErrorKind::NotFound => Existence::Missing,
        Err(err) => {
            log_error!(log, "Could not check if file {} exists: {err}", path.display());
            Existence::Error
        }
    }
}
