use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

/// Error that occurs when opening a file fails.
#[derive(Debug, thiserror::Error)]
#[error("failed to open file `{path}`: {source}")]
pub struct FileOpenError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Opens a file at the given path and wraps it in a [`BufReader`].
///
/// # Errors
///
/// Returns a [`FileOpenError`] if the file cannot be opened.
///
/// # Example
/// ```no_run
/// # use containerfs::fsutil;
/// let reader = fsutil::open_file_reader("/some/file.txt")?;
/// # Ok::<(), fsutil::FileOpenError>(())
/// ```
pub fn open_file_reader(path: impl AsRef<Path>) -> Result<BufReader<File>, FileOpenError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| FileOpenError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

/// Upper bound for single-value kernel files. Controller interface files and
/// the short `/proc` entries this crate consumes all fit well below this.
const SHORT_FILE_MAX: u64 = 4096;

/// Reads a short kernel file and trims trailing whitespace.
///
/// Kernel controller files are newline-terminated UTF-8 buffers under 4 KiB;
/// reads are capped at that size.
///
/// # Errors
///
/// Propagates the underlying I/O error, including `NotFound`. Callers that
/// treat a missing file as "unlimited" should go through [`read_trimmed_opt`].
pub fn read_trimmed(path: impl AsRef<Path>) -> io::Result<String> {
    let file = File::open(path.as_ref())?;
    let mut buf = String::new();
    file.take(SHORT_FILE_MAX).read_to_string(&mut buf)?;
    buf.truncate(buf.trim_end().len());
    Ok(buf)
}

/// Reads a short kernel file, mapping a missing file to `None`.
///
/// This is the read primitive for controller interface files: a kernel
/// without the controller simply lacks the file, which callers interpret as
/// the unlimited/inherit value.
pub fn read_trimmed_opt(path: impl AsRef<Path>) -> io::Result<Option<String>> {
    match read_trimmed(path) {
        Ok(s) => Ok(Some(s)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}
