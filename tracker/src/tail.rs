//! Byte-bookmark tail over the game server's append-only log.
//!
//! Only complete lines are consumed; a partial trailing line stays in
//! the file until its newline arrives. If the file shrinks below the
//! bookmark it was truncated or rotated and reading restarts from zero.
//! A missing file is not an error, just nothing to read yet.

use log::{info, warn};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

pub struct LogTail {
    path: PathBuf,
    bookmark: u64,
}

impl LogTail {
    /// Opens a tail positioned at the current end of the file, so old
    /// history is never replayed on startup.
    pub fn new(path: &Path) -> LogTail {
        let bookmark = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        LogTail {
            path: path.to_path_buf(),
            bookmark,
        }
    }

    /// Reads every complete line appended since the last poll, decoded
    /// lossily.
    pub fn poll(&mut self) -> io::Result<Vec<String>> {
        let size = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        if size < self.bookmark {
            warn!("log shrank from {} to {size} bytes, rereading", self.bookmark);
            self.bookmark = 0;
        }
        if size == self.bookmark {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.bookmark))?;
        let mut buf = Vec::with_capacity((size - self.bookmark) as usize);
        file.take(size - self.bookmark).read_to_end(&mut buf)?;

        // Consume only up to the last newline.
        let Some(cut) = buf.iter().rposition(|&b| b == b'\n') else {
            return Ok(Vec::new());
        };
        self.bookmark += cut as u64 + 1;

        let text = String::from_utf8_lossy(&buf[..cut]);
        Ok(text.lines().map(|l| l.to_string()).collect())
    }

    /// Jumps the bookmark to the current end of file, discarding the
    /// unread backlog. Used after a server reset, where the backlog
    /// refers to slots that no longer exist.
    pub fn fast_forward(&mut self) -> io::Result<()> {
        let size = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
        info!("fast-forwarding log from {} to {size}", self.bookmark);
        self.bookmark = size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_starts_at_end_of_existing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "old line").unwrap();
        file.flush().unwrap();

        let mut tail = LogTail::new(file.path());
        assert!(tail.poll().unwrap().is_empty());

        writeln!(file, "new line").unwrap();
        file.flush().unwrap();
        assert_eq!(tail.poll().unwrap(), vec!["new line".to_string()]);
    }

    #[test]
    fn test_partial_line_stays_buffered() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut tail = LogTail::new(file.path());

        write!(file, "half").unwrap();
        file.flush().unwrap();
        assert!(tail.poll().unwrap().is_empty());

        writeln!(file, " done").unwrap();
        file.flush().unwrap();
        assert_eq!(tail.poll().unwrap(), vec!["half done".to_string()]);
    }

    #[test]
    fn test_truncation_resets_bookmark() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, "a\nb\n").unwrap();

        let mut tail = LogTail::new(&path);
        assert!(tail.poll().unwrap().is_empty());

        // Rotation: the file is rewritten shorter than the bookmark.
        std::fs::write(&path, "c\n").unwrap();
        assert_eq!(tail.poll().unwrap(), vec!["c".to_string()]);
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_yet.log");

        let mut tail = LogTail::new(&path);
        assert!(tail.poll().unwrap().is_empty());

        std::fs::write(&path, "first\n").unwrap();
        assert_eq!(tail.poll().unwrap(), vec!["first".to_string()]);
    }

    #[test]
    fn test_fast_forward_skips_backlog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, "").unwrap();

        let mut tail = LogTail::new(&path);
        std::fs::write(&path, "skipped\nskipped too\n").unwrap();
        tail.fast_forward().unwrap();
        assert!(tail.poll().unwrap().is_empty());

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        writeln!(file, "seen").unwrap();
        assert_eq!(tail.poll().unwrap(), vec!["seen".to_string()]);
    }

    #[test]
    fn test_multiple_lines_in_one_poll() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, "").unwrap();

        let mut tail = LogTail::new(&path);
        std::fs::write(&path, "one\ntwo\nthree\n").unwrap();
        assert_eq!(
            tail.poll().unwrap(),
            vec!["one".to_string(), "two".to_string(), "three".to_string()]
        );
    }
}
