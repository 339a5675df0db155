use anyhow::{Context, Result, bail};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::IntoRawFd;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// Read and write chunk size for file copies, in bytes.
const CHUNK_SIZE: usize = 4096;

/// Accumulated counts for a single top-level [`copy_tree`] call.
///
/// Owned by the top-level call and passed by reference down the recursion;
/// every field only ever grows during one invocation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CopyStats {
    pub directories_copied: u64,
    pub files_copied: u64,
    pub bytes_copied: u64,
}

/// What the engine does when a copy step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Return the failure to the caller; the session continues.
    Report,
    /// Report the failure on stderr and terminate the whole process.
    Abort,
}

/// File handle whose `close(2)` result is checked.
///
/// A failed close means the descriptor table can no longer be trusted, so the
/// process terminates instead of continuing with a possible leak. The close
/// happens on drop, which covers every exit path of the copy routines.
struct CheckedFile {
    file: Option<File>,
    path: PathBuf,
}

impl CheckedFile {
    fn new(file: File, path: &Path) -> Self {
        Self {
            file: Some(file),
            path: path.to_path_buf(),
        }
    }
}

impl Read for CheckedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.read(buf),
            None => Err(io::Error::other("file already closed")),
        }
    }
}

impl Write for CheckedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.write(buf),
            None => Err(io::Error::other("file already closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for CheckedFile {
    fn drop(&mut self) {
        let Some(file) = self.file.take() else { return };
        if let Err(err) = nix::unistd::close(file.into_raw_fd()) {
            eprintln!("copy: unable to close file {}: {}", self.path.display(), err);
            std::process::exit(1);
        }
    }
}

/// Distinguishes which side of the transfer failed, so the caller can tag the
/// error with the right path.
enum StreamError {
    Read(io::Error),
    Write(io::Error),
}

/// Copy everything from `reader` to `writer` in fixed-size chunks.
///
/// Interrupted reads are retried transparently. Interrupted or short writes
/// are retried until the whole chunk is written; a write that makes no
/// progress is a hard error, never silent truncation.
fn copy_bytes<R, W>(reader: &mut R, writer: &mut W) -> Result<u64, StreamError>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = [0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(StreamError::Read(err)),
        };

        let mut written = 0;
        while written < n {
            match writer.write(&buf[written..n]) {
                Ok(0) => {
                    return Err(StreamError::Write(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "write made no progress",
                    )));
                }
                Ok(w) => written += w,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(StreamError::Write(err)),
            }
        }
        total += n as u64;
    }
    Ok(total)
}

/// Copy the content and permission mode of the regular file `source` to
/// `dest`, creating or overwriting it.
///
/// On success increments `files_copied` and `bytes_copied` and emits a
/// `"<source> -> <dest>"` progress line on `out`. On failure the error names
/// the failing path and `stats` is left untouched.
pub fn copy_single_file(
    source: &Path,
    dest: &Path,
    stats: &mut CopyStats,
    out: &mut dyn Write,
) -> Result<()> {
    let input = File::open(source)
        .with_context(|| format!("unable to open file {}", source.display()))?;
    let meta = input
        .metadata()
        .with_context(|| format!("unable to stat file {}", source.display()))?;
    let mut input = CheckedFile::new(input, source);

    let output = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(meta.permissions().mode())
        .open(dest)
        .with_context(|| format!("unable to create file {}", dest.display()))?;
    let mut output = CheckedFile::new(output, dest);

    let bytes = copy_bytes(&mut input, &mut output).map_err(|err| match err {
        StreamError::Read(err) => anyhow::Error::new(err)
            .context(format!("unable to read from file {}", source.display())),
        StreamError::Write(err) => anyhow::Error::new(err)
            .context(format!("unable to write to file {}", dest.display())),
    })?;

    // The open above passes the source mode to creat(2), but the umask may
    // have masked bits out; re-apply the exact bits.
    fs::set_permissions(dest, meta.permissions())
        .with_context(|| format!("unable to set permissions on {}", dest.display()))?;

    writeln!(out, "{} -> {}", source.display(), dest.display())?;
    stats.files_copied += 1;
    stats.bytes_copied += bytes;
    Ok(())
}

/// Recursively mirror the directory `source` onto `dest`.
///
/// `dest` is created with the source's permission bits and must not already
/// exist. Entries are visited in enumeration order (`read_dir` never yields
/// `.` or `..`); anything that is not a regular file or directory aborts the
/// whole walk. A failure at any depth unwinds immediately, dropping every
/// open handle on the way; already-copied entries are left in place.
fn copy_directory(
    source: &Path,
    dest: &Path,
    stats: &mut CopyStats,
    out: &mut dyn Write,
) -> Result<()> {
    let entries = fs::read_dir(source)
        .with_context(|| format!("unable to open directory {}", source.display()))?;
    let meta = fs::metadata(source)
        .with_context(|| format!("unable to stat directory {}", source.display()))?;

    let mut builder = fs::DirBuilder::new();
    builder.mode(meta.permissions().mode());
    builder
        .create(dest)
        .with_context(|| format!("unable to create directory {}", dest.display()))?;
    fs::set_permissions(dest, meta.permissions())
        .with_context(|| format!("unable to set permissions on {}", dest.display()))?;

    writeln!(out, "{} -> {}", source.display(), dest.display())?;
    stats.directories_copied += 1;

    for entry in entries {
        let entry = entry
            .with_context(|| format!("unable to read directory {}", source.display()))?;
        let file_type = entry
            .file_type()
            .with_context(|| format!("unable to inspect {}", entry.path().display()))?;
        let child_source = entry.path();
        let child_dest = dest.join(entry.file_name());

        if file_type.is_dir() {
            copy_directory(&child_source, &child_dest, stats, out)?;
        } else if file_type.is_file() {
            copy_single_file(&child_source, &child_dest, stats, out)?;
        } else {
            bail!(
                "unable to copy {}: not a regular file or directory",
                child_source.display()
            );
        }
    }
    Ok(())
}

/// Top-level entry of the copy engine.
///
/// Classifies `source`: a regular file is copied directly, a directory is
/// mirrored recursively (any trailing `/` is stripped first), anything else
/// is an error. A fresh [`CopyStats`] accumulator is threaded through the
/// walk; on success a summary line is printed on `out` and the stats are
/// returned. What happens on failure is decided by `policy`.
pub fn copy_tree(
    source: &Path,
    dest: &Path,
    policy: FailurePolicy,
    out: &mut dyn Write,
) -> Result<CopyStats> {
    match copy_tree_inner(source, dest, out) {
        Ok(stats) => Ok(stats),
        Err(err) => match policy {
            FailurePolicy::Report => Err(err),
            FailurePolicy::Abort => {
                eprintln!("copy: {err:#}");
                std::process::exit(1);
            }
        },
    }
}

fn copy_tree_inner(source: &Path, dest: &Path, out: &mut dyn Write) -> Result<CopyStats> {
    let mut stats = CopyStats::default();
    let meta = fs::metadata(source)
        .with_context(|| format!("unable to stat {}", source.display()))?;

    if meta.is_dir() {
        // A trailing separator would double up in the child paths we build
        // below, so strip it (but keep the root directory intact).
        let display = source.to_string_lossy();
        let trimmed = display.trim_end_matches('/');
        let dir_source = if trimmed.is_empty() {
            Path::new("/")
        } else {
            Path::new(trimmed)
        };
        copy_directory(dir_source, dest, &mut stats, out)?;
    } else if meta.is_file() {
        copy_single_file(source, dest, &mut stats, out)?;
    } else {
        bail!(
            "unable to copy {}: not a regular file or directory",
            source.display()
        );
    }

    writeln!(
        out,
        "copy: copied {} directories, {} files, and {} bytes from {} to {}",
        stats.directories_copied,
        stats.files_copied,
        stats.bytes_copied,
        source.display(),
        dest.display()
    )?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    /// Returns `Interrupted` on the first read, then serves the data.
    struct InterruptingReader {
        data: Cursor<Vec<u8>>,
        interrupted: bool,
    }

    impl Read for InterruptingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(io::Error::new(io::ErrorKind::Interrupted, "try again"));
            }
            self.data.read(buf)
        }
    }

    /// Accepts at most three bytes per call and injects one `Interrupted`
    /// error along the way.
    struct ShortWriter {
        data: Vec<u8>,
        calls: usize,
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.calls += 1;
            if self.calls == 2 {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "try again"));
            }
            let n = buf.len().min(3);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn copy_bytes_retries_interrupted_read() {
        let mut reader = InterruptingReader {
            data: Cursor::new(b"hello world".to_vec()),
            interrupted: false,
        };
        let mut out = Vec::new();
        let total = copy_bytes(&mut reader, &mut out).map_err(|_| "stream error").unwrap();
        assert_eq!(total, 11);
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn copy_bytes_retries_short_and_interrupted_writes() {
        let mut reader = Cursor::new(b"0123456789abcdef".to_vec());
        let mut writer = ShortWriter {
            data: Vec::new(),
            calls: 0,
        };
        let total = copy_bytes(&mut reader, &mut writer).map_err(|_| "stream error").unwrap();
        assert_eq!(total, 16);
        assert_eq!(writer.data, b"0123456789abcdef");
        assert!(writer.calls > 6, "expected many partial writes, got {}", writer.calls);
    }

    #[test]
    fn copy_bytes_treats_zero_write_as_error() {
        struct StuckWriter;
        impl Write for StuckWriter {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Ok(0)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut reader = Cursor::new(b"data".to_vec());
        let res = copy_bytes(&mut reader, &mut StuckWriter);
        match res {
            Err(StreamError::Write(err)) => assert_eq!(err.kind(), io::ErrorKind::WriteZero),
            _ => panic!("expected a write error"),
        }
    }

    #[test]
    fn copy_single_file_copies_content_mode_and_stats() {
        let tmp = tempdir().expect("temp dir");
        let src = tmp.path().join("input.txt");
        let dst = tmp.path().join("output.txt");
        fs::write(&src, b"some file content").expect("write source");
        fs::set_permissions(&src, fs::Permissions::from_mode(0o640)).expect("chmod source");

        let mut stats = CopyStats::default();
        let mut out = Vec::new();
        copy_single_file(&src, &dst, &mut stats, &mut out).expect("copy");

        assert_eq!(fs::read(&dst).expect("read dest"), b"some file content");
        let src_mode = fs::metadata(&src).unwrap().permissions().mode() & 0o777;
        let dst_mode = fs::metadata(&dst).unwrap().permissions().mode() & 0o777;
        assert_eq!(src_mode, dst_mode);

        assert_eq!(
            stats,
            CopyStats {
                directories_copied: 0,
                files_copied: 1,
                bytes_copied: 17,
            }
        );

        let s = String::from_utf8(out).unwrap();
        assert_eq!(s, format!("{} -> {}\n", src.display(), dst.display()));
    }

    #[test]
    fn copy_single_file_missing_source_leaves_stats_untouched() {
        let tmp = tempdir().expect("temp dir");
        let src = tmp.path().join("missing");
        let dst = tmp.path().join("never_created");

        let mut stats = CopyStats::default();
        let mut out = Vec::new();
        let err = copy_single_file(&src, &dst, &mut stats, &mut out).unwrap_err();

        assert!(format!("{err:#}").contains("unable to open file"));
        assert_eq!(stats, CopyStats::default());
        assert!(!dst.exists());
        assert!(out.is_empty());
    }

    fn build_sample_tree(root: &Path) -> (u64, u64, u64) {
        fs::create_dir(root).expect("mkdir root");
        fs::create_dir(root.join("a")).expect("mkdir a");
        fs::create_dir(root.join("b")).expect("mkdir b");
        fs::create_dir(root.join("b/deep")).expect("mkdir b/deep");
        fs::write(root.join("top.txt"), b"top").expect("write");
        fs::write(root.join("a/one.txt"), b"first").expect("write");
        fs::write(root.join("b/deep/two.txt"), b"second!").expect("write");
        // directories: root, a, b, b/deep; files: 3; bytes: 3 + 5 + 7
        (4, 3, 15)
    }

    #[test]
    fn copy_tree_counts_match_source_tree() {
        let tmp = tempdir().expect("temp dir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        let (dirs, files, bytes) = build_sample_tree(&src);

        let mut out = Vec::new();
        let stats = copy_tree(&src, &dst, FailurePolicy::Report, &mut out).expect("copy tree");

        assert_eq!(stats.directories_copied, dirs);
        assert_eq!(stats.files_copied, files);
        assert_eq!(stats.bytes_copied, bytes);

        let s = String::from_utf8(out).unwrap();
        let summary = format!(
            "copy: copied {} directories, {} files, and {} bytes from {} to {}\n",
            dirs,
            files,
            bytes,
            src.display(),
            dst.display()
        );
        assert!(s.ends_with(&summary), "summary missing from:\n{s}");
    }

    #[test]
    fn copy_tree_round_trip_preserves_content_and_mode() {
        let tmp = tempdir().expect("temp dir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        build_sample_tree(&src);
        fs::set_permissions(src.join("a/one.txt"), fs::Permissions::from_mode(0o600))
            .expect("chmod");
        fs::set_permissions(src.join("b"), fs::Permissions::from_mode(0o750)).expect("chmod");

        let mut out = Vec::new();
        copy_tree(&src, &dst, FailurePolicy::Report, &mut out).expect("copy tree");

        for rel in ["top.txt", "a/one.txt", "b/deep/two.txt"] {
            let original = src.join(rel);
            let copied = dst.join(rel);
            assert_eq!(
                fs::read(&original).unwrap(),
                fs::read(&copied).unwrap(),
                "content differs for {rel}"
            );
            assert_eq!(
                fs::metadata(&original).unwrap().permissions().mode() & 0o777,
                fs::metadata(&copied).unwrap().permissions().mode() & 0o777,
                "mode differs for {rel}"
            );
        }
        assert_eq!(
            fs::metadata(src.join("b")).unwrap().permissions().mode() & 0o777,
            fs::metadata(dst.join("b")).unwrap().permissions().mode() & 0o777
        );
    }

    #[test]
    fn copy_tree_delegates_for_file_source() {
        let tmp = tempdir().expect("temp dir");
        let src = tmp.path().join("single.txt");
        let dst = tmp.path().join("copied.txt");
        fs::write(&src, b"just a file").expect("write");

        let mut out = Vec::new();
        let stats = copy_tree(&src, &dst, FailurePolicy::Report, &mut out).expect("copy");

        assert_eq!(stats.directories_copied, 0);
        assert_eq!(stats.files_copied, 1);
        assert_eq!(stats.bytes_copied, 11);
        assert_eq!(fs::read(&dst).unwrap(), b"just a file");
    }

    #[test]
    fn copy_tree_rejects_existing_destination_directory() {
        let tmp = tempdir().expect("temp dir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        build_sample_tree(&src);
        fs::create_dir(&dst).expect("mkdir dst");

        let mut out = Vec::new();
        let err = copy_tree(&src, &dst, FailurePolicy::Report, &mut out).unwrap_err();

        assert!(format!("{err:#}").contains("unable to create directory"));
        // no merge semantics: the collision's children are untouched
        assert_eq!(fs::read_dir(&dst).unwrap().count(), 0);
    }

    #[test]
    fn copy_tree_fails_fast_on_unsupported_entry() {
        let tmp = tempdir().expect("temp dir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir(&src).expect("mkdir src");
        nix::unistd::mkfifo(&src.join("pipe"), nix::sys::stat::Mode::from_bits_truncate(0o644))
            .expect("mkfifo");

        let mut out = Vec::new();
        let err = copy_tree(&src, &dst, FailurePolicy::Report, &mut out).unwrap_err();

        assert!(format!("{err:#}").contains("not a regular file or directory"));
        // partial copies stay in place: the destination root was already made
        assert!(dst.is_dir());
        assert!(!dst.join("pipe").exists());
    }

    #[test]
    fn copy_tree_fails_on_symlink_entry() {
        let tmp = tempdir().expect("temp dir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir(&src).expect("mkdir src");
        fs::write(src.join("real.txt"), b"x").expect("write");
        std::os::unix::fs::symlink(src.join("real.txt"), src.join("link.txt"))
            .expect("symlink");

        let mut out = Vec::new();
        let err = copy_tree(&src, &dst, FailurePolicy::Report, &mut out).unwrap_err();
        assert!(format!("{err:#}").contains("not a regular file or directory"));
    }

    #[test]
    fn copy_tree_strips_trailing_separator() {
        let tmp = tempdir().expect("temp dir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        build_sample_tree(&src);

        let slashed = PathBuf::from(format!("{}/", src.display()));
        let mut out = Vec::new();
        let stats = copy_tree(&slashed, &dst, FailurePolicy::Report, &mut out).expect("copy");

        assert_eq!(stats.files_copied, 3);
        let s = String::from_utf8(out).unwrap();
        let first = s.lines().next().expect("progress output");
        assert_eq!(first, format!("{} -> {}", src.display(), dst.display()));
    }

    #[test]
    fn copy_tree_missing_source_errors() {
        let tmp = tempdir().expect("temp dir");
        let mut out = Vec::new();
        let err = copy_tree(
            &tmp.path().join("nope"),
            &tmp.path().join("dst"),
            FailurePolicy::Report,
            &mut out,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("unable to stat"));
    }

    #[test]
    fn copy_tree_emits_one_progress_line_per_entry() {
        let tmp = tempdir().expect("temp dir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        let (dirs, files, _) = build_sample_tree(&src);

        let mut out = Vec::new();
        copy_tree(&src, &dst, FailurePolicy::Report, &mut out).expect("copy tree");

        let s = String::from_utf8(out).unwrap();
        let progress = s.lines().filter(|l| l.contains(" -> ")).count() as u64;
        assert_eq!(progress, dirs + files);
    }
}
