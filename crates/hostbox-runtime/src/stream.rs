//! Tar streaming of container file trees.
//!
//! Outbound archives are produced on a background thread and handed to the
//! caller through a bounded channel, so a large tree is never buffered in
//! full and the caller drains it at its own pace. Inbound archives are
//! unpacked directly from the caller's reader.

use std::fs::{self, DirEntry};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender};

use hostbox_common::error::{HostboxError, Result};

/// Size of the chunks passed from the producer thread to the reader.
const CHUNK_SIZE: usize = 64 * 1024;

/// Chunks buffered between producer and reader.
const CHUNK_BACKLOG: usize = 8;

type Chunk = io::Result<Vec<u8>>;

/// Readable tar stream of a container subtree.
///
/// Once the archive has been fully read, every further read returns `Ok(0)`.
/// If production fails, the failure is returned once and every further read
/// fails with [`io::ErrorKind::BrokenPipe`], so a truncated archive never
/// ends in a clean EOF.
#[derive(Debug)]
pub struct ArchiveStream {
    chunks: Receiver<Chunk>,
    current: Vec<u8>,
    pos: usize,
    finished: bool,
    failed: bool,
}

impl ArchiveStream {
    const fn new(chunks: Receiver<Chunk>) -> Self {
        Self {
            chunks,
            current: Vec::new(),
            pos: 0,
            finished: false,
            failed: false,
        }
    }
}

impl Read for ArchiveStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.current.len() {
            if self.failed {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "archive production failed",
                ));
            }
            if self.finished {
                return Ok(0);
            }
            match self.chunks.recv() {
                Ok(Ok(chunk)) => {
                    self.current = chunk;
                    self.pos = 0;
                }
                Ok(Err(e)) => {
                    self.failed = true;
                    return Err(e);
                }
                Err(_) => {
                    self.finished = true;
                    self.current.clear();
                    self.pos = 0;
                }
            }
        }

        let n = buf.len().min(self.current.len() - self.pos);
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Buffers tar output and forwards it to the reader in chunks.
struct ChunkWriter {
    tx: SyncSender<Chunk>,
    buf: Vec<u8>,
}

impl ChunkWriter {
    fn send(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.buf, Vec::with_capacity(CHUNK_SIZE));
        self.tx
            .send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive reader dropped"))
    }
}

impl Write for ChunkWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= CHUNK_SIZE {
            self.send()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send()
    }
}

/// Starts archiving `source`.
///
/// With `contents_only` the entries of the directory `source` are placed at
/// the archive root; otherwise `source` itself is the single top-level entry.
///
/// # Errors
///
/// Returns an I/O error if `source` does not exist. Errors met while walking
/// the tree are delivered through the stream.
pub(crate) fn archive(source: PathBuf, contents_only: bool) -> Result<ArchiveStream> {
    let _ = fs::symlink_metadata(&source).map_err(|e| HostboxError::io(&source, e))?;

    let top = if contents_only {
        PathBuf::new()
    } else {
        source.file_name().map(PathBuf::from).unwrap_or_default()
    };

    let (tx, rx) = mpsc::sync_channel(CHUNK_BACKLOG);
    drop(std::thread::spawn(move || {
        if let Err(e) = produce(&source, &top, tx.clone()) {
            tracing::debug!(source = %source.display(), error = %e, "archive production failed");
            let _ = tx.send(Err(e));
        }
    }));

    Ok(ArchiveStream::new(rx))
}

fn produce(source: &Path, top: &Path, tx: SyncSender<Chunk>) -> io::Result<()> {
    let mut builder = tar::Builder::new(ChunkWriter {
        tx,
        buf: Vec::with_capacity(CHUNK_SIZE),
    });
    builder.follow_symlinks(false);
    append_tree(&mut builder, source, top)?;
    let mut writer = builder.into_inner()?;
    writer.flush()
}

/// Appends `path` under archive name `name`, visiting directory entries in
/// name order. An empty `name` stands for the archive root and gets no entry.
fn append_tree<W: Write>(builder: &mut tar::Builder<W>, path: &Path, name: &Path) -> io::Result<()> {
    let file_type = fs::symlink_metadata(path)?.file_type();

    if file_type.is_dir() {
        if !name.as_os_str().is_empty() {
            builder.append_dir(name, path)?;
        }
        let mut children = fs::read_dir(path)?.collect::<io::Result<Vec<DirEntry>>>()?;
        children.sort_by_key(DirEntry::file_name);
        for child in children {
            append_tree(builder, &child.path(), &name.join(child.file_name()))?;
        }
    } else if file_type.is_file() || file_type.is_symlink() {
        builder.append_path_with_name(path, name)?;
    } else {
        tracing::debug!(path = %path.display(), "skipping special file");
    }
    Ok(())
}

/// Unpacks a tar stream into `dest`, creating it first. Existing files are
/// overwritten.
///
/// # Errors
///
/// Returns an I/O error if `dest` cannot be created or the archive is
/// malformed or cannot be written.
pub(crate) fn extract<R: Read>(reader: R, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).map_err(|e| HostboxError::io(dest, e))?;
    let mut archive = tar::Archive::new(reader);
    archive.set_overwrite(true);
    archive.set_preserve_mtime(true);
    archive.unpack(dest).map_err(|e| HostboxError::io(dest, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_names(bytes: &[u8]) -> Vec<String> {
        let mut archive = tar::Archive::new(bytes);
        archive
            .entries()
            .expect("entries")
            .map(|e| {
                e.expect("entry")
                    .path()
                    .expect("path")
                    .to_string_lossy()
                    .trim_end_matches('/')
                    .to_string()
            })
            .collect()
    }

    fn sample_tree(root: &Path) {
        fs::create_dir_all(root.join("foo")).expect("mkdir");
        fs::write(root.join("b"), "bee").expect("write");
        fs::write(root.join("a"), "ay").expect("write");
        fs::write(root.join("foo/in-foo-b"), "").expect("write");
        fs::write(root.join("foo/in-foo-a"), "").expect("write");
    }

    #[test]
    fn contents_are_archived_in_name_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        sample_tree(dir.path());

        let mut bytes = Vec::new();
        let _ = archive(dir.path().to_path_buf(), true)
            .expect("archive")
            .read_to_end(&mut bytes)
            .expect("read");

        assert_eq!(
            entry_names(&bytes),
            vec!["a", "b", "foo", "foo/in-foo-a", "foo/in-foo-b"]
        );
    }

    #[test]
    fn named_directory_is_top_level_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        sample_tree(dir.path());

        let mut bytes = Vec::new();
        let _ = archive(dir.path().join("foo"), false)
            .expect("archive")
            .read_to_end(&mut bytes)
            .expect("read");

        assert_eq!(
            entry_names(&bytes),
            vec!["foo", "foo/in-foo-a", "foo/in-foo-b"]
        );
    }

    #[test]
    fn single_file_archive() {
        let dir = tempfile::tempdir().expect("tempdir");
        sample_tree(dir.path());

        let mut bytes = Vec::new();
        let _ = archive(dir.path().join("b"), false)
            .expect("archive")
            .read_to_end(&mut bytes)
            .expect("read");

        let mut reader = tar::Archive::new(&bytes[..]);
        let mut entry = reader
            .entries()
            .expect("entries")
            .next()
            .expect("one entry")
            .expect("entry");
        let mut content = String::new();
        let _ = entry.read_to_string(&mut content).expect("content");
        assert_eq!(entry.path().expect("path").to_string_lossy(), "b");
        assert_eq!(content, "bee");
    }

    #[test]
    fn drained_stream_stays_at_eof() {
        let dir = tempfile::tempdir().expect("tempdir");
        sample_tree(dir.path());

        let mut stream = archive(dir.path().to_path_buf(), true).expect("archive");
        let mut bytes = Vec::new();
        let _ = stream.read_to_end(&mut bytes).expect("read");
        assert!(!bytes.is_empty());

        let mut scratch = [0_u8; 1];
        assert_eq!(stream.read(&mut scratch).expect("eof"), 0);
        assert_eq!(stream.read(&mut scratch).expect("eof again"), 0);
    }

    #[test]
    fn failed_production_never_reads_as_eof() {
        let (tx, rx) = mpsc::sync_channel(4);
        tx.send(Ok(b"partial".to_vec())).expect("send chunk");
        tx.send(Err(io::Error::other("source vanished"))).expect("send error");
        drop(tx);

        let mut stream = ArchiveStream::new(rx);
        let mut buf = [0_u8; 16];
        assert_eq!(stream.read(&mut buf).expect("partial data"), 7);

        let first = stream.read(&mut buf).unwrap_err();
        assert_eq!(first.to_string(), "source vanished");
        for _ in 0..2 {
            let again = stream.read(&mut buf).unwrap_err();
            assert_eq!(again.kind(), io::ErrorKind::BrokenPipe);
        }
    }

    #[test]
    fn large_files_span_several_chunks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let payload = vec![7_u8; CHUNK_SIZE * 3 + 17];
        fs::write(dir.path().join("big"), &payload).expect("write");

        let mut bytes = Vec::new();
        let _ = archive(dir.path().to_path_buf(), true)
            .expect("archive")
            .read_to_end(&mut bytes)
            .expect("read");

        let out = tempfile::tempdir().expect("tempdir");
        extract(&bytes[..], out.path()).expect("extract");
        assert_eq!(fs::read(out.path().join("big")).expect("read"), payload);
    }

    #[test]
    fn missing_source_fails_up_front() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = archive(dir.path().join("absent"), false).unwrap_err();
        assert!(matches!(err, HostboxError::Io { .. }));
    }

    #[test]
    fn extract_overwrites_existing_files() {
        let src = tempfile::tempdir().expect("tempdir");
        fs::write(src.path().join("a"), "new").expect("write");
        let mut bytes = Vec::new();
        let _ = archive(src.path().to_path_buf(), true)
            .expect("archive")
            .read_to_end(&mut bytes)
            .expect("read");

        let dest = tempfile::tempdir().expect("tempdir");
        fs::write(dest.path().join("a"), "old").expect("write");
        fs::write(dest.path().join("keep"), "kept").expect("write");
        extract(&bytes[..], dest.path()).expect("extract");

        assert_eq!(fs::read_to_string(dest.path().join("a")).expect("read"), "new");
        assert_eq!(fs::read_to_string(dest.path().join("keep")).expect("read"), "kept");
    }

    #[test]
    fn extract_creates_missing_destination() {
        let mut builder = tar::Builder::new(Vec::new());
        let data = b"hello";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "nested/hello.txt", &data[..])
            .expect("append");
        let bytes = builder.into_inner().expect("finish");

        let dest = tempfile::tempdir().expect("tempdir");
        let target = dest.path().join("x/y");
        extract(&bytes[..], &target).expect("extract");
        assert_eq!(
            fs::read_to_string(target.join("nested/hello.txt")).expect("read"),
            "hello"
        );
    }
}
