//! File attachments: handles, download targets and chunked uploads

use super::client::proto;
use super::error::{ExchangeError, Result};
use futures::stream::{BoxStream, StreamExt};
use polars::prelude::AnyValue;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio::sync::oneshot;

/// Default upload chunk size (5 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Where a downloaded table file ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: PathBuf,
    pub size: u64,
}

/// An uploaded file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    /// Remote file handle id
    pub id: String,
    /// Path the content was read from
    pub local_path: PathBuf,
}

/// Whether a file-reference cell holds the missing marker
pub fn is_missing(value: &AnyValue) -> bool {
    match value {
        AnyValue::Null => true,
        AnyValue::Float64(f) => f.is_nan(),
        AnyValue::Float32(f) => f.is_nan(),
        _ => false,
    }
}

/// Most numbered alternatives tried for one download name
const MAX_NAME_ATTEMPTS: usize = 10_000;

/// Name a download is stored under
///
/// Only the final component of the remote name is used. Nameless files get
/// `fallback`.
fn download_name(file_name: &str, fallback: &str) -> PathBuf {
    Path::new(file_name)
        .file_name()
        .filter(|n| !n.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| fallback.into())
}

/// `audio.m4a` → `audio (2).m4a`
fn numbered_name(name: &Path, n: usize) -> PathBuf {
    if n == 0 {
        return name.to_path_buf();
    }
    let mut numbered = name.file_stem().unwrap_or_default().to_os_string();
    numbered.push(format!(" ({})", n));
    if let Some(extension) = name.extension() {
        numbered.push(".");
        numbered.push(extension);
    }
    PathBuf::from(numbered)
}

/// Create the local file for a download of `file_name` into `dest_dir`
///
/// Existing files are never replaced: rows that reference files with the same
/// name end up in `name`, `name (1)`, `name (2)` and so on.
pub async fn create_download_file(
    dest_dir: &Path,
    file_name: &str,
    fallback: &str,
) -> Result<(PathBuf, tokio::fs::File)> {
    let name = download_name(file_name, fallback);

    for n in 0..MAX_NAME_ATTEMPTS {
        let path = dest_dir.join(numbered_name(&name, n));
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(transfer_error(&path, e)),
        }
    }

    Err(transfer_error(&dest_dir.join(&name), "no free file name left"))
}

/// Reports a read error that ended an upload stream early
pub struct ReadFailure(oneshot::Receiver<ExchangeError>);

impl ReadFailure {
    /// Call once the stream has been consumed
    pub fn check(mut self) -> Result<()> {
        match self.0.try_recv() {
            Ok(err) => Err(err),
            Err(_) => Ok(()),
        }
    }
}

struct ChunkReader {
    path: PathBuf,
    file: Option<tokio::fs::File>,
    metadata: Option<proto::FileMetadata>,
    chunk_size: usize,
    failure: Option<oneshot::Sender<ExchangeError>>,
}

impl ChunkReader {
    async fn next_request(&mut self) -> Option<proto::ReqUploadFile> {
        let file = self.file.as_mut()?;

        let mut chunk = Vec::with_capacity(self.chunk_size);
        let read = file.take(self.chunk_size as u64).read_to_end(&mut chunk).await;
        if let Err(e) = read {
            self.file = None;
            if let Some(failure) = self.failure.take() {
                let _ = failure.send(transfer_error(&self.path, e));
            }
            return None;
        }

        let metadata = self.metadata.take();
        if chunk.len() < self.chunk_size {
            self.file = None;
        }
        if chunk.is_empty() && metadata.is_none() {
            return None;
        }

        Some(proto::ReqUploadFile { metadata, chunk })
    }
}

/// Stream a local file as upload messages, one chunk read at a time
///
/// The first message carries the file metadata. An empty file still yields
/// one message. A read error ends the stream; the returned [`ReadFailure`]
/// holds it.
pub async fn upload_stream(
    path: &Path,
    chunk_size: usize,
) -> Result<(BoxStream<'static, proto::ReqUploadFile>, ReadFailure)> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| transfer_error(path, e))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| transfer_error(path, e))?
        .len();

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let metadata = proto::FileMetadata {
        file_name,
        content_type: "application/octet-stream".to_string(),
        size: i64::try_from(size).map_err(|_| transfer_error(path, "file too large"))?,
    };

    let (sender, receiver) = oneshot::channel();
    let reader = ChunkReader {
        path: path.to_path_buf(),
        file: Some(file),
        metadata: Some(metadata),
        chunk_size: chunk_size.max(1),
        failure: Some(sender),
    };

    let requests = futures::stream::unfold(reader, |mut reader| async move {
        reader.next_request().await.map(|request| (request, reader))
    })
    .boxed();

    Ok((requests, ReadFailure(receiver)))
}

pub fn transfer_error(path: &Path, reason: impl ToString) -> ExchangeError {
    ExchangeError::Transfer {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect_upload(path: &Path, chunk_size: usize) -> Result<Vec<proto::ReqUploadFile>> {
        let (requests, failure) = upload_stream(path, chunk_size).await?;
        let requests: Vec<_> = requests.collect().await;
        failure.check()?;
        Ok(requests)
    }

    #[test]
    fn test_missing_marker() {
        assert!(is_missing(&AnyValue::Null));
        assert!(is_missing(&AnyValue::Float64(f64::NAN)));
        assert!(!is_missing(&AnyValue::Float64(4.0)));
        assert!(!is_missing(&AnyValue::String("123")));
    }

    #[test]
    fn test_download_name_strips_directories() {
        assert_eq!(download_name("../../etc/audio.m4a", "x"), PathBuf::from("audio.m4a"));
        assert_eq!(download_name("", "row3_audio"), PathBuf::from("row3_audio"));
        assert_eq!(download_name("..", "row3_audio"), PathBuf::from("row3_audio"));
    }

    #[test]
    fn test_numbered_name() {
        let name = Path::new("audio_audio.m4a");
        assert_eq!(numbered_name(name, 0), PathBuf::from("audio_audio.m4a"));
        assert_eq!(numbered_name(name, 2), PathBuf::from("audio_audio (2).m4a"));
        assert_eq!(numbered_name(Path::new("row3_audio"), 1), PathBuf::from("row3_audio (1)"));
    }

    #[tokio::test]
    async fn test_download_file_never_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("walk.json"), b"earlier").unwrap();

        let (first, _) = create_download_file(dir.path(), "walk.json", "x").await.unwrap();
        let (second, _) = create_download_file(dir.path(), "sub/walk.json", "x").await.unwrap();

        assert_eq!(first, dir.path().join("walk (1).json"));
        assert_eq!(second, dir.path().join("walk (2).json"));
        assert_eq!(std::fs::read(dir.path().join("walk.json")).unwrap(), b"earlier");
    }

    #[tokio::test]
    async fn test_download_file_in_missing_directory() {
        let err = create_download_file(Path::new("/nonexistent/out"), "a.wav", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Transfer { ref path, .. } if path.ends_with("a.wav")));
    }

    #[tokio::test]
    async fn test_upload_stream_is_chunked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice.wav");
        std::fs::write(&path, vec![7u8; 10]).unwrap();

        let requests = collect_upload(&path, 4).await.unwrap();

        assert_eq!(requests.len(), 3);
        let metadata = requests[0].metadata.as_ref().unwrap();
        assert_eq!(metadata.file_name, "voice.wav");
        assert_eq!(metadata.size, 10);
        assert!(requests[1..].iter().all(|r| r.metadata.is_none()));
        assert_eq!(requests[2].chunk.len(), 2);
    }

    #[tokio::test]
    async fn test_upload_stream_of_exact_multiple() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice.wav");
        std::fs::write(&path, vec![1u8; 8]).unwrap();

        let requests = collect_upload(&path, 4).await.unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.chunk.len() == 4));
    }

    #[tokio::test]
    async fn test_upload_stream_for_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, b"").unwrap();

        let requests = collect_upload(&path, 4).await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].metadata.is_some());
        assert!(requests[0].chunk.is_empty());
    }

    #[tokio::test]
    async fn test_upload_of_missing_file_is_transfer_error() {
        let err = collect_upload(Path::new("/nonexistent/voice.wav"), 4)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Transfer { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_read_error_ends_stream_and_is_reported() {
        // Opening a directory succeeds on Unix, reading it does not
        let dir = tempfile::tempdir().unwrap();

        let (requests, failure) = upload_stream(dir.path(), 4).await.unwrap();
        let requests: Vec<_> = requests.collect().await;

        assert!(requests.is_empty());
        assert!(matches!(failure.check(), Err(ExchangeError::Transfer { .. })));
    }
}
