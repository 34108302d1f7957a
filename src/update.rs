//! Template package updates
//!
//! Not transactional: a failure while extracting can leave a partially
//! replaced catalog. Do not run concurrently with composition.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::CACHE_CONTROL;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use tracing::{debug, info};

use crate::config::FormsConfig;
use crate::error::{FormsError, FormsResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub version: String,
    pub archive_url: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UpdateAction {
    None,
    Update,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResponse {
    pub newest_version: String,
    pub action: UpdateAction,
}

#[async_trait]
pub trait UpdateService: Send + Sync {
    async fn fetch_latest(&self, cancel: &CancellationToken) -> FormsResult<ReleaseInfo>;
    /// Download the archive and unpack it over `root`.
    async fn install(&self, archive_url: &str, root: &Path, cancel: &CancellationToken) -> FormsResult<()>;
}

#[async_trait]
pub trait ArchiveExtractor: Send + Sync {
    async fn extract(&self, archive: &Path, dest: &Path) -> FormsResult<()>;
}

/// Extracts zip archives in-process, overwriting existing files. Entries
/// that would land outside `dest` fail the whole extraction.
pub struct ZipExtractor;

#[async_trait]
impl ArchiveExtractor for ZipExtractor {
    async fn extract(&self, archive: &Path, dest: &Path) -> FormsResult<()> {
        let archive = archive.to_path_buf();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let file = std::fs::File::open(&archive)?;
            let mut zip = zip::ZipArchive::new(file).map_err(unzip_error)?;
            debug!("extracting {} entries into {}", zip.len(), dest.display());
            zip.extract(&dest).map_err(unzip_error)
        })
        .await
        .map_err(|e| FormsError::UpdateTransport(format!("extract task failed: {e}")))?
    }
}

fn unzip_error(e: zip::result::ZipError) -> FormsError {
    FormsError::UpdateTransport(format!("can't unzip forms update: {e}"))
}

pub struct HttpUpdateService {
    client: reqwest::Client,
    info_url: String,
    extractor: Box<dyn ArchiveExtractor>,
}

impl HttpUpdateService {
    pub fn new(config: &FormsConfig) -> FormsResult<Self> {
        Self::with_extractor(config, Box::new(ZipExtractor))
    }

    pub fn with_extractor(config: &FormsConfig, extractor: Box<dyn ArchiveExtractor>) -> FormsResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.update.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            info_url: config.update.info_url.clone(),
            extractor,
        })
    }

    async fn get(&self, url: &str) -> FormsResult<reqwest::Response> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FormsError::UpdateTransport(format!(
                "unexpected status {} from {}",
                response.status(),
                url
            )));
        }
        Ok(response)
    }

    async fn download(&self, url: &str, file: std::fs::File) -> FormsResult<()> {
        let response = self.get(url).await?;
        let mut file = tokio::fs::File::from_std(file);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl UpdateService for HttpUpdateService {
    async fn fetch_latest(&self, cancel: &CancellationToken) -> FormsResult<ReleaseInfo> {
        cancellable(cancel, async {
            let response = self.get(&self.info_url).await?;
            Ok::<_, FormsError>(response.json::<ReleaseInfo>().await?)
        })
        .await
    }

    async fn install(&self, archive_url: &str, root: &Path, cancel: &CancellationToken) -> FormsResult<()> {
        info!("Updating forms via {}", archive_url);
        // Removed when dropped, whichever way this function returns.
        let archive = tempfile::NamedTempFile::new()?;
        cancellable(cancel, self.download(archive_url, archive.reopen()?)).await?;
        cancellable(cancel, self.extractor.extract(archive.path(), root)).await
    }
}

/// Run `fut` unless `cancel` fires first.
pub async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = FormsResult<T>>,
) -> FormsResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FormsError::Cancelled),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Serves `routes` (path -> (status, body)) over plain HTTP/1.1.
    async fn serve(routes: Vec<(&'static str, u16, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { return };
                let routes = routes.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let mut read = 0;
                    while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf[read..]).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => read += n,
                        }
                    }
                    let request = String::from_utf8_lossy(&buf[..read]).to_string();
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let (status, body) = routes
                        .iter()
                        .find(|(p, _, _)| *p == path)
                        .map(|(_, s, b)| (*s, *b))
                        .unwrap_or((404, "not found"));
                    let response = format!(
                        "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        format!("http://{addr}")
    }

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<(PathBuf, String)>>,
    }

    #[async_trait]
    impl ArchiveExtractor for Arc<Recording> {
        async fn extract(&self, archive: &Path, _dest: &Path) -> FormsResult<()> {
            let content = std::fs::read_to_string(archive)?;
            self.seen.lock().push((archive.to_path_buf(), content));
            Ok(())
        }
    }

    fn config(base: &str) -> FormsConfig {
        let mut config = FormsConfig::new("/tmp/unused");
        config.update.info_url = format!("{base}/latest");
        config
    }

    #[tokio::test]
    async fn test_fetch_latest() {
        let base = serve(vec![("/latest", 200, r#"{"version":"1.1.7.0","archive_url":"http://x/a.zip"}"#)]).await;
        let service = HttpUpdateService::new(&config(&base)).unwrap();
        let info = service.fetch_latest(&CancellationToken::new()).await.unwrap();
        assert_eq!(info.version, "1.1.7.0");
        assert_eq!(info.archive_url, "http://x/a.zip");
    }

    #[tokio::test]
    async fn test_error_status_is_transport_error() {
        let base = serve(vec![("/latest", 500, "boom")]).await;
        let service = HttpUpdateService::new(&config(&base)).unwrap();
        let err = service.fetch_latest(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, FormsError::UpdateTransport(_)));
    }

    #[tokio::test]
    async fn test_install_downloads_then_removes_archive() {
        let base = serve(vec![("/forms.zip", 200, "zipdata")]).await;
        let recording = Arc::new(Recording::default());
        let service = HttpUpdateService::with_extractor(&config(&base), Box::new(Arc::clone(&recording))).unwrap();
        let dest = tempfile::tempdir().unwrap();

        service
            .install(&format!("{base}/forms.zip"), dest.path(), &CancellationToken::new())
            .await
            .unwrap();

        let seen = recording.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, "zipdata");
        assert!(!seen[0].0.exists(), "temporary archive left behind");
    }

    fn zip_file(path: &Path, entries: &[(&str, &str)]) {
        use std::io::Write;
        let mut writer = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
        for (name, content) in entries {
            writer.start_file(*name, zip::write::FileOptions::default()).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[tokio::test]
    async fn test_zip_extractor_overwrites_root() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("forms.zip");
        zip_file(
            &archive,
            &[
                ("Standard_Forms_Version.dat", "1.1.7.0"),
                ("ICS/ICS213.txt", "Msg: {message}"),
            ],
        );
        let dest = dir.path().join("forms");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("Standard_Forms_Version.dat"), "1.1.6.0").unwrap();

        ZipExtractor.extract(&archive, &dest).await.unwrap();

        assert_eq!(std::fs::read_to_string(dest.join("Standard_Forms_Version.dat")).unwrap(), "1.1.7.0");
        assert_eq!(std::fs::read_to_string(dest.join("ICS/ICS213.txt")).unwrap(), "Msg: {message}");
    }

    #[tokio::test]
    async fn test_zip_extractor_rejects_bad_archives() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("forms");

        let garbage = dir.path().join("garbage.zip");
        std::fs::write(&garbage, "zipdata").unwrap();
        let err = ZipExtractor.extract(&garbage, &dest).await.unwrap_err();
        assert!(matches!(err, FormsError::UpdateTransport(_)));

        let escaping = dir.path().join("escaping.zip");
        zip_file(&escaping, &[("../evil.txt", "x")]);
        let err = ZipExtractor.extract(&escaping, &dest).await.unwrap_err();
        assert!(matches!(err, FormsError::UpdateTransport(_)));
        assert!(!dir.path().join("evil.txt").exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: FormsResult<()> = cancellable(&cancel, std::future::pending()).await;
        assert!(matches!(result, Err(FormsError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_install_extracts_nothing() {
        let base = serve(vec![("/forms.zip", 200, "zipdata")]).await;
        let recording = Arc::new(Recording::default());
        let service = HttpUpdateService::with_extractor(&config(&base), Box::new(Arc::clone(&recording))).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = service
            .install(&format!("{base}/forms.zip"), Path::new("/tmp"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FormsError::Cancelled));
        assert!(recording.seen.lock().is_empty());
    }
}
