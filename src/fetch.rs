// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::{
    future::Future,
    io,
    path::{Path, PathBuf},
    pin::Pin,
};

use thiserror::Error;
use tracing::debug;

const FILE_SCHEME: &str = "file://";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unable to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("unsupported resource locator {0}")]
    UnsupportedLocator(String),
}

/// The future returned by [Fetcher::fetch].
pub type FetchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<u8>, FetchError>> + Send + 'a>>;

/// Retrieves the raw bytes of MIDI files and samples.
pub trait Fetcher: Send + Sync {
    /// Fetches the resource named by the locator.
    fn fetch<'a>(&'a self, locator: &'a str) -> FetchFuture<'a>;
}

/// Reads resources from the local filesystem. Locators are plain paths or file:// URIs;
/// relative paths resolve against the base path.
#[derive(Clone, Debug)]
pub struct FileFetcher {
    base_path: PathBuf,
}

impl FileFetcher {
    pub fn new(base_path: impl Into<PathBuf>) -> FileFetcher {
        FileFetcher {
            base_path: base_path.into(),
        }
    }

    /// Maps a locator to the path that will be read.
    pub fn resolve(&self, locator: &str) -> Result<PathBuf, FetchError> {
        let path = match locator.strip_prefix(FILE_SCHEME) {
            Some(path) => path,
            None if locator.contains("://") => {
                return Err(FetchError::UnsupportedLocator(locator.to_string()))
            }
            None => locator,
        };

        let path = Path::new(path);
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(self.base_path.join(path))
        }
    }
}

impl Fetcher for FileFetcher {
    fn fetch<'a>(&'a self, locator: &'a str) -> FetchFuture<'a> {
        Box::pin(async move {
            let path = self.resolve(locator)?;
            debug!(path = %path.display(), "Reading resource.");
            tokio::fs::read(&path).await.map_err(|source| FetchError::Io {
                path: path.display().to_string(),
                source,
            })
        })
    }
}

#[cfg(test)]
mod test {
    use std::{error::Error, fs};

    use super::*;

    #[test]
    fn test_resolve() -> Result<(), Box<dyn Error>> {
        let fetcher = FileFetcher::new("/music");

        assert_eq!(PathBuf::from("/music/a.mid"), fetcher.resolve("a.mid")?);
        assert_eq!(PathBuf::from("/other/a.mid"), fetcher.resolve("/other/a.mid")?);
        assert_eq!(
            PathBuf::from("/other/a.mid"),
            fetcher.resolve("file:///other/a.mid")?
        );
        assert_eq!(
            PathBuf::from("/music/sub/a.mid"),
            fetcher.resolve("file://sub/a.mid")?
        );
        assert!(matches!(
            fetcher.resolve("https://example.com/a.mid"),
            Err(FetchError::UnsupportedLocator(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_reads_file() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("song.mid"), b"MThd")?;

        let fetcher = FileFetcher::new(dir.path());
        assert_eq!(b"MThd".to_vec(), fetcher.fetch("song.mid").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_missing_file() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let fetcher = FileFetcher::new(dir.path());

        let result = fetcher.fetch("missing.mid").await;
        assert!(matches!(result, Err(FetchError::Io { .. })));
        Ok(())
    }
}
