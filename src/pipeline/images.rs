//! Figure materialisation.
//!
//! Figures whose `src` is a `data:` URI are decoded in place; absolute
//! `http(s)` URLs are downloaded through an [`ImageFetcher`]. The bytes are
//! stored as a `{figure-id}.{ext}` asset and the name recorded in
//! `Figure.uploadedFilename`. Relative paths and placeholder URLs are left
//! untouched. Each figure fails on its own.

use crate::cancel::CancellationToken;
use crate::error::{FetchError, PhaseError};
use crate::model::{BlockKind, Document};
use crate::store::DocumentStore;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::future::BoxFuture;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info};

/// Downloads larger than this are abandoned.
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// The image collaborator: URL in, bytes out.
pub trait ImageFetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, FetchError>>;
}

/// [`ImageFetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpImageFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| FetchError::DownloadFailed {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { client, timeout_secs })
    }

    fn map_err(&self, url: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                secs: self.timeout_secs,
            }
        } else {
            FetchError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, FetchError>> {
        Box::pin(async move {
            let response = self.client.get(url).send().await.map_err(|e| self.map_err(url, e))?;
            if !response.status().is_success() {
                return Err(FetchError::DownloadFailed {
                    url: url.to_string(),
                    reason: format!("HTTP {}", response.status()),
                });
            }

            let mut bytes = Vec::new();
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| self.map_err(url, e))?;
                if bytes.len() + chunk.len() > MAX_IMAGE_BYTES {
                    return Err(FetchError::DownloadFailed {
                        url: url.to_string(),
                        reason: format!("larger than {} bytes", MAX_IMAGE_BYTES),
                    });
                }
                bytes.extend_from_slice(&chunk);
            }
            Ok(bytes)
        })
    }
}

/// Where a figure's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// `data:[mime];base64,…` payload.
    Inline { payload: String },
    /// Absolute `http(s)` URL to download.
    Remote(String),
    /// Relative path, placeholder or anything else: left alone.
    Local,
}

/// URLs models invent for figures they cannot see.
fn is_placeholder_url(url: &str) -> bool {
    const FAKE_DOMAINS: &[&str] = &[
        "example.com",
        "placeholder.com",
        "via.placeholder.com",
        "dummyimage.com",
        "lorempixel.com",
        "picsum.photos",
        "placehold.it",
    ];
    FAKE_DOMAINS.iter().any(|d| url.contains(d))
}

pub fn classify_src(src: &str) -> ImageSource {
    let s = src.trim();
    if let Some(rest) = s.strip_prefix("data:") {
        return match rest.split_once(";base64,") {
            Some((_mime, payload)) => ImageSource::Inline {
                payload: payload.to_string(),
            },
            None => ImageSource::Local,
        };
    }
    let lower = s.to_ascii_lowercase();
    if (lower.starts_with("http://") || lower.starts_with("https://")) && !is_placeholder_url(&lower) {
        return ImageSource::Remote(s.to_string());
    }
    ImageSource::Local
}

/// File extension for the sniffed image format.
pub fn extension_for(bytes: &[u8]) -> Option<&'static str> {
    let format = image::guess_format(bytes).ok()?;
    format.extensions_str().first().copied()
}

/// Figures that still need materialising: `(figure id, src)`.
pub fn pending_figures(document: &Document) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for block in crate::model::flatten_blocks(&document.sections) {
        if let BlockKind::Figure {
            src,
            uploaded_filename: None,
            ..
        } = &block.kind
        {
            if classify_src(src) != ImageSource::Local {
                out.push((block.id.clone(), src.clone()));
            }
        }
    }
    out
}

/// Record the stored asset name on the figure with `figure_id`.
pub fn record_upload(document: &mut Document, figure_id: &str, filename: &str) {
    document.for_each_block_mut(&mut |block| {
        if block.id == figure_id {
            if let BlockKind::Figure { uploaded_filename, .. } = &mut block.kind {
                *uploaded_filename = Some(filename.to_string());
            }
        }
    });
}

/// Fetch or decode one figure and store it. Returns the stored asset name.
pub async fn materialize_one(
    document_id: &str,
    figure_id: &str,
    src: &str,
    store: &dyn DocumentStore,
    fetcher: &dyn ImageFetcher,
    cancel: &CancellationToken,
    timeout: Duration,
) -> Result<String, PhaseError> {
    let failed = |detail: String| PhaseError::ImageFailed {
        figure_id: figure_id.to_string(),
        detail,
    };

    let bytes = match classify_src(src) {
        ImageSource::Inline { payload } => STANDARD
            .decode(payload.trim())
            .map_err(|e| failed(format!("invalid base64: {e}")))?,
        ImageSource::Remote(url) => {
            debug!("Figure {}: downloading {}", figure_id, url);
            let fetched = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(PhaseError::Cancelled { phase: "images".to_string() })
                }
                r = tokio::time::timeout(timeout, fetcher.fetch(&url)) => r,
            };
            match fetched {
                Ok(Ok(bytes)) => bytes,
                Ok(Err(e)) => return Err(failed(e.to_string())),
                Err(_) => {
                    return Err(failed(
                        FetchError::Timeout {
                            url,
                            secs: timeout.as_secs(),
                        }
                        .to_string(),
                    ))
                }
            }
        }
        ImageSource::Local => return Err(failed("not a fetchable source".to_string())),
    };

    let ext = extension_for(&bytes).ok_or_else(|| failed("unrecognised image format".to_string()))?;
    let name = format!("{figure_id}.{ext}");
    let stored = store
        .write_asset(document_id, &name, &bytes)
        .await
        .map_err(|e| failed(e.to_string()))?;
    info!("Figure {}: stored {} ({} bytes)", figure_id, stored, bytes.len());
    Ok(stored)
}
