//! Image resolution: turn every [`ImageRef`] source into a normalised local
//! PNG in the scratch directory.
//!
//! Remote sources are fetched with a browser-like User-Agent (several image
//! hosts reject unknown clients) and a short timeout. Decoded images are
//! downscaled to fit 800×600 and re-encoded as PNG so the PDF writer only
//! ever sees one format. Every failure becomes a [`ResourceIssue`]; nothing
//! here aborts rendering.

use crate::error::{DigestError, ResourceIssue};
use crate::scratch::TempFileRegistry;
use crate::store::ImageRef;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Largest download or file accepted for one image.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Largest width and height kept after normalisation.
pub const MAX_IMAGE_DIMENSIONS: (u32, u32) = (800, 600);

/// A normalised PNG ready to embed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// Outcome of resolving a set of image sources, keyed by source and
/// remembering the order sources were first seen.
#[derive(Debug, Clone, Default)]
pub struct ResolvedImages {
    map: HashMap<String, Result<ResolvedImage, ResourceIssue>>,
    order: Vec<String>,
}

impl ResolvedImages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: impl Into<String>, outcome: Result<ResolvedImage, ResourceIssue>) {
        let source = source.into();
        if self.map.insert(source.clone(), outcome).is_none() {
            self.order.push(source);
        }
    }

    pub fn contains(&self, source: &str) -> bool {
        self.map.contains_key(source)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The resolved image for `source`, if it resolved.
    pub fn get(&self, source: &str) -> Option<&ResolvedImage> {
        self.map.get(source).and_then(|r| r.as_ref().ok())
    }

    /// The failure for `source`, or a generic one if it was never attempted.
    pub fn issue(&self, source: &str) -> Option<ResourceIssue> {
        match self.map.get(source) {
            Some(Ok(_)) => None,
            Some(Err(issue)) => Some(issue.clone()),
            None => Some(ResourceIssue::ImageUnavailable {
                location: source.to_string(),
                detail: "not resolved".into(),
            }),
        }
    }

    /// Failures in first-seen order.
    pub fn issues(&self) -> Vec<ResourceIssue> {
        self.order
            .iter()
            .filter_map(|source| self.map.get(source))
            .filter_map(|r| r.clone().err())
            .collect()
    }

    pub fn resolved_count(&self) -> usize {
        self.map.values().filter(|r| r.is_ok()).count()
    }
}

/// Fetches and normalises images into the scratch directory.
pub struct ImageResolver {
    client: reqwest::Client,
    scratch: Arc<TempFileRegistry>,
    max_bytes: usize,
}

impl ImageResolver {
    pub fn new(scratch: Arc<TempFileRegistry>, timeout_secs: u64) -> Result<Self, DigestError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DigestError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            scratch,
            max_bytes: MAX_IMAGE_BYTES,
        })
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Resolve every image, one at a time.
    pub async fn resolve_all(&self, images: &[&ImageRef]) -> ResolvedImages {
        let mut resolved = ResolvedImages::new();
        for image in images {
            if resolved.contains(&image.source) {
                continue;
            }
            let outcome = self.resolve(image).await;
            if let Err(issue) = &outcome {
                warn!("{}", issue);
            }
            resolved.insert(image.source.clone(), outcome);
        }
        debug!(
            "Resolved {}/{} image(s)",
            resolved.resolved_count(),
            resolved.len()
        );
        resolved
    }

    /// Resolve one image: local cache path first, then URL or file source.
    pub async fn resolve(&self, image: &ImageRef) -> Result<ResolvedImage, ResourceIssue> {
        let unavailable = |detail: String| ResourceIssue::ImageUnavailable {
            location: image.source.clone(),
            detail,
        };

        let bytes = if let Some(path) = &image.local_path {
            self.read_local(path).await.map_err(unavailable)?
        } else if is_url(&image.source) {
            self.fetch(&image.source).await.map_err(unavailable)?
        } else {
            self.read_local(Path::new(&image.source))
                .await
                .map_err(unavailable)?
        };

        let (png, width, height) = tokio::task::spawn_blocking(move || normalise(&bytes))
            .await
            .map_err(|e| unavailable(format!("decode task failed: {e}")))?
            .map_err(unavailable)?;

        let path = self
            .scratch
            .write("img-", ".png", &png)
            .map_err(|e| unavailable(format!("cache write failed: {e}")))?;
        Ok(ResolvedImage {
            path,
            width,
            height,
        })
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, String> {
        let mut response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                "timed out".to_string()
            } else {
                e.to_string()
            }
        })?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        check_size(response.content_length(), self.max_bytes)?;

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| e.to_string())? {
            bytes.extend_from_slice(&chunk);
            check_size(Some(bytes.len() as u64), self.max_bytes)?;
        }
        Ok(bytes)
    }

    async fn read_local(&self, path: &Path) -> Result<Vec<u8>, String> {
        let meta = tokio::fs::metadata(path).await.map_err(|e| e.to_string())?;
        check_size(Some(meta.len()), self.max_bytes)?;
        tokio::fs::read(path).await.map_err(|e| e.to_string())
    }
}

fn check_size(len: Option<u64>, max_bytes: usize) -> Result<(), String> {
    match len {
        Some(n) if n > max_bytes as u64 => {
            Err(format!("{n} bytes exceeds the {max_bytes}-byte image limit"))
        }
        _ => Ok(()),
    }
}

pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Decode, downscale to fit [`MAX_IMAGE_DIMENSIONS`], and re-encode as PNG.
pub fn normalise(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32), String> {
    let img = image::load_from_memory(bytes).map_err(|e| format!("decode failed: {e}"))?;
    let (max_w, max_h) = MAX_IMAGE_DIMENSIONS;
    let img = if img.width() > max_w || img.height() > max_h {
        img.thumbnail(max_w, max_h)
    } else {
        img
    };
    // RGB only: printpdf's PNG path handles it everywhere.
    let img = image::DynamicImage::ImageRgb8(img.to_rgb8());
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| format!("encode failed: {e}"))?;
    Ok((out.into_inner(), img.width(), img.height()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(w, h, Rgb([20, 115, 232]));
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://img.example.org/a.png"));
        assert!(!is_url("/tmp/chart.png"));
    }

    #[test]
    fn normalise_downscales_preserving_aspect() {
        let (png, w, h) = normalise(&png_bytes(1600, 600)).unwrap();
        assert_eq!((w, h), (800, 300));
        assert!(png.starts_with(b"\x89PNG"));
    }

    #[test]
    fn normalise_keeps_small_images() {
        let (_, w, h) = normalise(&png_bytes(120, 90)).unwrap();
        assert_eq!((w, h), (120, 90));
    }

    #[test]
    fn normalise_rejects_garbage() {
        assert!(normalise(b"not an image").is_err());
    }

    #[tokio::test]
    async fn local_file_resolves_into_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("chart.png");
        std::fs::write(&src, png_bytes(40, 30)).unwrap();

        let scratch = Arc::new(TempFileRegistry::new(dir.path().join("scratch")));
        let resolver = ImageResolver::new(scratch.clone(), 5).unwrap();
        let image = ImageRef::new(src.display().to_string(), "chart");
        let resolved = resolver.resolve_all(&[&image]).await;

        let got = resolved.get(&image.source).expect("resolved");
        assert_eq!((got.width, got.height), (40, 30));
        assert_eq!(scratch.tracked(), vec![got.path.clone()]);
    }

    #[test]
    fn size_check_uses_declared_or_received_length() {
        assert!(check_size(None, 10).is_ok());
        assert!(check_size(Some(10), 10).is_ok());
        let err = check_size(Some(11), 10).unwrap_err();
        assert!(err.contains("exceeds the 10-byte image limit"), "{err}");
    }

    #[tokio::test]
    async fn oversized_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("huge.png");
        std::fs::write(&src, png_bytes(200, 200)).unwrap();

        let scratch = Arc::new(TempFileRegistry::new(dir.path().join("scratch")));
        let resolver = ImageResolver::new(scratch.clone(), 5).unwrap().with_max_bytes(64);
        let image = ImageRef::new(src.display().to_string(), "huge");
        let resolved = resolver.resolve_all(&[&image]).await;

        assert!(resolved.get(&image.source).is_none());
        match resolved.issue(&image.source) {
            Some(ResourceIssue::ImageUnavailable { detail, .. }) => {
                assert!(detail.contains("image limit"), "{detail}")
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(scratch.is_empty());
    }

    #[test]
    fn issues_follow_first_seen_order() {
        let mut resolved = ResolvedImages::new();
        let sources = ["/z.png", "/a.png", "/m.png", "/b.png", "/y.png"];
        for source in sources {
            resolved.insert(
                source,
                Err(ResourceIssue::ImageUnavailable {
                    location: source.to_string(),
                    detail: "gone".into(),
                }),
            );
        }
        resolved.insert(
            "/a.png",
            Err(ResourceIssue::ImageUnavailable {
                location: "/a.png".into(),
                detail: "again".into(),
            }),
        );
        let order: Vec<String> = resolved
            .issues()
            .into_iter()
            .map(|i| match i {
                ResourceIssue::ImageUnavailable { location, .. } => location,
                other => panic!("unexpected: {other:?}"),
            })
            .collect();
        assert_eq!(order, sources);
        assert_eq!(resolved.len(), 5);
    }

    #[tokio::test]
    async fn missing_file_is_an_issue_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = Arc::new(TempFileRegistry::new(dir.path()));
        let resolver = ImageResolver::new(scratch, 5).unwrap();
        let image = ImageRef::new("/definitely/missing.png", "gone");
        let resolved = resolver.resolve_all(&[&image]).await;
        assert!(resolved.get(&image.source).is_none());
        assert!(matches!(
            resolved.issue(&image.source),
            Some(ResourceIssue::ImageUnavailable { .. })
        ));
    }
}
