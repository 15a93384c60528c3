//! Asset publishing
//!
//! Every succeeded generation is uploaded once through an [`AssetPublisher`]
//! before its unit is final. [`LocalPublisher`] resolves the image bytes,
//! stores them content-addressed and writes an `.asset.toml` sidecar:
//! - content store: `<store_root>/<first-2-hex>/<hash>.<ext>`
//! - sidecars: `<assets_root>/generated/<kind>/<name>.asset.toml`

use crate::config::PublishConfig;
use crate::provider::ImageResult;
use crate::request::RequestKind;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use easel_core::{ContentHash, EaselError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DOWNLOAD_TIMEOUT_SECS: u64 = 60;

/// Generation context recorded alongside a published asset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetMetadata {
    /// File-safe asset name, e.g. `3f2a9c1d-scene-002`
    pub name: String,
    pub request_id: String,
    pub unit_id: String,
    pub kind: RequestKind,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    pub style_preset: String,
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub properties: BTreeMap<String, String>,
}

/// Where a published asset ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedAsset {
    pub asset_id: String,
    pub url: String,
}

/// Destination for finished images
pub trait AssetPublisher: Send + Sync {
    /// Store one generated image. Called exactly once per succeeded generation.
    fn upload(&self, image: &ImageResult, metadata: &AssetMetadata) -> Result<PublishedAsset>;
}

/// Publishes into a local content-addressed store
#[derive(Debug, Clone)]
pub struct LocalPublisher {
    store_root: PathBuf,
    assets_root: PathBuf,
}

impl LocalPublisher {
    pub fn new(store_root: impl Into<PathBuf>, assets_root: impl Into<PathBuf>) -> Self {
        Self {
            store_root: store_root.into(),
            assets_root: assets_root.into(),
        }
    }

    pub fn from_config(config: &PublishConfig) -> Self {
        Self::new(&config.store_root, &config.assets_root)
    }

    /// Path of a stored blob for `hash` with extension `ext`
    pub fn path_for_hash(&self, hash: &ContentHash, ext: &str) -> PathBuf {
        self.store_root
            .join(hash.shard())
            .join(format!("{}.{}", hash.to_hex(), ext))
    }

    /// Find the stored blob for a published `asset_id`, whatever its extension
    pub fn locate(&self, asset_id: &str) -> Result<Option<PathBuf>> {
        let hash: ContentHash = asset_id.parse()?;
        self.find_stored(&hash)
    }

    fn find_stored(&self, hash: &ContentHash) -> Result<Option<PathBuf>> {
        let entries = match std::fs::read_dir(self.store_root.join(hash.shard())) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let hex = hash.to_hex();
        for entry in entries {
            let path = entry?.path();
            if path.file_stem().and_then(|stem| stem.to_str()) == Some(hex.as_str()) {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    fn store_bytes(&self, bytes: &[u8], ext: &str) -> Result<(ContentHash, PathBuf)> {
        let hash = ContentHash::of(bytes);
        if let Some(existing) = self.find_stored(&hash)? {
            return Ok((hash, existing));
        }
        let dest = self.path_for_hash(&hash, ext);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&dest, bytes)?;
        Ok((hash, dest))
    }

    fn write_sidecar(
        &self,
        metadata: &AssetMetadata,
        hash: &str,
        stored_path: &Path,
        image: &ImageResult,
        format: &str,
    ) -> Result<PathBuf> {
        #[derive(Serialize)]
        struct SidecarAsset<'a> {
            hash: &'a str,
            format: &'a str,
            stored_path: String,
            source_url: &'a str,
            width: u32,
            height: u32,
            #[serde(flatten)]
            generation: &'a AssetMetadata,
        }

        #[derive(Serialize)]
        struct Sidecar<'a> {
            asset: SidecarAsset<'a>,
        }

        let sidecar_dir = self
            .assets_root
            .join("generated")
            .join(metadata.kind.to_string());
        std::fs::create_dir_all(&sidecar_dir)?;

        let sidecar = Sidecar {
            asset: SidecarAsset {
                hash,
                format,
                stored_path: stored_path.to_string_lossy().to_string(),
                source_url: &image.url,
                width: image.width,
                height: image.height,
                generation: metadata,
            },
        };

        let sidecar_path = sidecar_dir.join(format!("{}.asset.toml", metadata.name));
        std::fs::write(&sidecar_path, toml::to_string_pretty(&sidecar)?)?;
        Ok(sidecar_path)
    }
}

impl AssetPublisher for LocalPublisher {
    fn upload(&self, image: &ImageResult, metadata: &AssetMetadata) -> Result<PublishedAsset> {
        let (bytes, ext) = fetch_image_bytes(&image.url)?;
        if bytes.is_empty() {
            return Err(EaselError::UploadError(format!(
                "Image at {} is empty",
                image.url
            )));
        }

        let (hash, stored_path) = self.store_bytes(&bytes, &ext)?;
        let asset_id = hash.asset_id();
        let format = stored_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or(ext.as_str());
        let sidecar = self.write_sidecar(metadata, &asset_id, &stored_path, image, format)?;
        log::debug!(
            "Published {} as {} (sidecar {})",
            metadata.name,
            asset_id,
            sidecar.display()
        );

        Ok(PublishedAsset {
            asset_id,
            url: stored_path.to_string_lossy().to_string(),
        })
    }
}

/// Resolve an image reference (`file://`, `data:`, `http(s)://`) to bytes and a file extension
pub fn fetch_image_bytes(reference: &str) -> Result<(Vec<u8>, String)> {
    if let Some(path) = reference.strip_prefix("file://") {
        let path = Path::new(path);
        let bytes = std::fs::read(path).map_err(|e| {
            EaselError::UploadError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        return Ok((bytes, extension_of(reference)));
    }

    if let Some(data) = reference.strip_prefix("data:") {
        return decode_data_url(data);
    }

    if reference.starts_with("https://") || reference.starts_with("http://") {
        return download(reference).map(|bytes| (bytes, extension_of(reference)));
    }

    Err(EaselError::UploadError(format!(
        "Unsupported image reference: {}",
        reference
    )))
}

fn decode_data_url(data: &str) -> Result<(Vec<u8>, String)> {
    let (header, payload) = data
        .split_once(',')
        .ok_or_else(|| EaselError::UploadError("Malformed data URL".to_string()))?;
    let Some(mime) = header.strip_suffix(";base64") else {
        return Err(EaselError::UploadError(
            "Only base64 data URLs are supported".to_string(),
        ));
    };
    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|e| EaselError::UploadError(format!("Invalid base64 image data: {}", e)))?;
    let ext = match mime.strip_prefix("image/") {
        Some("jpeg") => "jpg".to_string(),
        Some(subtype) => sanitize_extension(subtype),
        None => "png".to_string(),
    };
    Ok((bytes, ext))
}

fn download(url: &str) -> Result<Vec<u8>> {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS)))
        .build();
    let agent: ureq::Agent = config.into();

    let response = agent
        .get(url)
        .call()
        .map_err(|e| EaselError::UploadError(format!("Failed to download image: {}", e)))?;

    let mut reader = response.into_body().into_reader();
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|e| EaselError::UploadError(format!("Failed to read image data: {}", e)))?;
    Ok(bytes)
}

fn extension_of(reference: &str) -> String {
    let path = reference.split(['?', '#']).next().unwrap_or(reference);
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(sanitize_extension)
        .unwrap_or_else(|| "png".to_string())
}

/// Stored blobs only take short alphanumeric extensions; anything else is `png`
fn sanitize_extension(candidate: &str) -> String {
    if (1..=5).contains(&candidate.len()) && candidate.bytes().all(|b| b.is_ascii_alphanumeric()) {
        candidate.to_ascii_lowercase()
    } else {
        "png".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("easel_publish_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn image(url: String) -> ImageResult {
        ImageResult {
            url,
            width: 4,
            height: 4,
            model: "mock-diffusion-1".to_string(),
            provider: "mock".to_string(),
            seed: Some(42),
            duration_secs: 0.2,
            metadata: BTreeMap::new(),
        }
    }

    fn metadata(name: &str) -> AssetMetadata {
        AssetMetadata {
            name: name.to_string(),
            request_id: "req".to_string(),
            unit_id: "scene-000".to_string(),
            kind: RequestKind::Storyboard,
            prompt: "a \"quoted\" harbour".to_string(),
            negative_prompt: None,
            style_preset: "storyboard".to_string(),
            provider: "mock".to_string(),
            model: "mock-diffusion-1".to_string(),
            seed: Some(42),
            project_id: None,
            created_at: Utc::now(),
            properties: BTreeMap::from([("mood".to_string(), "calm".to_string())]),
        }
    }

    #[test]
    fn test_publish_file_reference() {
        let dir = temp_dir();
        let source = dir.join("render.png");
        std::fs::write(&source, b"fake-image").unwrap();

        let publisher = LocalPublisher::new(dir.join("store"), dir.join("assets"));
        let published = publisher
            .upload(&image(format!("file://{}", source.display())), &metadata("req-scene-000"))
            .unwrap();

        let hash = ContentHash::of(b"fake-image");
        assert_eq!(published.asset_id, hash.asset_id());
        assert!(Path::new(&published.url).exists());
        assert_eq!(PathBuf::from(&published.url), publisher.path_for_hash(&hash, "png"));

        let sidecar_path = dir
            .join("assets")
            .join("generated")
            .join("storyboard")
            .join("req-scene-000.asset.toml");
        let sidecar = std::fs::read_to_string(sidecar_path).unwrap();
        let parsed: toml::Value = toml::from_str(&sidecar).unwrap();
        let asset = parsed.get("asset").unwrap();
        assert_eq!(
            asset.get("prompt").and_then(|v| v.as_str()),
            Some("a \"quoted\" harbour")
        );
        assert_eq!(
            asset.get("hash").and_then(|v| v.as_str()),
            Some(published.asset_id.as_str())
        );
        assert_eq!(
            asset
                .get("properties")
                .and_then(|p| p.get("mood"))
                .and_then(|v| v.as_str()),
            Some("calm")
        );

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_publish_is_content_addressed() {
        let dir = temp_dir();
        let publisher = LocalPublisher::new(dir.join("store"), dir.join("assets"));
        let url = format!("data:image/png;base64,{}", BASE64.encode(b"same-bytes"));

        let first = publisher.upload(&image(url.clone()), &metadata("a")).unwrap();
        let second = publisher.upload(&image(url), &metadata("b")).unwrap();
        assert_eq!(first, second);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_data_url_extension() {
        let (bytes, ext) = fetch_image_bytes(&format!(
            "data:image/jpeg;base64,{}",
            BASE64.encode(b"jpg")
        ))
        .unwrap();
        assert_eq!(bytes, b"jpg");
        assert_eq!(ext, "jpg");
        assert!(fetch_image_bytes("data:image/png,raw").is_err());
    }

    #[test]
    fn test_data_url_subtype_cannot_escape_store() {
        for mime in ["image/../../x", "image/svg+xml", "image/a\\b", "image/", "image/verylongtype"] {
            let url = format!("data:{};base64,{}", mime, BASE64.encode(b"x"));
            let (_, ext) = fetch_image_bytes(&url).unwrap();
            assert_eq!(ext, "png", "{}", mime);
        }

        let dir = temp_dir();
        let store = dir.join("store");
        let publisher = LocalPublisher::new(&store, dir.join("assets"));
        let url = format!("data:image/../../../evil;base64,{}", BASE64.encode(b"payload"));
        let published = publisher.upload(&image(url), &metadata("escape")).unwrap();
        let stored = PathBuf::from(&published.url);
        assert_eq!(stored.parent().and_then(|p| p.parent()), Some(store.as_path()));
        assert_eq!(stored.extension().and_then(|e| e.to_str()), Some("png"));

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_locate_by_asset_id() {
        let dir = temp_dir();
        let publisher = LocalPublisher::new(dir.join("store"), dir.join("assets"));
        let url = format!("data:image/webp;base64,{}", BASE64.encode(b"webp-bytes"));
        let published = publisher.upload(&image(url), &metadata("frame")).unwrap();

        let found = publisher.locate(&published.asset_id).unwrap();
        assert_eq!(found, Some(PathBuf::from(&published.url)));

        let missing = ContentHash::of(b"never uploaded").asset_id();
        assert_eq!(publisher.locate(&missing).unwrap(), None);
        assert!(matches!(
            publisher.locate("not-an-asset-id"),
            Err(EaselError::InvalidAssetId(_))
        ));

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_same_bytes_reuse_blob_across_formats() {
        let dir = temp_dir();
        let publisher = LocalPublisher::new(dir.join("store"), dir.join("assets"));
        let png = format!("data:image/png;base64,{}", BASE64.encode(b"identical"));
        let webp = format!("data:image/webp;base64,{}", BASE64.encode(b"identical"));

        let first = publisher.upload(&image(png), &metadata("a")).unwrap();
        let second = publisher.upload(&image(webp), &metadata("b")).unwrap();
        assert_eq!(first.asset_id, second.asset_id);
        assert_eq!(first.url, second.url);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_unsupported_reference() {
        let err = fetch_image_bytes("mock://m/1.png").unwrap_err();
        assert!(matches!(err, EaselError::UploadError(_)));
    }

    #[test]
    fn test_missing_file_is_upload_error() {
        let err = fetch_image_bytes("file:///definitely/not/here.png").unwrap_err();
        assert!(matches!(err, EaselError::UploadError(_)));
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("https://cdn.x/a/b.webp?sig=1"), "webp");
        assert_eq!(extension_of("https://cdn.x/a/b"), "png");
        assert_eq!(extension_of("file:///tmp/x.PNG"), "png");
    }
}
