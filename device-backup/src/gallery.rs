//! Static HTML gallery for a backup root.
//!
//! Writes `thumbnails/` and `index.html` next to the backed-up files so the
//! backup can be browsed without any tool. Existing thumbnails are reused;
//! videos and unreadable images get a plain gray placeholder.

use crate::events::{EventBus, ProgressEvent};
use crate::fs::walker::{for_each_file, LocalFile, WalkOptions};
use futures_util::stream::{self, StreamExt};
use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Directory under the backup root holding generated thumbnails
pub const THUMBNAIL_DIR: &str = "thumbnails";

/// Gallery page under the backup root
pub const INDEX_FILE: &str = "index.html";

const THUMBNAIL_SIZE: u32 = 300;
const PLACEHOLDER_GRAY: Rgb<u8> = Rgb([64, 64, 64]);
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4"];

/// Thumbnailing is CPU bound; keep a few blocking threads busy at most.
const THUMBNAIL_CONCURRENCY: usize = 8;

/// One gallery tile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    /// Path of the media file relative to the root, `/`-separated
    pub relative_path: String,
    /// Path of the thumbnail relative to the root, `/`-separated
    pub thumbnail_path: String,
    pub name: String,
    pub is_video: bool,
    /// Full path of the media file on disk
    pub source: PathBuf,
}

impl MediaItem {
    fn for_file(file: &LocalFile) -> Option<Self> {
        let kind = media_kind(&file.name)?;
        let relative_path = portable(&file.relative_path);
        let thumbnail_path = format!("{}/{}", THUMBNAIL_DIR, thumbnail_name(&relative_path, kind));

        Some(Self {
            relative_path,
            thumbnail_path,
            name: file.name.clone(),
            is_video: kind == MediaKind::Video,
            source: file.path.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaKind {
    Image,
    Video,
}

/// What happened to a tile's thumbnail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Thumbnail {
    Created,
    Existing,
    Placeholder,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct GallerySummary {
    pub run_id: String,
    pub items: usize,
    pub thumbnails_created: usize,
    pub placeholders: usize,
    pub failed: usize,
    /// `None` when the run was cancelled before the page was written
    pub index_path: Option<PathBuf>,
    pub cancelled: bool,
    pub duration_secs: u64,
}

/// Media files under `root`, in walk order, skipping generated thumbnails.
pub fn find_media(root: &Path) -> crate::Result<Vec<MediaItem>> {
    let options = WalkOptions {
        exclude_root_names: vec![THUMBNAIL_DIR.to_string()],
    };

    let mut items = Vec::new();
    let skipped = for_each_file(root, &options, |file| {
        if let Some(item) = MediaItem::for_file(&file) {
            items.push(item);
        }
    })?;
    if skipped > 0 {
        debug!("Gallery scan skipped {} unreadable entries", skipped);
    }
    Ok(items)
}

/// Build `thumbnails/` and `index.html` for the backup at `root`.
pub async fn generate_gallery(
    root: &Path,
    events: &EventBus,
    cancel: CancellationToken,
) -> crate::Result<GallerySummary> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let started = Instant::now();

    let scan_root = root.to_path_buf();
    let items = tokio::task::spawn_blocking(move || find_media(&scan_root))
        .await
        .map_err(|e| crate::BackupError::Gallery(format!("media scan failed: {}", e)))??;
    let total = items.len();

    info!("Generating gallery for {} media files in {}", total, root.display());
    events.publish(ProgressEvent::GalleryStarted {
        run_id: run_id.clone(),
        root: root.display().to_string(),
        total,
    });

    let mut summary = GallerySummary {
        run_id: run_id.clone(),
        items: total,
        thumbnails_created: 0,
        placeholders: 0,
        failed: 0,
        index_path: None,
        cancelled: false,
        duration_secs: 0,
    };

    if total > 0 {
        tokio::fs::create_dir_all(root.join(THUMBNAIL_DIR)).await?;
    }

    let mut thumbnails = stream::iter(items.iter().cloned())
        .map(|item| {
            let root = root.to_path_buf();
            let cancel = cancel.clone();
            async move {
                if cancel.is_cancelled() {
                    return (item, Thumbnail::Cancelled);
                }
                let relative = item.relative_path.clone();
                let outcome = tokio::task::spawn_blocking(move || {
                    let thumbnail = ensure_thumbnail(&root, &item);
                    (item, thumbnail)
                })
                .await;
                match outcome {
                    Ok(done) => done,
                    Err(e) => {
                        error!("Thumbnail task for {} failed: {}", relative, e);
                        (placeholder_item(&relative), Thumbnail::Failed)
                    }
                }
            }
        })
        .buffer_unordered(THUMBNAIL_CONCURRENCY);

    let mut processed = 0;
    while let Some((item, thumbnail)) = thumbnails.next().await {
        match thumbnail {
            Thumbnail::Created => summary.thumbnails_created += 1,
            Thumbnail::Placeholder => summary.placeholders += 1,
            Thumbnail::Failed => summary.failed += 1,
            Thumbnail::Existing => {}
            Thumbnail::Cancelled => {
                summary.cancelled = true;
                continue;
            }
        }
        processed += 1;
        events.publish(ProgressEvent::GalleryItem {
            run_id: run_id.clone(),
            path: item.relative_path,
            processed,
            total,
        });
    }

    if summary.cancelled || cancel.is_cancelled() {
        summary.cancelled = true;
        warn!("Gallery cancelled after {} of {} files, index not written", processed, total);
    } else {
        let generated_at = chrono::Local::now().format("%Y-%m-%d %H:%M").to_string();
        let index_path = root.join(INDEX_FILE);
        tokio::fs::write(&index_path, render_index(&items, &generated_at)).await?;
        info!("Gallery written to {}", index_path.display());
        summary.index_path = Some(index_path);
    }

    summary.duration_secs = started.elapsed().as_secs();
    events.publish(ProgressEvent::GalleryCompleted {
        run_id,
        items: processed,
        index_path: summary
            .index_path
            .as_ref()
            .map(|p| p.display().to_string()),
        duration_secs: summary.duration_secs,
        cancelled: summary.cancelled,
    });

    Ok(summary)
}

/// Tile stand-in used only for progress reporting when a worker died.
fn placeholder_item(relative_path: &str) -> MediaItem {
    MediaItem {
        relative_path: relative_path.to_string(),
        thumbnail_path: String::new(),
        name: String::new(),
        is_video: false,
        source: PathBuf::new(),
    }
}

/// Make sure the item's thumbnail exists. Never errors: anything that cannot
/// be decoded gets a placeholder and only a failed write is reported.
fn ensure_thumbnail(root: &Path, item: &MediaItem) -> Thumbnail {
    let dest = join_portable(root, &item.thumbnail_path);
    if dest.exists() {
        return Thumbnail::Existing;
    }

    if !item.is_video {
        let source = &item.source;
        match image::open(source) {
            Ok(img) => {
                let thumb = img
                    .resize_to_fill(THUMBNAIL_SIZE, THUMBNAIL_SIZE, FilterType::Lanczos3)
                    .to_rgb8();
                match thumb.save(&dest) {
                    Ok(()) => return Thumbnail::Created,
                    Err(e) => warn!("Failed to write thumbnail {}: {}", dest.display(), e),
                }
            }
            Err(e) => debug!("Cannot decode {}: {}", source.display(), e),
        }
    }

    match RgbImage::from_pixel(THUMBNAIL_SIZE, THUMBNAIL_SIZE, PLACEHOLDER_GRAY).save(&dest) {
        Ok(()) => Thumbnail::Placeholder,
        Err(e) => {
            warn!("Failed to write placeholder {}: {}", dest.display(), e);
            Thumbnail::Failed
        }
    }
}

fn media_kind(name: &str) -> Option<MediaKind> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

/// Flat thumbnail name: `2024/01/a.jpg` becomes `thumb_2024_01_a.jpg`.
/// Video thumbnails are JPEG placeholders, so they get a `.jpg` suffix.
fn thumbnail_name(relative_path: &str, kind: MediaKind) -> String {
    let mut name = format!("thumb_{}", relative_path.replace('/', "_").replace(':', ""));
    if kind == MediaKind::Video {
        name.push_str(".jpg");
    }
    name
}

fn portable(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn join_portable(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |path, part| path.join(part))
}

/// Render the gallery page.
pub fn render_index(items: &[MediaItem], generated_at: &str) -> String {
    let mut html = String::with_capacity(1024 + items.len() * 256);
    html.push_str(INDEX_HEAD);

    // Writing into a String cannot fail.
    let _ = write!(
        html,
        "    <h1>Backup Gallery <span>{} items</span></h1>\n    <p>Generated on {}</p>\n    <div class=\"gallery\">\n",
        items.len(),
        escape_html(generated_at)
    );

    for item in items {
        let _ = write!(
            html,
            "        <div class=\"item\">\n            <a href=\"{href}\" target=\"_blank\">\n                <img src=\"{src}\" alt=\"{name}\" loading=\"lazy\">\n                {name}\n            </a>\n",
            href = escape_html(&item.relative_path),
            src = escape_html(&item.thumbnail_path),
            name = escape_html(&item.name),
        );
        if item.is_video {
            html.push_str("            <span class=\"video-badge\">VIDEO</span>\n");
        }
        html.push_str("        </div>\n");
    }

    html.push_str("    </div>\n</body>\n</html>\n");
    html
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

const INDEX_HEAD: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Android Backup Gallery</title>
    <style>
        body { font-family: sans-serif; background: #222; color: #eee; margin: 0; padding: 20px; }
        .gallery { display: grid; grid-template-columns: repeat(auto-fill, minmax(200px, 1fr)); gap: 15px; }
        .item { background: #333; padding: 10px; border-radius: 8px; text-align: center; }
        .item img { max-width: 100%; height: auto; border-radius: 4px; display: block; margin-bottom: 5px; }
        .item a { color: #88c0d0; text-decoration: none; font-size: 0.9em; word-break: break-all; }
        .video-badge { background: #d08770; color: #222; padding: 2px 5px; border-radius: 4px; font-weight: bold; font-size: 0.8em; }
    </style>
</head>
<body>
"#;
