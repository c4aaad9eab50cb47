//! Media processor: extracts `(width, height)` and renders thumbnails.
//!
//! Decoding and resizing go through the `image` crate; `image`'s own `webp`
//! feature is decode-only, so the final encode to the on-disk `.webp` goes
//! through the `webp` crate instead.

use crate::fs::supported_media::MediaKind;
use anyhow::{bail, Context};
use image::imageops::FilterType;
use image::GenericImageView;
use std::path::Path;

#[derive(Debug, Clone, Copy)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

pub trait MediaProcessor: Send + Sync {
    /// Extracts pixel dimensions from an image or the first frame of a video.
    fn extract_dimensions(&self, path: &Path, kind: MediaKind) -> anyhow::Result<Dimensions>;

    /// Renders a thumbnail to `dest_path`, scaled so its longest edge is at
    /// most `max_dimension`, creating parent directories as needed.
    fn render_thumbnail(
        &self,
        path: &Path,
        kind: MediaKind,
        dest_path: &Path,
        max_dimension: u32,
    ) -> anyhow::Result<()>;
}

/// Lossy WebP quality passed to the encoder, on its 0-100 scale.
const THUMBNAIL_QUALITY: f32 = 80.0;

pub struct DefaultMediaProcessor;

impl DefaultMediaProcessor {
    fn load_image(path: &Path) -> anyhow::Result<image::DynamicImage> {
        Ok(image::open(path).with_context(|| format!("decoding image {}", path.display()))?)
    }

    #[cfg(feature = "video-frames")]
    fn load_first_video_frame(path: &Path) -> anyhow::Result<image::DynamicImage> {
        video::decode_first_frame(path)
    }

    #[cfg(not(feature = "video-frames"))]
    fn load_first_video_frame(path: &Path) -> anyhow::Result<image::DynamicImage> {
        bail!(
            "video frame extraction requires the video-frames feature: {}",
            path.display()
        )
    }
}

impl MediaProcessor for DefaultMediaProcessor {
    fn extract_dimensions(&self, path: &Path, kind: MediaKind) -> anyhow::Result<Dimensions> {
        let image = match kind {
            MediaKind::Image => Self::load_image(path)?,
            MediaKind::Video => Self::load_first_video_frame(path)?,
        };
        let (width, height) = image.dimensions();
        Ok(Dimensions { width, height })
    }

    fn render_thumbnail(
        &self,
        path: &Path,
        kind: MediaKind,
        dest_path: &Path,
        max_dimension: u32,
    ) -> anyhow::Result<()> {
        let image = match kind {
            MediaKind::Image => Self::load_image(path)?,
            MediaKind::Video => Self::load_first_video_frame(path)?,
        };

        let thumbnail = image.resize(max_dimension, max_dimension, FilterType::Lanczos3);

        if let Some(parent) = dest_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating thumbnail directory {}", parent.display()))?;
        }

        let encoder = webp::Encoder::from_image(&thumbnail)
            .map_err(|err| anyhow::anyhow!("encoding thumbnail as webp: {err}"))?;
        let encoded = encoder.encode(THUMBNAIL_QUALITY);
        std::fs::write(dest_path, &*encoded)
            .with_context(|| format!("writing thumbnail {}", dest_path.display()))?;
        Ok(())
    }
}

/// Deterministic thumbnail path derivation: `<root>/<libraryId>/<contentHash>.webp`.
pub fn thumbnail_path(thumbnail_root: &Path, library_id: i64, content_hash: &str) -> std::path::PathBuf {
    thumbnail_root
        .join(library_id.to_string())
        .join(format!("{content_hash}.webp"))
}

#[cfg(feature = "video-frames")]
mod video {
    use anyhow::{bail, Context};
    use std::path::Path;

    /// Decodes the first video frame via ffmpeg's codec bindings, used only
    /// as an opaque collaborator — its video-decode internals aren't this
    /// crate's concern any more than libwebp's encoder internals are.
    pub fn decode_first_frame(path: &Path) -> anyhow::Result<image::DynamicImage> {
        ffmpeg_next::init().context("initializing ffmpeg")?;
        let mut ictx = ffmpeg_next::format::input(&path)
            .with_context(|| format!("opening video {}", path.display()))?;

        let input = ictx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .context("no video stream found")?;
        let video_stream_index = input.index();

        let context_decoder =
            ffmpeg_next::codec::context::Context::from_parameters(input.parameters())?;
        let mut decoder = context_decoder.decoder().video()?;

        let mut scaler = ffmpeg_next::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg_next::format::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg_next::software::scaling::flag::Flags::BILINEAR,
        )?;

        for (stream, packet) in ictx.packets() {
            if stream.index() != video_stream_index {
                continue;
            }
            decoder.send_packet(&packet)?;

            let mut decoded = ffmpeg_next::frame::Video::empty();
            if decoder.receive_frame(&mut decoded).is_ok() {
                let mut rgb_frame = ffmpeg_next::frame::Video::empty();
                scaler.run(&decoded, &mut rgb_frame)?;

                let width = rgb_frame.width();
                let height = rgb_frame.height();
                let buffer = rgb_frame.data(0).to_vec();

                let image_buffer = image::RgbImage::from_raw(width, height, buffer)
                    .context("ffmpeg frame buffer had unexpected stride")?;
                return Ok(image::DynamicImage::ImageRgb8(image_buffer));
            }
        }

        bail!("no decodable frame found in {}", path.display())
    }
}
