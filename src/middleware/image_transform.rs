//! On-the-fly image transformation driven by query parameters.
//!
//! | key          | meaning                                                      |
//! |--------------|--------------------------------------------------------------|
//! | `w`, `h`     | target width / height in pixels                              |
//! | `fit`        | `cover` (default), `contain`, `fill`, `inside`, `outside`    |
//! | `crop`       | anchor for cover/contain: `center`, `north`, `southeast`, …  |
//! | `fm`         | output format: `png` (default), `jpeg`, `webp`, `gif`, …     |
//! | `q`          | JPEG quality 1–100                                           |
//! | `colorquant` | reduce to roughly this many colours (2–256)                  |
//! | `blur`       | gaussian sigma 0.3–1000                                      |
//! | `sat`        | saturation -100..100                                         |
//! | `bright`     | brightness -100..100                                         |
//! | `cont`       | contrast -100..100                                           |
//! | `prog`       | progressive output (accepted; encoders here are baseline)    |
//! | `mask`       | `circle` or `ellipse`, clears pixels outside the shape       |
//!
//! Pipeline: decode → resize → blur → modulate → contrast → mask → encode.
//! Every step is deterministic, so identical input and parameters produce
//! identical bytes.

use std::io::Cursor;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use thiserror::Error;
use tracing::debug;

use crate::middleware::{Flow, Stage};
use crate::proxy::context::RequestContext;
use crate::proxy::error::ProxyError;

/// Query keys this stage consumes.
pub const PARAM_KEYS: &[&str] = &[
    "w", "h", "fit", "fm", "q", "colorquant", "crop", "blur", "sat", "bright", "cont", "prog", "mask",
];

const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("invalid value '{value}' for '{name}'")]
    InvalidParam { name: &'static str, value: String },

    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Fit {
    #[default]
    Cover,
    Contain,
    Fill,
    Inside,
    Outside,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
    WebP,
    Gif,
    Bmp,
    Tiff,
}

impl OutputFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::WebP => "image/webp",
            OutputFormat::Gif => "image/gif",
            OutputFormat::Bmp => "image/bmp",
            OutputFormat::Tiff => "image/tiff",
        }
    }
}

/// Horizontal and vertical anchor, each 0 (start), 1 (center) or 2 (end).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor(u8, u8);

impl Default for Anchor {
    fn default() -> Self {
        Anchor(1, 1)
    }
}

impl Anchor {
    fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        let compass = match value.as_str() {
            "center" | "centre" | "entropy" | "attention" => Some(Anchor(1, 1)),
            "north" => Some(Anchor(1, 0)),
            "northeast" => Some(Anchor(2, 0)),
            "east" => Some(Anchor(2, 1)),
            "southeast" => Some(Anchor(2, 2)),
            "south" => Some(Anchor(1, 2)),
            "southwest" => Some(Anchor(0, 2)),
            "west" => Some(Anchor(0, 1)),
            "northwest" => Some(Anchor(0, 0)),
            _ => None,
        };
        if compass.is_some() {
            return compass;
        }

        let mut anchor = Anchor(1, 1);
        let mut words = 0;
        for word in value.split(|c: char| c == ' ' || c == '-' || c == '_' || c == ',') {
            match word {
                "" => continue,
                "left" => anchor.0 = 0,
                "right" => anchor.0 = 2,
                "top" => anchor.1 = 0,
                "bottom" => anchor.1 = 2,
                "center" | "centre" => {}
                _ => return None,
            }
            words += 1;
        }
        (words > 0).then_some(anchor)
    }

    fn offset(axis: u8, outer: u32, inner: u32) -> u32 {
        let slack = outer.saturating_sub(inner);
        match axis {
            0 => 0,
            1 => slack / 2,
            _ => slack,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskShape {
    Circle,
    Ellipse,
}

/// Parsed transformation request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformParams {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: Fit,
    pub format: OutputFormat,
    pub quality: Option<u8>,
    pub colors: Option<u16>,
    pub crop: Anchor,
    pub blur: Option<f32>,
    pub saturation: Option<i32>,
    pub brightness: Option<i32>,
    pub contrast: Option<i32>,
    pub progressive: bool,
    pub mask: Option<MaskShape>,
}

fn invalid(name: &'static str, value: &str) -> TransformError {
    TransformError::InvalidParam {
        name,
        value: value.to_string(),
    }
}

fn ranged<T>(name: &'static str, value: &str, min: T, max: T) -> Result<T, TransformError>
where
    T: std::str::FromStr + PartialOrd,
{
    let parsed: T = value.trim().parse().map_err(|_| invalid(name, value))?;
    if parsed < min || parsed > max {
        return Err(invalid(name, value));
    }
    Ok(parsed)
}

impl TransformParams {
    /// Read recognised keys from query pairs; the first occurrence wins.
    pub fn from_query<'a, I>(pairs: I) -> Result<Self, TransformError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut params = TransformParams::default();
        let mut seen: Vec<&str> = Vec::new();
        for (key, value) in pairs {
            if seen.contains(&key) || !PARAM_KEYS.iter().any(|k| *k == key) {
                continue;
            }
            seen.push(key);
            match key {
                "w" => params.width = Some(ranged("w", value, 1, 16_384)?),
                "h" => params.height = Some(ranged("h", value, 1, 16_384)?),
                "fit" => {
                    params.fit = match value.trim().to_ascii_lowercase().as_str() {
                        "cover" => Fit::Cover,
                        "contain" => Fit::Contain,
                        "fill" => Fit::Fill,
                        "inside" => Fit::Inside,
                        "outside" => Fit::Outside,
                        _ => return Err(invalid("fit", value)),
                    }
                }
                "fm" => {
                    params.format = match value.trim().to_ascii_lowercase().as_str() {
                        "png" => OutputFormat::Png,
                        "jpeg" | "jpg" => OutputFormat::Jpeg,
                        "webp" => OutputFormat::WebP,
                        "gif" => OutputFormat::Gif,
                        "bmp" => OutputFormat::Bmp,
                        "tiff" | "tif" => OutputFormat::Tiff,
                        _ => return Err(invalid("fm", value)),
                    }
                }
                "q" => params.quality = Some(ranged("q", value, 1, 100)?),
                "colorquant" => params.colors = Some(ranged("colorquant", value, 2, 256)?),
                "crop" => params.crop = Anchor::parse(value).ok_or_else(|| invalid("crop", value))?,
                "blur" => params.blur = Some(ranged("blur", value, 0.3, 1000.0)?),
                "sat" => params.saturation = Some(ranged("sat", value, -100, 100)?),
                "bright" => params.brightness = Some(ranged("bright", value, -100, 100)?),
                "cont" => params.contrast = Some(ranged("cont", value, -100, 100)?),
                "prog" => {
                    params.progressive = match value.trim().to_ascii_lowercase().as_str() {
                        "" | "1" | "true" | "yes" => true,
                        "0" | "false" | "no" => false,
                        _ => return Err(invalid("prog", value)),
                    }
                }
                "mask" => {
                    params.mask = Some(match value.trim().to_ascii_lowercase().as_str() {
                        "circle" => MaskShape::Circle,
                        "ellipse" => MaskShape::Ellipse,
                        _ => return Err(invalid("mask", value)),
                    })
                }
                _ => {}
            }
        }
        Ok(params)
    }
}

/// Decode, transform and re-encode an image.
pub fn transform(input: &[u8], params: &TransformParams) -> Result<Vec<u8>, TransformError> {
    let decoded = image::load_from_memory(input).map_err(TransformError::Decode)?;
    let mut img = resize(decoded.to_rgba8(), params);

    if let Some(sigma) = params.blur {
        img = imageops::blur(&img, sigma);
    }
    if params.brightness.is_some() || params.saturation.is_some() {
        modulate(
            &mut img,
            factor(params.brightness.unwrap_or(0)),
            factor(params.saturation.unwrap_or(0)),
        );
    }
    if let Some(contrast) = params.contrast {
        adjust_contrast(&mut img, factor(contrast));
    }
    if let Some(shape) = params.mask {
        apply_mask(&mut img, shape);
    }
    if let Some(colors) = params.colors {
        posterize(&mut img, colors);
    }

    encode(img, params)
}

fn factor(value: i32) -> f32 {
    (value + 100) as f32 / 100.0
}

fn scaled(len: u32, scale: f64) -> u32 {
    ((len as f64 * scale).round() as u32).max(1)
}

fn resize(img: RgbaImage, params: &TransformParams) -> RgbaImage {
    let (src_w, src_h) = img.dimensions();
    let filter = FilterType::Lanczos3;

    let (w, h) = match (params.width, params.height) {
        (None, None) => return img,
        (Some(w), None) => {
            return imageops::resize(&img, w, scaled(src_h, w as f64 / src_w as f64), filter)
        }
        (None, Some(h)) => {
            return imageops::resize(&img, scaled(src_w, h as f64 / src_h as f64), h, filter)
        }
        (Some(w), Some(h)) => (w, h),
    };

    let scale_x = w as f64 / src_w as f64;
    let scale_y = h as f64 / src_h as f64;

    match params.fit {
        Fit::Fill => imageops::resize(&img, w, h, filter),
        Fit::Inside => {
            let scale = scale_x.min(scale_y);
            imageops::resize(&img, scaled(src_w, scale), scaled(src_h, scale), filter)
        }
        Fit::Outside => {
            let scale = scale_x.max(scale_y);
            imageops::resize(&img, scaled(src_w, scale), scaled(src_h, scale), filter)
        }
        Fit::Cover => {
            let scale = scale_x.max(scale_y);
            let (rw, rh) = (scaled(src_w, scale).max(w), scaled(src_h, scale).max(h));
            let resized = imageops::resize(&img, rw, rh, filter);
            let x = Anchor::offset(params.crop.0, rw, w);
            let y = Anchor::offset(params.crop.1, rh, h);
            imageops::crop_imm(&resized, x, y, w, h).to_image()
        }
        Fit::Contain => {
            let scale = scale_x.min(scale_y);
            let (rw, rh) = (scaled(src_w, scale).min(w), scaled(src_h, scale).min(h));
            let resized = imageops::resize(&img, rw, rh, filter);
            let mut canvas = RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 255]));
            let x = Anchor::offset(params.crop.0, w, rw);
            let y = Anchor::offset(params.crop.1, h, rh);
            imageops::overlay(&mut canvas, &resized, x as i64, y as i64);
            canvas
        }
    }
}

fn clamp_channel(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

fn modulate(img: &mut RgbaImage, brightness: f32, saturation: f32) {
    for pixel in img.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let (r, g, b) = (
            r as f32 * brightness,
            g as f32 * brightness,
            b as f32 * brightness,
        );
        let luma = 0.2126 * r + 0.7152 * g + 0.0722 * b;
        let sat = |c: f32| clamp_channel(luma + (c - luma) * saturation);
        pixel.0 = [sat(r), sat(g), sat(b), a];
    }
}

fn adjust_contrast(img: &mut RgbaImage, slope: f32) {
    let offset = 128.0 - 128.0 * slope;
    for pixel in img.pixels_mut() {
        for channel in &mut pixel.0[..3] {
            *channel = clamp_channel(*channel as f32 * slope + offset);
        }
    }
}

fn apply_mask(img: &mut RgbaImage, shape: MaskShape) {
    let (w, h) = img.dimensions();
    let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
    let (rx, ry) = match shape {
        MaskShape::Ellipse => (cx, cy),
        MaskShape::Circle => {
            let r = cx.min(cy);
            (r, r)
        }
    };
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let dx = (x as f32 + 0.5 - cx) / rx;
        let dy = (y as f32 + 0.5 - cy) / ry;
        if dx * dx + dy * dy > 1.0 {
            pixel.0[3] = 0;
        }
    }
}

/// Uniform per-channel quantization to about `colors` distinct colours.
fn posterize(img: &mut RgbaImage, colors: u16) {
    let levels = ((colors as f32).cbrt().round() as u32).max(2);
    let step = 255.0 / (levels - 1) as f32;
    for pixel in img.pixels_mut() {
        for channel in &mut pixel.0[..3] {
            *channel = clamp_channel((*channel as f32 / step).round() * step);
        }
    }
}

fn encode(img: RgbaImage, params: &TransformParams) -> Result<Vec<u8>, TransformError> {
    let image = DynamicImage::ImageRgba8(img);
    let mut out = Cursor::new(Vec::new());
    let format = match params.format {
        OutputFormat::Jpeg => {
            let rgb = image.to_rgb8();
            let quality = params.quality.unwrap_or(DEFAULT_JPEG_QUALITY);
            {
                let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
                encoder.encode_image(&rgb).map_err(TransformError::Encode)?;
            }
            return Ok(out.into_inner());
        }
        OutputFormat::Png => ImageFormat::Png,
        OutputFormat::WebP => ImageFormat::WebP,
        OutputFormat::Gif => ImageFormat::Gif,
        OutputFormat::Bmp => ImageFormat::Bmp,
        OutputFormat::Tiff => ImageFormat::Tiff,
    };
    image.write_to(&mut out, format).map_err(TransformError::Encode)?;
    Ok(out.into_inner())
}

pub struct ImageTransformStage;

#[async_trait]
impl Stage for ImageTransformStage {
    fn name(&self) -> &'static str {
        "image_transform"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, ProxyError> {
        if !ctx.route.image_transformation.enabled {
            return Ok(Flow::Next);
        }
        let Some(result) = ctx.result.as_mut() else {
            return Ok(Flow::Next);
        };
        if !result.status.is_success() {
            return Ok(Flow::Next);
        }

        let params = TransformParams::from_query(
            ctx.query.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        )?;
        let input = result.bytes().await?;

        // decoding and resampling are CPU-bound
        let task_params = params.clone();
        let output = tokio::task::spawn_blocking(move || transform(&input, &task_params))
            .await
            .map_err(|e| ProxyError::Configuration(format!("image task failed: {}", e)))??;

        debug!(
            route = %ctx.route.id,
            format = params.format.content_type(),
            bytes = output.len(),
            "Image transformed"
        );
        result.replace_body(output.into(), params.format.content_type());
        Ok(Flow::Next)
    }
}
