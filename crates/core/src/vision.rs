use std::path::Path;

use anyhow::{Context, Result, ensure};
use candle_core::{DType, Device, Tensor};
use image::{DynamicImage, Rgb, RgbImage, imageops::FilterType};
use reqwest::blocking::Client;
use tracing::debug;

pub const CLIP_IMAGE_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
pub const CLIP_IMAGE_STD: [f32; 3] = [0.268_629_54, 0.261_302_6, 0.275_777_1];

pub fn is_remote_image(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Load an image from an http(s) URL or a local path and convert it to RGB.
pub fn load_image(source: &str) -> Result<DynamicImage> {
    let image = if is_remote_image(source) {
        fetch_remote_image(source)?
    } else {
        let path = Path::new(source);
        image::open(path).with_context(|| format!("failed to open image {}", path.display()))?
    };
    Ok(DynamicImage::ImageRgb8(image.to_rgb8()))
}

fn fetch_remote_image(url: &str) -> Result<DynamicImage> {
    debug!(url, "fetching remote image");
    let bytes = Client::new()
        .get(url)
        .send()
        .with_context(|| format!("failed to fetch {url}"))?
        .error_for_status()
        .with_context(|| format!("image request failed for {url}"))?
        .bytes()
        .context("failed to read image body")?;
    image::load_from_memory(&bytes).with_context(|| format!("failed to decode image from {url}"))
}

/// Converts a decoded image into the pixel tensor the vision tower expects.
pub trait ImageProcessor: Send + Sync {
    fn preprocess(&self, image: &DynamicImage, device: &Device, dtype: DType) -> Result<Tensor>;
}

/// CLIP ViT-L/14 preprocessing as used by LLaVA 1.5.
#[derive(Debug, Clone)]
pub struct ClipImageProcessor {
    pub crop_size: u32,
    pub shortest_edge: u32,
    pub rescale_factor: f64,
    pub image_mean: [f32; 3],
    pub image_std: [f32; 3],
    /// Pad to a square filled with the mean color before resizing.
    pub pad_to_square: bool,
}

impl Default for ClipImageProcessor {
    fn default() -> Self {
        Self {
            crop_size: 336,
            shortest_edge: 336,
            rescale_factor: 1.0 / 255.0,
            image_mean: CLIP_IMAGE_MEAN,
            image_std: CLIP_IMAGE_STD,
            pad_to_square: true,
        }
    }
}

impl ClipImageProcessor {
    pub fn with_pad_to_square(mut self, pad_to_square: bool) -> Self {
        self.pad_to_square = pad_to_square;
        self
    }

    fn background(&self) -> Rgb<u8> {
        Rgb(self
            .image_mean
            .map(|channel| (channel * 255.0).round().clamp(0.0, 255.0) as u8))
    }

    fn resize_and_crop(&self, rgb: &RgbImage) -> Result<RgbImage> {
        let (width, height) = rgb.dimensions();
        ensure!(width > 0 && height > 0, "image has zero extent");
        let short = width.min(height) as f64;
        let scale = f64::from(self.shortest_edge) / short;
        let new_w = ((f64::from(width) * scale).round() as u32).max(self.crop_size);
        let new_h = ((f64::from(height) * scale).round() as u32).max(self.crop_size);
        let resized = if (new_w, new_h) == (width, height) {
            rgb.clone()
        } else {
            image::imageops::resize(rgb, new_w, new_h, FilterType::CatmullRom)
        };
        let left = (new_w - self.crop_size) / 2;
        let top = (new_h - self.crop_size) / 2;
        Ok(image::imageops::crop_imm(&resized, left, top, self.crop_size, self.crop_size).to_image())
    }
}

impl ImageProcessor for ClipImageProcessor {
    fn preprocess(&self, image: &DynamicImage, device: &Device, dtype: DType) -> Result<Tensor> {
        let mut rgb = image.to_rgb8();
        if self.pad_to_square {
            rgb = expand_to_square(&rgb, self.background());
        }
        let cropped = self.resize_and_crop(&rgb)?;

        let side = self.crop_size as usize;
        let plane = side * side;
        let mut chw = vec![0f32; 3 * plane];
        for (x, y, pixel) in cropped.enumerate_pixels() {
            for (c, &channel) in pixel.0.iter().enumerate() {
                let value = (f64::from(channel) * self.rescale_factor) as f32;
                chw[c * plane + y as usize * side + x as usize] =
                    (value - self.image_mean[c]) / self.image_std[c];
            }
        }
        Tensor::from_vec(chw, (1, 3, side, side), device)?
            .to_dtype(dtype)
            .context("failed to cast pixel values")
    }
}

/// Center `rgb` on a square canvas of `background`.
pub fn expand_to_square(rgb: &RgbImage, background: Rgb<u8>) -> RgbImage {
    let (width, height) = rgb.dimensions();
    if width == height {
        return rgb.clone();
    }
    let side = width.max(height);
    let mut canvas = RgbImage::from_pixel(side, side, background);
    let x = i64::from((side - width) / 2);
    let y = i64::from((side - height) / 2);
    image::imageops::replace(&mut canvas, rgb, x, y);
    canvas
}
