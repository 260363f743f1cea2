//! Spread image composition.
//!
//! Every card is loaded and transformed on its own blocking task; the results
//! are then pasted onto the canvas in position order, so later positions
//! cover earlier ones no matter which task finished first.

use crate::aggregate::KnowledgeBundle;
use crate::config::PathsConfig;
use crate::knowledge::{Card, DrawInstruction};
use futures::future::join_all;
use image::imageops::{self, FilterType};
use image::{ImageError, Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::task::{self, JoinError};

/// Errors from composing a spread image.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("Image asset not found: {}", .0.display())]
    AssetNotFound(PathBuf),

    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    #[error("Card task failed: {0}")]
    Join(#[from] JoinError),

    #[error("Got {cards} cards, {draws} draw instructions and {flags} reversal flags")]
    LengthMismatch {
        cards: usize,
        draws: usize,
        flags: usize,
    },
}

/// A transformed card and the canvas offset of its top-left corner.
#[derive(Debug)]
struct Placed {
    image: RgbaImage,
    x: i64,
    y: i64,
}

/// Lays drawn cards out on a canvas.
#[derive(Debug, Clone)]
pub struct ImageComposer {
    cards_dir: PathBuf,
    extension: String,
}

impl ImageComposer {
    /// Card images are read from `<cards_dir>/<card id>.<extension>`.
    pub fn new(cards_dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            cards_dir: cards_dir.into(),
            extension: extension.into(),
        }
    }

    pub fn from_paths(paths: &PathsConfig) -> Self {
        Self::new(paths.cards_dir(), paths.card_extension.clone())
    }

    pub fn card_path(&self, card_id: &str) -> PathBuf {
        self.cards_dir.join(format!("{card_id}.{}", self.extension))
    }

    /// Compose a finished reading onto the canvas file at `canvas_path`.
    pub async fn compose_reading(
        &self,
        canvas_path: impl AsRef<Path>,
        bundle: &KnowledgeBundle,
    ) -> Result<RgbaImage, ComposeError> {
        let canvas_path = canvas_path.as_ref().to_path_buf();
        let canvas = task::spawn_blocking(move || load_rgba(&canvas_path)).await??;
        self.compose(
            canvas,
            &bundle.cards,
            &bundle.spread.draw_instructions(),
            &bundle.reversed,
        )
        .await
    }

    /// Transform every card concurrently, then paste them in position order.
    pub async fn compose(
        &self,
        mut canvas: RgbaImage,
        cards: &[Card],
        draws: &[DrawInstruction],
        reversed: &[bool],
    ) -> Result<RgbaImage, ComposeError> {
        if cards.len() != draws.len() || cards.len() != reversed.len() {
            return Err(ComposeError::LengthMismatch {
                cards: cards.len(),
                draws: draws.len(),
                flags: reversed.len(),
            });
        }

        let tasks: Vec<_> = cards
            .iter()
            .zip(draws)
            .zip(reversed)
            .enumerate()
            .map(|(position, ((card, draw), reversed))| {
                let path = self.card_path(&card.id);
                let (draw, reversed) = (*draw, *reversed);
                task::spawn_blocking(move || -> Result<Placed, ComposeError> {
                    let placed = transform_card(load_rgba(&path)?, draw, reversed);
                    tracing::debug!(
                        position,
                        path = %path.display(),
                        width = placed.image.width(),
                        height = placed.image.height(),
                        x = placed.x,
                        y = placed.y,
                        "Transformed card"
                    );
                    Ok(placed)
                })
            })
            .collect();

        // join_all keeps the input order, whatever order the tasks finish in.
        for result in join_all(tasks).await {
            let placed = result??;
            imageops::overlay(&mut canvas, &placed.image, placed.x, placed.y);
        }

        Ok(canvas)
    }
}

fn load_rgba(path: &Path) -> Result<RgbaImage, ComposeError> {
    if !path.is_file() {
        return Err(ComposeError::AssetNotFound(path.to_path_buf()));
    }
    Ok(image::open(path)?.to_rgba8())
}

fn transform_card(mut image: RgbaImage, draw: DrawInstruction, reversed: bool) -> Placed {
    if reversed {
        image = imageops::rotate180(&image);
    }
    if !is_close(draw.rotation, 0.0) {
        image = rotate_expanded(&image, draw.rotation);
    }
    if !is_close(draw.scale, 1.0) {
        let width = ((image.width() as f64 * draw.scale) as u32).max(1);
        let height = ((image.height() as f64 * draw.scale) as u32).max(1);
        let filter = if draw.scale < 1.0 {
            FilterType::Lanczos3
        } else {
            FilterType::CatmullRom
        };
        image = imageops::resize(&image, width, height, filter);
    }

    let [ax, ay] = draw.anchor;
    Placed {
        x: (ax - image.width() as f64 / 2.0) as i64,
        y: (ay - image.height() as f64 / 2.0) as i64,
        image,
    }
}

/// Relative comparison with a tolerance of 1e-9, so only an exact zero is
/// close to zero.
fn is_close(a: f64, b: f64) -> bool {
    a == b || (a - b).abs() <= 1e-9 * a.abs().max(b.abs())
}

/// Rotate counter-clockwise by `degrees`, growing the canvas to fit the
/// whole result. Uncovered pixels are transparent.
fn rotate_expanded(image: &RgbaImage, degrees: f64) -> RgbaImage {
    let (w, h) = (image.width() as f64, image.height() as f64);
    let (sin, cos) = degrees.to_radians().sin_cos();

    // Shave float noise so 90 degrees does not grow a pixel.
    let new_w = ((w * cos.abs() + h * sin.abs()) - 1e-6).ceil().max(1.0);
    let new_h = ((w * sin.abs() + h * cos.abs()) - 1e-6).ceil().max(1.0);

    let mut out = RgbaImage::new(new_w as u32, new_h as u32);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let dx = x as f64 + 0.5 - new_w / 2.0;
        let dy = y as f64 + 0.5 - new_h / 2.0;
        let sx = dx * cos - dy * sin + w / 2.0 - 0.5;
        let sy = dx * sin + dy * cos + h / 2.0 - 0.5;
        *pixel = sample_bicubic(image, sx, sy);
    }
    out
}

/// Catmull-Rom kernel (a = -0.5).
fn cubic_weight(t: f64) -> f64 {
    const A: f64 = -0.5;
    let t = t.abs();
    if t <= 1.0 {
        (A + 2.0) * t * t * t - (A + 3.0) * t * t + 1.0
    } else if t < 2.0 {
        A * t * t * t - 5.0 * A * t * t + 8.0 * A * t - 4.0 * A
    } else {
        0.0
    }
}

/// Bicubic sample at pixel-center coordinates, in premultiplied alpha.
fn sample_bicubic(image: &RgbaImage, x: f64, y: f64) -> Rgba<u8> {
    let (w, h) = (image.width() as i64, image.height() as i64);
    if x < -2.0 || y < -2.0 || x > w as f64 + 1.0 || y > h as f64 + 1.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let (x0, y0) = (x0 as i64, y0 as i64);

    let mut color = [0.0f64; 3];
    let mut alpha = 0.0f64;
    for n in -1..=2i64 {
        let py = y0 + n;
        if py < 0 || py >= h {
            continue;
        }
        let wy = cubic_weight(n as f64 - fy);
        for m in -1..=2i64 {
            let px = x0 + m;
            if px < 0 || px >= w {
                continue;
            }
            let weight = cubic_weight(m as f64 - fx) * wy;
            let Rgba([r, g, b, a]) = *image.get_pixel(px as u32, py as u32);
            let a = a as f64;
            alpha += weight * a;
            color[0] += weight * r as f64 * a;
            color[1] += weight * g as f64 * a;
            color[2] += weight * b as f64 * a;
        }
    }

    if alpha <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let channel = |c: f64| (c / alpha).round().clamp(0.0, 255.0) as u8;
    Rgba([
        channel(color[0]),
        channel(color[1]),
        channel(color[2]),
        alpha.round().clamp(0.0, 255.0) as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| Rgba([(x * 10) as u8, (y * 10) as u8, 7, 255]))
    }

    fn instruction(rotation: f64, scale: f64) -> DrawInstruction {
        DrawInstruction {
            anchor: [100.0, 100.0],
            rotation,
            scale,
        }
    }

    #[test]
    fn test_is_close() {
        assert!(is_close(0.0, 0.0));
        assert!(is_close(1.0, 1.0 + 1e-12));
        assert!(!is_close(0.1, 0.0));
        assert!(!is_close(1e-12, 0.0));
        assert!(!is_close(0.5, 1.0));
    }

    #[test]
    fn test_cubic_weight_interpolates() {
        assert_eq!(cubic_weight(0.0), 1.0);
        assert_eq!(cubic_weight(1.0), 0.0);
        assert_eq!(cubic_weight(2.0), 0.0);
        let sum: f64 = [-1.25, -0.25, 0.75, 1.75].iter().map(|t| cubic_weight(*t)).sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_quarter_turn_swaps_dimensions_and_goes_counter_clockwise() {
        let source = gradient(6, 4);
        let rotated = rotate_expanded(&source, 90.0);
        assert_eq!(rotated.dimensions(), (4, 6));
        // Top-right corner ends up top-left.
        assert_eq!(rotated.get_pixel(0, 0), source.get_pixel(5, 0));
        // Bottom-left corner ends up bottom-right.
        assert_eq!(rotated.get_pixel(3, 5), source.get_pixel(0, 3));
    }

    #[test]
    fn test_oblique_rotation_expands_bounds() {
        let rotated = rotate_expanded(&gradient(10, 10), 45.0);
        // 10 * sqrt(2) = 14.14...
        assert_eq!(rotated.dimensions(), (15, 15));
        // Corners of the expanded box are uncovered.
        assert_eq!(rotated.get_pixel(0, 0)[3], 0);
        assert_eq!(rotated.get_pixel(7, 7)[3], 255);
    }

    #[test]
    fn test_reversed_card_is_flipped() {
        let source = gradient(6, 4);
        let placed = transform_card(source.clone(), instruction(0.0, 1.0), true);
        assert_eq!(placed.image.dimensions(), (6, 4));
        assert_eq!(placed.image.get_pixel(0, 0), source.get_pixel(5, 3));
    }

    #[test]
    fn test_scale_and_center_placement() {
        let placed = transform_card(gradient(40, 60), instruction(0.0, 0.5), false);
        assert_eq!(placed.image.dimensions(), (20, 30));
        assert_eq!((placed.x, placed.y), (90, 85));

        let placed = transform_card(gradient(10, 10), instruction(0.0, 2.0), false);
        assert_eq!(placed.image.dimensions(), (20, 20));
        assert_eq!((placed.x, placed.y), (90, 90));
    }

    #[test]
    fn test_odd_sizes_truncate_placement() {
        let placed = transform_card(gradient(5, 3), instruction(0.0, 1.0), false);
        // 100 - 2.5 and 100 - 1.5.
        assert_eq!((placed.x, placed.y), (97, 98));
    }

    #[test]
    fn test_card_path() {
        let composer = ImageComposer::new("/res/cards", "jpg");
        assert_eq!(composer.card_path("m00"), PathBuf::from("/res/cards/m00.jpg"));
    }

    #[tokio::test]
    async fn test_length_mismatch() {
        let composer = ImageComposer::new("/nowhere", "png");
        let result = composer
            .compose(RgbaImage::new(10, 10), &[], &[instruction(0.0, 1.0)], &[])
            .await;
        assert!(matches!(result, Err(ComposeError::LengthMismatch { .. })));
    }
}
