//! Rendering pairing codes as QR codes.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{ImageBuffer, ImageFormat, Luma};
use qrcode::{Color, EcLevel, QrCode};
use thiserror::Error;

/// Pixels per QR module in the PNG rendering.
const MODULE_PIXELS: u32 = 10;

/// Light border around the code, in modules.
const QUIET_ZONE: u32 = 2;

#[derive(Debug, Error)]
pub enum QrError {
    #[error("QR encoding failed: {0}")]
    Encode(#[from] qrcode::types::QrError),

    #[error("PNG encoding failed: {0}")]
    Png(#[from] image::ImageError),
}

fn encode(data: &str) -> Result<QrCode, QrError> {
    Ok(QrCode::with_error_correction_level(
        data.as_bytes(),
        EcLevel::L,
    )?)
}

/// Render `data` as PNG bytes.
pub fn render_png(data: &str) -> Result<Vec<u8>, QrError> {
    let code = encode(data)?;
    let modules = code.width() as u32;
    let size = (modules + QUIET_ZONE * 2) * MODULE_PIXELS;

    let img = ImageBuffer::from_fn(size, size, |x, y| {
        let (mx, my) = (x / MODULE_PIXELS, y / MODULE_PIXELS);
        let inside = (QUIET_ZONE..QUIET_ZONE + modules).contains(&mx)
            && (QUIET_ZONE..QUIET_ZONE + modules).contains(&my);
        if !inside {
            return Luma([255u8]);
        }
        match code[((mx - QUIET_ZONE) as usize, (my - QUIET_ZONE) as usize)] {
            Color::Dark => Luma([0u8]),
            Color::Light => Luma([255u8]),
        }
    });

    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Render `data` as a `data:image/png;base64,...` URL.
pub fn render_png_data_url(data: &str) -> Result<String, QrError> {
    let png = render_png(data)?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png)))
}

/// Render `data` for a terminal, two module rows per text line.
pub fn render_terminal(data: &str) -> Result<String, QrError> {
    let code = encode(data)?;
    let width = code.width();
    let colors = code.into_colors();
    let dark = |row: usize, col: usize| row < width && colors[row * width + col] == Color::Dark;

    let mut out = String::with_capacity((width + 1) * width.div_ceil(2) * 3);
    for row in (0..width).step_by(2) {
        for col in 0..width {
            out.push(match (dark(row, col), dark(row + 1, col)) {
                (true, true) => '█',
                (true, false) => '▀',
                (false, true) => '▄',
                (false, false) => ' ',
            });
        }
        out.push('\n');
    }
    Ok(out)
}
