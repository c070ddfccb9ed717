//! Printable barcode sheet composition.
//!
//! Lays the selected order's persisted barcode images out as a tile grid with
//! product/location captions, encodes the sheet as PNG and writes it under
//! the app data dir. The OS viewer handles the actual print dialog.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{Rgba, RgbaImage};
use tracing::{info, warn};

use crate::error::WorkbenchError;
use crate::renderer::decode_data_url;
use crate::rows::OrderLineRow;

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct SheetLayout {
    pub columns: u32,
    pub tile_width: u32,
    pub margin: u32,
    pub gap: u32,
    pub caption_scale: u32,
}

impl Default for SheetLayout {
    fn default() -> Self {
        Self {
            columns: 2,
            tile_width: 360,
            margin: 24,
            gap: 16,
            caption_scale: 2,
        }
    }
}

impl SheetLayout {
    fn caption_height(&self) -> u32 {
        8 * self.caption_scale + 6
    }
}

/// One sheet cell: a persisted barcode image plus its caption line.
#[derive(Debug, Clone)]
pub struct SheetTile {
    pub caption: String,
    pub image_data_url: String,
}

/// Collect printable tiles from the current rows: only rows that actually
/// carry a persisted/rendered image make it onto the sheet.
pub fn tiles_from_rows(rows: &[OrderLineRow]) -> Vec<SheetTile> {
    rows.iter()
        .filter_map(|row| {
            let image = row.barcode_image.as_deref()?;
            let caption = if row.location.is_empty() {
                row.product_name.clone()
            } else {
                format!("{} @ {}", row.product_name, row.location)
            };
            Some(SheetTile {
                caption,
                image_data_url: image.to_string(),
            })
        })
        .collect()
}

/// A composed sheet ready to write to disk.
#[derive(Debug)]
pub struct SheetImage {
    pub png_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub tile_count: usize,
    pub skipped: usize,
}

/// Compose the tile grid. Tiles whose image payload cannot be decoded are
/// skipped and counted, not fatal. Fails only when nothing is printable.
pub fn compose_sheet(tiles: &[SheetTile], layout: &SheetLayout) -> Result<SheetImage, WorkbenchError> {
    let mut decoded: Vec<(RgbaImage, &str)> = Vec::new();
    let mut skipped = 0usize;
    for tile in tiles {
        match decode_tile_image(&tile.image_data_url, layout.tile_width) {
            Ok(img) => decoded.push((img, tile.caption.as_str())),
            Err(err) => {
                warn!(caption = %tile.caption, error = %err, "skipping undecodable sheet tile");
                skipped += 1;
            }
        }
    }
    if decoded.is_empty() {
        return Err(WorkbenchError::Validation(
            "No generated barcodes to print".into(),
        ));
    }

    let columns = layout.columns.max(1);
    let cell_w = layout.tile_width;
    let caption_h = layout.caption_height();

    // Row heights follow the tallest image per grid row.
    let grid_rows: Vec<&[(RgbaImage, &str)]> = decoded.chunks(columns as usize).collect();
    let row_heights: Vec<u32> = grid_rows
        .iter()
        .map(|row| {
            row.iter().map(|(img, _)| img.height()).max().unwrap_or(0) + caption_h + layout.gap
        })
        .collect();

    let width = layout.margin * 2 + columns * cell_w + (columns - 1) * layout.gap;
    let height = layout.margin * 2 + row_heights.iter().sum::<u32>();
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));

    let mut y = layout.margin;
    for (grid_row, row_height) in grid_rows.iter().zip(row_heights.iter()) {
        for (col, (img, caption)) in grid_row.iter().enumerate() {
            let x = layout.margin + col as u32 * (cell_w + layout.gap);
            // Center narrower images inside their cell.
            let x_offset = (cell_w.saturating_sub(img.width())) / 2;
            image::imageops::overlay(&mut canvas, img, (x + x_offset) as i64, y as i64);
            draw_caption(
                &mut canvas,
                x,
                y + img.height() + 4,
                caption,
                layout.caption_scale,
            );
        }
        y += row_height;
    }

    let mut png_bytes = Vec::new();
    image::DynamicImage::ImageRgba8(canvas)
        .write_to(&mut Cursor::new(&mut png_bytes), image::ImageFormat::Png)
        .map_err(|e| WorkbenchError::Internal(format!("sheet encode: {e}")))?;

    Ok(SheetImage {
        png_bytes,
        width,
        height,
        tile_count: decoded.len(),
        skipped,
    })
}

fn decode_tile_image(data_url: &str, target_width: u32) -> Result<RgbaImage, WorkbenchError> {
    let bytes = decode_data_url(data_url)?;
    let img = image::load_from_memory(&bytes)
        .map_err(|e| WorkbenchError::Validation(format!("image decode: {e}")))?;
    let img = if img.width() > target_width {
        let scale = target_width as f32 / img.width() as f32;
        let target_height = ((img.height() as f32 * scale).round() as u32).max(1);
        img.resize_exact(target_width, target_height, FilterType::Triangle)
    } else {
        img
    };
    Ok(img.to_rgba8())
}

/// Draw one caption line using the 8x8 bitmap font, scaled. Characters
/// without a glyph fall back to '?'; text past the right edge is clipped.
fn draw_caption(canvas: &mut RgbaImage, x: u32, y: u32, text: &str, scale: u32) {
    use font8x8::{UnicodeFonts, BASIC_FONTS};

    let scale = scale.max(1);
    let mut pen_x = x;
    for ch in text.chars() {
        if pen_x + 8 * scale > canvas.width() {
            break;
        }
        let glyph = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?'));
        if let Some(glyph) = glyph {
            for (gy, bits) in glyph.iter().enumerate() {
                for gx in 0..8u32 {
                    if bits & (1 << gx) != 0 {
                        for sy in 0..scale {
                            for sx in 0..scale {
                                let px = pen_x + gx * scale + sx;
                                let py = y + gy as u32 * scale + sy;
                                if px < canvas.width() && py < canvas.height() {
                                    canvas.put_pixel(px, py, Rgba([0, 0, 0, 255]));
                                }
                            }
                        }
                    }
                }
            }
        }
        pen_x += 8 * scale;
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Write a composed sheet under `{app_data_dir}/sheets/` and return its path.
pub fn write_sheet(
    app_data_dir: &Path,
    order_number: &str,
    sheet: &SheetImage,
) -> Result<PathBuf, WorkbenchError> {
    let dir = app_data_dir.join("sheets");
    fs::create_dir_all(&dir)
        .map_err(|e| WorkbenchError::Internal(format!("create sheets dir: {e}")))?;

    let safe_order: String = order_number
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    let short_id = &uuid::Uuid::new_v4().to_string()[..8];
    let path = dir.join(format!("barcode-sheet-{safe_order}-{stamp}-{short_id}.png"));

    fs::write(&path, &sheet.png_bytes)
        .map_err(|e| WorkbenchError::Internal(format!("write sheet: {e}")))?;
    info!(
        path = %path.display(),
        tiles = sheet.tile_count,
        skipped = sheet.skipped,
        "barcode sheet written"
    );
    Ok(path)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::encode_png_data_url;

    /// Tiny valid PNG to stand in for a rendered barcode.
    fn png_data_url(w: u32, h: u32) -> String {
        let img = image::DynamicImage::ImageLuma8(image::GrayImage::from_pixel(
            w,
            h,
            image::Luma([0]),
        ));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        encode_png_data_url(&bytes)
    }

    fn tile(caption: &str, data_url: String) -> SheetTile {
        SheetTile {
            caption: caption.into(),
            image_data_url: data_url,
        }
    }

    #[test]
    fn test_compose_sheet_lays_out_grid() {
        let tiles = vec![
            tile("Widget @ A-01", png_data_url(120, 60)),
            tile("Bolt @ B-07", png_data_url(120, 60)),
            tile("Nut", png_data_url(120, 60)),
        ];
        let layout = SheetLayout::default();
        let sheet = compose_sheet(&tiles, &layout).unwrap();

        assert_eq!(sheet.tile_count, 3);
        assert_eq!(sheet.skipped, 0);
        // 2 columns → 2 grid rows.
        let expected_width =
            layout.margin * 2 + layout.columns * layout.tile_width + (layout.columns - 1) * layout.gap;
        assert_eq!(sheet.width, expected_width);

        // Output decodes back as a PNG of the declared size.
        let decoded = image::load_from_memory(&sheet.png_bytes).unwrap();
        assert_eq!(decoded.width(), sheet.width);
        assert_eq!(decoded.height(), sheet.height);
    }

    #[test]
    fn test_compose_sheet_skips_bad_tiles() {
        let tiles = vec![
            tile("Good", png_data_url(100, 40)),
            tile("Bad", "data:image/png;base64,!!!".into()),
        ];
        let sheet = compose_sheet(&tiles, &SheetLayout::default()).unwrap();
        assert_eq!(sheet.tile_count, 1);
        assert_eq!(sheet.skipped, 1);
    }

    #[test]
    fn test_compose_sheet_rejects_empty_input() {
        let err = compose_sheet(&[], &SheetLayout::default()).unwrap_err();
        assert!(matches!(err, WorkbenchError::Validation(_)));

        let only_bad = vec![tile("Bad", "nope".into())];
        let err = compose_sheet(&only_bad, &SheetLayout::default()).unwrap_err();
        assert!(matches!(err, WorkbenchError::Validation(_)));
    }

    #[test]
    fn test_wide_images_are_scaled_to_tile_width() {
        let tiles = vec![tile("Wide", png_data_url(1200, 100))];
        let layout = SheetLayout::default();
        let sheet = compose_sheet(&tiles, &layout).unwrap();
        // The 1200px image must fit a 360px cell after scaling.
        assert_eq!(sheet.tile_count, 1);
        let decoded = image::load_from_memory(&sheet.png_bytes).unwrap();
        assert_eq!(decoded.width(), sheet.width);
    }

    #[test]
    fn test_tiles_from_rows_keeps_only_imaged_rows() {
        use crate::rows::LineItemRecord;

        let rows: Vec<OrderLineRow> = vec![
            LineItemRecord {
                id: "li-1".into(),
                order_number: "SO-100".into(),
                product_name: "Widget".into(),
                warehouse_location: Some("A-01".into()),
                barcode_generated: true,
                barcode_image: Some(png_data_url(10, 10)),
                ..Default::default()
            },
            LineItemRecord {
                id: "li-2".into(),
                order_number: "SO-100".into(),
                product_name: "Bolt".into(),
                ..Default::default()
            },
        ]
        .into_iter()
        .map(test_row)
        .collect();

        let tiles = tiles_from_rows(&rows);
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].caption, "Widget @ A-01");
    }

    fn test_row(rec: crate::rows::LineItemRecord) -> OrderLineRow {
        // Round-trip through the store mapping to get derived fields right.
        let store = crate::rows::RowStore::new();
        let ticket = store.select_order(Some("O-1".into())).unwrap().unwrap();
        store.finish_load(ticket, Ok(vec![rec]));
        store.rows().unwrap().remove(0)
    }

    #[test]
    fn test_draw_caption_stays_in_bounds() {
        let mut canvas = RgbaImage::from_pixel(64, 32, Rgba([255, 255, 255, 255]));
        // Long text must clip, not panic.
        draw_caption(&mut canvas, 0, 8, "A very long caption that overflows", 2);
        // Something was drawn.
        assert!(canvas.pixels().any(|p| p.0 == [0, 0, 0, 255]));
    }
}
