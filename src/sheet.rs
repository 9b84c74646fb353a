//! Print sheet layout
//!
//! Finished photos are tiled row-major onto a physical page, top-left first,
//! in PDF point space (origin bottom-left, 72 pt per inch). The layout is a
//! pure function of the item sizes and the sheet settings; rendering goes
//! through a [`PageEncoder`] so the geometry can be tested without a PDF.

use crate::{
    error::{IdPhotoError, Result},
    services::ImageCodec,
    types::Rgb,
};
use serde::{Deserialize, Serialize};
use std::io::BufWriter;

const POINTS_PER_INCH: f64 = 72.0;
const MM_PER_INCH: f64 = 25.4;
/// Slack for floating point comparisons in point space
const EPSILON: f64 = 1e-6;
/// Smallest printable item side
const MIN_ITEM_PT: f64 = 1.0;

/// Upper bound on the copies a single sheet holds
pub const MAX_PLACEMENTS: usize = 10_000;

pub const DEFAULT_DPI: f64 = 300.0;
pub const DEFAULT_MARGIN_MM: f64 = 5.0;

/// Cut guide stroke: light grey, half a point wide
pub const CUT_GUIDE: Stroke = Stroke {
    gray: 0.8,
    width_pt: 0.5,
};

/// Millimeters to points
#[must_use]
pub fn mm_to_pt(mm: f64) -> f64 {
    mm * POINTS_PER_INCH / MM_PER_INCH
}

/// Points to millimeters
#[must_use]
pub fn pt_to_mm(pt: f64) -> f64 {
    pt * MM_PER_INCH / POINTS_PER_INCH
}

/// Pixels at `dpi` to points
#[must_use]
pub fn px_to_pt(px: f64, dpi: f64) -> f64 {
    px / dpi * POINTS_PER_INCH
}

fn positive(value: f64) -> Option<f64> {
    (value.is_finite() && value > 0.0).then_some(value)
}

/// Known page sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SheetPreset {
    #[default]
    A4,
    Letter,
    #[serde(rename = "4x6")]
    FourBySix,
}

impl SheetPreset {
    /// Resolve a sheet type name; unknown names fall back to A4
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.trim() {
            "Letter" => Self::Letter,
            "4x6" => Self::FourBySix,
            "A4" => Self::A4,
            other => {
                tracing::debug!(sheet = other, "Unknown sheet type, using A4");
                Self::A4
            },
        }
    }

    /// Page size in millimeters (width, height)
    #[must_use]
    pub fn dimensions_mm(self) -> (f64, f64) {
        match self {
            Self::A4 => (210.0, 297.0),
            Self::Letter => (215.9, 279.4),
            Self::FourBySix => (101.6, 152.4),
        }
    }

    /// Page size in points (width, height)
    #[must_use]
    pub fn dimensions_pt(self) -> (f64, f64) {
        let (w, h) = self.dimensions_mm();
        (mm_to_pt(w), mm_to_pt(h))
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A4 => "A4",
            Self::Letter => "Letter",
            Self::FourBySix => "4x6",
        }
    }
}

/// Sheet-wide settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SheetOptions {
    pub preset: SheetPreset,
    /// Resolution used to convert pixel sizes to points
    pub dpi: f64,
    /// Page margin and gap between photos
    pub margin_mm: f64,
    pub cut_guides: bool,
    /// Repeat a single item to fill the page
    pub fill: bool,
}

impl Default for SheetOptions {
    fn default() -> Self {
        Self {
            preset: SheetPreset::A4,
            dpi: DEFAULT_DPI,
            margin_mm: DEFAULT_MARGIN_MM,
            cut_guides: true,
            fill: true,
        }
    }
}

impl SheetOptions {
    /// DPI, with non-positive values replaced by the default
    #[must_use]
    pub fn effective_dpi(&self) -> f64 {
        positive(self.dpi).unwrap_or(DEFAULT_DPI)
    }

    /// Margin in points, with non-positive values replaced by the default
    #[must_use]
    pub fn margin_pt(&self) -> f64 {
        mm_to_pt(positive(self.margin_mm).unwrap_or(DEFAULT_MARGIN_MM))
    }
}

/// One photo to place, with its declared size if any
#[derive(Debug, Clone)]
pub struct SheetItem {
    pub bytes: Vec<u8>,
    /// Declared pixel size, converted with the sheet DPI
    pub px_size: Option<(f64, f64)>,
    /// Declared physical size in millimeters
    pub mm_size: Option<(f64, f64)>,
}

impl SheetItem {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            px_size: None,
            mm_size: None,
        }
    }

    #[must_use]
    pub fn with_px_size(mut self, width: f64, height: f64) -> Self {
        self.px_size = Some((width, height));
        self
    }

    #[must_use]
    pub fn with_mm_size(mut self, width: f64, height: f64) -> Self {
        self.mm_size = Some((width, height));
        self
    }

    /// Size in points: declared pixels, then declared millimeters, then the
    /// decoded image's pixel size
    ///
    /// # Errors
    /// - `Geometry` when nothing is declared and the image size cannot be read
    pub fn size_pt(&self, dpi: f64) -> Result<(f64, f64)> {
        let declared = |size: Option<(f64, f64)>| {
            size.and_then(|(w, h)| Some((positive(w)?, positive(h)?)))
        };

        if let Some((w, h)) = declared(self.px_size) {
            return Ok((px_to_pt(w, dpi), px_to_pt(h, dpi)));
        }
        if let Some((w, h)) = declared(self.mm_size) {
            return Ok((mm_to_pt(w), mm_to_pt(h)));
        }

        let (w, h) = ImageCodec::probe_dimensions(&self.bytes)
            .map_err(|e| IdPhotoError::geometry(format!("Cannot infer image size: {}", e)))?;
        Ok((px_to_pt(f64::from(w), dpi), px_to_pt(f64::from(h), dpi)))
    }
}

/// Axis-aligned rectangle in points, anchored at its bottom-left corner
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PtRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PtRect {
    #[must_use]
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    #[must_use]
    pub fn top(&self) -> f64 {
        self.y + self.height
    }

    /// Interiors intersect; shared edges do not count
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.x < other.right() - EPSILON
            && other.x < self.right() - EPSILON
            && self.y < other.top() - EPSILON
            && other.y < self.top() - EPSILON
    }
}

/// A placed photo; `item` indexes the resolved item list
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SheetPlacement {
    pub item: usize,
    pub rect: PtRect,
}

/// Page geometry with its placements in drawing order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetLayout {
    pub page_width_pt: f64,
    pub page_height_pt: f64,
    pub margin_pt: f64,
    pub placements: Vec<SheetPlacement>,
}

impl SheetLayout {
    /// Rectangle inset by the margin on every side
    #[must_use]
    pub fn printable_area(&self) -> PtRect {
        PtRect {
            x: self.margin_pt,
            y: self.margin_pt,
            width: self.page_width_pt - 2.0 * self.margin_pt,
            height: self.page_height_pt - 2.0 * self.margin_pt,
        }
    }

    /// Every placement lies inside the printable area
    #[must_use]
    pub fn within_margins(&self) -> bool {
        let area = self.printable_area();
        self.placements.iter().all(|p| {
            p.rect.x >= area.x - EPSILON
                && p.rect.y >= area.y - EPSILON
                && p.rect.right() <= area.right() + EPSILON
                && p.rect.top() <= area.top() + EPSILON
        })
    }

    /// No two placements overlap
    #[must_use]
    pub fn is_disjoint(&self) -> bool {
        self.placements.iter().enumerate().all(|(i, a)| {
            self.placements
                .iter()
                .skip(i + 1)
                .all(|b| !a.rect.overlaps(&b.rect))
        })
    }
}

/// Repeat grid for a single item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillGrid {
    pub cols: usize,
    pub rows: usize,
}

impl FillGrid {
    /// `cols = floor((pageW - margin) / (itemW + margin))`, rows likewise, each at least one
    ///
    /// Counted with the same absolute slack the layout uses for its edge
    /// checks, so every cell of the grid lands inside the margins. Each
    /// axis is capped at [`MAX_PLACEMENTS`].
    #[must_use]
    pub fn compute(page: (f64, f64), margin_pt: f64, item: (f64, f64)) -> Self {
        let count = |page_dim: f64, item_dim: f64| {
            // cell k ends at margin + k * (item + margin) + item
            let extra = ((page_dim - 2.0 * margin_pt - item_dim + EPSILON) / (item_dim + margin_pt)).floor();
            let n = extra + 1.0;
            if n.is_finite() && n >= 1.0 {
                n.min(MAX_PLACEMENTS as f64) as usize
            } else {
                1
            }
        };
        Self {
            cols: count(page.0, item.0),
            rows: count(page.1, item.1),
        }
    }

    /// Number of copies placed, never above [`MAX_PLACEMENTS`]
    #[must_use]
    pub fn len(&self) -> usize {
        self.cols
            .checked_mul(self.rows)
            .map_or(MAX_PLACEMENTS, |n| n.min(MAX_PLACEMENTS))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(row, col)` of each placed copy, row-major
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize)> {
        let cols = self.cols;
        (0..self.rows)
            .flat_map(move |row| (0..cols).map(move |col| (row, col)))
            .take(self.len())
    }
}

/// Stroke style for outlines
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stroke {
    /// Grey level in `[0, 1]`
    pub gray: f32,
    pub width_pt: f32,
}

/// Page/document encoder capability
pub trait PageEncoder {
    /// Start the single page of the document
    fn begin_page(&mut self, width_pt: f64, height_pt: f64) -> Result<()>;

    /// Decode and keep an image for later drawing, returning its handle
    fn register_image(&mut self, bytes: &[u8]) -> Result<usize>;

    /// Draw a registered image stretched into `rect`
    fn draw_image(&mut self, image: usize, rect: PtRect) -> Result<()>;

    /// Stroke the outline of `rect`
    fn stroke_rect(&mut self, rect: PtRect, stroke: Stroke) -> Result<()>;

    /// Serialize the document
    fn finish(self) -> Result<Vec<u8>>
    where
        Self: Sized;
}

/// Rendered sheet and the layout it was drawn from
#[derive(Debug, Clone)]
pub struct RenderedSheet {
    pub bytes: Vec<u8>,
    pub layout: SheetLayout,
}

/// Sheet tiling engine
#[derive(Debug, Clone, Copy, Default)]
pub struct SheetLayoutEngine;

impl SheetLayoutEngine {
    /// Place items of the given point sizes onto the page
    ///
    /// Items are placed left to right and wrap below the tallest photo of
    /// the current row. Items larger than the printable area or smaller than
    /// one point are skipped and placement stops once the next row would
    /// cross the bottom margin or [`MAX_PLACEMENTS`] copies are on the page.
    ///
    /// # Errors
    /// - `Geometry` when no item could be placed
    pub fn layout(sizes: &[(f64, f64)], options: &SheetOptions) -> Result<SheetLayout> {
        let (page_w, page_h) = options.preset.dimensions_pt();
        let margin = options.margin_pt();
        let mut layout = SheetLayout {
            page_width_pt: page_w,
            page_height_pt: page_h,
            margin_pt: margin,
            placements: Vec::new(),
        };
        let area = layout.printable_area();
        let fits = |w: f64, h: f64| {
            w >= MIN_ITEM_PT && h >= MIN_ITEM_PT && w <= area.width + EPSILON && h <= area.height + EPSILON
        };

        match sizes {
            [(w, h)] if options.fill => {
                let (w, h) = (*w, *h);
                if fits(w, h) {
                    let grid = FillGrid::compute((page_w, page_h), margin, (w, h));
                    tracing::debug!(cols = grid.cols, rows = grid.rows, "Filling sheet with a single item");
                    let top = page_h - margin;
                    layout.placements.extend(grid.cells().map(|(row, col)| SheetPlacement {
                        item: 0,
                        rect: PtRect {
                            x: margin + col as f64 * (w + margin),
                            y: top - h - row as f64 * (h + margin),
                            width: w,
                            height: h,
                        },
                    }));
                } else {
                    tracing::warn!(width_pt = w, height_pt = h, "Item does not fit the printable area, skipping");
                }
            },
            _ => {
                let max_x = page_w - margin;
                let mut x = margin;
                let mut row_top = page_h - margin;
                let mut row_height = 0.0_f64;

                for (index, &(w, h)) in sizes.iter().enumerate() {
                    if layout.placements.len() >= MAX_PLACEMENTS {
                        break;
                    }
                    if !fits(w, h) {
                        tracing::warn!(item = index, width_pt = w, height_pt = h, "Item does not fit the printable area, skipping");
                        continue;
                    }

                    if x + w > max_x + EPSILON {
                        x = margin;
                        row_top -= row_height + margin;
                        row_height = 0.0;
                    }
                    if row_top - h < margin - EPSILON {
                        break;
                    }

                    layout.placements.push(SheetPlacement {
                        item: index,
                        rect: PtRect {
                            x,
                            y: row_top - h,
                            width: w,
                            height: h,
                        },
                    });
                    x += w + margin;
                    row_height = row_height.max(h);
                }
            },
        }

        if layout.placements.is_empty() {
            return Err(IdPhotoError::geometry("No item fits on the sheet"));
        }
        Ok(layout)
    }

    /// Resolve item sizes, lay them out and draw the page
    ///
    /// # Errors
    /// - `Input` when there are no items or an item cannot be decoded
    /// - `Geometry` when an item size cannot be inferred or nothing fits
    /// - `Encode` when the document cannot be serialized
    #[tracing::instrument(skip_all, fields(items = items.len(), sheet = options.preset.as_str()))]
    pub fn render<E: PageEncoder>(
        items: &[SheetItem],
        options: &SheetOptions,
        mut encoder: E,
    ) -> Result<RenderedSheet> {
        if items.is_empty() {
            return Err(IdPhotoError::input("No valid items"));
        }
        let dpi = options.effective_dpi();
        let sizes = items
            .iter()
            .map(|item| item.size_pt(dpi))
            .collect::<Result<Vec<_>>>()?;
        let layout = Self::layout(&sizes, options)?;

        encoder.begin_page(layout.page_width_pt, layout.page_height_pt)?;

        let mut handles: Vec<Option<usize>> = vec![None; items.len()];
        for placement in &layout.placements {
            let (Some(slot), Some(item)) =
                (handles.get_mut(placement.item), items.get(placement.item))
            else {
                continue;
            };
            let handle = match slot {
                Some(handle) => *handle,
                None => {
                    let handle = encoder.register_image(&item.bytes)?;
                    *slot = Some(handle);
                    handle
                },
            };
            encoder.draw_image(handle, placement.rect)?;
        }

        if options.cut_guides {
            encoder.stroke_rect(layout.printable_area(), CUT_GUIDE)?;
        }

        let bytes = encoder.finish()?;
        tracing::info!(
            placements = layout.placements.len(),
            bytes = bytes.len(),
            "Rendered print sheet"
        );
        Ok(RenderedSheet { bytes, layout })
    }

    /// Render to PDF
    pub fn render_pdf(items: &[SheetItem], options: &SheetOptions) -> Result<RenderedSheet> {
        Self::render(items, options, PdfPageEncoder::new("ID photo sheet"))
    }
}

struct PdfPage {
    doc: printpdf::PdfDocumentReference,
    layer: printpdf::PdfLayerReference,
}

/// [`PageEncoder`] producing a single-page PDF
///
/// Images are flattened onto white before embedding.
pub struct PdfPageEncoder {
    title: String,
    page: Option<PdfPage>,
    images: Vec<printpdf::image_crate::DynamicImage>,
}

impl PdfPageEncoder {
    #[must_use]
    pub fn new<S: Into<String>>(title: S) -> Self {
        Self {
            title: title.into(),
            page: None,
            images: Vec::new(),
        }
    }

    fn page(&self) -> Result<&PdfPage> {
        self.page
            .as_ref()
            .ok_or_else(|| IdPhotoError::internal("PDF page has not been started"))
    }

    fn mm(pt: f64) -> printpdf::Mm {
        printpdf::Mm(pt_to_mm(pt) as f32)
    }
}

impl PageEncoder for PdfPageEncoder {
    fn begin_page(&mut self, width_pt: f64, height_pt: f64) -> Result<()> {
        let (doc, page, layer) = printpdf::PdfDocument::new(
            self.title.as_str(),
            Self::mm(width_pt),
            Self::mm(height_pt),
            "Layer 1",
        );
        let layer = doc.get_page(page).get_layer(layer);
        self.page = Some(PdfPage { doc, layer });
        Ok(())
    }

    fn register_image(&mut self, bytes: &[u8]) -> Result<usize> {
        let decoded = ImageCodec::decode(bytes)?;
        let flat = image::DynamicImage::ImageRgb8(ImageCodec::flatten(decoded.image(), Rgb::WHITE));
        let png = ImageCodec::encode_png(&flat)?;
        let embedded = printpdf::image_crate::load_from_memory(&png)
            .map_err(|e| IdPhotoError::encode(format!("Failed to prepare image for PDF: {}", e)))?;
        self.images.push(embedded);
        Ok(self.images.len() - 1)
    }

    fn draw_image(&mut self, image: usize, rect: PtRect) -> Result<()> {
        let source = self
            .images
            .get(image)
            .ok_or_else(|| IdPhotoError::internal(format!("Unknown image handle {}", image)))?;
        let (px_w, px_h) = (source.width().max(1), source.height().max(1));
        let layer = self.page()?.layer.clone();

        // At 72 dpi one pixel is one point
        let transform = printpdf::ImageTransform {
            translate_x: Some(Self::mm(rect.x)),
            translate_y: Some(Self::mm(rect.y)),
            rotate: None,
            scale_x: Some((rect.width / f64::from(px_w)) as f32),
            scale_y: Some((rect.height / f64::from(px_h)) as f32),
            dpi: Some(POINTS_PER_INCH as f32),
        };
        printpdf::Image::from_dynamic_image(source).add_to_layer(layer, transform);
        Ok(())
    }

    fn stroke_rect(&mut self, rect: PtRect, stroke: Stroke) -> Result<()> {
        use printpdf::{Color, Line, Point};

        let layer = &self.page()?.layer;
        let corner = |x: f64, y: f64| (Point::new(Self::mm(x), Self::mm(y)), false);
        let outline = Line {
            points: vec![
                corner(rect.x, rect.y),
                corner(rect.right(), rect.y),
                corner(rect.right(), rect.top()),
                corner(rect.x, rect.top()),
            ],
            is_closed: true,
        };
        layer.set_outline_color(Color::Rgb(printpdf::Rgb::new(
            stroke.gray,
            stroke.gray,
            stroke.gray,
            None,
        )));
        layer.set_outline_thickness(stroke.width_pt);
        layer.add_line(outline);
        Ok(())
    }

    fn finish(self) -> Result<Vec<u8>> {
        let page = self
            .page
            .ok_or_else(|| IdPhotoError::internal("PDF page has not been started"))?;
        let mut buffer = Vec::new();
        {
            let mut writer = BufWriter::new(&mut buffer);
            page.doc
                .save(&mut writer)
                .map_err(|e| IdPhotoError::encode(format!("Failed to write PDF: {}", e)))?;
        }
        Ok(buffer)
    }
}
