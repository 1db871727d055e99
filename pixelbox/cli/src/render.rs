//! Terminal rendering for snapshots
//!
//! The raster is drawn with upper-half blocks: each character cell carries
//! two vertically stacked pixels (foreground = top, background = bottom).

use std::io::{self, Write};

use crossterm::style::{Color, PrintStyledContent, ResetColor, Stylize};
use crossterm::{queue, style::Print};

use pixelbox_core::{DisplayedImage, ParameterPanel, RasterSurface, StatusPanel, SyncEvent};

const HALF_BLOCK: char = '\u{2580}';

/// One character cell: a top and a bottom pixel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cell {
    pub top: [u8; 3],
    pub bottom: [u8; 3],
}

/// Fully transparent pixels render as black, everything else drops alpha
fn rgb(pixel: [u8; 4]) -> [u8; 3] {
    if pixel[3] == 0 {
        [0, 0, 0]
    } else {
        [pixel[0], pixel[1], pixel[2]]
    }
}

/// Sample the surface into rows of cells at most `max_width` wide
pub fn cells(surface: &RasterSurface, max_width: u32) -> Vec<Vec<Cell>> {
    let (width, height) = (surface.width(), surface.height());
    if width == 0 || height == 0 || max_width == 0 {
        return Vec::new();
    }
    let step = width.div_ceil(max_width).max(1);

    let sample = |x: u32, y: u32| surface.pixel(x, y).map_or([0, 0, 0], rgb);

    (0..height)
        .step_by((step * 2) as usize)
        .map(|y| {
            (0..width)
                .step_by(step as usize)
                .map(|x| Cell {
                    top: sample(x, y),
                    bottom: sample(x, y + step),
                })
                .collect()
        })
        .collect()
}

fn color([r, g, b]: [u8; 3]) -> Color {
    Color::Rgb { r, g, b }
}

/// Draw the displayed image, or a note when there is none
pub fn write_displayed<W: Write>(out: &mut W, displayed: &DisplayedImage, max_width: u32) -> io::Result<()> {
    let Some(surface) = displayed.surface() else {
        writeln!(out, "No image displayed.")?;
        return Ok(());
    };

    for row in cells(surface, max_width) {
        for cell in row {
            queue!(
                out,
                PrintStyledContent(HALF_BLOCK.with(color(cell.top)).on(color(cell.bottom)))
            )?;
        }
        queue!(out, ResetColor, Print("\n"))?;
    }
    writeln!(
        out,
        "{}x{} (t={})",
        surface.width(),
        surface.height(),
        surface.token()
    )?;
    out.flush()
}

/// Status panel as label/value lines
pub fn status_lines(panel: &StatusPanel) -> Vec<String> {
    vec![
        format!("Total size:     {}", panel.total_size_label()),
        format!("Allocated size: {}", panel.allocated_size_label()),
        format!("Free heap:      {}", panel.free_heap_label()),
    ]
}

/// Parameter labels that have been set
pub fn parameter_lines(panel: &ParameterPanel) -> Vec<String> {
    panel
        .brightness_label()
        .into_iter()
        .chain(panel.max_current_label())
        .collect()
}

/// One-line summary of an event for `watch`
pub fn describe_event(event: &SyncEvent) -> String {
    match event {
        SyncEvent::GalleryUpdated(view) if view.is_placeholder() => "gallery: No images.".to_string(),
        SyncEvent::GalleryUpdated(view) => {
            let names: Vec<&str> = view.rows().iter().map(|r| r.name.as_str()).collect();
            format!("gallery: {}", names.join(", "))
        }
        SyncEvent::DisplayUpdated(displayed) => match displayed.surface() {
            Some(surface) => format!("display: {}x{}", surface.width(), surface.height()),
            None => "display: none".to_string(),
        },
        SyncEvent::StatusUpdated(panel) => format!(
            "status: {} total, {} allocated, {} free heap",
            panel.total_size_label(),
            panel.allocated_size_label(),
            panel.free_heap_label()
        ),
        SyncEvent::ParametersUpdated(panel) => {
            format!("parameters: {}", parameter_lines(panel).join(", "))
        }
        SyncEvent::RefreshFailed { component, error } => {
            format!("{component} refresh failed: {error}")
        }
        SyncEvent::MutationFailed { mutation, error } => format!("{mutation} failed: {error}"),
        SyncEvent::StateChanged(state) => format!("loop: {state}"),
    }
}
