use crate::graph::{Bounds, Position};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

pub const ZOOM_MIN: f64 = 0.1;
pub const ZOOM_MAX: f64 = 10.0;
pub const ZOOM_PRESETS: [f64; 3] = [5.0, 3.0, 1.0];
const ZOOM_STEP: f64 = 1.25;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoomLevel {
    #[default]
    FitToScreen,
    Fixed(f64),
}

impl Display for ZoomLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FitToScreen => write!(f, "fit"),
            Self::Fixed(scale) => write!(f, "{scale:.2}x"),
        }
    }
}

/// Camera over the laid-out graph, in terminal cells.
///
/// `FitToScreen` is recomputed whenever the graph or the pane changes size.
/// Any numeric zoom the user picked is kept across recompiles.
#[derive(Debug, Clone)]
pub struct Viewport {
    zoom: ZoomLevel,
    scale: f64,
    origin_x: f64,
    origin_y: f64,
    width: u16,
    height: u16,
    bounds: Bounds,
}

impl Viewport {
    pub fn new(zoom: ZoomLevel) -> Self {
        let mut viewport = Self {
            zoom: ZoomLevel::FitToScreen,
            scale: 1.0,
            origin_x: 0.0,
            origin_y: 0.0,
            width: 0,
            height: 0,
            bounds: Bounds::default(),
        };
        viewport.set_zoom(zoom);
        viewport
    }

    pub fn zoom(&self) -> ZoomLevel {
        self.zoom
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    pub fn on_graph_changed(&mut self, bounds: Bounds) {
        self.bounds = bounds;
        if self.zoom == ZoomLevel::FitToScreen {
            self.fit();
        }
    }

    pub fn resize(&mut self, width: u16, height: u16) {
        if (width, height) == (self.width, self.height) {
            return;
        }
        self.width = width;
        self.height = height;
        if self.zoom == ZoomLevel::FitToScreen {
            self.fit();
        }
    }

    pub fn set_zoom(&mut self, zoom: ZoomLevel) {
        match zoom {
            ZoomLevel::FitToScreen => {
                self.zoom = ZoomLevel::FitToScreen;
                self.fit();
            }
            ZoomLevel::Fixed(scale) => {
                let scale = clamp_scale(scale);
                self.zoom = ZoomLevel::Fixed(scale);
                self.scale = scale;
            }
        }
    }

    pub fn zoom_in(&mut self) {
        self.zoom_by(ZOOM_STEP);
    }

    pub fn zoom_out(&mut self) {
        self.zoom_by(1.0 / ZOOM_STEP);
    }

    /// Multiplies the current scale, keeping the view center in place.
    pub fn zoom_by(&mut self, factor: f64) {
        if !factor.is_finite() || factor <= 0.0 {
            return;
        }
        let (center_x, center_y) = self.world_center();
        let scale = clamp_scale(self.scale * factor);
        self.zoom = ZoomLevel::Fixed(scale);
        self.scale = scale;
        self.look_at(center_x, center_y);
    }

    pub fn center_on(&mut self, position: Position) {
        self.look_at(position.x as f64, position.y as f64);
    }

    /// Pans by a number of screen cells.
    pub fn pan(&mut self, dx: i32, dy: i32) {
        self.origin_x += dx as f64 / self.scale;
        self.origin_y += dy as f64 / self.scale;
    }

    /// Screen cell of a world position, or `None` when it falls outside the pane.
    pub fn world_to_screen(&self, position: Position) -> Option<(u16, u16)> {
        let x = ((position.x as f64 - self.origin_x) * self.scale).round();
        let y = ((position.y as f64 - self.origin_y) * self.scale).round();
        let visible = x >= 0.0 && y >= 0.0 && x < self.width as f64 && y < self.height as f64;
        visible.then_some((x as u16, y as u16))
    }

    fn fit(&mut self) {
        self.origin_x = 0.0;
        self.origin_y = 0.0;
        if self.bounds.width <= 0 || self.bounds.height <= 0 || self.width == 0 || self.height == 0
        {
            self.scale = 1.0;
            return;
        }
        let horizontal = self.width as f64 / self.bounds.width as f64;
        let vertical = self.height as f64 / self.bounds.height as f64;
        // text does not grow with the scale, so fitting never magnifies
        self.scale = clamp_scale(horizontal.min(vertical).min(1.0));
    }

    fn world_center(&self) -> (f64, f64) {
        (
            self.origin_x + self.width as f64 / (2.0 * self.scale),
            self.origin_y + self.height as f64 / (2.0 * self.scale),
        )
    }

    fn look_at(&mut self, x: f64, y: f64) {
        self.origin_x = x - self.width as f64 / (2.0 * self.scale);
        self.origin_y = y - self.height as f64 / (2.0 * self.scale);
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(ZoomLevel::FitToScreen)
    }
}

fn clamp_scale(scale: f64) -> f64 {
    if scale.is_finite() {
        scale.clamp(ZOOM_MIN, ZOOM_MAX)
    } else {
        1.0
    }
}
