use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use image::{imageops, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Largest side a raster surface grows to when painted.
pub const MAX_SURFACE_SIDE: u32 = 1 << 15;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct CelId(pub Uuid);

impl CelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical pixel bounds of a surface. Serialized as `[x, y, w, h]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[i64; 4]", into = "[i64; 4]")]
pub struct Extent {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        (x as i64) >= self.x as i64
            && (x as i64) < self.right()
            && (y as i64) >= self.y as i64
            && (y as i64) < self.bottom()
    }

    /// Smallest extent covering `self` and the pixel at (`x`, `y`).
    pub fn including(&self, x: i32, y: i32) -> Extent {
        if self.is_empty() {
            return Extent::new(x, y, 1, 1);
        }
        let left = self.x.min(x);
        let top = self.y.min(y);
        let right = self.right().max(x as i64 + 1);
        let bottom = self.bottom().max(y as i64 + 1);
        let span = |from: i32, to: i64| u32::try_from(to - from as i64).unwrap_or(u32::MAX);
        Extent::new(left, top, span(left, right), span(top, bottom))
    }
}

impl TryFrom<[i64; 4]> for Extent {
    type Error = String;

    fn try_from([x, y, w, h]: [i64; 4]) -> Result<Self, Self::Error> {
        let coord = |v: i64| i32::try_from(v).map_err(|_| format!("extent origin {v} out of range"));
        let size = |v: i64| u32::try_from(v).map_err(|_| format!("extent size {v} out of range"));
        Ok(Extent::new(coord(x)?, coord(y)?, size(w)?, size(h)?))
    }
}

impl From<Extent> for [i64; 4] {
    fn from(e: Extent) -> Self {
        [e.x as i64, e.y as i64, e.width as i64, e.height as i64]
    }
}

/// Native drawing surface behind a cel.
///
/// Writes made between `begin_atomic` and `end_atomic` are observed by the
/// renderer as one batch.
pub trait Surface {
    fn extent(&self) -> Extent;
    fn set_extent(&mut self, extent: Extent);
    fn begin_atomic(&mut self);
    fn end_atomic(&mut self);
    fn put_pixel(&mut self, x: i32, y: i32, color: Rgba<u8>);
    fn clear(&mut self);
    /// Pixels covering [`Surface::extent`].
    fn read_pixels(&self) -> RgbaImage;
    fn write_pixels(&mut self, extent: Extent, pixels: &RgbaImage);
}

pub trait SurfaceFactory {
    fn create_surface(&self) -> Box<dyn Surface>;
}

/// In-memory RGBA surface that grows to cover whatever is painted on it.
#[derive(Debug, Clone)]
pub struct RasterSurface {
    extent: Extent,
    pixels: RgbaImage,
    atomic_depth: u32,
    pending: bool,
    revision: u64,
}

impl Default for RasterSurface {
    fn default() -> Self {
        Self {
            extent: Extent::default(),
            pixels: RgbaImage::new(0, 0),
            atomic_depth: 0,
            pending: false,
            revision: 0,
        }
    }
}

impl RasterSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count of committed write batches.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn in_atomic(&self) -> bool {
        self.atomic_depth > 0
    }

    pub fn pixel(&self, x: i32, y: i32) -> Option<Rgba<u8>> {
        if !self.extent.contains(x, y) {
            return None;
        }
        let px = (x as i64 - self.extent.x as i64) as u32;
        let py = (y as i64 - self.extent.y as i64) as u32;
        Some(*self.pixels.get_pixel(px, py))
    }

    fn touch(&mut self) {
        if self.atomic_depth > 0 {
            self.pending = true;
        } else {
            self.revision += 1;
        }
    }

    fn reshape(&mut self, extent: Extent) {
        let mut pixels = RgbaImage::new(extent.width, extent.height);
        imageops::replace(
            &mut pixels,
            &self.pixels,
            self.extent.x as i64 - extent.x as i64,
            self.extent.y as i64 - extent.y as i64,
        );
        self.pixels = pixels;
        self.extent = extent;
    }
}

impl Surface for RasterSurface {
    fn extent(&self) -> Extent {
        self.extent
    }

    fn set_extent(&mut self, extent: Extent) {
        self.reshape(extent);
        self.touch();
    }

    fn begin_atomic(&mut self) {
        self.atomic_depth += 1;
    }

    fn end_atomic(&mut self) {
        if self.atomic_depth == 0 {
            return;
        }
        self.atomic_depth -= 1;
        if self.atomic_depth == 0 && self.pending {
            self.pending = false;
            self.revision += 1;
        }
    }

    fn put_pixel(&mut self, x: i32, y: i32, color: Rgba<u8>) {
        if !self.extent.contains(x, y) {
            let grown = self.extent.including(x, y);
            if !grown.contains(x, y)
                || grown.width > MAX_SURFACE_SIDE
                || grown.height > MAX_SURFACE_SIDE
            {
                warn!(x, y, extent = ?self.extent, "paint outside the drawable area dropped");
                return;
            }
            self.reshape(grown);
        }
        let px = (x as i64 - self.extent.x as i64) as u32;
        let py = (y as i64 - self.extent.y as i64) as u32;
        self.pixels.put_pixel(px, py, color);
        self.touch();
    }

    fn clear(&mut self) {
        self.extent = Extent::default();
        self.pixels = RgbaImage::new(0, 0);
        self.touch();
    }

    fn read_pixels(&self) -> RgbaImage {
        self.pixels.clone()
    }

    fn write_pixels(&mut self, extent: Extent, pixels: &RgbaImage) {
        self.extent = extent;
        self.pixels = RgbaImage::new(extent.width, extent.height);
        imageops::replace(&mut self.pixels, pixels, 0, 0);
        self.touch();
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RasterSurfaceFactory;

impl SurfaceFactory for RasterSurfaceFactory {
    fn create_surface(&self) -> Box<dyn Surface> {
        Box::new(RasterSurface::new())
    }
}

struct CelInner {
    id: CelId,
    surface: RefCell<Box<dyn Surface>>,
}

/// Shared handle to one drawable unit. Equality is identity.
#[derive(Clone)]
pub struct Cel {
    inner: Rc<CelInner>,
}

impl Cel {
    pub fn new(surface: Box<dyn Surface>) -> Self {
        Self {
            inner: Rc::new(CelInner {
                id: CelId::new(),
                surface: RefCell::new(surface),
            }),
        }
    }

    pub fn id(&self) -> CelId {
        self.inner.id
    }

    pub fn extent(&self) -> Extent {
        self.inner.surface.borrow().extent()
    }

    pub fn set_extent(&self, extent: Extent) {
        self.inner.surface.borrow_mut().set_extent(extent);
    }

    pub fn surface(&self) -> Ref<'_, dyn Surface> {
        Ref::map(self.inner.surface.borrow(), |s| s.as_ref())
    }

    /// Opens a write batch that is committed when the guard drops.
    pub fn begin_atomic(&self) -> AtomicWrite<'_> {
        let mut surface = self.inner.surface.borrow_mut();
        surface.begin_atomic();
        AtomicWrite { surface }
    }
}

impl PartialEq for Cel {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Cel {}

impl fmt::Debug for Cel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cel").field("id", &self.inner.id).finish()
    }
}

pub struct AtomicWrite<'a> {
    surface: RefMut<'a, Box<dyn Surface>>,
}

impl Deref for AtomicWrite<'_> {
    type Target = dyn Surface;

    fn deref(&self) -> &Self::Target {
        self.surface.as_ref()
    }
}

impl DerefMut for AtomicWrite<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.surface.as_mut()
    }
}

impl Drop for AtomicWrite<'_> {
    fn drop(&mut self) {
        self.surface.end_atomic();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    #[test]
    fn test_surface_grows_to_cover_paint() {
        let mut surface = RasterSurface::new();
        surface.put_pixel(5, 5, BLACK);
        assert_eq!(surface.extent(), Extent::new(5, 5, 1, 1));

        surface.put_pixel(-2, 8, BLACK);
        assert_eq!(surface.extent(), Extent::new(-2, 5, 8, 4));
        assert_eq!(surface.pixel(5, 5), Some(BLACK));
        assert_eq!(surface.pixel(-2, 8), Some(BLACK));
        assert_eq!(surface.pixel(0, 5), Some(Rgba([0, 0, 0, 0])));
        assert_eq!(surface.pixel(100, 100), None);
    }

    #[test]
    fn test_including_saturates_at_axis_limits() {
        let wide = Extent::new(i32::MIN, 0, u32::MAX, 1).including(i32::MAX, 0);
        assert_eq!(wide.x, i32::MIN);
        assert_eq!(wide.width, u32::MAX);
        assert!(wide.contains(i32::MAX - 1, 0));
        assert!(!wide.contains(i32::MAX, 0));

        let tall = Extent::new(0, 10, 1, 1).including(0, i32::MIN);
        assert_eq!(tall.y, i32::MIN);
        assert_eq!(tall.bottom(), 11);
    }

    #[test]
    fn test_far_paint_is_dropped() {
        let mut surface = RasterSurface::new();
        surface.put_pixel(0, 0, BLACK);
        let revision = surface.revision();

        surface.put_pixel(i32::MAX, 0, BLACK);
        surface.put_pixel(0, i32::MIN, BLACK);
        surface.put_pixel(MAX_SURFACE_SIDE as i32, 0, BLACK);

        assert_eq!(surface.extent(), Extent::new(0, 0, 1, 1));
        assert_eq!(surface.revision(), revision);
        assert_eq!(surface.pixel(0, 0), Some(BLACK));

        surface.put_pixel(MAX_SURFACE_SIDE as i32 - 1, 0, BLACK);
        assert_eq!(surface.extent().width, MAX_SURFACE_SIDE);
    }

    #[test]
    fn test_atomic_batch_commits_once() {
        let cel = Cel::new(Box::new(RasterSurface::new()));
        {
            let mut batch = cel.begin_atomic();
            batch.put_pixel(0, 0, BLACK);
            batch.put_pixel(1, 0, BLACK);
            batch.put_pixel(2, 0, BLACK);
        }
        assert_eq!(cel.extent(), Extent::new(0, 0, 3, 1));

        let mut plain = RasterSurface::new();
        plain.begin_atomic();
        plain.put_pixel(0, 0, BLACK);
        plain.put_pixel(1, 0, BLACK);
        assert_eq!(plain.revision(), 0);
        plain.end_atomic();
        assert_eq!(plain.revision(), 1);
        assert!(!plain.in_atomic());
    }

    #[test]
    fn test_cel_identity() {
        let a = Cel::new(Box::new(RasterSurface::new()));
        let b = Cel::new(Box::new(RasterSurface::new()));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_extent_array_conversion() {
        let extent = Extent::new(-3, 4, 10, 20);
        let raw: [i64; 4] = extent.into();
        assert_eq!(raw, [-3, 4, 10, 20]);
        assert_eq!(Extent::try_from(raw), Ok(extent));
        assert!(Extent::try_from([0, 0, -1, 5]).is_err());
    }

    #[test]
    fn test_write_pixels_replaces_contents() {
        let mut surface = RasterSurface::new();
        let mut image = RgbaImage::new(2, 2);
        image.put_pixel(1, 1, BLACK);
        surface.write_pixels(Extent::new(10, 10, 2, 2), &image);
        assert_eq!(surface.pixel(11, 11), Some(BLACK));
        assert_eq!(surface.read_pixels(), image);

        surface.clear();
        assert!(surface.extent().is_empty());
    }
}
