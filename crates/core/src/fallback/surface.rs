use crate::render::PixelSize;

/// RGBA pixel grid that mirrors the canvas backing buffer.
#[derive(Debug, Clone, Default)]
pub struct PixelSurface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl PixelSurface {
    pub fn new(size: PixelSize) -> Self {
        let mut surface = Self::default();
        surface.resize(size);
        surface
    }

    pub fn size(&self) -> PixelSize {
        PixelSize::new(self.width, self.height)
    }

    /// Reallocates when the size changed. Contents are cleared either way.
    pub fn resize(&mut self, size: PixelSize) {
        self.width = size.width;
        self.height = size.height;
        self.pixels = vec![0; size.width as usize * size.height as usize * 4];
    }

    pub fn as_rgba(&self) -> &[u8] {
        &self.pixels
    }

    pub fn fill(&mut self, color: [u8; 4]) {
        for pixel in self.pixels.chunks_exact_mut(4) {
            pixel.copy_from_slice(&color);
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let mut out = [0; 4];
        out.copy_from_slice(&self.pixels[offset..offset + 4]);
        Some(out)
    }

    /// Draws a square brush centred on (`x`, `y`); out-of-bounds parts are clipped.
    fn stamp(&mut self, x: i64, y: i64, half: i64, color: [u8; 4]) {
        for dy in -half..=half {
            for dx in -half..=half {
                let (px, py) = (x + dx, y + dy);
                if px < 0 || py < 0 || px >= self.width as i64 || py >= self.height as i64 {
                    continue;
                }
                let offset = (py as usize * self.width as usize + px as usize) * 4;
                self.pixels[offset..offset + 4].copy_from_slice(&color);
            }
        }
    }

    /// Bresenham line with a square brush of `width` pixels.
    pub fn draw_line(&mut self, from: (f32, f32), to: (f32, f32), width: u32, color: [u8; 4]) {
        let half = (width.max(1) as i64 - 1) / 2;
        let (mut x0, mut y0) = (from.0.round() as i64, from.1.round() as i64);
        let (x1, y1) = (to.0.round() as i64, to.1.round() as i64);
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;

        loop {
            self.stamp(x0, y0, half, color);
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }
}
