use crate::config::AspectRatio;

/// Ticks-per-second of the 100-ns clock that `pts`/`duration` are expressed
/// in throughout the pipeline (video, audio, and the container muxers all
/// share it).
pub const TIME_UNIT_100NS: i64 = 10_000_000;

/// Computes the centered crop rectangle that fits `aspect` inside a
/// `width x height` source, rounding dimensions down to the nearest even
/// number (required by 4:2:0 chroma subsampling). Returns
/// `(crop_width, crop_height, x_offset, y_offset)`.
///
/// `AspectRatio::Native` is a no-op crop (the full surface, evened).
pub fn fit_crop(width: u32, height: u32, aspect: AspectRatio) -> (u32, u32, u32, u32) {
    let (num, den) = match aspect {
        AspectRatio::Native => (width, height),
        AspectRatio::R16x9 => (16, 9),
        AspectRatio::R9x16 => (9, 16),
        AspectRatio::R1x1 => (1, 1),
        AspectRatio::R4x5 => (4, 5),
        AspectRatio::R16x10 => (16, 10),
        AspectRatio::R4x3 => (4, 3),
        AspectRatio::R21x9 => (21, 9),
        AspectRatio::R32x9 => (32, 9),
    };

    // Fit the target aspect ratio inside the source, then center it.
    let by_width = (width, (width as u64 * den as u64 / num as u64) as u32);
    let (crop_w, crop_h) = if by_width.1 <= height {
        by_width
    } else {
        ((height as u64 * num as u64 / den as u64) as u32, height)
    };

    let crop_w = even_floor(crop_w.min(width));
    let crop_h = even_floor(crop_h.min(height));
    let x = even_floor((width - crop_w) / 2);
    let y = even_floor((height - crop_h) / 2);

    (crop_w, crop_h, x, y)
}

fn even_floor(v: u32) -> u32 {
    v & !1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_aspect_keeps_full_even_surface() {
        let (w, h, x, y) = fit_crop(1920, 1080, AspectRatio::Native);
        assert_eq!((w, h, x, y), (1920, 1080, 0, 0));
    }

    #[test]
    fn portrait_crop_centers_and_evens_out() {
        let (w, h, x, y) = fit_crop(1920, 1080, AspectRatio::R9x16);
        // 1080 tall * 9/16 = 607.5 -> evened to 606, centered horizontally.
        assert_eq!(h, 1080);
        assert_eq!(w, 606);
        assert_eq!(y, 0);
        assert_eq!(x, (1920 - 606) / 2 & !1);
    }

    #[test]
    fn square_crop_from_odd_dimensions_stays_even() {
        let (w, h, _, _) = fit_crop(1921, 1081, AspectRatio::R1x1);
        assert_eq!(w % 2, 0);
        assert_eq!(h % 2, 0);
        assert_eq!(w, h);
    }
}
