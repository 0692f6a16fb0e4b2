//! Text measurement collaborator.
//!
//! The canvas never rasterizes text; it only needs the pixel extents of a
//! label at a given font size to lay boxes and ports out. The host supplies
//! an implementation backed by its font system. [`FixedMetrics`] gives
//! deterministic sizes for tests and headless use.

/// Measures a string at a font size in points, returning `(width, height)`
/// in pixels.
///
/// Re-queried whenever the string or the canvas font size changes; results
/// for the same inputs must be stable within one update pass.
pub trait TextMeasure {
    fn measure(&self, text: &str, points: f64) -> (f64, f64);
}

/// Fixed-advance metrics: every character is `char_width_em` em wide and a
/// line is `line_height_em` em tall, with 1 em = the font size in points.
#[derive(Debug, Clone, Copy)]
pub struct FixedMetrics {
    pub char_width_em: f64,
    pub line_height_em: f64,
}

impl Default for FixedMetrics {
    fn default() -> Self {
        FixedMetrics {
            char_width_em: 0.6,
            line_height_em: 1.2,
        }
    }
}

impl TextMeasure for FixedMetrics {
    fn measure(&self, text: &str, points: f64) -> (f64, f64) {
        let chars = text.chars().count() as f64;
        (chars * self.char_width_em * points, self.line_height_em * points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_metrics_scale_with_font_size() {
        let m = FixedMetrics::default();
        let (w1, h1) = m.measure("abcd", 10.0);
        let (w2, h2) = m.measure("abcd", 20.0);
        assert_eq!(w2, w1 * 2.0);
        assert_eq!(h2, h1 * 2.0);
    }

    #[test]
    fn test_empty_string_has_zero_width() {
        let m = FixedMetrics::default();
        let (w, h) = m.measure("", 12.0);
        assert_eq!(w, 0.0);
        assert!(h > 0.0);
    }
}
