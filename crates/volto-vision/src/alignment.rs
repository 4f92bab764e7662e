//! Five-point face alignment onto the 112×112 recognition template.
//!
//! The similarity transform (scale, rotation, translation) is solved in
//! closed form from centred point sets, then the RGB source is resampled
//! bilinearly through its inverse.

use image::{Rgb, RgbImage};
use volto_core::Point;

pub const ALIGNED_SIZE: u32 = 112;

/// Landmark positions the recognition model was trained on.
const TEMPLATE: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// `dst = [a -b; b a] * src + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    /// Least-squares fit mapping `src` onto `dst`. `None` if `src` is a single point.
    pub fn estimate(src: &[Point; 5], dst: &[Point; 5]) -> Option<Self> {
        let centroid = |pts: &[Point; 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(x, y), p| (x + p.x, y + p.y));
            Point::new(sx / 5.0, sy / 5.0)
        };
        let sc = centroid(src);
        let dc = centroid(dst);

        let (mut dot, mut cross, mut norm) = (0.0f32, 0.0f32, 0.0f32);
        for (s, d) in src.iter().zip(dst) {
            let (sx, sy) = (s.x - sc.x, s.y - sc.y);
            let (dx, dy) = (d.x - dc.x, d.y - dc.y);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            norm += sx * sx + sy * sy;
        }
        if norm < 1e-6 {
            return None;
        }

        let a = dot / norm;
        let b = cross / norm;
        Some(Self {
            a,
            b,
            tx: dc.x - (a * sc.x - b * sc.y),
            ty: dc.y - (b * sc.x + a * sc.y),
        })
    }

    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            self.a * p.x - self.b * p.y + self.tx,
            self.b * p.x + self.a * p.y + self.ty,
        )
    }

    pub fn invert(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (a, b) = (self.a / det, -self.b / det);
        Some(Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }
}

fn template() -> [Point; 5] {
    TEMPLATE.map(|(x, y)| Point::new(x, y))
}

fn bilinear(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = (img.width() as i64, img.height() as i64);
    let (x0, y0) = (x.floor() as i64, y.floor() as i64);
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);
    let texel = |xi: i64, yi: i64| -> [f32; 3] {
        if xi < 0 || yi < 0 || xi >= w || yi >= h {
            [0.0; 3]
        } else {
            img.get_pixel(xi as u32, yi as u32).0.map(f32::from)
        }
    };
    let (p00, p10, p01, p11) = (texel(x0, y0), texel(x0 + 1, y0), texel(x0, y0 + 1), texel(x0 + 1, y0 + 1));
    Rgb(std::array::from_fn(|c| {
        let top = p00[c] + (p10[c] - p00[c]) * fx;
        let bottom = p01[c] + (p11[c] - p01[c]) * fx;
        (top + (bottom - top) * fy).round().clamp(0.0, 255.0) as u8
    }))
}

/// Warp the face described by `landmarks` into an aligned 112×112 crop.
/// Pixels that fall outside the source are black.
pub fn align_face(img: &RgbImage, landmarks: &[Point; 5]) -> Option<RgbImage> {
    let forward = Similarity::estimate(landmarks, &template())?;
    let inverse = forward.invert()?;
    Some(RgbImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |ox, oy| {
        let src = inverse.apply(Point::new(ox as f32, oy as f32));
        bilinear(img, src.x, src.y)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Point, b: Point, eps: f32) -> bool {
        (a.x - b.x).abs() < eps && (a.y - b.y).abs() < eps
    }

    #[test]
    fn test_identity_fit() {
        let t = template();
        let s = Similarity::estimate(&t, &t).unwrap();
        assert!((s.a - 1.0).abs() < 1e-4);
        assert!(s.b.abs() < 1e-4);
        assert!(s.tx.abs() < 1e-3 && s.ty.abs() < 1e-3);
    }

    #[test]
    fn test_recovers_known_transform() {
        let truth = Similarity { a: 0.4, b: 0.3, tx: 12.0, ty: -7.0 };
        let src: [Point; 5] = [
            Point::new(80.0, 60.0),
            Point::new(130.0, 62.0),
            Point::new(104.0, 90.0),
            Point::new(86.0, 115.0),
            Point::new(125.0, 116.0),
        ];
        let dst = src.map(|p| truth.apply(p));
        let fit = Similarity::estimate(&src, &dst).unwrap();
        assert!((fit.a - truth.a).abs() < 1e-4);
        assert!((fit.b - truth.b).abs() < 1e-4);
        assert!((fit.tx - truth.tx).abs() < 1e-2);
        assert!((fit.ty - truth.ty).abs() < 1e-2);
    }

    #[test]
    fn test_invert_round_trip() {
        let s = Similarity { a: 0.5, b: -0.2, tx: 3.0, ty: 4.0 };
        let inv = s.invert().unwrap();
        let p = Point::new(17.0, -5.0);
        assert!(close(inv.apply(s.apply(p)), p, 1e-4));
    }

    #[test]
    fn test_degenerate_landmarks() {
        let same = [Point::new(10.0, 10.0); 5];
        assert!(Similarity::estimate(&same, &template()).is_none());
        let img = RgbImage::new(50, 50);
        assert!(align_face(&img, &same).is_none());
    }

    #[test]
    fn test_align_moves_marked_eye_onto_template() {
        let mut img = RgbImage::new(240, 240);
        let src = template().map(|p| Point::new(p.x * 1.5 + 40.0, p.y * 1.5 + 30.0));
        // Left eye lands at about (97, 108).
        for y in 105..=111 {
            for x in 94..=100 {
                img.put_pixel(x, y, Rgb([255, 40, 0]));
            }
        }
        let aligned = align_face(&img, &src).unwrap();
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        let (ex, ey) = (TEMPLATE[0].0.round() as u32, TEMPLATE[0].1.round() as u32);
        let px = aligned.get_pixel(ex, ey);
        assert!(px.0[0] > 150, "left eye marker not found: {px:?}");
        assert!(aligned.get_pixel(100, 10).0[0] < 10);
    }
}
