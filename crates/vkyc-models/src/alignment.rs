//! Five-point face alignment onto the 112×112 ArcFace template.

use image::{Rgb, RgbImage};
use vkyc_core::Point;

/// ArcFace template keypoints for a 112×112 crop.
const TEMPLATE_112: [Point; 5] = [
    Point::new(38.2946, 51.6963),
    Point::new(73.5318, 51.5014),
    Point::new(56.0252, 71.7366),
    Point::new(41.5493, 92.3655),
    Point::new(70.7299, 92.2041),
];

pub const ALIGNED_SIZE: u32 = 112;

/// 4-DOF similarity transform `p' = [a -b; b a] p + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    /// Least-squares fit mapping `src` onto `dst`.
    ///
    /// Closed form over centred coordinates; degenerate input (all source
    /// points coincident) yields the identity.
    pub fn estimate(src: &[Point; 5], dst: &[Point; 5]) -> Self {
        let mean = |pts: &[Point; 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(x, y), p| (x + p.x, y + p.y));
            Point::new(sx / 5.0, sy / 5.0)
        };
        let (ms, md) = (mean(src), mean(dst));

        let (mut dot, mut cross, mut norm) = (0.0f32, 0.0f32, 0.0f32);
        for (s, d) in src.iter().zip(dst) {
            let (sx, sy) = (s.x - ms.x, s.y - ms.y);
            let (dx, dy) = (d.x - md.x, d.y - md.y);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            norm += sx * sx + sy * sy;
        }
        if norm < 1e-12 {
            return Self {
                a: 1.0,
                b: 0.0,
                tx: 0.0,
                ty: 0.0,
            };
        }

        let a = dot / norm;
        let b = cross / norm;
        Self {
            a,
            b,
            tx: md.x - (a * ms.x - b * ms.y),
            ty: md.y - (b * ms.x + a * ms.y),
        }
    }

    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            self.a * p.x - self.b * p.y + self.tx,
            self.b * p.x + self.a * p.y + self.ty,
        )
    }

    /// Inverse mapping, or `None` for a zero-scale transform.
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

/// Bilinear RGB sample; outside the image is black.
fn sample(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let (x0, y0) = (x.floor() as i64, y.floor() as i64);
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);
    let at = |xi: i64, yi: i64| -> [f32; 3] {
        if xi >= 0 && yi >= 0 && xi < w && yi < h {
            let p = image.get_pixel(xi as u32, yi as u32);
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };
    let (tl, tr, bl, br) = (at(x0, y0), at(x0 + 1, y0), at(x0, y0 + 1), at(x0 + 1, y0 + 1));
    Rgb(std::array::from_fn(|c| {
        let top = tl[c] * (1.0 - fx) + tr[c] * fx;
        let bottom = bl[c] * (1.0 - fx) + br[c] * fx;
        (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
    }))
}

/// Warp the face described by `keypoints` into an aligned 112×112 crop.
pub fn align_face(image: &RgbImage, keypoints: &[Point; 5]) -> RgbImage {
    let forward = Similarity::estimate(keypoints, &TEMPLATE_112);
    let Some(inverse) = forward.invert() else {
        return RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
    };
    RgbImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |ox, oy| {
        let src = inverse.apply(Point::new(ox as f32, oy as f32));
        sample(image, src.x, src.y)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Point, b: Point, eps: f32) -> bool {
        (a.x - b.x).abs() < eps && (a.y - b.y).abs() < eps
    }

    #[test]
    fn test_identity_estimate() {
        let t = Similarity::estimate(&TEMPLATE_112, &TEMPLATE_112);
        assert!((t.a - 1.0).abs() < 1e-4 && t.b.abs() < 1e-4);
        assert!(t.tx.abs() < 1e-3 && t.ty.abs() < 1e-3);
    }

    #[test]
    fn test_recovers_scale_rotation_translation() {
        let truth = Similarity {
            a: 0.8,
            b: 0.3,
            tx: 12.0,
            ty: -7.0,
        };
        let src: [Point; 5] = std::array::from_fn(|i| Point::new(40.0 + 17.0 * i as f32, 60.0 + (i * i) as f32 * 3.0));
        let dst = src.map(|p| truth.apply(p));
        let t = Similarity::estimate(&src, &dst);
        assert!((t.a - 0.8).abs() < 1e-3 && (t.b - 0.3).abs() < 1e-3, "{t:?}");
        assert!((t.tx - 12.0).abs() < 1e-2 && (t.ty + 7.0).abs() < 1e-2, "{t:?}");
    }

    #[test]
    fn test_invert_roundtrip() {
        let t = Similarity {
            a: 0.5,
            b: -0.2,
            tx: 3.0,
            ty: 9.0,
        };
        let inv = t.invert().unwrap();
        let p = Point::new(17.0, -4.0);
        assert!(close(inv.apply(t.apply(p)), p, 1e-4));
        assert!(Similarity { a: 0.0, b: 0.0, tx: 1.0, ty: 1.0 }.invert().is_none());
    }

    #[test]
    fn test_degenerate_keypoints_identity() {
        let src = [Point::new(5.0, 5.0); 5];
        let t = Similarity::estimate(&src, &TEMPLATE_112);
        assert_eq!((t.a, t.b), (1.0, 0.0));
    }

    #[test]
    fn test_aligned_patch_lands_on_template() {
        // Face twice the template size, offset by (30, 20)
        let keypoints = TEMPLATE_112.map(|p| Point::new(p.x * 2.0 + 30.0, p.y * 2.0 + 20.0));
        let mut image = RgbImage::new(300, 300);
        let eye = keypoints[0];
        for dy in -3i32..=3 {
            for dx in -3i32..=3 {
                let (x, y) = ((eye.x as i32 + dx) as u32, (eye.y as i32 + dy) as u32);
                image.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }

        let aligned = align_face(&image, &keypoints);
        assert_eq!(aligned.dimensions(), (112, 112));
        let target = TEMPLATE_112[0];
        let brightest = (-1i32..=1)
            .flat_map(|dy| (-1i32..=1).map(move |dx| (dx, dy)))
            .map(|(dx, dy)| aligned.get_pixel((target.x as i32 + dx) as u32, (target.y as i32 + dy) as u32)[0])
            .max()
            .unwrap_or(0);
        assert!(brightest > 100, "max near template eye = {brightest}");
    }
}
