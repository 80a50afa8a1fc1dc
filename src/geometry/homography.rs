use nalgebra::{SMatrix, SVector};

/// Projective weights smaller than this put a point at infinity.
const MIN_WEIGHT: f64 = 1e-10;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Homography {
    // row-major 3x3, h[2][2] == 1
    pub h: [[f64; 3]; 3],
}

impl Homography {
    /// Maps a point. Returns `None` when it lands on the line at infinity.
    #[inline]
    pub fn apply(&self, p: Point) -> Option<Point> {
        let w = self.h[2][0] * p.x + self.h[2][1] * p.y + self.h[2][2];
        if w.abs() < MIN_WEIGHT {
            return None;
        }
        let u = (self.h[0][0] * p.x + self.h[0][1] * p.y + self.h[0][2]) / w;
        let v = (self.h[1][0] * p.x + self.h[1][1] * p.y + self.h[1][2]) / w;
        Some(Point::new(u, v))
    }
}

/// Estimates H such that `to ~ H * from` for exactly four correspondences.
///
/// Builds the 8x8 system in the unknowns `h00..h21` (with `h22 = 1`) and
/// solves it by LU with partial pivoting. Singular systems yield `None`.
pub fn homography_from_quad(from: &[Point; 4], to: &[Point; 4]) -> Option<Homography> {
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for k in 0..4 {
        let (x, y) = (from[k].x, from[k].y);
        let (u, v) = (to[k].x, to[k].y);

        // x y 1 0 0 0 -u*x -u*y = u
        let r0 = 2 * k;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        b[r0] = u;

        // 0 0 0 x y 1 -v*x -v*y = v
        let r1 = 2 * k + 1;
        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        b[r1] = v;
    }

    let s = a.lu().solve(&b)?;
    if s.iter().any(|value| !value.is_finite()) {
        return None;
    }
    Some(Homography {
        h: [[s[0], s[1], s[2]], [s[3], s[4], s[5]], [s[6], s[7], 1.0]],
    })
}
