//! Column-major 4×4 matrices as carried by frames and draw requests.
//!
//! Element `(row, col)` lives at index `col * 4 + row`, matching the WGSL
//! `mat4x4<f32>` memory layout so matrices can be uploaded verbatim.

pub type Mat4 = [f32; 16];

pub const IDENTITY: Mat4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

pub fn multiply(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut out = [0.0; 16];
    for col in 0..4 {
        for row in 0..4 {
            let mut sum = 0.0;
            for k in 0..4 {
                sum += a[k * 4 + row] * b[col * 4 + k];
            }
            out[col * 4 + row] = sum;
        }
    }
    out
}

pub fn scale(sx: f32, sy: f32, sz: f32) -> Mat4 {
    let mut m = IDENTITY;
    m[0] = sx;
    m[5] = sy;
    m[10] = sz;
    m
}

pub fn translate(tx: f32, ty: f32, tz: f32) -> Mat4 {
    let mut m = IDENTITY;
    m[12] = tx;
    m[13] = ty;
    m[14] = tz;
    m
}

/// Applies `m` to the point `(x, y, 0, 1)` and returns the transformed xy.
pub fn transform_point(m: &Mat4, x: f32, y: f32) -> (f32, f32) {
    (
        m[0] * x + m[4] * y + m[12],
        m[1] * x + m[5] * y + m[13],
    )
}

/// Inverts the 2D affine part (upper-left 2×2 plus xy translation).
///
/// Returns `None` for degenerate matrices.
pub fn invert_affine_2d(m: &Mat4) -> Option<Mat4> {
    let det = m[0] * m[5] - m[4] * m[1];
    if det.abs() <= f32::EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let a = m[5] * inv_det;
    let b = -m[4] * inv_det;
    let c = -m[1] * inv_det;
    let d = m[0] * inv_det;
    let mut out = IDENTITY;
    out[0] = a;
    out[1] = c;
    out[4] = b;
    out[5] = d;
    out[12] = -(a * m[12] + b * m[13]);
    out[13] = -(c * m[12] + d * m[13]);
    Some(out)
}

pub fn approx_eq(a: &Mat4, b: &Mat4) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= 1e-5)
}

pub fn is_identity(m: &Mat4) -> bool {
    approx_eq(m, &IDENTITY)
}

/// Texture matrix that flips the v axis, as delivered by most video producers.
pub fn flip_vertical() -> Mat4 {
    multiply(&translate(0.0, 1.0, 0.0), &scale(1.0, -1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_neutral_for_multiply() {
        let m = multiply(&translate(0.25, -0.5, 0.0), &scale(2.0, 3.0, 1.0));
        assert!(approx_eq(&multiply(&IDENTITY, &m), &m));
        assert!(approx_eq(&multiply(&m, &IDENTITY), &m));
    }

    #[test]
    fn affine_inverse_round_trips_points() {
        let m = multiply(&translate(0.3, 0.1, 0.0), &scale(-2.0, 0.5, 1.0));
        let inv = invert_affine_2d(&m).expect("invertible");
        let (x, y) = transform_point(&m, 0.4, -0.7);
        let (bx, by) = transform_point(&inv, x, y);
        assert!((bx - 0.4).abs() < 1e-5);
        assert!((by + 0.7).abs() < 1e-5);
    }

    #[test]
    fn degenerate_matrix_has_no_inverse() {
        assert!(invert_affine_2d(&scale(0.0, 1.0, 1.0)).is_none());
    }

    #[test]
    fn vertical_flip_maps_unit_interval_onto_itself() {
        let flip = flip_vertical();
        assert_eq!(transform_point(&flip, 0.5, 0.0), (0.5, 1.0));
        assert_eq!(transform_point(&flip, 0.5, 1.0), (0.5, 0.0));
    }
}
