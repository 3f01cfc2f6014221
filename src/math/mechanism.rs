//! Double-couple geometry.
//!
//! Conventions (Aki & Richards): x = north, y = east, z = down; strike
//! clockwise from north, dip from horizontal, rake in the fault plane.
//!
//! - [`normalize`] folds a negative moment into the rake and wraps angles
//!   into `0 ≤ strike < 360`, `0 ≤ dip ≤ 90`, `-180 < rake ≤ 180`.
//! - [`auxiliary_plane`] swaps fault normal and slip vector and reads the
//!   angles back with `atan2`, so horizontal and vertical planes need no
//!   special candidate search.

use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mechanism {
    pub strike: f64,
    pub dip: f64,
    pub rake: f64,
}

impl Mechanism {
    pub const fn new(strike: f64, dip: f64, rake: f64) -> Self {
        Self { strike, dip, rake }
    }

    /// Same plane with the slip direction reversed.
    pub fn flipped_rake(self) -> Self {
        let rake = if self.rake <= 0.0 {
            self.rake + 180.0
        } else {
            self.rake - 180.0
        };
        Self { rake, ..self }
    }

    pub fn is_canonical(&self) -> bool {
        (0.0..360.0).contains(&self.strike)
            && (0.0..=90.0).contains(&self.dip)
            && self.rake > -180.0
            && self.rake <= 180.0
    }
}

/// Canonical form of `(mechanism, moment)`; the returned moment is non-negative.
pub fn normalize(m: Mechanism, moment: f64) -> (Mechanism, f64) {
    let (mut strike, mut dip, mut rake) = (m.strike, m.dip, m.rake);
    let mut moment = moment;

    if moment < 0.0 {
        moment = -moment;
        rake = if rake <= 0.0 { rake + 180.0 } else { rake - 180.0 };
    }
    if dip < 0.0 {
        dip = -dip;
        strike += 180.0;
        rake += 180.0;
    }
    dip = dip.rem_euclid(360.0);
    if dip >= 180.0 {
        // (n, l) -> (-n, -l): same couple
        dip -= 180.0;
        rake = 180.0 - rake;
    }
    if dip > 90.0 {
        dip = 180.0 - dip;
        strike += 180.0;
        rake = -rake;
    }

    strike = wrap_360(strike);
    rake = wrap_360(rake);
    if rake > 180.0 {
        rake -= 360.0;
    }

    (Mechanism::new(strike, dip, rake), moment)
}

fn wrap_360(angle: f64) -> f64 {
    let w = angle.rem_euclid(360.0);
    if w >= 360.0 { 0.0 } else { w }
}

/// Fault normal and slip vector of a plane.
pub fn normal_and_slip(m: Mechanism) -> (Vector3<f64>, Vector3<f64>) {
    let (ss, cs) = m.strike.to_radians().sin_cos();
    let (sd, cd) = m.dip.to_radians().sin_cos();
    let (sr, cr) = m.rake.to_radians().sin_cos();
    let normal = Vector3::new(-sd * ss, sd * cs, -cd);
    let slip = Vector3::new(cr * cs + cd * sr * ss, cr * ss - cd * sr * cs, -sr * sd);
    (normal, slip)
}

/// Recover strike/dip/rake from a unit normal and unit slip vector.
pub fn from_normal_and_slip(normal: Vector3<f64>, slip: Vector3<f64>) -> Mechanism {
    // The normal must point upwards (n_z <= 0) for dip in [0, 90].
    let (n, l) = if normal.z > 0.0 {
        (-normal, -slip)
    } else {
        (normal, slip)
    };

    let dip = (-n.z).clamp(-1.0, 1.0).acos();
    let sd = dip.sin();

    let (strike, rake) = if sd > 1e-9 {
        let strike = (-n.x).atan2(n.y);
        let along = l.x * strike.cos() + l.y * strike.sin();
        let rake = (-l.z / sd).atan2(along);
        (strike, rake)
    } else {
        // Horizontal plane: strike is arbitrary, put all slip direction into rake.
        (0.0, -(l.y.atan2(l.x)))
    };

    normalize(
        Mechanism::new(strike.to_degrees(), dip.to_degrees(), rake.to_degrees()),
        1.0,
    )
    .0
}

/// The second nodal plane of a double couple.
pub fn auxiliary_plane(m: Mechanism) -> Mechanism {
    let (normal, slip) = normal_and_slip(m);
    from_normal_and_slip(slip, normal)
}

/// Moment-tensor components `[m11, m12, m13, m22, m23, m33]` of a double couple.
pub fn to_moment_tensor(m: Mechanism, moment: f64) -> [f64; 6] {
    let phi = m.strike.to_radians();
    let delta = m.dip.to_radians();
    let lambda = m.rake.to_radians();

    let (sd, cd) = delta.sin_cos();
    let (sl, cl) = lambda.sin_cos();
    let (sp, cp) = phi.sin_cos();
    let s2d = (2.0 * delta).sin();
    let c2d = (2.0 * delta).cos();
    let s2p = (2.0 * phi).sin();
    let c2p = (2.0 * phi).cos();

    [
        -moment * (sd * cl * s2p + s2d * sl * sp * sp),
        moment * (sd * cl * c2p + 0.5 * s2d * sl * s2p),
        -moment * (cd * cl * cp + c2d * sl * sp),
        moment * (sd * cl * s2p - s2d * sl * cp * cp),
        -moment * (cd * cl * sp - c2d * sl * cp),
        moment * s2d * sl,
    ]
}

fn tensor_matrix(c: &[f64; 6]) -> Matrix3<f64> {
    Matrix3::new(c[0], c[1], c[2], c[1], c[3], c[4], c[2], c[4], c[5])
}

/// Scalar moment `sqrt(Σ M_ij² / 2)` over the full symmetric tensor.
pub fn scalar_moment(c: &[f64; 6]) -> f64 {
    let sum = c[0] * c[0]
        + c[3] * c[3]
        + c[5] * c[5]
        + 2.0 * (c[1] * c[1] + c[2] * c[2] + c[4] * c[4]);
    (sum / 2.0).sqrt()
}

/// Percentages `(iso, dc, clvd)` from the eigenvalues of the tensor.
pub fn decompose(c: &[f64; 6]) -> (f64, f64, f64) {
    let eig = SymmetricEigen::new(tensor_matrix(c));
    let iso = eig.eigenvalues.sum() / 3.0;
    let mut dev: Vec<f64> = eig.eigenvalues.iter().map(|v| v - iso).collect();
    dev.sort_by(|a, b| a.abs().partial_cmp(&b.abs()).unwrap_or(std::cmp::Ordering::Equal));

    let largest = dev[2].abs();
    if largest + iso.abs() == 0.0 {
        return (0.0, 0.0, 0.0);
    }
    let iso_pct = 100.0 * iso.abs() / (iso.abs() + largest);
    let epsilon = if largest > 0.0 { (dev[0] / largest).abs() } else { 0.0 };
    let clvd_pct = (100.0 - iso_pct) * 2.0 * epsilon;
    let dc_pct = 100.0 - iso_pct - clvd_pct;
    (iso_pct, dc_pct, clvd_pct)
}

/// Moment magnitude `Mw = (2/3)·log10(M0) − 6.1`, M0 in N·m.
pub fn moment_magnitude(m0: f64) -> f64 {
    m0.log10() * 2.0 / 3.0 - 6.1
}
