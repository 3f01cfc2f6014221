//! Rupture area and average slip of the kinematic solution.

use serde::Serialize;
use tracing::warn;

/// Area of a circle segment cut off by a chord at `distance` from the centre.
fn circle_segment(radius: f64, distance: f64) -> f64 {
    if distance >= radius {
        return 0.0;
    }
    let d = distance.max(0.0);
    radius * radius * (d / radius).acos() - d * (radius * radius - d * d).sqrt()
}

/// Area (m²) of a circular rupture of `radius` centred at `depth_m` on a plane
/// dipping `dip_deg`, with the parts above the surface and below the Moho cut off.
///
/// Depths at or above the surface, or at or below the Moho, give 0.
pub fn rupture_area(depth_m: f64, radius: f64, dip_deg: f64, moho_m: f64) -> f64 {
    if depth_m <= 0.0 || depth_m >= moho_m {
        warn!(depth_m, moho_m, "rupture area undefined at this depth");
        return 0.0;
    }
    let full = std::f64::consts::PI * radius * radius;
    let sin_dip = dip_deg.to_radians().sin();
    if sin_dip <= 0.0 {
        return full;
    }
    // distances from the centre to the boundaries, measured along the dip
    let above = circle_segment(radius, depth_m / sin_dip);
    let below = circle_segment(radius, (moho_m - depth_m) / sin_dip);
    full - above - below
}

/// `M0 / (μ·A)` in metres; `None` for a vanishing area.
pub fn average_slip(moment_nm: f64, area_m2: f64, shear_modulus: f64) -> Option<f64> {
    (area_m2 > 0.0 && shear_modulus > 0.0).then(|| moment_nm / (area_m2 * shear_modulus))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RuptureSummary {
    pub area_km2: f64,
    pub average_slip_m: Option<f64>,
    pub shear_modulus: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn deep_small_rupture_keeps_the_full_circle() {
        let a = rupture_area(10000.0, 2000.0, 45.0, 30000.0);
        assert!((a - PI * 4e6).abs() < 1e-6);
    }

    #[test]
    fn shallow_vertical_rupture_is_cut_by_the_surface() {
        // centre 1 km deep, radius 2 km: chord 1 km from the centre
        let a = rupture_area(1000.0, 2000.0, 90.0, 30000.0);
        let segment = 4e6 * (0.5f64).acos() - 1000.0 * (3e6f64).sqrt();
        assert!((a - (PI * 4e6 - segment)).abs() < 1e-3);
    }

    #[test]
    fn centre_at_the_chord_halves_the_circle() {
        assert!((circle_segment(1.0, 0.0) - PI / 2.0).abs() < 1e-12);
        assert_eq!(circle_segment(1.0, 2.0), 0.0);
    }

    #[test]
    fn depth_outside_the_crust_has_no_area() {
        assert_eq!(rupture_area(0.0, 1000.0, 45.0, 30000.0), 0.0);
        assert_eq!(rupture_area(31000.0, 1000.0, 45.0, 30000.0), 0.0);
    }

    #[test]
    fn slip_from_moment() {
        let mu = 3e10;
        let slip = average_slip(3e17, 1e7, mu).unwrap();
        assert!((slip - 1.0).abs() < 1e-12);
        assert!(average_slip(3e17, 0.0, mu).is_none());
    }
}
