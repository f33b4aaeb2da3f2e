//! Pinhole geometry for monocular ranging.
//!
//! All functions are pure. Degenerate inputs (non-positive pixel width)
//! yield `None` rather than NaN/Inf; callers discard such candidates
//! instead of propagating an error.

/// Estimate object distance from its projected width.
///
/// Pinhole model: `distance = real_width_m * focal_length_px / pixel_width`.
/// Returns `None` when `pixel_width` is not strictly positive, or when the
/// calibration inputs are non-positive.
pub fn distance_m(pixel_width: f64, real_width_m: f64, focal_length_px: f64) -> Option<f64> {
    if pixel_width <= 0.0 || real_width_m <= 0.0 || focal_length_px <= 0.0 {
        return None;
    }
    Some(real_width_m * focal_length_px / pixel_width)
}

/// Angular offset of a horizontal pixel position from the camera's forward
/// axis, linear in the normalized offset from image center. Negative angles
/// are left of center.
pub fn angle_deg(center_x_px: f64, frame_width_px: f64, field_of_view_deg: f64) -> f64 {
    if frame_width_px <= 0.0 {
        return 0.0;
    }
    ((center_x_px / frame_width_px) - 0.5) * field_of_view_deg
}

/// Polar placement for radar rendering. Angle is measured from the camera's
/// forward axis, so straight ahead maps to (0, distance).
pub fn polar_position(distance_m: f64, angle_deg: f64) -> (f64, f64) {
    let rad = angle_deg.to_radians();
    (distance_m * rad.sin(), distance_m * rad.cos())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_follows_pinhole_model() {
        // 0.08m object at focal length 1200px projecting to 96px -> 1m.
        let d = distance_m(96.0, 0.08, 1200.0).expect("distance");
        assert!((d - 1.0).abs() < 1e-9);
    }

    #[test]
    fn distance_is_strictly_decreasing_in_pixel_width() {
        let widths = [1.0, 2.0, 5.0, 10.0, 50.0, 100.0, 640.0];
        let distances: Vec<f64> = widths
            .iter()
            .map(|w| distance_m(*w, 0.08, 1200.0).expect("positive width"))
            .collect();
        for pair in distances.windows(2) {
            assert!(pair[0] > pair[1], "distance must shrink as width grows");
        }
    }

    #[test]
    fn zero_or_negative_width_is_indeterminate() {
        assert_eq!(distance_m(0.0, 0.08, 1200.0), None);
        assert_eq!(distance_m(-3.0, 0.08, 1200.0), None);
    }

    #[test]
    fn bad_calibration_is_indeterminate() {
        assert_eq!(distance_m(10.0, 0.0, 1200.0), None);
        assert_eq!(distance_m(10.0, 0.08, 0.0), None);
    }

    #[test]
    fn angle_is_zero_at_image_center() {
        assert_eq!(angle_deg(320.0, 640.0, 60.0), 0.0);
    }

    #[test]
    fn angle_spans_half_fov_at_edges() {
        assert!((angle_deg(0.0, 640.0, 60.0) + 30.0).abs() < 1e-9);
        assert!((angle_deg(640.0, 640.0, 60.0) - 30.0).abs() < 1e-9);
    }

    #[test]
    fn polar_forward_is_straight_ahead() {
        let (x, y) = polar_position(2.0, 0.0);
        assert!(x.abs() < 1e-9);
        assert!((y - 2.0).abs() < 1e-9);
    }

    #[test]
    fn polar_right_angle_lies_on_x_axis() {
        let (x, y) = polar_position(1.0, 90.0);
        assert!((x - 1.0).abs() < 1e-9);
        assert!(y.abs() < 1e-9);
    }
}
