//! Heat arithmetic helpers shared by the step function and the runtime.
//!
//! Heat is plain `f64`. These helpers hold the clamping rules in one place so
//! every pass agrees on what "empty" means.

/// Amounts below this are treated as exactly zero after a step.
pub const HEAT_EPSILON: f64 = 0.001;

/// Snap residue below [`HEAT_EPSILON`], negatives and NaN to `0.0`.
#[inline]
pub fn snap_to_zero(v: f64) -> f64 {
    if v.is_nan() || v < HEAT_EPSILON { 0.0 } else { v }
}

/// Replace NaN and negatives with `0.0`, leaving small positives intact.
#[inline]
pub fn non_negative(v: f64) -> f64 {
    if v.is_nan() || v < 0.0 { 0.0 } else { v }
}

/// `max(0, capacity - heat)`.
#[inline]
pub fn headroom(capacity: f64, heat: f64) -> f64 {
    non_negative(capacity - heat)
}

/// `heat / capacity`, or 0 when there is no containment.
#[inline]
pub fn fill_ratio(heat: f64, capacity: f64) -> f64 {
    if capacity > 0.0 { heat / capacity } else { 0.0 }
}

/// Read a cell from a heat buffer, treating missing and NaN cells as empty.
#[inline]
pub fn read(buf: &[f64], index: u32) -> f64 {
    match buf.get(index as usize) {
        Some(v) if !v.is_nan() => *v,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snap_clears_residue() {
        assert_eq!(snap_to_zero(0.0009), 0.0);
        assert_eq!(snap_to_zero(-3.0), 0.0);
        assert_eq!(snap_to_zero(f64::NAN), 0.0);
        assert_eq!(snap_to_zero(0.001), 0.001);
    }

    #[test]
    fn headroom_never_negative() {
        assert_eq!(headroom(10.0, 4.0), 6.0);
        assert_eq!(headroom(10.0, 14.0), 0.0);
    }

    #[test]
    fn fill_ratio_zero_capacity() {
        assert_eq!(fill_ratio(5.0, 0.0), 0.0);
        assert_eq!(fill_ratio(8.0, 10.0), 0.8);
    }

    #[test]
    fn read_out_of_range_is_zero() {
        let buf = [1.0, f64::NAN];
        assert_eq!(read(&buf, 0), 1.0);
        assert_eq!(read(&buf, 1), 0.0);
        assert_eq!(read(&buf, 9), 0.0);
    }
}
