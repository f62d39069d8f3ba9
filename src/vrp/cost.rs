use crate::data::{Location, Seconds};

const EARTH_RADIUS: f64 = 6.3781e6;

/// Seconds to fly from `src` to `dst` at `speed` m/s and perform the task,
/// using an equirectangular approximation.
pub fn travel_time(src: Location, dst: Location, speed: f64, task_time: f64) -> Seconds {
    let dx = (dst.longitude - src.longitude)
        * (0.5 * (src.latitude + dst.latitude) * std::f64::consts::PI / 180.0).cos()
        * std::f64::consts::PI / 180.0 * EARTH_RADIUS;
    let dy = (dst.latitude - src.latitude) * std::f64::consts::PI / 180.0 * EARTH_RADIUS;
    let dist = (dx * dx + dy * dy).sqrt();
    let flight_time = dist / speed;
    return (flight_time + task_time).ceil() as Seconds;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_is_task_time() {
        let p = Location::new(42.36, -71.06);
        assert_eq!(travel_time(p, p, 10.0, 30.0), 30);
    }

    #[test]
    fn symmetric_up_to_rounding() {
        let a = Location::new(42.360, -71.060);
        let b = Location::new(42.365, -71.050);
        let ab = travel_time(a, b, 10.0, 0.0);
        let ba = travel_time(b, a, 10.0, 0.0);
        assert!((ab - ba).abs() <= 1);
        assert!(ab > 0);
    }

    #[test]
    fn one_degree_latitude() {
        let a = Location::new(0.0, 0.0);
        let b = Location::new(1.0, 0.0);
        // one degree of latitude is ~111 km
        let t = travel_time(a, b, 100.0, 0.0);
        assert!((t - 1113).abs() < 5, "t = {}", t);
    }
}
