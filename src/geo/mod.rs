use crate::error::AppError;
use crate::models::driver::{GeoPoint, VehicleType};

const EARTH_RADIUS_KM: f64 = 6_371.0;
const DEFAULT_SPEED_KMH: f64 = 25.0;
const TRAFFIC_FACTOR: f64 = 0.7;

pub fn distance_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// Average city speed for a vehicle class, in km/h.
pub fn base_speed_kmh(vehicle: Option<VehicleType>) -> f64 {
    match vehicle {
        Some(VehicleType::Bicycle) => 15.0,
        Some(VehicleType::Scooter) => 25.0,
        Some(VehicleType::Motorcycle) => 35.0,
        Some(VehicleType::Car) => 30.0,
        None => DEFAULT_SPEED_KMH,
    }
}

/// Minutes needed to cover `distance_km`, rounded up. Unknown vehicles use the default speed.
pub fn eta_minutes(distance_km: f64, vehicle: Option<VehicleType>, in_traffic: bool) -> u32 {
    if !distance_km.is_finite() || distance_km <= 0.0 {
        return 0;
    }

    let mut speed = base_speed_kmh(vehicle);
    if in_traffic {
        speed *= TRAFFIC_FACTOR;
    }

    let minutes = (distance_km / speed * 60.0).ceil();
    if minutes >= u32::MAX as f64 {
        u32::MAX
    } else {
        minutes as u32
    }
}

pub fn validate_point(point: &GeoPoint) -> Result<(), AppError> {
    let lat_ok = point.lat.is_finite() && (-90.0..=90.0).contains(&point.lat);
    let lng_ok = point.lng.is_finite() && (-180.0..=180.0).contains(&point.lng);

    if lat_ok && lng_ok {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!(
            "coordinates out of range: lat={}, lng={}",
            point.lat, point.lng
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::{distance_km, eta_minutes, validate_point};
    use crate::models::driver::{GeoPoint, VehicleType};

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint {
            lat: 53.5511,
            lng: 9.9937,
        };
        let distance = distance_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = GeoPoint {
            lat: 51.5074,
            lng: -0.1278,
        };
        let paris = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };
        let distance = distance_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
        assert!((distance - distance_km(&paris, &london)).abs() < 1e-9);
    }

    #[test]
    fn scooter_in_traffic_over_two_and_a_half_km_takes_nine_minutes() {
        assert_eq!(eta_minutes(2.5, Some(VehicleType::Scooter), true), 9);
        assert_eq!(eta_minutes(2.5, Some(VehicleType::Scooter), false), 6);
    }

    #[test]
    fn unknown_vehicle_uses_scooter_speed() {
        assert_eq!(
            eta_minutes(4.0, None, true),
            eta_minutes(4.0, Some(VehicleType::Scooter), true)
        );
    }

    #[test]
    fn zero_distance_means_zero_minutes() {
        assert_eq!(eta_minutes(0.0, Some(VehicleType::Bicycle), true), 0);
        assert_eq!(eta_minutes(f64::NAN, Some(VehicleType::Car), true), 0);
    }

    #[test]
    fn eta_never_decreases_with_distance() {
        for vehicle in [
            VehicleType::Bicycle,
            VehicleType::Scooter,
            VehicleType::Motorcycle,
            VehicleType::Car,
        ] {
            let mut previous = 0;
            for step in 0..400 {
                let eta = eta_minutes(step as f64 * 0.05, Some(vehicle), true);
                assert!(eta >= previous);
                previous = eta;
            }
        }
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(validate_point(&GeoPoint { lat: 91.0, lng: 0.0 }).is_err());
        assert!(validate_point(&GeoPoint { lat: 0.0, lng: -180.5 }).is_err());
        assert!(validate_point(&GeoPoint { lat: f64::NAN, lng: 0.0 }).is_err());
        assert!(validate_point(&GeoPoint { lat: -33.9, lng: 151.2 }).is_ok());
    }
}
