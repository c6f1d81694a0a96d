/// Reverse geocoding
///
/// Resolves coordinates to a coarse place name. The built-in gazetteer is
/// offline: it picks the nearest entry from a small table of major places
/// and gives up beyond a maximum distance.
use thiserror::Error;

use crate::state::data::GeoPoint;

/// Mean Earth radius used for great-circle distances
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Default search radius around a known place
pub const DEFAULT_MAX_DISTANCE_KM: f64 = 150.0;

#[derive(Debug, Error, PartialEq)]
pub enum GeocodeError {
    #[error("coordinates out of range: {latitude}, {longitude}")]
    OutOfRange { latitude: f64, longitude: f64 },

    #[error("no known place within {0:.0} km")]
    NoPlaceNearby(f64),
}

/// Coordinate to place-name lookup
pub trait Gazetteer: Send + Sync {
    fn lookup(&self, point: GeoPoint) -> Result<String, GeocodeError>;
}

#[derive(Debug, Clone, Copy)]
struct Place {
    name: &'static str,
    country: &'static str,
    latitude: f64,
    longitude: f64,
}

const fn place(name: &'static str, country: &'static str, latitude: f64, longitude: f64) -> Place {
    Place {
        name,
        country,
        latitude,
        longitude,
    }
}

static PLACES: &[Place] = &[
    place("Amsterdam", "Netherlands", 52.3676, 4.9041),
    place("Athens", "Greece", 37.9838, 23.7275),
    place("Auckland", "New Zealand", -36.8485, 174.7633),
    place("Bangkok", "Thailand", 13.7563, 100.5018),
    place("Barcelona", "Spain", 41.3874, 2.1686),
    place("Beijing", "China", 39.9042, 116.4074),
    place("Berlin", "Germany", 52.5200, 13.4050),
    place("Bogotá", "Colombia", 4.7110, -74.0721),
    place("Buenos Aires", "Argentina", -34.6037, -58.3816),
    place("Cairo", "Egypt", 30.0444, 31.2357),
    place("Cape Town", "South Africa", -33.9249, 18.4241),
    place("Chicago", "United States", 41.8781, -87.6298),
    place("Delhi", "India", 28.7041, 77.1025),
    place("Dubai", "United Arab Emirates", 25.2048, 55.2708),
    place("Dublin", "Ireland", 53.3498, -6.2603),
    place("Hong Kong", "China", 22.3193, 114.1694),
    place("Istanbul", "Turkey", 41.0082, 28.9784),
    place("Jakarta", "Indonesia", -6.2088, 106.8456),
    place("Lagos", "Nigeria", 6.5244, 3.3792),
    place("Lima", "Peru", -12.0464, -77.0428),
    place("Lisbon", "Portugal", 38.7223, -9.1393),
    place("London", "United Kingdom", 51.5074, -0.1278),
    place("Los Angeles", "United States", 34.0522, -118.2437),
    place("Madrid", "Spain", 40.4168, -3.7038),
    place("Mexico City", "Mexico", 19.4326, -99.1332),
    place("Miami", "United States", 25.7617, -80.1918),
    place("Moscow", "Russia", 55.7558, 37.6173),
    place("Mumbai", "India", 19.0760, 72.8777),
    place("Nairobi", "Kenya", -1.2921, 36.8219),
    place("New York", "United States", 40.7128, -74.0060),
    place("Oslo", "Norway", 59.9139, 10.7522),
    place("Paris", "France", 48.8566, 2.3522),
    place("Prague", "Czechia", 50.0755, 14.4378),
    place("Reykjavík", "Iceland", 64.1466, -21.9426),
    place("Rio de Janeiro", "Brazil", -22.9068, -43.1729),
    place("Rome", "Italy", 41.9028, 12.4964),
    place("San Francisco", "United States", 37.7749, -122.4194),
    place("Santiago", "Chile", -33.4489, -70.6693),
    place("São Paulo", "Brazil", -23.5505, -46.6333),
    place("Seattle", "United States", 47.6062, -122.3321),
    place("Seoul", "South Korea", 37.5665, 126.9780),
    place("Singapore", "Singapore", 1.3521, 103.8198),
    place("Stockholm", "Sweden", 59.3293, 18.0686),
    place("Sydney", "Australia", -33.8688, 151.2093),
    place("Tokyo", "Japan", 35.6762, 139.6503),
    place("Toronto", "Canada", 43.6532, -79.3832),
    place("Vancouver", "Canada", 49.2827, -123.1207),
    place("Vienna", "Austria", 48.2082, 16.3738),
    place("Warsaw", "Poland", 52.2297, 21.0122),
    place("Zürich", "Switzerland", 47.3769, 8.5417),
];

/// Nearest-place lookup over the built-in table
#[derive(Debug, Clone)]
pub struct OfflineGazetteer {
    max_distance_km: f64,
}

impl OfflineGazetteer {
    pub fn new(max_distance_km: f64) -> Self {
        Self { max_distance_km }
    }
}

impl Default for OfflineGazetteer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DISTANCE_KM)
    }
}

impl Gazetteer for OfflineGazetteer {
    fn lookup(&self, point: GeoPoint) -> Result<String, GeocodeError> {
        if !(-90.0..=90.0).contains(&point.latitude) || !(-180.0..=180.0).contains(&point.longitude) {
            return Err(GeocodeError::OutOfRange {
                latitude: point.latitude,
                longitude: point.longitude,
            });
        }

        PLACES
            .iter()
            .map(|p| (p, distance_km(point, GeoPoint { latitude: p.latitude, longitude: p.longitude })))
            .filter(|(_, d)| *d <= self.max_distance_km)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(p, _)| format!("{}, {}", p.name, p.country))
            .ok_or(GeocodeError::NoPlaceNearby(self.max_distance_km))
    }
}

/// Haversine great-circle distance
pub fn distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_nearest_place() {
        let gazetteer = OfflineGazetteer::default();
        // Eiffel Tower
        let name = gazetteer
            .lookup(GeoPoint { latitude: 48.8584, longitude: 2.2945 })
            .unwrap();
        assert_eq!(name, "Paris, France");

        // Bondi Beach, southern and eastern hemispheres
        let name = gazetteer
            .lookup(GeoPoint { latitude: -33.8908, longitude: 151.2743 })
            .unwrap();
        assert_eq!(name, "Sydney, Australia");
    }

    #[test]
    fn test_lookup_middle_of_ocean() {
        let gazetteer = OfflineGazetteer::default();
        let err = gazetteer
            .lookup(GeoPoint { latitude: -40.0, longitude: -120.0 })
            .unwrap_err();
        assert_eq!(err, GeocodeError::NoPlaceNearby(DEFAULT_MAX_DISTANCE_KM));
    }

    #[test]
    fn test_lookup_rejects_invalid_coordinates() {
        let gazetteer = OfflineGazetteer::default();
        assert!(matches!(
            gazetteer.lookup(GeoPoint { latitude: 95.0, longitude: 0.0 }),
            Err(GeocodeError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_distance_paris_london() {
        let paris = GeoPoint { latitude: 48.8566, longitude: 2.3522 };
        let london = GeoPoint { latitude: 51.5074, longitude: -0.1278 };
        let d = distance_km(paris, london);
        assert!((d - 343.5).abs() < 5.0, "got {}", d);
    }
}
