//! GeoJSON boundaries and point-in-polygon lookup for quartiers.

use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::Quartier;

/// A `[lon, lat, ...]` position.
pub type Position = Vec<f64>;
/// A closed linear ring.
pub type Ring = Vec<Position>;

/// Polygonal GeoJSON geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    /// Outer ring followed by holes.
    Polygon(Vec<Ring>),
    MultiPolygon(Vec<Vec<Ring>>),
}

impl Geometry {
    /// Parse and validate a GeoJSON geometry object.
    pub fn from_value(value: serde_json::Value) -> Result<Self, AppError> {
        let geometry: Geometry = serde_json::from_value(value).map_err(|e| {
            AppError::Validation(format!(
                "Géométrie invalide (Polygon ou MultiPolygon attendu): {}",
                e
            ))
        })?;
        geometry.validate()?;
        Ok(geometry)
    }

    /// Check ring sizes, closure and coordinates.
    pub fn validate(&self) -> Result<(), AppError> {
        match self {
            Geometry::Polygon(rings) => validate_polygon(rings),
            Geometry::MultiPolygon(polygons) => {
                if polygons.is_empty() {
                    return Err(AppError::Validation(
                        "MultiPolygon sans polygone".to_string(),
                    ));
                }
                polygons.iter().try_for_each(|p| validate_polygon(p))
            }
        }
    }

    /// Whether the point lies inside the geometry (even-odd rule, holes excluded).
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        match self {
            Geometry::Polygon(rings) => polygon_contains(rings, lon, lat),
            Geometry::MultiPolygon(polygons) => {
                polygons.iter().any(|p| polygon_contains(p, lon, lat))
            }
        }
    }
}

/// Quartier with the lowest id whose boundary contains the point.
pub fn locate(quartiers: &[Quartier], lon: f64, lat: f64) -> Option<&Quartier> {
    if !lon.is_finite() || !lat.is_finite() {
        return None;
    }
    quartiers
        .iter()
        .filter(|q| q.geom.as_ref().is_some_and(|g| g.contains(lon, lat)))
        .min_by_key(|q| q.id)
}

fn validate_polygon(rings: &[Ring]) -> Result<(), AppError> {
    if rings.is_empty() {
        return Err(AppError::Validation("Polygone sans anneau".to_string()));
    }
    for ring in rings {
        if ring.len() < 4 {
            return Err(AppError::Validation(
                "Un anneau doit contenir au moins 4 positions".to_string(),
            ));
        }
        if ring
            .iter()
            .any(|p| p.len() < 2 || p.iter().any(|c| !c.is_finite()))
        {
            return Err(AppError::Validation("Position invalide".to_string()));
        }
        let (first, last) = (&ring[0], &ring[ring.len() - 1]);
        if first[0] != last[0] || first[1] != last[1] {
            return Err(AppError::Validation("Anneau non fermé".to_string()));
        }
    }
    Ok(())
}

fn polygon_contains(rings: &[Ring], x: f64, y: f64) -> bool {
    let Some((outer, holes)) = rings.split_first() else {
        return false;
    };
    ring_contains(outer, x, y) && !holes.iter().any(|h| ring_contains(h, x, y))
}

fn ring_contains(ring: &[Position], x: f64, y: f64) -> bool {
    let mut inside = false;
    let mut j = ring.len().wrapping_sub(1);
    for i in 0..ring.len() {
        let (xi, yi) = (ring[i][0], ring[i][1]);
        let (xj, yj) = (ring[j][0], ring[j][1]);
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn square(x0: f64, y0: f64, size: f64) -> Ring {
        vec![
            vec![x0, y0],
            vec![x0 + size, y0],
            vec![x0 + size, y0 + size],
            vec![x0, y0 + size],
            vec![x0, y0],
        ]
    }

    fn quartier(id: i64, geom: Option<Geometry>) -> Quartier {
        Quartier {
            id,
            nom_quartier: format!("Quartier {}", id),
            ville: Some("Paris".to_string()),
            code_postal: Some("75011".to_string()),
            description: None,
            geom,
            created_at: "2024-01-01T00:00:00Z".to_string(),
            updated_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_polygon_inside_outside() {
        let geom = Geometry::Polygon(vec![square(2.0, 48.0, 1.0)]);
        assert!(geom.contains(2.5, 48.5));
        assert!(!geom.contains(3.5, 48.5));
        assert!(!geom.contains(2.5, 47.9));
    }

    #[test]
    fn test_polygon_hole_is_outside() {
        let geom = Geometry::Polygon(vec![square(0.0, 0.0, 10.0), square(4.0, 4.0, 2.0)]);
        assert!(geom.contains(1.0, 1.0));
        assert!(!geom.contains(5.0, 5.0));
    }

    #[test]
    fn test_multipolygon_any_part() {
        let geom = Geometry::MultiPolygon(vec![
            vec![square(0.0, 0.0, 1.0)],
            vec![square(10.0, 10.0, 1.0)],
        ]);
        assert!(geom.contains(10.5, 10.5));
        assert!(geom.contains(0.5, 0.5));
        assert!(!geom.contains(5.0, 5.0));
    }

    #[test]
    fn test_parse_geojson() {
        let geom = Geometry::from_value(json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]
        }))
        .unwrap();
        assert!(matches!(geom, Geometry::Polygon(_)));

        let json = serde_json::to_value(&geom).unwrap();
        assert_eq!(json["type"], "Polygon");
    }

    #[test]
    fn test_reject_invalid_geometry() {
        let open_ring = json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]]
        });
        assert!(Geometry::from_value(open_ring).is_err());

        let too_short = json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 0.0], [0.0, 0.0]]]
        });
        assert!(Geometry::from_value(too_short).is_err());

        let point = json!({"type": "Point", "coordinates": [0.0, 0.0]});
        assert!(Geometry::from_value(point).is_err());
    }

    #[test]
    fn test_locate_lowest_id() {
        let quartiers = vec![
            quartier(3, Some(Geometry::Polygon(vec![square(0.0, 0.0, 10.0)]))),
            quartier(1, None),
            quartier(2, Some(Geometry::Polygon(vec![square(0.0, 0.0, 5.0)]))),
        ];
        assert_eq!(locate(&quartiers, 1.0, 1.0).map(|q| q.id), Some(2));
        assert_eq!(locate(&quartiers, 7.0, 7.0).map(|q| q.id), Some(3));
        assert!(locate(&quartiers, 20.0, 20.0).is_none());
        assert!(locate(&quartiers, f64::NAN, 1.0).is_none());
    }
}
