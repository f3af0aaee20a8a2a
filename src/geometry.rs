use geo::{Intersects, MultiPolygon, Polygon};

use crate::errors::DomainError;

/// The geometry shapes the rest of the system deals with. AOIs and tiles are both
/// encoded as either a single polygon or a multipolygon; anything else is out of
/// scope and rejected at the parse boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Geom {
    Polygon(Polygon<f64>),
    MultiPolygon(MultiPolygon<f64>),
}

impl Geom {
    /// Parse GeoJSON text (a `Feature`, bare `Geometry`, or `GeometryCollection`
    /// containing exactly one polygonal member) into a `Geom`.
    pub fn from_geojson_str(text: &str) -> Result<Self, DomainError> {
        let value: geojson::GeoJson = text
            .parse()
            .map_err(|e| DomainError::InvalidGeometry(format!("bad geojson: {e}")))?;

        let geometry = match value {
            geojson::GeoJson::Geometry(g) => g,
            geojson::GeoJson::Feature(f) => f
                .geometry
                .ok_or_else(|| DomainError::InvalidGeometry("feature has no geometry".into()))?,
            geojson::GeoJson::FeatureCollection(_) => {
                return Err(DomainError::InvalidGeometry(
                    "feature collections are not supported".into(),
                ));
            }
        };

        let geo_geom: geo_types::Geometry<f64> = geometry
            .try_into()
            .map_err(|e| DomainError::InvalidGeometry(format!("unsupported geometry: {e}")))?;

        Self::from_geo(geo_geom)
    }

    /// Parse WKB bytes (EPSG:4326, per §6) into a `Geom`.
    pub fn from_wkb(bytes: &[u8]) -> Result<Self, DomainError> {
        let geo_geom = wkb::wkb_to_geom(&mut std::io::Cursor::new(bytes))
            .map_err(|e| DomainError::InvalidGeometry(format!("bad wkb: {e:?}")))?;
        Self::from_geo(geo_geom)
    }

    fn from_geo(geo_geom: geo_types::Geometry<f64>) -> Result<Self, DomainError> {
        let geom = match geo_geom {
            geo_types::Geometry::Polygon(p) => Geom::Polygon(p),
            geo_types::Geometry::MultiPolygon(mp) => Geom::MultiPolygon(mp),
            other => {
                return Err(DomainError::InvalidGeometry(format!(
                    "unsupported geometry type: {other:?}"
                )));
            }
        };

        if geom.is_empty() {
            return Err(DomainError::InvalidGeometry(
                "geometry is empty or degenerate".into(),
            ));
        }
        geom.validate_lat_lon()?;
        Ok(geom)
    }

    fn is_empty(&self) -> bool {
        match self {
            Geom::Polygon(p) => p.exterior().0.is_empty(),
            Geom::MultiPolygon(mp) => {
                mp.0.is_empty() || mp.0.iter().all(|p| p.exterior().0.is_empty())
            }
        }
    }

    /// Reject coordinates outside the valid lat/lon domain (§4.1).
    fn validate_lat_lon(&self) -> Result<(), DomainError> {
        let out_of_range = |x: f64, y: f64| !(-180.0..=180.0).contains(&x) || !(-90.0..=90.0).contains(&y);
        let bad = match self {
            Geom::Polygon(p) => p.exterior().0.iter().any(|c| out_of_range(c.x, c.y)),
            Geom::MultiPolygon(mp) => mp
                .0
                .iter()
                .any(|p| p.exterior().0.iter().any(|c| out_of_range(c.x, c.y))),
        };
        if bad {
            return Err(DomainError::InvalidGeometry(
                "coordinates outside lat/lon domain".into(),
            ));
        }
        Ok(())
    }

    /// Render back to GeoJSON text, the canonical storage representation for Index
    /// Store rows regardless of which format the geometry arrived in (§3, §6) — so a
    /// record ingested as WKB and one ingested as a GeoJSON AOI polygon are stored and
    /// re-parsed identically by the Compare Engine.
    pub fn to_geojson_string(&self) -> String {
        let geo_geom: geo_types::Geometry<f64> = match self {
            Geom::Polygon(p) => geo_types::Geometry::Polygon(p.clone()),
            Geom::MultiPolygon(mp) => geo_types::Geometry::MultiPolygon(mp.clone()),
        };
        let geojson_geom = geojson::Geometry::from(geo_geom);
        geojson::GeoJson::Geometry(geojson_geom).to_string()
    }

    /// True if this geometry crosses the antimeridian (spans more than 180° of
    /// longitude within a single ring). Resolution of the Open Question in DESIGN.md:
    /// such polygons are rejected rather than split.
    pub fn crosses_antimeridian(&self) -> bool {
        let ring_crosses = |p: &Polygon<f64>| {
            let mut prev: Option<f64> = None;
            for c in p.exterior().0.iter() {
                if let Some(prev_x) = prev
                    && (c.x - prev_x).abs() > 180.0
                {
                    return true;
                }
                prev = Some(c.x);
            }
            false
        };
        match self {
            Geom::Polygon(p) => ring_crosses(p),
            Geom::MultiPolygon(mp) => mp.0.iter().any(ring_crosses),
        }
    }
}

/// Not spatially disjoint — touching boundaries count as intersecting (§4.2).
pub fn intersects(a: &Geom, b: &Geom) -> bool {
    match (a, b) {
        (Geom::Polygon(a), Geom::Polygon(b)) => a.intersects(b),
        (Geom::Polygon(a), Geom::MultiPolygon(b)) => a.intersects(b),
        (Geom::MultiPolygon(a), Geom::Polygon(b)) => a.intersects(b),
        (Geom::MultiPolygon(a), Geom::MultiPolygon(b)) => a.intersects(b),
    }
}
