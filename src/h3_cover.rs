use std::collections::HashSet;

use h3o::geom::{
    ContainmentMode, MultiPolygon as H3MultiPolygon, PolyfillConfig, Polygon as H3Polygon, ToCells,
};
use h3o::{CellIndex, Resolution};

use crate::config::H3_RESOLUTION;
use crate::errors::DomainError;
use crate::geometry::Geom;

fn resolution() -> Resolution {
    Resolution::try_from(H3_RESOLUTION).expect("H3_RESOLUTION is a valid h3o resolution")
}

/// `cover(geom, 3) -> set<H3CellID>` such that every point of `geom` lies in some
/// returned cell and no returned cell is disjoint from `geom` (overlap semantics,
/// §4.1). MultiPolygon covers are the union of the per-polygon covers.
///
/// Antimeridian-crossing input is rejected rather than silently producing an
/// undercount — see the Open Question resolution in DESIGN.md.
pub fn cover(geom: &Geom) -> Result<HashSet<CellIndex>, DomainError> {
    if geom.crosses_antimeridian() {
        return Err(DomainError::InvalidGeometry(
            "antimeridian-crossing polygons are not supported".into(),
        ));
    }

    // `ContainsCentroid` (the default) drops any cell whose centroid falls outside
    // the polygon, which undercounts small AOIs entirely (a Martha's-Vineyard-sized
    // polygon contains no res-3 centroid at all). `Covers` keeps every cell the
    // polygon touches, matching the overlap semantics §4.1 requires.
    let config = PolyfillConfig::new(resolution()).containment_mode(ContainmentMode::Covers);
    let cells: HashSet<CellIndex> = match geom {
        Geom::Polygon(p) => {
            let h3_poly = H3Polygon::from_degrees(p.clone())
                .map_err(|e| DomainError::InvalidGeometry(format!("{e}")))?;
            h3_poly.to_cells(config).collect()
        }
        Geom::MultiPolygon(mp) => {
            let h3_mp = H3MultiPolygon::from_degrees(mp.clone())
                .map_err(|e| DomainError::InvalidGeometry(format!("{e}")))?;
            h3_mp.to_cells(config).collect()
        }
    };

    if cells.is_empty() {
        return Err(DomainError::InvalidGeometry(
            "geometry cover is empty".into(),
        ));
    }

    Ok(cells)
}

/// Convenience form returning the cover as index strings, the representation stored
/// in the Index Store (§3).
pub fn cover_ids(geom: &Geom) -> Result<HashSet<String>, DomainError> {
    Ok(cover(geom)?.into_iter().map(|c| c.to_string()).collect())
}
