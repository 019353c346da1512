use crate::backend::BoundingBox;
use crate::{Error, Result};

/// Parse `west,south,east,north` in degrees.
///
/// Fewer than four coordinates is a malformed box; extra trailing values are
/// ignored.
pub fn parse_bbox(value: &str) -> Result<BoundingBox> {
    let parts: Vec<&str> = value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    if parts.len() < 4 {
        return Err(Error::invalid_bounding_box(value));
    }

    let mut coords = [0f64; 4];
    for (slot, part) in coords.iter_mut().zip(&parts) {
        *slot = part.parse::<f64>().map_err(|_| {
            Error::invalid_parameter("bbox", format!("'{}' is not a number", part))
        })?;
        if !slot.is_finite() {
            return Err(Error::invalid_parameter(
                "bbox",
                format!("'{}' is not a finite coordinate", part),
            ));
        }
    }

    let [west, south, east, north] = coords;
    Ok(BoundingBox {
        west,
        south,
        east,
        north,
    })
}
