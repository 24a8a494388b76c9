//! Tessellation levels and pixel geometry.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{HealpixError, Result};
use crate::{nested, ring};

/// Largest supported resolution parameter (`2^29`).
pub const MAX_NSIDE: u32 = 1 << 29;

/// Pixel numbering scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelOrdering {
    /// Iso-latitude rings, north to south.
    #[default]
    Ring,
    /// Hierarchical quadtree within each base face.
    Nested,
}

impl PixelOrdering {
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelOrdering::Ring => "ring",
            PixelOrdering::Nested => "nested",
        }
    }
}

impl fmt::Display for PixelOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PixelOrdering {
    type Err = HealpixError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ring" => Ok(PixelOrdering::Ring),
            "nested" | "nest" => Ok(PixelOrdering::Nested),
            other => Err(HealpixError::UnknownOrdering(other.to_string())),
        }
    }
}

/// A HEALPix resolution together with its pixel ordering.
///
/// Contains `12 * nside^2` equal-area pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TessellationLevel {
    nside: u32,
    ordering: PixelOrdering,
}

impl TessellationLevel {
    /// Validate and construct a level.
    pub fn new(nside: u32, ordering: PixelOrdering) -> Result<Self> {
        if nside == 0 || nside > MAX_NSIDE {
            return Err(HealpixError::InvalidNside {
                nside,
                max: MAX_NSIDE,
            });
        }
        if ordering == PixelOrdering::Nested && !nside.is_power_of_two() {
            return Err(HealpixError::NestedRequiresPowerOfTwo(nside));
        }
        Ok(Self { nside, ordering })
    }

    pub fn nside(&self) -> u32 {
        self.nside
    }

    pub fn ordering(&self) -> PixelOrdering {
        self.ordering
    }

    /// Total number of pixels, `12 * nside^2`.
    pub fn pixel_count(&self) -> u64 {
        12 * (self.nside as u64) * (self.nside as u64)
    }

    /// Pixel containing the given geographic point.
    ///
    /// Longitude may be in any convention (it is reduced modulo 360).
    /// Latitude is clamped to `[-90, 90]`.
    pub fn lonlat_to_pixel(&self, lon_deg: f64, lat_deg: f64) -> u64 {
        let z = lat_deg.to_radians().sin().clamp(-1.0, 1.0);
        let phi = lon_deg.to_radians();
        let nside = self.nside as i64;
        let pix = match self.ordering {
            PixelOrdering::Ring => ring::ang2pix(nside, z, phi),
            PixelOrdering::Nested => nested::ang2pix(nside, z, phi),
        };
        pix as u64
    }

    /// Geographic center `(lon, lat)` of a pixel, longitude in `[0, 360)`.
    pub fn pixel_center(&self, pixel: u64) -> Result<(f64, f64)> {
        let count = self.pixel_count();
        if pixel >= count {
            return Err(HealpixError::InvalidPixel {
                pixel,
                nside: self.nside,
                count,
            });
        }
        let nside = self.nside as i64;
        let (z, phi) = match self.ordering {
            PixelOrdering::Ring => ring::pix2ang(nside, pixel as i64),
            PixelOrdering::Nested => nested::pix2ang(nside, pixel as i64),
        };
        let lat = z.clamp(-1.0, 1.0).asin().to_degrees();
        let lon = phi.to_degrees().rem_euclid(360.0);
        Ok((lon, lat))
    }

    /// Centers of every pixel in index order.
    pub fn pixel_centers(&self) -> Vec<(f64, f64)> {
        let nside = self.nside as i64;
        (0..self.pixel_count() as i64)
            .map(|p| {
                let (z, phi) = match self.ordering {
                    PixelOrdering::Ring => ring::pix2ang(nside, p),
                    PixelOrdering::Nested => nested::pix2ang(nside, p),
                };
                (
                    phi.to_degrees().rem_euclid(360.0),
                    z.clamp(-1.0, 1.0).asin().to_degrees(),
                )
            })
            .collect()
    }
}

impl fmt::Display for TessellationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nside={} ({})", self.nside, self.ordering)
    }
}
