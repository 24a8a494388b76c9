//! Nested pixel indexing.
//!
//! Each of the twelve base faces is subdivided as a quadtree; the index
//! within a face interleaves the bits of the face-local `(ix, iy)`.

use std::f64::consts::{FRAC_PI_2, TAU};

/// Ring number (in units of nside) of the southernmost corner of each face.
const JRLL: [i64; 12] = [2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4];
/// Longitude (in units of pi/4) of the southernmost corner of each face.
const JPLL: [i64; 12] = [1, 3, 5, 7, 0, 2, 4, 6, 1, 3, 5, 7];

fn spread_bits(v: i64) -> i64 {
    let v = v as u64;
    let mut out = 0u64;
    for i in 0..32 {
        out |= ((v >> i) & 1) << (2 * i);
    }
    out as i64
}

fn compress_bits(v: i64) -> i64 {
    let v = v as u64;
    let mut out = 0u64;
    for i in 0..32 {
        out |= ((v >> (2 * i)) & 1) << i;
    }
    out as i64
}

fn xyf2nest(nside: i64, ix: i64, iy: i64, face: i64) -> i64 {
    face * nside * nside + spread_bits(ix) + (spread_bits(iy) << 1)
}

fn nest2xyf(nside: i64, pix: i64) -> (i64, i64, i64) {
    let npface = nside * nside;
    let face = pix / npface;
    let ipf = pix % npface;
    (compress_bits(ipf), compress_bits(ipf >> 1), face)
}

/// Map `(z = cos(theta), phi)` to a nested pixel index. `nside` must be a power of two.
pub(crate) fn ang2pix(nside: i64, z: f64, phi: f64) -> i64 {
    let za = z.abs();
    let tt = phi.rem_euclid(TAU) / FRAC_PI_2; // in [0, 4)
    let nf = nside as f64;

    if za <= 2.0 / 3.0 {
        let temp1 = nf * (0.5 + tt);
        let temp2 = nf * z * 0.75;
        let jp = (temp1 - temp2) as i64;
        let jm = (temp1 + temp2) as i64;
        let ifp = jp / nside;
        let ifm = jm / nside;

        let face = if ifp == ifm {
            ifp | 4
        } else if ifp < ifm {
            ifp
        } else {
            ifm + 8
        };

        let ix = jm & (nside - 1);
        let iy = nside - (jp & (nside - 1)) - 1;
        xyf2nest(nside, ix, iy, face)
    } else {
        let ntt = (tt as i64).min(3);
        let tp = tt - ntt as f64;
        let tmp = nf * (3.0 * (1.0 - za)).sqrt();

        let jp = ((tp * tmp) as i64).min(nside - 1);
        let jm = (((1.0 - tp) * tmp) as i64).min(nside - 1);

        if z >= 0.0 {
            xyf2nest(nside, nside - jm - 1, nside - jp - 1, ntt)
        } else {
            xyf2nest(nside, jp, jm, ntt + 8)
        }
    }
}

/// Map a nested pixel index to the `(z, phi)` of its center.
pub(crate) fn pix2ang(nside: i64, pix: i64) -> (f64, f64) {
    let nf = nside as f64;
    let nl4 = 4 * nside;
    let (ix, iy, face) = nest2xyf(nside, pix);
    let face = face as usize;

    let jr = JRLL[face] * nside - ix - iy - 1;

    let (nr, z, kshift) = if jr < nside {
        let nr = jr;
        (nr, 1.0 - (nr * nr) as f64 / (3.0 * nf * nf), 0)
    } else if jr > 3 * nside {
        let nr = nl4 - jr;
        (nr, (nr * nr) as f64 / (3.0 * nf * nf) - 1.0, 0)
    } else {
        (nside, (2 * nside - jr) as f64 * 2.0 / (3.0 * nf), (jr - nside) & 1)
    };

    let mut jp = (JPLL[face] * nr + ix - iy + 1 + kshift) / 2;
    if jp > nl4 {
        jp -= nl4;
    }
    if jp < 1 {
        jp += nl4;
    }

    let phi = (jp as f64 - (kshift + 1) as f64 * 0.5) * (FRAC_PI_2 / nr as f64);
    (z, phi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_interleave() {
        assert_eq!(spread_bits(0b11), 0b0101);
        assert_eq!(compress_bits(0b0101), 0b11);
        for v in [0, 1, 7, 255, 4095] {
            assert_eq!(compress_bits(spread_bits(v)), v);
        }
    }

    #[test]
    fn test_nside1_faces() {
        // At nside=1 every face holds exactly one pixel and nested == face number
        for face in 0..12 {
            let (z, phi) = pix2ang(1, face);
            assert_eq!(ang2pix(1, z, phi), face);
        }
    }

    #[test]
    fn test_roundtrip_nside8() {
        let nside = 8;
        for pix in 0..12 * nside * nside {
            let (z, phi) = pix2ang(nside, pix);
            assert_eq!(ang2pix(nside, z, phi), pix, "pixel {}", pix);
        }
    }
}
