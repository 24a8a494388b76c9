//! Ring-ordered pixel indexing.
//!
//! Pixels are numbered along iso-latitude rings from the north pole to the
//! south pole, west to east within a ring.

use std::f64::consts::{FRAC_PI_2, PI, TAU};

/// Map `(z = cos(theta), phi)` to a ring pixel index.
pub(crate) fn ang2pix(nside: i64, z: f64, phi: f64) -> i64 {
    let za = z.abs();
    let tt = phi.rem_euclid(TAU) / FRAC_PI_2; // in [0, 4)
    let nf = nside as f64;
    let npix = 12 * nside * nside;
    let ncap = 2 * nside * (nside - 1);

    if za <= 2.0 / 3.0 {
        // Equatorial belt
        let nl4 = 4 * nside;
        let temp1 = nf * (0.5 + tt);
        let temp2 = nf * z * 0.75;
        let jp = (temp1 - temp2) as i64; // ascending edge line
        let jm = (temp1 + temp2) as i64; // descending edge line

        let ir = nside + 1 + jp - jm; // ring index, 1..=2*nside+1
        let kshift = 1 - (ir & 1);
        let ip = (jp + jm - nside + kshift + 1) / 2;
        let ip = ip.rem_euclid(nl4);

        ncap + (ir - 1) * nl4 + ip
    } else {
        // Polar caps
        let tp = tt - tt.floor();
        let tmp = nf * (3.0 * (1.0 - za)).sqrt();
        let jp = (tp * tmp) as i64;
        let jm = ((1.0 - tp) * tmp) as i64;

        let ir = jp + jm + 1; // ring counted from the closest pole
        let ip = ((tt * ir as f64) as i64).rem_euclid(4 * ir);

        if z > 0.0 {
            2 * ir * (ir - 1) + ip
        } else {
            npix - 2 * ir * (ir + 1) + ip
        }
    }
}

/// Map a ring pixel index to the `(z, phi)` of its center.
pub(crate) fn pix2ang(nside: i64, pix: i64) -> (f64, f64) {
    let nf = nside as f64;
    let npix = 12 * nside * nside;
    let ncap = 2 * nside * (nside - 1);

    if pix < ncap {
        // North polar cap
        let iring = (1 + isqrt(1 + 2 * pix)) >> 1;
        let iphi = pix + 1 - 2 * iring * (iring - 1);
        let z = 1.0 - (iring * iring) as f64 / (3.0 * nf * nf);
        let phi = (iphi as f64 - 0.5) * FRAC_PI_2 / iring as f64;
        (z, phi)
    } else if pix < npix - ncap {
        // Equatorial belt
        let ip = pix - ncap;
        let iring = ip / (4 * nside) + nside;
        let iphi = ip % (4 * nside) + 1;
        let fodd = if (iring + nside) & 1 == 1 { 1.0 } else { 0.5 };
        let z = (2 * nside - iring) as f64 * 2.0 / (3.0 * nf);
        let phi = (iphi as f64 - fodd) * PI / (2.0 * nf);
        (z, phi)
    } else {
        // South polar cap
        let ip = npix - pix;
        let iring = (1 + isqrt(2 * ip - 1)) >> 1;
        let iphi = 4 * iring + 1 - (ip - 2 * iring * (iring - 1));
        let z = -1.0 + (iring * iring) as f64 / (3.0 * nf * nf);
        let phi = (iphi as f64 - 0.5) * FRAC_PI_2 / iring as f64;
        (z, phi)
    }
}

/// Integer square root, exact for all values reachable here.
fn isqrt(v: i64) -> i64 {
    let mut r = (v as f64).sqrt() as i64;
    while r * r > v {
        r -= 1;
    }
    while (r + 1) * (r + 1) <= v {
        r += 1;
    }
    r
}
