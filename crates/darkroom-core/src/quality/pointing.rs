/// Great-circle distance between two (ra, dec) positions in degrees,
/// returned in arcseconds.
pub fn angular_offset_arcsec(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (ra1, dec1) = (a.0.to_radians(), a.1.to_radians());
    let (ra2, dec2) = (b.0.to_radians(), b.1.to_radians());
    let sin_ddec = ((dec2 - dec1) / 2.0).sin();
    let sin_dra = ((ra2 - ra1) / 2.0).sin();
    let h = sin_ddec * sin_ddec + dec1.cos() * dec2.cos() * sin_dra * sin_dra;
    let angle = 2.0 * h.sqrt().min(1.0).asin();
    angle.to_degrees() * 3600.0
}
