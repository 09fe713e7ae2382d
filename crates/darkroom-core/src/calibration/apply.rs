use ndarray::Zip;

use crate::error::{ReductionError, Result};
use crate::frame::Frame;

fn check_shape(frame: &Frame, master: &Frame) -> Result<()> {
    if frame.data.dim() != master.data.dim() {
        return Err(ReductionError::ShapeMismatch {
            frame: frame.data.dim(),
            calibration: master.data.dim(),
        });
    }
    Ok(())
}

/// `frame -= scale * master`, adding uncertainties in quadrature and
/// merging masks.
pub fn subtract_master(frame: &mut Frame, master: &Frame, scale: f64) -> Result<()> {
    check_shape(frame, master)?;
    let k = scale as f32;
    Zip::from(&mut frame.data)
        .and(&mut frame.uncertainty)
        .and(&mut frame.mask)
        .and(&master.data)
        .and(&master.uncertainty)
        .and(&master.mask)
        .for_each(|d, u, m, &md, &mu, &mm| {
            *d -= k * md;
            *u = (*u * *u + (k * mu) * (k * mu)).sqrt();
            *m |= mm;
        });
    Ok(())
}

/// `frame /= master`, propagating relative uncertainties. Pixels where the
/// master is not positive are masked and left unchanged.
pub fn divide_by_master(frame: &mut Frame, master: &Frame) -> Result<()> {
    check_shape(frame, master)?;
    Zip::from(&mut frame.data)
        .and(&mut frame.uncertainty)
        .and(&mut frame.mask)
        .and(&master.data)
        .and(&master.uncertainty)
        .and(&master.mask)
        .for_each(|d, u, m, &md, &mu, &mm| {
            *m |= mm;
            if md <= 0.0 || !md.is_finite() {
                *m |= 1;
                return;
            }
            let a = *u / md;
            let b = *d * mu / (md * md);
            *u = (a * a + b * b).sqrt();
            *d /= md;
        });
    Ok(())
}
