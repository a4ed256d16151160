//! Bounds, scales and default values of fit parameters.

use crate::domain::{AtmosphereSpec, ParamName, SourceFormat};
use crate::engine::AtmosphereGrid;
use crate::error::AppError;

/// Abundance range (log ε) accepted by the fit.
pub const ABUND_RANGE: (f64, f64) = (-10.0, 11.0);
/// Half-widths (teff, logg, monh) around a single-model atmosphere.
pub const SINGLE_MODEL_WINDOW: (f64, f64, f64) = (500.0, 1.0, 1.0);

/// Box constraints, one `[lower, upper]` pair per parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn unbounded(n: usize) -> Self {
        Self {
            lower: vec![f64::NEG_INFINITY; n],
            upper: vec![f64::INFINITY; n],
        }
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn clip(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .enumerate()
            .map(|(i, v)| v.clamp(self.lower[i], self.upper[i]))
            .collect()
    }

    pub fn contains(&self, x: &[f64]) -> bool {
        x.iter()
            .enumerate()
            .all(|(i, v)| *v >= self.lower[i] && *v <= self.upper[i])
    }
}

/// Bounds for `params`.
///
/// Temperature, gravity and metallicity are bounded by the atmosphere source:
/// the extents of a grid (`.sav`), or a window around a single model (`.krz`).
/// The source is only consulted when one of them is fitted.
pub fn get_bounds<A: AtmosphereGrid>(
    params: &[ParamName],
    atmo: &AtmosphereSpec,
    grid: &A,
) -> Result<Bounds, AppError> {
    let needs_atmo = params
        .iter()
        .any(|p| matches!(p, ParamName::Teff | ParamName::Logg | ParamName::Monh));

    let mut atmo_bounds = None;
    if needs_atmo {
        atmo_bounds = Some(match atmo.source_format()? {
            SourceFormat::Grid => {
                let extent = grid.extent(&atmo.source)?;
                (extent.teff, extent.logg, extent.monh)
            }
            SourceFormat::SingleModel => {
                let model = atmo.model.as_ref().ok_or_else(|| {
                    AppError::new(
                        2,
                        format!("Single-model atmosphere '{}' has no model loaded.", atmo.source),
                    )
                })?;
                let (dt, dg, dm) = SINGLE_MODEL_WINDOW;
                (
                    (model.teff - dt, model.teff + dt),
                    (model.logg - dg, model.logg + dg),
                    (model.monh - dm, model.monh + dm),
                )
            }
        });
    }

    let mut bounds = Bounds::unbounded(0);
    for p in params {
        let (lo, hi) = match (p, atmo_bounds) {
            (ParamName::Teff, Some((teff, _, _))) => teff,
            (ParamName::Logg, Some((_, logg, _))) => logg,
            (ParamName::Monh, Some((_, _, monh))) => monh,
            (ParamName::Vmic | ParamName::Vmac | ParamName::Vsini, _) => (0.0, f64::INFINITY),
            (ParamName::Abund(_), _) => ABUND_RANGE,
            _ => (f64::NEG_INFINITY, f64::INFINITY),
        };
        bounds.lower.push(lo);
        bounds.upper.push(hi);
    }
    Ok(bounds)
}

/// Variable scales: temperature is of order 1000, everything else of order 1.
pub fn get_scale(params: &[ParamName]) -> Vec<f64> {
    params
        .iter()
        .map(|p| if *p == ParamName::Teff { 1000.0 } else { 1.0 })
        .collect()
}

/// Default starting value for a parameter without a current value.
pub fn default_value(name: ParamName) -> Option<f64> {
    match name {
        ParamName::Teff => Some(5778.0),
        ParamName::Logg => Some(4.4),
        ParamName::Monh => Some(0.0),
        ParamName::Vmac | ParamName::Vmic => Some(1.0),
        ParamName::Vsini => None,
        ParamName::Abund(el) => el.solar(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Element;
    use crate::engine::{AnalyticAtmospheres, ANALYTIC_GRID_EXTENT};

    #[test]
    fn grid_source_bounds_come_from_extents() {
        let grid = AnalyticAtmospheres::default();
        let params = [ParamName::Teff, ParamName::Vsini, ParamName::Logg];
        let b = get_bounds(&params, &AtmosphereSpec::grid("marcs.sav"), &grid).unwrap();
        assert_eq!((b.lower[0], b.upper[0]), ANALYTIC_GRID_EXTENT.teff);
        assert_eq!((b.lower[1], b.upper[1]), (0.0, f64::INFINITY));
        assert_eq!((b.lower[2], b.upper[2]), ANALYTIC_GRID_EXTENT.logg);
    }

    #[test]
    fn single_model_bounds_surround_the_model() {
        let grid = AnalyticAtmospheres::default();
        let model = grid.gray_model(5200.0, 4.1, -0.3);
        let spec = AtmosphereSpec::embedded("star.krz", model);
        let b = get_bounds(&[ParamName::Teff, ParamName::Monh], &spec, &grid).unwrap();
        assert_eq!((b.lower[0], b.upper[0]), (4700.0, 5700.0));
        assert!((b.lower[1] + 1.3).abs() < 1e-12 && (b.upper[1] - 0.7).abs() < 1e-12);
    }

    #[test]
    fn unknown_source_is_fatal_only_when_needed() {
        let grid = AnalyticAtmospheres::default();
        let spec = AtmosphereSpec::grid("model.fits");
        assert_eq!(get_bounds(&[ParamName::Teff], &spec, &grid).unwrap_err().exit_code(), 2);

        let fe = Element::from_symbol("Fe").unwrap();
        let b = get_bounds(&[ParamName::Abund(fe), ParamName::Vmic], &spec, &grid).unwrap();
        assert_eq!((b.lower[0], b.upper[0]), ABUND_RANGE);
    }

    #[test]
    fn only_temperature_is_scaled() {
        let fe = Element::from_symbol("Fe").unwrap();
        assert_eq!(
            get_scale(&[ParamName::Logg, ParamName::Teff, ParamName::Abund(fe)]),
            vec![1.0, 1000.0, 1.0]
        );
    }

    #[test]
    fn defaults_cover_solar_abundances() {
        let fe = Element::from_symbol("Fe").unwrap();
        assert_eq!(default_value(ParamName::Teff), Some(5778.0));
        assert_eq!(default_value(ParamName::Abund(fe)), fe.solar());
        assert_eq!(default_value(ParamName::Vsini), None);
    }
}
