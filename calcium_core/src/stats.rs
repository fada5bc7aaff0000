//! Inverse cumulative distribution functions used to map uniform draws.

use crate::{Error, Result};

/// Normal distribution with a non-negative standard deviation
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Normal {
    mean: f64,
    sd: f64,
}

impl Normal {
    pub fn new(mean: f64, sd: f64) -> Result<Self> {
        if !mean.is_finite() || !sd.is_finite() || sd < 0.0 {
            return Err(Error::Config(format!(
                "Invalid normal distribution parameters: mean {}, sd {}",
                mean, sd
            )));
        }
        Ok(Self { mean, sd })
    }

    /// Quantile function. A zero-width distribution returns its mean.
    pub fn ppf(&self, p: f64) -> f64 {
        if self.sd == 0.0 {
            return self.mean;
        }
        self.mean + self.sd * standard_normal_ppf(p)
    }
}

/// Triangular distribution on `[lower, upper]` peaking at `mode`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Triangular {
    lower: f64,
    mode: f64,
    upper: f64,
}

impl Triangular {
    pub fn new(lower: f64, mode: f64, upper: f64) -> Result<Self> {
        if !(lower <= mode && mode <= upper) || !lower.is_finite() || !upper.is_finite() {
            return Err(Error::Config(format!(
                "Invalid triangular distribution: lower {}, mode {}, upper {}",
                lower, mode, upper
            )));
        }
        Ok(Self { lower, mode, upper })
    }

    pub fn ppf(&self, p: f64) -> f64 {
        let width = self.upper - self.lower;
        if width == 0.0 {
            return self.lower;
        }
        let p = p.clamp(0.0, 1.0);
        let split = (self.mode - self.lower) / width;
        if p < split {
            self.lower + (p * width * (self.mode - self.lower)).sqrt()
        } else {
            self.upper - ((1.0 - p) * width * (self.upper - self.mode)).sqrt()
        }
    }
}

// Wichura (1988), algorithm AS241 PPND16.
const A: [f64; 8] = [
    3.387_132_872_796_366_6,
    1.331_416_678_917_843_8e2,
    1.971_590_950_306_551_3e3,
    1.373_169_376_550_946e4,
    4.592_195_393_154_987e4,
    6.726_577_092_700_87e4,
    3.343_057_558_358_813e4,
    2.509_080_928_730_122_7e3,
];
const B: [f64; 8] = [
    1.0,
    4.231_333_070_160_091e1,
    6.871_870_074_920_579e2,
    5.394_196_021_424_751e3,
    2.121_379_430_158_659_7e4,
    3.930_789_580_009_271e4,
    2.872_908_573_572_194_3e4,
    5.226_495_278_852_854_5e3,
];
const C: [f64; 8] = [
    1.423_437_110_749_683_5,
    4.630_337_846_156_545,
    5.769_497_221_460_691,
    3.647_848_324_763_204_5,
    1.270_458_252_452_368_4,
    2.417_807_251_774_506e-1,
    2.272_384_498_926_918_4e-2,
    7.745_450_142_783_414e-4,
];
const D: [f64; 8] = [
    1.0,
    2.053_191_626_637_758_8,
    1.676_384_830_183_803_8,
    6.897_673_349_851e-1,
    1.481_039_764_274_800_8e-1,
    1.519_866_656_361_645_7e-2,
    5.475_938_084_995_345e-4,
    1.050_750_071_644_416_8e-9,
];
const E: [f64; 8] = [
    6.657_904_643_501_103,
    5.463_784_911_164_114,
    1.784_826_539_917_291_3,
    2.965_605_718_285_048_7e-1,
    2.653_218_952_657_612_4e-2,
    1.242_660_947_388_078_4e-3,
    2.711_555_568_743_487_6e-5,
    2.010_334_399_292_288_1e-7,
];
const F: [f64; 8] = [
    1.0,
    5.998_322_065_558_879e-1,
    1.369_298_809_227_358e-1,
    1.487_536_129_085_061_5e-2,
    7.868_691_311_456_133e-4,
    1.846_318_317_510_054_8e-5,
    1.421_511_758_316_446e-7,
    2.044_263_103_389_939_7e-15,
];

fn horner(coefficients: &[f64; 8], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// Quantile function of the standard normal distribution
pub fn standard_normal_ppf(p: f64) -> f64 {
    if p.is_nan() {
        return f64::NAN;
    }
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let q = p - 0.5;
    if q.abs() <= 0.425 {
        let r = 0.180625 - q * q;
        return q * horner(&A, r) / horner(&B, r);
    }

    let tail = if q < 0.0 { p } else { 1.0 - p };
    let r = (-tail.ln()).sqrt();
    let value = if r <= 5.0 {
        let r = r - 1.6;
        horner(&C, r) / horner(&D, r)
    } else {
        let r = r - 5.0;
        horner(&E, r) / horner(&F, r)
    };

    if q < 0.0 {
        -value
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_standard_normal_known_quantiles() {
        assert_eq!(standard_normal_ppf(0.5), 0.0);
        assert!(close(standard_normal_ppf(0.975), 1.959_963_984_540_054, 1e-9));
        assert!(close(standard_normal_ppf(0.025), -1.959_963_984_540_054, 1e-9));
        assert!(close(standard_normal_ppf(0.8413447460685429), 1.0, 1e-9));
        assert!(close(standard_normal_ppf(1e-10), -6.361_340_902_404_056, 1e-7));
    }

    #[test]
    fn test_standard_normal_edges() {
        assert_eq!(standard_normal_ppf(0.0), f64::NEG_INFINITY);
        assert_eq!(standard_normal_ppf(1.0), f64::INFINITY);
        assert!(standard_normal_ppf(f64::NAN).is_nan());
    }

    #[test]
    fn test_normal_scales_and_shifts() {
        let normal = Normal::new(10.0, 2.0).unwrap();
        assert_eq!(normal.ppf(0.5), 10.0);
        assert!(close(normal.ppf(0.975), 10.0 + 2.0 * 1.959_963_984_540_054, 1e-8));
    }

    #[test]
    fn test_zero_sd_returns_mean() {
        let normal = Normal::new(0.5, 0.0).unwrap();
        assert_eq!(normal.ppf(0.0), 0.5);
        assert_eq!(normal.ppf(0.3), 0.5);
    }

    #[test]
    fn test_normal_rejects_negative_sd() {
        assert!(Normal::new(0.0, -1.0).is_err());
    }

    #[test]
    fn test_triangular_quantiles() {
        let tri = Triangular::new(0.5, 0.6, 0.7).unwrap();
        assert!(close(tri.ppf(0.0), 0.5, 1e-12));
        assert!(close(tri.ppf(1.0), 0.7, 1e-12));
        assert!(close(tri.ppf(0.5), 0.6, 1e-12));

        let degenerate = Triangular::new(0.4, 0.4, 0.4).unwrap();
        assert_eq!(degenerate.ppf(0.9), 0.4);

        assert!(Triangular::new(0.6, 0.5, 0.7).is_err());
    }
}
