//! Special functions backing the conjugate families.
//!
//! Mathematical Background
//! -----------------------
//! Everything here reduces to three classical kernels:
//! - the log-gamma function (Lanczos approximation),
//! - the regularized incomplete beta function `I_x(a, b)` (Lentz continued
//!   fraction), which gives Student's t and beta-prime distribution
//!   functions,
//! - the regularized incomplete gamma functions `P(a, x)` / `Q(a, x)`
//!   (series + continued fraction), which give the normal distribution
//!   functions and chi-squared tail probabilities.
//!
//! Accuracy is around 1e-13 relative over the parameter ranges the priors
//! produce, which is far inside the 1e-3 relative error the model selection
//! layer tolerates.

use crate::maths::numerics::{INF, MINUS_INF};

/// `ln(2 * pi)`.
pub(crate) const LOG_2_PI: f64 = 1.837_877_066_409_345_3;

const MAX_ITERATIONS: usize = 500;
const CONVERGENCE_EPS: f64 = 1e-15;
const LENTZ_TINY: f64 = 1e-300;

/// Natural log of the absolute value of the gamma function.
///
/// Lanczos approximation with g = 7 and 9 coefficients; reflection formula
/// below 0.5.
pub fn gamma_ln(x: f64) -> f64 {
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_93,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x.is_nan() {
        return f64::NAN;
    }
    if x < 0.5 {
        let sin_pi_x = (std::f64::consts::PI * x).sin();
        if sin_pi_x == 0.0 {
            // Poles at the non-positive integers.
            return INF;
        }
        return std::f64::consts::PI.ln() - sin_pi_x.abs().ln() - gamma_ln(1.0 - x);
    }

    let x = x - 1.0;
    let mut a = COEFFS[0];
    for (i, &c) in COEFFS.iter().enumerate().skip(1) {
        a += c / (x + i as f64);
    }
    let t = x + 7.5;
    0.5 * LOG_2_PI + (x + 0.5) * t.ln() - t + a.ln()
}

/// Regularized incomplete beta function `I_x(a, b)`.
///
/// Evaluated through the continued fraction on whichever side of the mean
/// converges fastest, using the symmetry `I_x(a, b) = 1 - I_{1-x}(b, a)`.
pub fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if !(a > 0.0) || !(b > 0.0) || x.is_nan() {
        return f64::NAN;
    }
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let ln_front =
        gamma_ln(a + b) - gamma_ln(a) - gamma_ln(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

/// Modified Lentz evaluation of the incomplete beta continued fraction.
fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;

    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < LENTZ_TINY {
        d = LENTZ_TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITERATIONS {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < LENTZ_TINY {
            d = LENTZ_TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < LENTZ_TINY {
            c = LENTZ_TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < LENTZ_TINY {
            d = LENTZ_TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < LENTZ_TINY {
            c = LENTZ_TINY;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;

        if (del - 1.0).abs() < CONVERGENCE_EPS {
            break;
        }
    }
    h
}

/// Inverse of the regularized incomplete beta function in its last argument.
///
/// Solves `I_x(a, b) = y` for `x` by bisection. Monotonicity of `I_x` makes
/// this unconditionally convergent; 200 halvings exhaust double precision.
pub fn incomplete_beta_inv(a: f64, b: f64, y: f64) -> f64 {
    if !(a > 0.0) || !(b > 0.0) || y.is_nan() {
        return f64::NAN;
    }
    if y <= 0.0 {
        return 0.0;
    }
    if y >= 1.0 {
        return 1.0;
    }

    let mut lo = 0.0_f64;
    let mut hi = 1.0_f64;
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if incomplete_beta(a, b, mid) < y {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo <= f64::EPSILON * hi {
            break;
        }
    }
    0.5 * (lo + hi)
}

/// Regularized lower incomplete gamma function `P(a, x)`.
pub fn gamma_p(a: f64, x: f64) -> f64 {
    if !(a > 0.0) || x.is_nan() || x < 0.0 {
        return f64::NAN;
    }
    if x == 0.0 {
        return 0.0;
    }
    if x < a + 1.0 {
        gamma_lower_series(a, x)
    } else {
        1.0 - gamma_upper_continued_fraction(a, x)
    }
}

/// Regularized upper incomplete gamma function `Q(a, x) = 1 - P(a, x)`.
///
/// Evaluated directly in the upper tail so `Q` keeps full relative precision
/// where `1 - P` would cancel.
pub fn gamma_q(a: f64, x: f64) -> f64 {
    if !(a > 0.0) || x.is_nan() || x < 0.0 {
        return f64::NAN;
    }
    if x == 0.0 {
        return 1.0;
    }
    if x < a + 1.0 {
        1.0 - gamma_lower_series(a, x)
    } else {
        gamma_upper_continued_fraction(a, x)
    }
}

fn gamma_lower_series(a: f64, x: f64) -> f64 {
    let mut ap = a;
    let mut term = 1.0 / a;
    let mut sum = term;
    for _ in 0..MAX_ITERATIONS {
        ap += 1.0;
        term *= x / ap;
        sum += term;
        if term.abs() < sum.abs() * CONVERGENCE_EPS {
            break;
        }
    }
    let ln_scale = a * x.ln() - x - gamma_ln(a);
    sum * ln_scale.exp()
}

fn gamma_upper_continued_fraction(a: f64, x: f64) -> f64 {
    let mut b = x + 1.0 - a;
    let mut c = 1.0 / LENTZ_TINY;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..=MAX_ITERATIONS {
        let an = -(i as f64) * (i as f64 - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < LENTZ_TINY {
            d = LENTZ_TINY;
        }
        c = b + an / c;
        if c.abs() < LENTZ_TINY {
            c = LENTZ_TINY;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;
        if (del - 1.0).abs() < CONVERGENCE_EPS {
            break;
        }
    }
    let ln_scale = a * x.ln() - x - gamma_ln(a);
    h * ln_scale.exp()
}

/// Standard normal distribution function.
///
/// Uses `erf(y) = P(1/2, y^2)`, so precision tracks the incomplete gamma
/// kernels in both tails.
pub fn normal_cdf(x: f64) -> f64 {
    let y = x / std::f64::consts::SQRT_2;
    if y >= 0.0 {
        0.5 * (1.0 + gamma_p(0.5, y * y))
    } else {
        0.5 * gamma_q(0.5, y * y)
    }
}

/// Standard normal quantile function.
///
/// Acklam's rational approximation polished with one Halley step against
/// [`normal_cdf`]; accurate to near machine precision on (0, 1). Arguments at
/// or outside the boundary saturate to the finite sentinels.
pub fn normal_quantile(p: f64) -> f64 {
    if p.is_nan() {
        return f64::NAN;
    }
    if p <= 0.0 {
        return MINUS_INF;
    }
    if p >= 1.0 {
        return INF;
    }

    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.02425;

    let mut x = if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    // One Halley step
    let e = normal_cdf(x) - p;
    let u = e * (0.5 * LOG_2_PI + 0.5 * x * x).exp();
    x -= u / (1.0 + 0.5 * x * u);
    x
}

/// Density of Student's t distribution with `df` degrees of freedom.
pub fn t_pdf(t: f64, df: f64) -> f64 {
    if !(df > 0.0) || t.is_nan() {
        return f64::NAN;
    }
    let half = 0.5 * (df + 1.0);
    (gamma_ln(half)
        - gamma_ln(0.5 * df)
        - 0.5 * (df * std::f64::consts::PI).ln()
        - half * (1.0 + t * t / df).ln())
    .exp()
}

/// Distribution function of Student's t with `df` degrees of freedom.
pub fn t_cdf(t: f64, df: f64) -> f64 {
    if !(df > 0.0) || t.is_nan() {
        return f64::NAN;
    }
    if t == 0.0 {
        return 0.5;
    }
    let x = df / (df + t * t);
    let p = 0.5 * incomplete_beta(0.5 * df, 0.5, x);
    if t > 0.0 {
        1.0 - p
    } else {
        p
    }
}

/// Quantile function of Student's t with `df` degrees of freedom.
///
/// Closed forms for one and two degrees of freedom; the incomplete beta
/// inverse otherwise. Boundary probabilities saturate to the finite
/// sentinels.
pub fn t_quantile(p: f64, df: f64) -> f64 {
    if !(df > 0.0) || p.is_nan() {
        return f64::NAN;
    }
    if p <= 0.0 {
        return MINUS_INF;
    }
    if p >= 1.0 {
        return INF;
    }
    if p == 0.5 {
        return 0.0;
    }
    if df == 1.0 {
        return (std::f64::consts::PI * (p - 0.5)).tan();
    }
    if df == 2.0 {
        return (2.0 * p - 1.0) / (2.0 * p * (1.0 - p)).sqrt();
    }

    let tail = if p < 0.5 { 2.0 * p } else { 2.0 * (1.0 - p) };
    let x = incomplete_beta_inv(0.5 * df, 0.5, tail);
    let t = if x > 0.0 {
        (df * (1.0 - x) / x).sqrt()
    } else {
        INF
    };
    if p < 0.5 {
        -t
    } else {
        t
    }
}

/// Probability of seeing a less likely collection of samples, combining the
/// per-sample probabilities by Fisher's method.
///
/// With total sample count `n` and `s = -sum_i c_i * ln(p_i)`, the statistic
/// `2s` is chi-squared with `2n` degrees of freedom under the joint null, so
/// the combined probability is `Q(n, s)`. For a single sample this reduces to
/// the sample's own probability since `Q(1, -ln(p)) = p`.
pub fn joint_probability_of_less_likely(count: f64, minus_log_product: f64) -> f64 {
    if !(count > 0.0) || minus_log_product.is_nan() || minus_log_product < 0.0 {
        return f64::NAN;
    }
    gamma_q(count, minus_log_product)
}
