//! Step-size discretization shared by the forward and backward scans.
//!
//! `delta_disc = softplus(delta + bias)` or `delta + bias`. The softplus and
//! its derivative are written in forms that never overflow, so the backward
//! pass differentiates exactly the function the forward pass evaluated.

use num_traits::Float;

/// Softplus `log(1 + exp(x))` as `max(x, 0) + log1p(exp(-|x|))`.
#[inline]
pub fn softplus<T: Float>(x: T) -> T {
    x.max(T::zero()) + (-x.abs()).exp().ln_1p()
}

/// Logistic sigmoid, the derivative of `softplus`.
#[inline]
pub fn sigmoid<T: Float>(x: T) -> T {
    if x >= T::zero() {
        T::one() / (T::one() + (-x).exp())
    } else {
        let e = x.exp();
        e / (T::one() + e)
    }
}

/// `exp(x)`, saturating at the largest finite value instead of `inf`.
#[inline]
pub fn saturating_exp<T: Float>(x: T) -> T {
    let e = x.exp();
    if e == T::infinity() { T::max_value() } else { e }
}

/// Decayed state `decay * x`, clamped to the finite range. A zero state stays
/// zero whatever the decay, so a saturated decay never turns it into `NaN`.
#[inline]
pub fn carry<T: Float>(decay: T, x: T) -> T {
    if x == T::zero() {
        return T::zero();
    }
    let v = decay * x;
    let max = T::max_value();
    if v > max {
        max
    } else if v < -max {
        -max
    } else {
        v
    }
}

/// A discretization mode, lifted to a type so the scan loops are
/// monomorphized once per mode instead of branching per element.
pub trait Discretize: Send + Sync + 'static {
    const SOFTPLUS: bool;

    /// Discrete step from the biased raw step.
    fn apply<T: Float>(pre: T) -> T;

    /// `d apply / d pre`.
    fn grad<T: Float>(pre: T) -> T;
}

pub struct Softplus;

pub struct Identity;

impl Discretize for Softplus {
    const SOFTPLUS: bool = true;

    #[inline]
    fn apply<T: Float>(pre: T) -> T {
        softplus(pre)
    }

    #[inline]
    fn grad<T: Float>(pre: T) -> T {
        sigmoid(pre)
    }
}

impl Discretize for Identity {
    const SOFTPLUS: bool = false;

    #[inline]
    fn apply<T: Float>(pre: T) -> T {
        pre
    }

    #[inline]
    fn grad<T: Float>(_pre: T) -> T {
        T::one()
    }
}

/// Runtime-flag form of [`Discretize::apply`].
#[inline]
pub fn discretize<T: Float>(raw: T, bias: Option<T>, delta_softplus: bool) -> T {
    let pre = raw + bias.unwrap_or_else(T::zero);
    if delta_softplus { Softplus::apply(pre) } else { Identity::apply(pre) }
}

/// Derivative of [`discretize`] with respect to `raw` (and equally `bias`).
#[inline]
pub fn discretize_grad<T: Float>(raw: T, bias: Option<T>, delta_softplus: bool) -> T {
    let pre = raw + bias.unwrap_or_else(T::zero);
    if delta_softplus { Softplus::grad(pre) } else { Identity::grad(pre) }
}

/// Bind a `Discretize` type for `$flag` and evaluate `$body` with it.
///
/// ```ignore
/// discretize_switch!(cfg.delta_softplus, Disc, scan_unit::<f32, Disc>(..))
/// ```
#[macro_export]
macro_rules! discretize_switch {
    ($flag:expr, $disc:ident, $body:expr) => {
        if $flag {
            #[allow(dead_code)]
            type $disc = $crate::discretize::Softplus;
            $body
        } else {
            #[allow(dead_code)]
            type $disc = $crate::discretize::Identity;
            $body
        }
    };
}
