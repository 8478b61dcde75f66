#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use selscan_core::{ScanDimensions, ScanFloat, StridedView};
use selscan_kernels::ScanInputs;

/// Owned, contiguous scan inputs.
#[derive(Clone)]
pub struct Fixture<T> {
    pub dims: ScanDimensions,
    pub a: Vec<T>,
    pub b: Vec<T>,
    pub c: Vec<T>,
    pub d: Option<Vec<T>>,
    pub u: Vec<T>,
    pub delta: Vec<T>,
    pub bias: Option<Vec<T>>,
}

impl<T: ScanFloat> Fixture<T> {
    /// Reproducible random inputs. A is negative so the scan is stable.
    pub fn random(dims: ScanDimensions, seed: u64, with_d: bool, with_bias: bool) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut draw = |n: usize, lo: f64, hi: f64| -> Vec<T> {
            (0..n)
                .map(|_| num_traits::cast(rng.gen_range(lo..hi)).unwrap())
                .collect()
        };
        let bc: usize = dims.bc_dims().iter().product();
        let seq: usize = dims.seq_dims().iter().product();
        Self {
            dims,
            a: draw(dims.channels * dims.state_size, -2.0, -0.1),
            b: draw(bc, -1.0, 1.0),
            c: draw(bc, -1.0, 1.0),
            d: with_d.then(|| draw(dims.channels, -1.0, 1.0)),
            u: draw(seq, -1.0, 1.0),
            delta: draw(seq, -1.0, 0.5),
            bias: with_bias.then(|| draw(dims.channels, -0.5, 0.5)),
        }
    }

    pub fn inputs(&self) -> ScanInputs<'_, T> {
        let dims = &self.dims;
        ScanInputs {
            a: StridedView::contiguous(&self.a, &dims.a_dims()).unwrap(),
            b: StridedView::contiguous(&self.b, &dims.bc_dims()).unwrap(),
            c: StridedView::contiguous(&self.c, &dims.bc_dims()).unwrap(),
            d: self
                .d
                .as_deref()
                .map(|d| StridedView::contiguous(d, &dims.channel_dims()).unwrap()),
            u: StridedView::contiguous(&self.u, &dims.seq_dims()).unwrap(),
            delta: StridedView::contiguous(&self.delta, &dims.seq_dims()).unwrap(),
            delta_bias: self
                .bias
                .as_deref()
                .map(|b| StridedView::contiguous(b, &dims.channel_dims()).unwrap()),
        }
    }
}
