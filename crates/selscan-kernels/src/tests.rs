//! Finite-difference gradient checks for the backward scan.

#[cfg(test)]
mod scan_grad_tests {
    use selscan_core::{ScanConfig, ScanDimensions, StridedView};

    use crate::{selective_scan, selective_scan_backward, ScanGradients, ScanInputs};

    const EPS: f64 = 1e-6;
    const TOL: f64 = 1e-4;

    #[derive(Clone)]
    struct Fixture {
        dims: ScanDimensions,
        a: Vec<f64>,
        b: Vec<f64>,
        c: Vec<f64>,
        d: Option<Vec<f64>>,
        u: Vec<f64>,
        delta: Vec<f64>,
        bias: Option<Vec<f64>>,
    }

    impl Fixture {
        /// batch=1, channels=2, state=2, seq_len=4, one group.
        fn small(with_d: bool, with_bias: bool) -> Self {
            let dims = ScanDimensions::new(1, 2, 4, 2, 1);
            Self {
                dims,
                a: vec![-0.5, -1.0, -0.8, -1.5],
                b: (0..8).map(|i| 0.2 * ((i % 3) as f64 + 1.0)).collect(),
                c: (0..8).map(|i| 0.15 * ((i % 3) as f64 + 1.0) - 0.1).collect(),
                d: with_d.then(|| vec![1.5, -0.5]),
                u: (0..8).map(|i| 0.1 * (i as f64 + 1.0) - 0.3).collect(),
                delta: vec![0.1, 0.25, 0.3, 0.05, 0.2, 0.15, 0.12, 0.4],
                bias: with_bias.then(|| vec![0.1, -0.05]),
            }
        }

        fn inputs(&self) -> ScanInputs<'_, f64> {
            let dims = &self.dims;
            ScanInputs {
                a: StridedView::contiguous(&self.a, &dims.a_dims()).unwrap(),
                b: StridedView::contiguous(&self.b, &dims.bc_dims()).unwrap(),
                c: StridedView::contiguous(&self.c, &dims.bc_dims()).unwrap(),
                d: self.d.as_deref().map(|d| StridedView::contiguous(d, &dims.channel_dims()).unwrap()),
                u: StridedView::contiguous(&self.u, &dims.seq_dims()).unwrap(),
                delta: StridedView::contiguous(&self.delta, &dims.seq_dims()).unwrap(),
                delta_bias: self
                    .bias
                    .as_deref()
                    .map(|b| StridedView::contiguous(b, &dims.channel_dims()).unwrap()),
            }
        }
    }

    fn field_a(f: &mut Fixture) -> &mut Vec<f64> { &mut f.a }
    fn field_b(f: &mut Fixture) -> &mut Vec<f64> { &mut f.b }
    fn field_c(f: &mut Fixture) -> &mut Vec<f64> { &mut f.c }
    fn field_d(f: &mut Fixture) -> &mut Vec<f64> { f.d.as_mut().unwrap() }
    fn field_u(f: &mut Fixture) -> &mut Vec<f64> { &mut f.u }
    fn field_delta(f: &mut Fixture) -> &mut Vec<f64> { &mut f.delta }
    fn field_bias(f: &mut Fixture) -> &mut Vec<f64> { f.bias.as_mut().unwrap() }

    /// Sum of all outputs.
    fn loss(fx: &Fixture, cfg: &ScanConfig) -> f64 {
        selective_scan(&fx.dims, &fx.inputs(), cfg.clone()).unwrap().output.iter().sum()
    }

    /// Central finite differences of `loss` over one input tensor.
    fn numerical_grad(
        fx: &Fixture,
        cfg: &ScanConfig,
        field: fn(&mut Fixture) -> &mut Vec<f64>,
    ) -> Vec<f64> {
        let mut probe = fx.clone();
        let len = field(&mut probe).len();
        (0..len)
            .map(|i| {
                let orig = field(&mut probe)[i];
                field(&mut probe)[i] = orig + EPS;
                let fp = loss(&probe, cfg);
                field(&mut probe)[i] = orig - EPS;
                let fm = loss(&probe, cfg);
                field(&mut probe)[i] = orig;
                (fp - fm) / (2.0 * EPS)
            })
            .collect()
    }

    fn analytic(fx: &Fixture, cfg: &ScanConfig) -> ScanGradients<f64> {
        let inputs = fx.inputs();
        let out = selective_scan(&fx.dims, &inputs, cfg.clone()).unwrap();
        let ones = vec![1.0f64; out.output.len()];
        let dy = StridedView::contiguous(&ones, &fx.dims.seq_dims()).unwrap();
        selective_scan_backward(&fx.dims, &inputs, &out.checkpoints, &dy, cfg.clone()).unwrap()
    }

    fn check_close(analytic: &[f64], numerical: &[f64], name: &str) {
        assert_eq!(analytic.len(), numerical.len(), "{name}: length mismatch");
        for (i, (&a, &n)) in analytic.iter().zip(numerical).enumerate() {
            let err = (a - n).abs();
            let scale = n.abs().max(1.0);
            assert!(
                err <= TOL * scale,
                "{name}[{i}]: analytic={a:.9}, numerical={n:.9}, err={err:.3e}"
            );
        }
    }

    fn check_all(fx: &Fixture, cfg: &ScanConfig) {
        let g = analytic(fx, cfg);
        check_close(&g.da, &numerical_grad(fx, cfg, field_a), "dA");
        check_close(&g.db, &numerical_grad(fx, cfg, field_b), "dB");
        check_close(&g.dc, &numerical_grad(fx, cfg, field_c), "dC");
        check_close(&g.du, &numerical_grad(fx, cfg, field_u), "du");
        check_close(&g.ddelta, &numerical_grad(fx, cfg, field_delta), "ddelta");
        if fx.d.is_some() {
            check_close(g.dd.as_ref().unwrap(), &numerical_grad(fx, cfg, field_d), "dD");
        } else {
            assert!(g.dd.is_none());
        }
        if fx.bias.is_some() {
            check_close(
                g.ddelta_bias.as_ref().unwrap(),
                &numerical_grad(fx, cfg, field_bias),
                "ddelta_bias",
            );
        } else {
            assert!(g.ddelta_bias.is_none());
        }
    }

    #[test]
    fn test_finite_diff_softplus_with_d_and_bias() {
        let cfg = ScanConfig::default().with_softplus(true).with_chunk_size(2);
        check_all(&Fixture::small(true, true), &cfg);
    }

    #[test]
    fn test_finite_diff_identity() {
        let cfg = ScanConfig::default().with_chunk_size(2);
        check_all(&Fixture::small(true, true), &cfg);
    }

    #[test]
    fn test_finite_diff_without_optional_tensors() {
        let cfg = ScanConfig::default().with_softplus(true).with_chunk_size(2);
        check_all(&Fixture::small(false, false), &cfg);
    }

    #[test]
    fn test_finite_diff_uneven_chunks() {
        // 4 steps in chunks of 3: the last chunk is a single step.
        let cfg = ScanConfig::default().with_softplus(true).with_chunk_size(3);
        check_all(&Fixture::small(true, true), &cfg);
    }

    #[test]
    fn test_finite_diff_grouped_batch() {
        // Two batch rows, four channels in two groups sharing B/C.
        let dims = ScanDimensions::new(2, 4, 5, 3, 2);
        let wave = |n: usize, scale: f64, shift: f64| -> Vec<f64> {
            (0..n).map(|i| scale * ((i * 7 % 11) as f64 / 11.0 - shift)).collect()
        };
        let fx = Fixture {
            dims,
            a: (0..12).map(|i| -0.3 - 0.1 * i as f64).collect(),
            b: wave(2 * 2 * 3 * 5, 0.8, 0.4),
            c: wave(2 * 2 * 3 * 5, 0.6, 0.5),
            d: Some(vec![0.5, -0.25, 1.0, 0.1]),
            u: wave(2 * 4 * 5, 1.2, 0.5),
            delta: wave(2 * 4 * 5, 1.0, 0.6),
            bias: Some(vec![0.2, -0.1, 0.05, 0.0]),
        };
        let cfg = ScanConfig::default().with_softplus(true).with_chunk_size(2).with_threads(2);
        check_all(&fx, &cfg);
    }

    #[test]
    fn test_gradients_independent_of_chunk_size() {
        let fx = Fixture::small(true, true);
        let base = analytic(&fx, &ScanConfig::default().with_softplus(true).with_chunk_size(4));
        for chunk in [1, 2, 3, 5, 64] {
            let g = analytic(&fx, &ScanConfig::default().with_softplus(true).with_chunk_size(chunk));
            assert_eq!(g, base, "chunk_size={chunk}");
        }
    }

    #[test]
    fn test_backward_accumulates_into_buffers() {
        let fx = Fixture::small(true, true);
        let cfg = ScanConfig::default().with_softplus(true).with_chunk_size(2);
        let once = analytic(&fx, &cfg);

        let inputs = fx.inputs();
        let out = selective_scan(&fx.dims, &inputs, cfg.clone()).unwrap();
        let ones = vec![1.0f64; out.output.len()];
        let dy = StridedView::contiguous(&ones, &fx.dims.seq_dims()).unwrap();
        let mut twice = ScanGradients::zeros(&fx.dims, true, true);
        for _ in 0..2 {
            let mut views = twice.views_mut(&fx.dims).unwrap();
            crate::backward_scan(&fx.dims, &inputs, &out.checkpoints, &dy, &mut views, cfg.clone())
                .unwrap();
        }
        for (x2, x1) in twice.da.iter().zip(&once.da) {
            assert!((x2 - 2.0 * x1).abs() < 1e-12);
        }
        for (x2, x1) in twice.ddelta_bias.unwrap().iter().zip(once.ddelta_bias.as_ref().unwrap()) {
            assert!((x2 - 2.0 * x1).abs() < 1e-12);
        }
    }
}
