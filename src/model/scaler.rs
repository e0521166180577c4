use burn::module::{AutodiffModule, ModuleVisitor, Param, ParamId};
use burn::optim::{GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::ElementConversion;
use burn::tensor::backend::AutodiffBackend;
use log::debug;

/// Adaptive policy state. `Steady` counts clean updates toward the next
/// growth; any overflow moves to `Overflowed` until the following
/// [`GradScaler::update`] applies the backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalerPhase {
    Steady { clean_updates: usize },
    Overflowed,
}

/// Loss scaling for reduced-precision training.
///
/// One factor is shared by the discriminator and generator steps of a
/// step-pair; the step order is fixed (discriminator, generator, then one
/// `update`), so the two optimizers can never drift onto different scales.
pub struct GradScaler {
    scale: f32,
    growth_factor: f32,
    backoff_factor: f32,
    growth_interval: usize,
    phase: ScalerPhase,
}

impl GradScaler {
    /// Defaults: scale 65536, growth x2 after 2000 clean updates, backoff
    /// x0.5 on overflow.
    pub fn new() -> Self {
        Self::with_params(65536.0, 2.0, 0.5, 2000)
    }

    pub fn with_params(
        init_scale: f32,
        growth_factor: f32,
        backoff_factor: f32,
        growth_interval: usize,
    ) -> Self {
        Self {
            scale: init_scale,
            growth_factor,
            backoff_factor,
            growth_interval,
            phase: ScalerPhase::Steady { clean_updates: 0 },
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn phase(&self) -> ScalerPhase {
        self.phase
    }

    pub fn had_overflow(&self) -> bool {
        self.phase == ScalerPhase::Overflowed
    }

    /// Multiply a loss by the current factor before backpropagation so small
    /// gradients survive reduced-precision arithmetic.
    pub fn scale_loss<B: AutodiffBackend>(&self, loss: Tensor<B, 1>) -> Tensor<B, 1> {
        loss.mul_scalar(self.scale)
    }

    /// Unscale the module's gradients and apply one optimizer step.
    ///
    /// If any unscaled gradient is non-finite the update is skipped, the
    /// module is returned untouched, and the overflow is remembered for the
    /// next [`update`](Self::update). Overflow is recovery, not an error.
    pub fn step<B, M, O>(&mut self, lr: f64, module: M, grads: B::Gradients, optimizer: &mut O) -> M
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let mut visitor = UnscaleVisitor::<B> {
            grads: &grads,
            unscaled: GradientsParams::new(),
            inv_scale: 1.0 / self.scale,
            overflowed: false,
        };
        module.visit(&mut visitor);
        let UnscaleVisitor {
            unscaled,
            overflowed,
            ..
        } = visitor;

        if overflowed {
            self.phase = ScalerPhase::Overflowed;
            debug!(
                "non-finite gradients at scale {}; skipping parameter update",
                self.scale
            );
            return module;
        }
        optimizer.step(lr, module, unscaled)
    }

    /// Advance the adaptive policy. Call exactly once per step-pair, after
    /// both optimizer steps.
    pub fn update(&mut self) {
        match self.phase {
            ScalerPhase::Overflowed => {
                self.scale = (self.scale * self.backoff_factor).max(1.0);
                self.phase = ScalerPhase::Steady { clean_updates: 0 };
            }
            ScalerPhase::Steady { clean_updates } => {
                let clean_updates = clean_updates + 1;
                if clean_updates >= self.growth_interval {
                    self.scale *= self.growth_factor;
                    self.phase = ScalerPhase::Steady { clean_updates: 0 };
                } else {
                    self.phase = ScalerPhase::Steady { clean_updates };
                }
            }
        }
    }
}

impl Default for GradScaler {
    fn default() -> Self {
        Self::new()
    }
}

struct UnscaleVisitor<'a, B: AutodiffBackend> {
    grads: &'a B::Gradients,
    unscaled: GradientsParams,
    inv_scale: f32,
    overflowed: bool,
}

impl<'a, B: AutodiffBackend> ModuleVisitor<B> for UnscaleVisitor<'a, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        if let Some(grad) = tensor.grad(self.grads) {
            let grad = grad.mul_scalar(self.inv_scale);
            // A single reduction flags every inf/NaN in the tensor.
            let magnitude: f32 = grad.clone().abs().sum().into_scalar().elem();
            if !magnitude.is_finite() {
                self.overflowed = true;
            }
            self.unscaled.register(id, grad);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::{Autodiff, NdArray};
    use burn::optim::AdamWConfig;

    type TB = Autodiff<NdArray>;

    #[derive(Module, Debug)]
    struct Scalar<B: Backend> {
        value: Param<Tensor<B, 1>>,
    }

    fn scalar(device: &NdArrayDevice, init: f32) -> Scalar<TB> {
        Scalar {
            value: Param::from_tensor(Tensor::from_floats([init], device).require_grad()),
        }
    }

    #[test]
    fn grows_after_interval_of_clean_updates() {
        let mut scaler = GradScaler::with_params(1024.0, 2.0, 0.5, 3);
        for _ in 0..2 {
            scaler.update();
            assert_eq!(scaler.scale(), 1024.0);
        }
        scaler.update();
        assert_eq!(scaler.scale(), 2048.0);
        assert_eq!(scaler.phase(), ScalerPhase::Steady { clean_updates: 0 });
    }

    #[test]
    fn clean_step_applies_update() {
        let device = NdArrayDevice::default();
        let module = scalar(&device, 3.0);
        let mut optim = AdamWConfig::new().init::<TB, Scalar<TB>>();
        let mut scaler = GradScaler::new();

        let loss = scaler.scale_loss(module.value.val().mul_scalar(2.0));
        let grads = loss.backward();
        let module = scaler.step(1e-1, module, grads, &mut optim);

        let after = module.value.val().into_scalar();
        assert!(after < 3.0);
        assert!(!scaler.had_overflow());
    }

    #[test]
    fn overflow_skips_update_and_backs_off() {
        let device = NdArrayDevice::default();
        let module = scalar(&device, 3.0);
        let mut optim = AdamWConfig::new().init::<TB, Scalar<TB>>();
        let mut scaler = GradScaler::new();

        // Gradient is f32::MAX * f32::MAX -> inf.
        let loss = module
            .value
            .val()
            .mul_scalar(f32::MAX)
            .mul_scalar(f32::MAX);
        let grads = loss.backward();
        let module = scaler.step(1e-1, module, grads, &mut optim);

        assert_eq!(module.value.val().into_scalar(), 3.0);
        assert!(scaler.had_overflow());

        let before = scaler.scale();
        scaler.update();
        assert!(scaler.scale() < before);
        assert_eq!(scaler.phase(), ScalerPhase::Steady { clean_updates: 0 });
    }

    #[test]
    fn overflow_resets_growth_progress() {
        let device = NdArrayDevice::default();
        let module = scalar(&device, 1.0);
        let mut optim = AdamWConfig::new().init::<TB, Scalar<TB>>();
        let mut scaler = GradScaler::with_params(1024.0, 2.0, 0.5, 2);

        scaler.update();
        assert_eq!(scaler.phase(), ScalerPhase::Steady { clean_updates: 1 });

        let loss = module
            .value
            .val()
            .mul_scalar(f32::MAX)
            .mul_scalar(f32::MAX);
        let grads = loss.backward();
        let _module = scaler.step(1e-1, module, grads, &mut optim);
        scaler.update();

        assert_eq!(scaler.scale(), 512.0);
        assert_eq!(scaler.phase(), ScalerPhase::Steady { clean_updates: 0 });
    }

    #[test]
    fn backoff_never_drops_below_one() {
        let mut scaler = GradScaler::with_params(1.5, 2.0, 0.5, 2000);
        scaler.phase = ScalerPhase::Overflowed;
        scaler.update();
        assert_eq!(scaler.scale(), 1.0);
    }
}
