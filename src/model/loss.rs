use burn::nn::loss::{MseLoss, Reduction::Mean};
use burn::prelude::*;

use crate::model::constants::PATCH_STRIDE;
use crate::model::error::TrainError;

/// Binary cross-entropy from logits, elementwise mean.
///
/// Uses the `max(x, 0) - x*z + ln(1 + e^-|x|)` form so large-magnitude
/// logits cannot overflow the exponential.
pub fn bce_with_logits<B: Backend>(logits: Tensor<B, 4>, targets: Tensor<B, 4>) -> Tensor<B, 1> {
    let neg_abs = logits.clone().abs().neg();
    let losses = logits.clone().clamp_min(0.0) - logits * targets + neg_abs.exp().log1p();
    losses.mean()
}

/// Discriminator objective over the patch grid: genuine cartoons toward the
/// "real" label, generated images and cartoon edge maps toward "fake".
///
/// The label tensors are built once here, fixed to the configured batch size
/// and patch resolution. Predictions of any other shape are rejected rather
/// than broadcast.
pub struct AdversarialLoss<B: Backend> {
    real_labels: Tensor<B, 4>,
    fake_labels: Tensor<B, 4>,
}

impl<B: Backend> AdversarialLoss<B> {
    pub fn new(batch_size: usize, image_size: usize, device: &B::Device) -> Self {
        let patch = image_size / PATCH_STRIDE;
        Self {
            real_labels: Tensor::ones([batch_size, 1, patch, patch], device),
            fake_labels: Tensor::zeros([batch_size, 1, patch, patch], device),
        }
    }

    pub fn real_labels(&self) -> Tensor<B, 4> {
        self.real_labels.clone()
    }

    fn check(&self, context: &'static str, pred: &Tensor<B, 4>) -> Result<(), TrainError> {
        let expected = self.real_labels.dims();
        let actual = pred.dims();
        if expected != actual {
            return Err(TrainError::shape_mismatch(context, &expected, &actual));
        }
        Ok(())
    }

    pub fn forward(
        &self,
        cartoon_pred: Tensor<B, 4>,
        generated_pred: Tensor<B, 4>,
        edge_pred: Tensor<B, 4>,
    ) -> Result<Tensor<B, 1>, TrainError> {
        self.check("cartoon prediction", &cartoon_pred)?;
        self.check("generated prediction", &generated_pred)?;
        self.check("edge prediction", &edge_pred)?;

        let loss = bce_with_logits(cartoon_pred, self.real_labels.clone())
            + bce_with_logits(generated_pred, self.fake_labels.clone())
            + bce_with_logits(edge_pred, self.fake_labels.clone());
        Ok(loss)
    }
}

/// Generator's half of the adversarial game: push the discriminator's
/// verdict on generated images toward "real".
pub fn generator_adversarial_loss<B: Backend>(
    generated_pred: Tensor<B, 4>,
    real_labels: Tensor<B, 4>,
) -> Result<Tensor<B, 1>, TrainError> {
    let expected = real_labels.dims();
    let actual = generated_pred.dims();
    if expected != actual {
        return Err(TrainError::shape_mismatch(
            "generated prediction",
            &expected,
            &actual,
        ));
    }
    Ok(bce_with_logits(generated_pred, real_labels))
}

/// Keeps the generator anchored to the source photo while it chases the
/// adversarial signal. Weighted pixel-space distance.
pub struct ContentLoss {
    weight: f64,
}

impl ContentLoss {
    pub fn new(weight: f64) -> Self {
        Self { weight }
    }

    pub fn forward<B: Backend>(
        &self,
        generated: Tensor<B, 4>,
        real_photo: Tensor<B, 4>,
    ) -> Result<Tensor<B, 1>, TrainError> {
        let expected = real_photo.dims();
        let actual = generated.dims();
        if expected != actual {
            return Err(TrainError::shape_mismatch(
                "generated vs source photo",
                &expected,
                &actual,
            ));
        }
        Ok(MseLoss::new()
            .forward(generated, real_photo, Mean)
            .mul_scalar(self.weight))
    }
}

/// The loss stack for one training run, labels bound once at startup.
pub struct CartoonLosses<B: Backend> {
    pub adversarial: AdversarialLoss<B>,
    pub content: ContentLoss,
}

impl<B: Backend> CartoonLosses<B> {
    pub fn new(
        batch_size: usize,
        image_size: usize,
        content_weight: f64,
        device: &B::Device,
    ) -> Self {
        Self {
            adversarial: AdversarialLoss::new(batch_size, image_size, device),
            content: ContentLoss::new(content_weight),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::backend::ndarray::NdArrayDevice;
    use burn::tensor::Distribution;

    type B = NdArray;

    #[test]
    fn bce_matches_known_value() {
        let device = NdArrayDevice::default();
        let logits = Tensor::<B, 4>::zeros([1, 1, 2, 2], &device);
        let targets = Tensor::<B, 4>::ones([1, 1, 2, 2], &device);
        let loss = bce_with_logits(logits, targets).into_scalar();
        assert!((loss - std::f32::consts::LN_2).abs() < 1e-6);
    }

    #[test]
    fn adversarial_loss_is_non_negative() {
        let device = NdArrayDevice::default();
        let adv = AdversarialLoss::<B>::new(2, 8, &device);
        for _ in 0..8 {
            let pred = || {
                Tensor::<B, 4>::random([2, 1, 2, 2], Distribution::Normal(0.0, 3.0), &device)
            };
            let loss = adv.forward(pred(), pred(), pred()).unwrap().into_scalar();
            assert!(loss >= 0.0);
        }
    }

    #[test]
    fn adversarial_loss_vanishes_on_perfect_predictions() {
        let device = NdArrayDevice::default();
        let adv = AdversarialLoss::<B>::new(2, 8, &device);
        let real = Tensor::<B, 4>::full([2, 1, 2, 2], 25.0, &device);
        let fake = Tensor::<B, 4>::full([2, 1, 2, 2], -25.0, &device);
        let loss = adv.forward(real, fake.clone(), fake).unwrap().into_scalar();
        assert!(loss >= 0.0);
        assert!(loss < 1e-6);
    }

    #[test]
    fn adversarial_loss_rejects_batch_size_drift() {
        let device = NdArrayDevice::default();
        let adv = AdversarialLoss::<B>::new(2, 8, &device);
        let ok = Tensor::<B, 4>::zeros([2, 1, 2, 2], &device);
        let bad = Tensor::<B, 4>::zeros([3, 1, 2, 2], &device);
        let err = adv.forward(bad, ok.clone(), ok).unwrap_err();
        assert!(matches!(err, TrainError::ShapeMismatch { .. }));
    }

    #[test]
    fn generator_loss_rejects_patch_mismatch() {
        let device = NdArrayDevice::default();
        let labels = Tensor::<B, 4>::ones([2, 1, 2, 2], &device);
        let pred = Tensor::<B, 4>::zeros([2, 1, 4, 4], &device);
        let err = generator_adversarial_loss(pred, labels).unwrap_err();
        assert!(matches!(err, TrainError::ShapeMismatch { .. }));
    }

    #[test]
    fn content_loss_zero_for_identical_images() {
        let device = NdArrayDevice::default();
        let content = ContentLoss::new(10.0);
        let photo =
            Tensor::<B, 4>::random([2, 3, 8, 8], Distribution::Uniform(-1.0, 1.0), &device);
        let loss = content.forward(photo.clone(), photo).unwrap().into_scalar();
        assert!(loss.abs() < 1e-7);
    }

    #[test]
    fn content_loss_rejects_shape_mismatch() {
        let device = NdArrayDevice::default();
        let content = ContentLoss::new(10.0);
        let generated = Tensor::<B, 4>::zeros([2, 3, 8, 8], &device);
        let photo = Tensor::<B, 4>::zeros([2, 3, 4, 4], &device);
        let err = content.forward(generated, photo).unwrap_err();
        assert!(matches!(err, TrainError::ShapeMismatch { .. }));
    }
}
