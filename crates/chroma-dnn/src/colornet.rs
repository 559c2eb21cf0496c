use chroma_image::Image;
use chroma_imgproc::color::{rgb_from_yuv, yuv_from_luma_chroma, yuv_from_rgb};
use chroma_nn::{
    activation::{
        add, leaky_relu, leaky_relu_backward, relu, relu_backward, sigmoid, sigmoid_backward,
    },
    batch_norm::{BatchNorm, BatchNormCache},
    conv::{conv2d_same, conv2d_same_backward},
    upsample::{upsample_bilinear, upsample_bilinear_backward},
    NnError, Phase,
};
use chroma_tensor::{Tensor1, Tensor3};
use rand::Rng;

use crate::{
    backbone::BackboneFeatures,
    error::DnnError,
    weights::{ColorNetWeights, NormLayers},
};

/// Gradients of a loss with respect to every trainable parameter of a [`ColorNet`].
#[derive(Clone, Debug)]
pub struct ColorNetGradients {
    /// Gradients of the convolution kernels.
    pub kernels: ColorNetWeights,
    /// Gradients of the `(gamma, beta)` pair of every batch normalization.
    pub norms: NormLayers<(Tensor1<f32>, Tensor1<f32>)>,
}

/// Intermediate values of a forward pass, consumed by [`ColorNet::backward`].
#[derive(Clone, Debug)]
pub struct ColorNetCache {
    // inputs of the six convolutions
    conv1_input: Tensor3<f32>,
    conv2_input: Tensor3<f32>,
    conv3_input: Tensor3<f32>,
    conv4_input: Tensor3<f32>,
    conv5_input: Tensor3<f32>,
    conv6_input: Tensor3<f32>,
    // inputs of the activations
    conv1_output: Tensor3<f32>,
    norm2_output: Tensor3<f32>,
    norm3_output: Tensor3<f32>,
    norm4_output: Tensor3<f32>,
    norm5_output: Tensor3<f32>,
    prediction: Tensor3<f32>,
    norms: NormLayers<BatchNormCache>,
}

/// The feature fusion decoder predicting chrominance from backbone features.
///
/// The decoder walks up the backbone pyramid: each stage convolves the running map, upsamples
/// it twice and adds the normalized backbone map of the next resolution. The last stages fuse
/// the grayscale image and predict the U and V channels with a sigmoid.
///
/// # Example
///
/// ```
/// use chroma_dnn::{BackboneFeatures, ColorNet};
/// use chroma_image::Image;
/// use chroma_nn::Phase;
/// use rand::{rngs::StdRng, SeedableRng};
///
/// let net = ColorNet::new(&mut StdRng::seed_from_u64(0)).unwrap();
/// let gray_rgb = Image::<f32, 3>::from_size_val([16, 8].into(), 0.5).unwrap();
/// let features = BackboneFeatures::zeros(8, 16);
///
/// let (uv, _) = net.forward(&features, &gray_rgb, Phase::Inference).unwrap();
/// assert_eq!(uv.shape, [8, 16, 2]);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct ColorNet {
    /// The convolution kernels.
    pub weights: ColorNetWeights,
    /// The batch normalization layers.
    pub norms: NormLayers<BatchNorm>,
}

impl ColorNet {
    /// A decoder with random kernels and freshly initialized normalizations.
    pub fn new<R: Rng + ?Sized>(rng: &mut R) -> Result<Self, DnnError> {
        Ok(Self {
            weights: ColorNetWeights::random(rng)?,
            norms: NormLayers::new(),
        })
    }

    /// Predict the chrominance of an image.
    ///
    /// # Arguments
    ///
    /// * `features` - The backbone activations of the grayscale image.
    /// * `gray_rgb` - The grayscale image replicated to three channels, `H x W` with both sizes
    ///   multiples of 8.
    /// * `phase` - Whether batch statistics or moving statistics normalize the activations.
    ///
    /// # Returns
    ///
    /// The `(H, W, 2)` U and V prediction in `[0, 1]` and the cache of the pass.
    ///
    /// # Errors
    ///
    /// Returns [`DnnError::FeatureShapeMismatch`] when a feature map does not match the image
    /// size or the kernel shapes.
    pub fn forward(
        &self,
        features: &BackboneFeatures,
        gray_rgb: &Image<f32, 3>,
        phase: Phase,
    ) -> Result<(Tensor3<f32>, ColorNetCache), DnnError> {
        let (h, w) = (gray_rgb.height(), gray_rgb.width());
        features.validate(h, w)?;
        let weights = &self.weights;
        let norms = &self.norms;

        // stage 1: 1/8 -> 1/4 resolution
        let (conv1_input, bn_conv4_3) = norms.conv4_3.forward(&features.conv4_3, phase)?;
        let conv1_output = conv2d_same(&conv1_input, &weights.wc1)?;
        let stage = upsample_bilinear(&relu(&conv1_output), h / 4, w / 4)?;
        let (skip, bn_conv3_3) = norms.conv3_3.forward(&features.conv3_3, phase)?;
        let conv2_input = add(&stage, &skip)?;

        // stage 2: 1/4 -> 1/2 resolution
        let (norm2_output, bn_wc2) = norms
            .wc2
            .forward(&conv2d_same(&conv2_input, &weights.wc2)?, phase)?;
        let stage = upsample_bilinear(&leaky_relu(&norm2_output), h / 2, w / 2)?;
        let (skip, bn_conv2_2) = norms.conv2_2.forward(&features.conv2_2, phase)?;
        let conv3_input = add(&stage, &skip)?;

        // stage 3: 1/2 -> full resolution
        let (norm3_output, bn_wc3) = norms
            .wc3
            .forward(&conv2d_same(&conv3_input, &weights.wc3)?, phase)?;
        let stage = upsample_bilinear(&leaky_relu(&norm3_output), h, w)?;
        let (skip, bn_conv1_2) = norms.conv1_2.forward(&features.conv1_2, phase)?;
        let conv4_input = add(&stage, &skip)?;

        // stage 4: fuse the grayscale image
        let (norm4_output, bn_wc4) = norms
            .wc4
            .forward(&conv2d_same(&conv4_input, &weights.wc4)?, phase)?;
        let (skip, bn_grayscale) = norms.grayscale.forward(gray_rgb, phase)?;
        let conv5_input = add(&leaky_relu(&norm4_output), &skip)?;

        // stage 5
        let (norm5_output, bn_wc5) = norms
            .wc5
            .forward(&conv2d_same(&conv5_input, &weights.wc5)?, phase)?;
        let conv6_input = leaky_relu(&norm5_output);

        // stage 6: chrominance
        let prediction = sigmoid(&conv2d_same(&conv6_input, &weights.wc6)?);

        let cache = ColorNetCache {
            conv1_input,
            conv2_input,
            conv3_input,
            conv4_input,
            conv5_input,
            conv6_input,
            conv1_output,
            norm2_output,
            norm3_output,
            norm4_output,
            norm5_output,
            prediction: prediction.clone(),
            norms: NormLayers {
                conv4_3: bn_conv4_3,
                conv3_3: bn_conv3_3,
                conv2_2: bn_conv2_2,
                conv1_2: bn_conv1_2,
                grayscale: bn_grayscale,
                wc2: bn_wc2,
                wc3: bn_wc3,
                wc4: bn_wc4,
                wc5: bn_wc5,
            },
        };

        Ok((prediction, cache))
    }

    /// Predict the chrominance of an image with the moving statistics.
    pub fn predict(
        &self,
        features: &BackboneFeatures,
        gray_rgb: &Image<f32, 3>,
    ) -> Result<Tensor3<f32>, DnnError> {
        let (prediction, _) = self.forward(features, gray_rgb, Phase::Inference)?;
        Ok(prediction)
    }

    /// Back propagate the gradient of a loss through a forward pass.
    ///
    /// # Arguments
    ///
    /// * `cache` - The cache returned by [`ColorNet::forward`].
    /// * `grad_output` - The gradient of the loss with respect to the `(H, W, 2)` prediction.
    pub fn backward(
        &self,
        cache: &ColorNetCache,
        grad_output: &Tensor3<f32>,
    ) -> Result<ColorNetGradients, DnnError> {
        let weights = &self.weights;
        let norms = &self.norms;
        let [h, w, _] = cache.prediction.shape;

        // stage 6
        let grad = sigmoid_backward(&cache.prediction, grad_output)?;
        let (grad, wc6) = conv2d_same_backward(&cache.conv6_input, &weights.wc6, &grad)?;

        // stage 5
        let grad = leaky_relu_backward(&cache.norm5_output, &grad)?;
        let bn_wc5 = norms.wc5.backward(&cache.norms.wc5, &grad)?;
        let (grad, wc5) = conv2d_same_backward(&cache.conv5_input, &weights.wc5, &bn_wc5.input)?;

        // stage 4, the sum feeds both branches
        let bn_grayscale = norms.grayscale.backward(&cache.norms.grayscale, &grad)?;
        let grad = leaky_relu_backward(&cache.norm4_output, &grad)?;
        let bn_wc4 = norms.wc4.backward(&cache.norms.wc4, &grad)?;
        let (grad, wc4) = conv2d_same_backward(&cache.conv4_input, &weights.wc4, &bn_wc4.input)?;

        // stage 3
        let bn_conv1_2 = norms.conv1_2.backward(&cache.norms.conv1_2, &grad)?;
        let grad = upsample_bilinear_backward(&grad, h / 2, w / 2)?;
        let grad = leaky_relu_backward(&cache.norm3_output, &grad)?;
        let bn_wc3 = norms.wc3.backward(&cache.norms.wc3, &grad)?;
        let (grad, wc3) = conv2d_same_backward(&cache.conv3_input, &weights.wc3, &bn_wc3.input)?;

        // stage 2
        let bn_conv2_2 = norms.conv2_2.backward(&cache.norms.conv2_2, &grad)?;
        let grad = upsample_bilinear_backward(&grad, h / 4, w / 4)?;
        let grad = leaky_relu_backward(&cache.norm2_output, &grad)?;
        let bn_wc2 = norms.wc2.backward(&cache.norms.wc2, &grad)?;
        let (grad, wc2) = conv2d_same_backward(&cache.conv2_input, &weights.wc2, &bn_wc2.input)?;

        // stage 1
        let bn_conv3_3 = norms.conv3_3.backward(&cache.norms.conv3_3, &grad)?;
        let grad = upsample_bilinear_backward(&grad, h / 8, w / 8)?;
        let grad = relu_backward(&cache.conv1_output, &grad)?;
        let (grad, wc1) = conv2d_same_backward(&cache.conv1_input, &weights.wc1, &grad)?;
        let bn_conv4_3 = norms.conv4_3.backward(&cache.norms.conv4_3, &grad)?;

        Ok(ColorNetGradients {
            kernels: ColorNetWeights {
                wc1,
                wc2,
                wc3,
                wc4,
                wc5,
                wc6,
            },
            norms: NormLayers {
                conv4_3: (bn_conv4_3.gamma, bn_conv4_3.beta),
                conv3_3: (bn_conv3_3.gamma, bn_conv3_3.beta),
                conv2_2: (bn_conv2_2.gamma, bn_conv2_2.beta),
                conv1_2: (bn_conv1_2.gamma, bn_conv1_2.beta),
                grayscale: (bn_grayscale.gamma, bn_grayscale.beta),
                wc2: (bn_wc2.gamma, bn_wc2.beta),
                wc3: (bn_wc3.gamma, bn_wc3.beta),
                wc4: (bn_wc4.gamma, bn_wc4.beta),
                wc5: (bn_wc5.gamma, bn_wc5.beta),
            },
        })
    }

    /// Fold the batch moments of a training pass into the moving statistics.
    ///
    /// Returns `false` when the cache comes from an inference pass and nothing changed.
    pub fn update_moving_statistics(&mut self, cache: &ColorNetCache) -> bool {
        let mut updated = true;
        for ((_, norm), (_, norm_cache)) in self
            .norms
            .named_mut()
            .into_iter()
            .zip(cache.norms.named())
        {
            updated &= norm.update_moving_statistics(norm_cache);
        }
        updated
    }

    /// One step of gradient descent, `p <- p - learning_rate * dp`, on every kernel and every
    /// batch normalization scale and shift.
    pub fn apply_gradients(
        &mut self,
        gradients: &ColorNetGradients,
        learning_rate: f32,
    ) -> Result<(), DnnError> {
        for ((name, kernel), (_, grad)) in self
            .weights
            .named_mut()
            .into_iter()
            .zip(gradients.kernels.named())
        {
            if kernel.shape != grad.shape {
                return Err(gradient_mismatch(name, &kernel.shape, &grad.shape));
            }
            descend(kernel.as_slice_mut(), grad.as_slice(), learning_rate);
        }

        for ((name, norm), (_, (grad_gamma, grad_beta))) in self
            .norms
            .named_mut()
            .into_iter()
            .zip(gradients.norms.named())
        {
            if norm.gamma.shape != grad_gamma.shape || norm.beta.shape != grad_beta.shape {
                return Err(gradient_mismatch(name, &norm.gamma.shape, &grad_gamma.shape));
            }
            descend(norm.gamma.as_slice_mut(), grad_gamma.as_slice(), learning_rate);
            descend(norm.beta.as_slice_mut(), grad_beta.as_slice(), learning_rate);
        }
        Ok(())
    }
}

fn gradient_mismatch(name: &'static str, expected: &[usize], actual: &[usize]) -> DnnError {
    log::error!("gradient of {name} does not match its parameter");
    DnnError::NnError(NnError::ShapeMismatch {
        op: "gradient descent",
        expected: expected.to_vec(),
        actual: actual.to_vec(),
    })
}

fn descend(params: &mut [f32], grads: &[f32], learning_rate: f32) {
    params
        .iter_mut()
        .zip(grads)
        .for_each(|(p, &g)| *p -= learning_rate * g);
}

/// The luminance plane of an RGB image.
pub fn luma_from_rgb(rgb: &Image<f32, 3>) -> Result<Image<f32, 1>, DnnError> {
    let mut yuv = Image::from_size_val(rgb.size(), 0.0f32)?;
    yuv_from_rgb(rgb, &mut yuv)?;
    Ok(yuv.channel(0)?)
}

/// Join a luminance plane with a predicted chrominance and convert the result to RGB.
///
/// # Arguments
///
/// * `luma` - The Y plane of the grayscale input.
/// * `chroma` - The `(H, W, 2)` U and V prediction of the decoder.
pub fn rgb_from_prediction(
    luma: &Image<f32, 1>,
    chroma: &Tensor3<f32>,
) -> Result<Image<f32, 3>, DnnError> {
    let chroma = Image::<f32, 2>::from_tensor(chroma.clone())?;
    let mut yuv = Image::from_size_val(luma.size(), 0.0f32)?;
    yuv_from_luma_chroma(luma, &chroma, &mut yuv)?;

    let mut rgb = Image::from_size_val(luma.size(), 0.0f32)?;
    rgb_from_yuv(&yuv, &mut rgb)?;
    Ok(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};

    fn synthetic_example(
        height: usize,
        width: usize,
        seed: u64,
    ) -> Result<(BackboneFeatures, Image<f32, 3>), DnnError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut features = BackboneFeatures::zeros(height, width);
        for map in [
            &mut features.conv1_2,
            &mut features.conv2_2,
            &mut features.conv3_3,
            &mut features.conv4_3,
        ] {
            map.as_slice_mut()
                .iter_mut()
                .for_each(|v| *v = rng.random::<f32>() * 2.0);
        }
        let gray = (0..height * width)
            .flat_map(|i| {
                let g = ((i * 7) % 13) as f32 / 12.0;
                [g, g, g]
            })
            .collect();
        let gray_rgb = Image::new([width, height].into(), gray)?;
        Ok((features, gray_rgb))
    }

    /// Half of the squared distance to a fixed target, and its gradient.
    fn loss_and_grad(prediction: &Tensor3<f32>) -> Result<(f64, Tensor3<f32>), DnnError> {
        let target = |i: usize| 0.2 + 0.6 * ((i % 5) as f32 / 4.0);
        let loss = prediction
            .as_slice()
            .iter()
            .enumerate()
            .map(|(i, &p)| 0.5 * ((p - target(i)) as f64).powi(2))
            .sum();
        let grad = prediction
            .as_slice()
            .iter()
            .enumerate()
            .map(|(i, &p)| p - target(i))
            .collect();
        Ok((loss, Tensor3::from_shape_vec(prediction.shape, grad)?))
    }

    #[test]
    fn test_forward_shape_and_range() -> Result<(), DnnError> {
        let net = ColorNet::new(&mut StdRng::seed_from_u64(0))?;
        let (features, gray_rgb) = synthetic_example(224, 224, 1)?;

        let uv = net.predict(&features, &gray_rgb)?;
        assert_eq!(uv.shape, [224, 224, 2]);
        assert!(uv.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
        Ok(())
    }

    #[test]
    fn test_forward_rejects_mismatched_features() -> Result<(), DnnError> {
        let net = ColorNet::new(&mut StdRng::seed_from_u64(0))?;
        let (mut features, gray_rgb) = synthetic_example(16, 16, 1)?;
        features.conv3_3 = Tensor3::zeros([4, 4, 128]);

        let result = net.forward(&features, &gray_rgb, Phase::Inference);
        assert!(matches!(
            result,
            Err(DnnError::FeatureShapeMismatch {
                name: "conv3_3",
                expected: [4, 4, 256],
                actual: [4, 4, 128],
            })
        ));
        Ok(())
    }

    #[test]
    fn test_inference_does_not_touch_statistics() -> Result<(), DnnError> {
        let mut net = ColorNet::new(&mut StdRng::seed_from_u64(3))?;
        let (features, gray_rgb) = synthetic_example(16, 8, 2)?;

        let before = net.clone();
        let (_, cache) = net.forward(&features, &gray_rgb, Phase::Inference)?;
        assert!(!net.update_moving_statistics(&cache));
        assert_eq!(net, before);

        let (_, cache) = net.forward(&features, &gray_rgb, Phase::Train)?;
        assert!(net.update_moving_statistics(&cache));
        assert_ne!(net.norms.conv4_3.moving_mean, before.norms.conv4_3.moving_mean);
        Ok(())
    }

    #[test]
    fn test_backward_matches_finite_differences() -> Result<(), DnnError> {
        let mut rng = StdRng::seed_from_u64(5);
        let mut net = ColorNet::new(&mut rng)?;
        // unit variance activations keep the differences above the float noise
        for (_, kernel) in net.weights.named_mut() {
            let [kh, kw, cin, _] = kernel.shape;
            let bound = (3.0 / (kh * kw * cin) as f32).sqrt();
            kernel
                .as_slice_mut()
                .iter_mut()
                .for_each(|w| *w = (rng.random::<f32>() * 2.0 - 1.0) * bound);
        }
        let (features, gray_rgb) = synthetic_example(8, 8, 4)?;

        let loss_at = |net: &ColorNet| -> Result<f64, DnnError> {
            let (prediction, _) = net.forward(&features, &gray_rgb, Phase::Inference)?;
            Ok(loss_and_grad(&prediction)?.0)
        };

        let (prediction, cache) = net.forward(&features, &gray_rgb, Phase::Inference)?;
        let (_, grad) = loss_and_grad(&prediction)?;
        let grads = net.backward(&cache, &grad)?;

        let eps = 1e-3f32;
        for (name, index) in [("wc6", 5), ("wc5", 11), ("wc4", 40), ("wc3", 300)] {
            let analytic = grads
                .kernels
                .named()
                .into_iter()
                .find(|(n, _)| *n == name)
                .map(|(_, g)| g.as_slice()[index] as f64)
                .unwrap_or(f64::NAN);

            let mut plus = net.clone();
            let mut minus = net.clone();
            for ((n, kp), (_, km)) in plus
                .weights
                .named_mut()
                .into_iter()
                .zip(minus.weights.named_mut())
            {
                if n == name {
                    kp.as_slice_mut()[index] += eps;
                    km.as_slice_mut()[index] -= eps;
                }
            }
            let numeric = (loss_at(&plus)? - loss_at(&minus)?) / (2.0 * eps as f64);
            assert_relative_eq!(analytic, numeric, epsilon = 5e-3, max_relative = 5e-2);
        }

        // the shift of the grayscale normalization feeds stage 5 directly
        let mut plus = net.clone();
        let mut minus = net.clone();
        plus.norms.grayscale.beta.as_slice_mut()[1] += eps;
        minus.norms.grayscale.beta.as_slice_mut()[1] -= eps;
        let numeric = (loss_at(&plus)? - loss_at(&minus)?) / (2.0 * eps as f64);
        let analytic = grads.norms.grayscale.1.as_slice()[1] as f64;
        assert_relative_eq!(analytic, numeric, epsilon = 5e-3, max_relative = 5e-2);
        Ok(())
    }

    #[test]
    fn test_gradient_step_reduces_loss() -> Result<(), DnnError> {
        let mut net = ColorNet::new(&mut StdRng::seed_from_u64(9))?;
        let (features, gray_rgb) = synthetic_example(16, 16, 6)?;

        let (prediction, cache) = net.forward(&features, &gray_rgb, Phase::Train)?;
        let (loss_before, grad) = loss_and_grad(&prediction)?;
        let grads = net.backward(&cache, &grad)?;
        net.apply_gradients(&grads, 1e-3)?;

        let (prediction, _) = net.forward(&features, &gray_rgb, Phase::Train)?;
        let (loss_after, _) = loss_and_grad(&prediction)?;
        assert!(loss_after < loss_before, "{loss_after} >= {loss_before}");
        Ok(())
    }

    #[test]
    fn test_rgb_from_prediction_neutral_chroma() -> Result<(), DnnError> {
        let gray = Image::<f32, 3>::from_size_val([4, 2].into(), 0.25)?;
        let luma = luma_from_rgb(&gray)?;
        let chroma = Tensor3::from_shape_val([2, 4, 2], 0.5);

        let rgb = rgb_from_prediction(&luma, &chroma)?;
        for &v in rgb.as_slice() {
            assert_relative_eq!(v, 0.25, epsilon = 1e-2);
        }
        Ok(())
    }
}
