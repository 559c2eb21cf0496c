use rayon::{
    iter::{IndexedParallelIterator, ParallelIterator},
    slice::{ParallelSlice, ParallelSliceMut},
};

use crate::{NnError, Phase};
use chroma_tensor::{Tensor1, Tensor3};

/// Decay of the exponential moving averages of the batch statistics.
pub const DEFAULT_DECAY: f32 = 0.9999;

/// Constant added to the variance before taking its square root.
pub const DEFAULT_EPSILON: f32 = 1e-3;

/// Number of positions accumulated per parallel task when reducing over channels.
const ROWS_PER_TASK: usize = 1024;

/// Per channel batch normalization of `(H, W, C)` feature maps.
///
/// While training, inputs are normalized with the mean and variance of the current example,
/// computed over all the spatial positions. For inference, the moving averages accumulated
/// with [`BatchNorm::update_moving_statistics`] are used instead. The normalized values are
/// then scaled by `gamma` and shifted by `beta`.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchNorm {
    /// Learned per channel scale.
    pub gamma: Tensor1<f32>,
    /// Learned per channel shift.
    pub beta: Tensor1<f32>,
    /// Moving average of the per channel mean.
    pub moving_mean: Tensor1<f32>,
    /// Moving average of the per channel variance.
    pub moving_variance: Tensor1<f32>,
    /// Decay of the moving averages.
    pub decay: f32,
    /// Variance offset.
    pub epsilon: f32,
}

/// Intermediate values of a [`BatchNorm::forward`] call needed by the backward pass.
#[derive(Clone, Debug)]
pub struct BatchNormCache {
    normalized: Tensor3<f32>,
    inv_std: Vec<f32>,
    batch_moments: Option<(Vec<f32>, Vec<f32>)>,
}

impl BatchNormCache {
    /// The mean and variance of the example when it was normalized with them.
    pub fn batch_moments(&self) -> Option<(&[f32], &[f32])> {
        self.batch_moments
            .as_ref()
            .map(|(mean, var)| (mean.as_slice(), var.as_slice()))
    }
}

/// Gradients of a [`BatchNorm`] layer.
#[derive(Clone, Debug)]
pub struct BatchNormGradients {
    /// Gradient with respect to the layer input.
    pub input: Tensor3<f32>,
    /// Gradient with respect to `gamma`.
    pub gamma: Tensor1<f32>,
    /// Gradient with respect to `beta`.
    pub beta: Tensor1<f32>,
}

/// Sum the rows of a `(N, C)` matrix, and of its square, in parallel.
fn channel_sums(data: &[f32], channels: usize) -> (Vec<f64>, Vec<f64>) {
    data.par_chunks(channels * ROWS_PER_TASK)
        .map(|chunk| {
            let mut sum = vec![0f64; channels];
            let mut sum_sq = vec![0f64; channels];
            for pixel in chunk.chunks_exact(channels) {
                for ((s, s2), &x) in sum.iter_mut().zip(sum_sq.iter_mut()).zip(pixel) {
                    *s += x as f64;
                    *s2 += x as f64 * x as f64;
                }
            }
            (sum, sum_sq)
        })
        .reduce(
            || (vec![0f64; channels], vec![0f64; channels]),
            |(mut a, mut a2), (b, b2)| {
                a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
                a2.iter_mut().zip(b2).for_each(|(x, y)| *x += y);
                (a, a2)
            },
        )
}

/// Sum the rows of the element wise product of two `(N, C)` matrices, and of the first one.
fn channel_dot(grad: &[f32], normalized: &[f32], channels: usize) -> (Vec<f64>, Vec<f64>) {
    grad.par_chunks(channels * ROWS_PER_TASK)
        .zip(normalized.par_chunks(channels * ROWS_PER_TASK))
        .map(|(g_chunk, n_chunk)| {
            let mut sum = vec![0f64; channels];
            let mut dot = vec![0f64; channels];
            for (g, n) in g_chunk.chunks_exact(channels).zip(n_chunk.chunks_exact(channels)) {
                for c in 0..channels {
                    sum[c] += g[c] as f64;
                    dot[c] += g[c] as f64 * n[c] as f64;
                }
            }
            (sum, dot)
        })
        .reduce(
            || (vec![0f64; channels], vec![0f64; channels]),
            |(mut a, mut a2), (b, b2)| {
                a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
                a2.iter_mut().zip(b2).for_each(|(x, y)| *x += y);
                (a, a2)
            },
        )
}

impl BatchNorm {
    /// Create an identity normalization for `channels` channels.
    ///
    /// `gamma` and the moving variance start at one, `beta` and the moving mean at zero.
    pub fn new(channels: usize) -> Self {
        Self {
            gamma: Tensor1::from_shape_val([channels], 1.0),
            beta: Tensor1::zeros([channels]),
            moving_mean: Tensor1::zeros([channels]),
            moving_variance: Tensor1::from_shape_val([channels], 1.0),
            decay: DEFAULT_DECAY,
            epsilon: DEFAULT_EPSILON,
        }
    }

    /// Number of normalized channels.
    pub fn channels(&self) -> usize {
        self.gamma.numel()
    }

    /// Normalize a feature map.
    ///
    /// # Arguments
    ///
    /// * `input` - The feature map with shape `(H, W, C)`.
    /// * `phase` - Use the statistics of `input` ([`Phase::Train`]) or the moving ones.
    ///
    /// # Returns
    ///
    /// The normalized feature map and the values needed by [`BatchNorm::backward`]. The
    /// layer itself is not modified; fold the batch statistics into the moving averages
    /// with [`BatchNorm::update_moving_statistics`].
    ///
    /// # Example
    ///
    /// ```
    /// use chroma_nn::{batch_norm::BatchNorm, Phase};
    /// use chroma_tensor::Tensor3;
    ///
    /// let bn = BatchNorm::new(1);
    /// let input = Tensor3::<f32>::from_shape_vec([1, 2, 1], vec![1.0, 3.0]).unwrap();
    ///
    /// let (output, _) = bn.forward(&input, Phase::Train).unwrap();
    /// assert!((output.as_slice()[0] + 0.9995).abs() < 1e-3);
    /// assert!((output.as_slice()[1] - 0.9995).abs() < 1e-3);
    /// ```
    pub fn forward(
        &self,
        input: &Tensor3<f32>,
        phase: Phase,
    ) -> Result<(Tensor3<f32>, BatchNormCache), NnError> {
        let channels = self.channels();
        if input.shape[2] != channels {
            return Err(NnError::shape_mismatch(
                "batch norm channels",
                &[channels],
                &[input.shape[2]],
            ));
        }

        let (mean, variance, batch_moments) = match phase {
            Phase::Train => {
                let n = (input.shape[0] * input.shape[1]).max(1) as f64;
                let (sum, sum_sq) = if channels == 0 {
                    (vec![], vec![])
                } else {
                    channel_sums(input.as_slice(), channels)
                };
                let mean = sum.iter().map(|s| (s / n) as f32).collect::<Vec<_>>();
                let variance = sum
                    .iter()
                    .zip(&sum_sq)
                    .map(|(s, s2)| (s2 / n - (s / n) * (s / n)).max(0.0) as f32)
                    .collect::<Vec<_>>();
                (mean.clone(), variance.clone(), Some((mean, variance)))
            }
            Phase::Inference => (
                self.moving_mean.as_slice().to_vec(),
                self.moving_variance.as_slice().to_vec(),
                None,
            ),
        };

        let inv_std = variance
            .iter()
            .map(|v| 1.0 / (v + self.epsilon).sqrt())
            .collect::<Vec<_>>();

        let mut normalized = Tensor3::<f32>::zeros(input.shape);
        let mut output = Tensor3::<f32>::zeros(input.shape);
        if input.numel() > 0 {
            let gamma = self.gamma.as_slice();
            let beta = self.beta.as_slice();
            normalized
                .as_slice_mut()
                .par_chunks_exact_mut(channels)
                .zip(output.as_slice_mut().par_chunks_exact_mut(channels))
                .zip(input.as_slice().par_chunks_exact(channels))
                .for_each(|((n_pixel, out_pixel), in_pixel)| {
                    for c in 0..channels {
                        n_pixel[c] = (in_pixel[c] - mean[c]) * inv_std[c];
                        out_pixel[c] = gamma[c] * n_pixel[c] + beta[c];
                    }
                });
        }

        Ok((
            output,
            BatchNormCache {
                normalized,
                inv_std,
                batch_moments,
            },
        ))
    }

    /// Gradients of the layer given the gradient of its output.
    ///
    /// When the forward pass normalized with the statistics of the example, the gradient
    /// also flows through the mean and the variance.
    pub fn backward(
        &self,
        cache: &BatchNormCache,
        grad_output: &Tensor3<f32>,
    ) -> Result<BatchNormGradients, NnError> {
        if grad_output.shape != cache.normalized.shape {
            return Err(NnError::shape_mismatch(
                "batch norm output gradient",
                &cache.normalized.shape,
                &grad_output.shape,
            ));
        }

        let channels = self.channels();
        let mut grad_input = Tensor3::<f32>::zeros(grad_output.shape);
        if grad_output.numel() == 0 {
            return Ok(BatchNormGradients {
                input: grad_input,
                gamma: Tensor1::zeros([channels]),
                beta: Tensor1::zeros([channels]),
            });
        }

        let (sum, dot) = channel_dot(
            grad_output.as_slice(),
            cache.normalized.as_slice(),
            channels,
        );
        let n = (grad_output.shape[0] * grad_output.shape[1]) as f32;
        let gamma = self.gamma.as_slice();
        let inv_std = &cache.inv_std;
        let train = cache.batch_moments.is_some();

        let mean_grad = sum.iter().map(|&s| s as f32 / n).collect::<Vec<_>>();
        let mean_dot = dot.iter().map(|&d| d as f32 / n).collect::<Vec<_>>();

        grad_input
            .as_slice_mut()
            .par_chunks_exact_mut(channels)
            .zip(grad_output.as_slice().par_chunks_exact(channels))
            .zip(cache.normalized.as_slice().par_chunks_exact(channels))
            .for_each(|((gin, gout), normalized)| {
                for c in 0..channels {
                    let scale = gamma[c] * inv_std[c];
                    gin[c] = if train {
                        scale * (gout[c] - mean_grad[c] - normalized[c] * mean_dot[c])
                    } else {
                        scale * gout[c]
                    };
                }
            });

        Ok(BatchNormGradients {
            input: grad_input,
            gamma: Tensor1::from_shape_vec([channels], dot.iter().map(|&d| d as f32).collect())?,
            beta: Tensor1::from_shape_vec([channels], sum.iter().map(|&s| s as f32).collect())?,
        })
    }

    /// Fold the statistics of a training step into the moving averages.
    ///
    /// `moving = decay * moving + (1 - decay) * batch`. Caches from inference passes carry no
    /// statistics and leave the layer unchanged.
    ///
    /// Returns whether the moving statistics were updated.
    pub fn update_moving_statistics(&mut self, cache: &BatchNormCache) -> bool {
        let Some((mean, variance)) = &cache.batch_moments else {
            return false;
        };

        let decay = self.decay;
        for (m, &b) in self.moving_mean.as_slice_mut().iter_mut().zip(mean) {
            *m = decay * *m + (1.0 - decay) * b;
        }
        for (v, &b) in self.moving_variance.as_slice_mut().iter_mut().zip(variance) {
            *v = decay * *v + (1.0 - decay) * b;
        }
        true
    }
}
