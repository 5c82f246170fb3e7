// ============================================================
// Layer 5 — Substitute Network
// ============================================================
// A plain feed-forward network trained to reproduce one
// attention block:
//
//   [batch, G * in_width] ─► Linear ─► ReLU ─► … ─► Linear ─► [batch, G * out_width]
//
// The whole padded sequence is flattened into one vector, so
// the network sees every token at once, like attention does.
// Padding positions are zero on the way in and are excluded
// from the error metrics on the way out.
//
// Reference: Burn Book §3 (Building Blocks)

use burn::{
    nn::{
        loss::{MseLoss, Reduction},
        Linear, LinearConfig, Relu,
    },
    prelude::*,
};

// #[derive(Config)] also derives Clone and serde; saved next to the
// weights via train_config.json.
#[derive(Config, Debug)]
pub struct SubstituteConfig {
    /// Flattened input width: global max length × input features.
    pub in_features:  usize,
    /// Flattened output width: global max length × output features.
    pub out_features: usize,
    /// Hidden layer widths, input side first. Empty = single linear map.
    pub hidden:       Vec<usize>,
}

impl SubstituteConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SubstituteNetwork<B> {
        let mut widths = Vec::with_capacity(self.hidden.len() + 2);
        widths.push(self.in_features);
        widths.extend(&self.hidden);
        widths.push(self.out_features);

        let layers = widths
            .windows(2)
            .map(|w| LinearConfig::new(w[0], w[1]).init(device))
            .collect();
        SubstituteNetwork { layers, activation: Relu::new() }
    }
}

#[derive(Module, Debug)]
pub struct SubstituteNetwork<B: Backend> {
    pub layers:     Vec<Linear<B>>,
    pub activation: Relu,
}

impl<B: Backend> SubstituteNetwork<B> {
    /// features: [batch, in_features] → [batch, out_features]
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let last = self.layers.len().saturating_sub(1);
        let mut x = features;
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(x);
            // no activation after the output layer: targets are signed
            if i < last {
                x = self.activation.forward(x);
            }
        }
        x
    }

    /// MSE between prediction and padded target, divided by the
    /// fraction of valid mask entries.
    pub fn forward_loss(
        &self,
        features:   Tensor<B, 2>,
        targets:    Tensor<B, 2>,
        normalizer: f64,
    ) -> (Tensor<B, 1>, Tensor<B, 2>) {
        let pred = self.forward(features);
        let mse = MseLoss::new().forward(pred.clone(), targets, Reduction::Mean);
        // an all-padding batch has nothing to learn from
        let loss = if normalizer > 0.0 { mse / normalizer } else { mse };
        (loss, pred)
    }
}

/// Mean absolute percentage error over the valid target elements:
/// |pred − target| / max(|target|, 1e-32), averaged.
pub fn masked_mape<B: Backend>(
    pred:   Tensor<B, 2>,
    target: Tensor<B, 2>,
    mask:   Tensor<B, 2, Bool>,
) -> f64 {
    let valid = mask.clone().int().sum().into_scalar().elem::<f64>();
    if valid == 0.0 {
        return 0.0;
    }
    let relative = (pred - target.clone()).abs() / target.abs().clamp_min(1e-32);
    let total = relative
        .mask_fill(mask.bool_not(), 0.0)
        .sum()
        .into_scalar()
        .elem::<f64>();
    total / valid
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn device() -> <TestBackend as Backend>::Device {
        Default::default()
    }

    #[test]
    fn test_layer_widths_follow_config() {
        let net: SubstituteNetwork<TestBackend> =
            SubstituteConfig::new(12, 6, vec![32, 16]).init(&device());
        assert_eq!(net.layers.len(), 3);

        let out = net.forward(Tensor::zeros([4, 12], &device()));
        assert_eq!(out.dims(), [4, 6]);
    }

    #[test]
    fn test_no_hidden_layers_is_linear_map() {
        let net: SubstituteNetwork<TestBackend> =
            SubstituteConfig::new(5, 3, vec![]).init(&device());
        assert_eq!(net.layers.len(), 1);
    }

    #[test]
    fn test_loss_is_divided_by_normalizer() {
        let net: SubstituteNetwork<TestBackend> =
            SubstituteConfig::new(2, 2, vec![]).init(&device());
        let x = Tensor::<TestBackend, 2>::ones([1, 2], &device());
        let y = Tensor::<TestBackend, 2>::zeros([1, 2], &device());

        let (full, _) = net.forward_loss(x.clone(), y.clone(), 1.0);
        let (half, _) = net.forward_loss(x, y, 0.5);
        let full = full.into_scalar().elem::<f64>();
        let half = half.into_scalar().elem::<f64>();
        assert!((half - 2.0 * full).abs() < 1e-5);
    }

    #[test]
    fn test_mape_ignores_masked_elements() {
        let pred = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![1.5f32, 100.0, 3.0, 7.0], [1, 4]), &device());
        let target = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![1.0f32, 0.0, 2.0, 0.0], [1, 4]), &device());
        let mask = Tensor::<TestBackend, 2, Bool>::from_data(
            TensorData::new(vec![true, false, true, false], [1, 4]), &device());

        // (0.5 + 0.5) / 2
        let mape = masked_mape(pred, target, mask);
        assert!((mape - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_mape_of_empty_mask_is_zero() {
        let t = Tensor::<TestBackend, 2>::ones([1, 2], &device());
        let mask = Tensor::<TestBackend, 2, Bool>::from_data(
            TensorData::new(vec![false, false], [1, 2]), &device());
        assert_eq!(masked_mape(t.clone(), t, mask), 0.0);
    }
}
