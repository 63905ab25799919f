//! LoRA (Low-Rank Adaptation) linear layer
//!
//! Given a frozen base weight W (out_features × in_features), LoRA adds a
//! trainable update B·A where A is (rank × in_features) and B is
//! (out_features × rank):
//!
//! `h = W x + scaling · B A dropout(x)`, with `scaling = alpha / rank`.
//!
//! A starts Kaiming-uniform and B starts at zero, so a fresh adapter leaves
//! the base model unchanged. The adapter path runs in F32 whatever the base
//! dtype is.

use candle_core::{DType, Module, Result as CandleResult, Tensor};
use candle_nn::{init, Linear, VarBuilder};
use instruct_ner_core::error::{Error, Result};
use instruct_ner_core::training::LoRAConfig;

/// Trainable low-rank pair
#[derive(Clone, Debug)]
pub struct LoraWeights {
    /// (rank × in_features)
    lora_a: Tensor,
    /// (out_features × rank)
    lora_b: Tensor,
    scaling: f64,
    dropout: f32,
}

impl LoraWeights {
    /// Create (or fetch, when already present in the var map) the adapter
    /// variables under `vb`
    pub fn new(in_features: usize, out_features: usize, config: &LoRAConfig, vb: VarBuilder) -> CandleResult<Self> {
        let lora_a = vb.get_with_hints((config.r, in_features), "lora_A.weight", init::DEFAULT_KAIMING_UNIFORM)?;
        let lora_b = vb.get_with_hints((out_features, config.r), "lora_B.weight", init::Init::Const(0.0))?;
        Ok(Self::from_weights(lora_a, lora_b, config))
    }

    /// Wrap existing tensors
    pub fn from_weights(lora_a: Tensor, lora_b: Tensor, config: &LoRAConfig) -> Self {
        Self {
            lora_a,
            lora_b,
            scaling: config.scaling() as f64,
            dropout: config.lora_dropout,
        }
    }

    /// Scaled low-rank update for `x`, in F32
    fn forward_t(&self, x: &Tensor, train: bool) -> CandleResult<Tensor> {
        let x = x.to_dtype(DType::F32)?;
        let x = if train && self.dropout > 0.0 {
            candle_nn::ops::dropout(&x, self.dropout)?
        } else {
            x
        };
        let h = x.broadcast_matmul(&self.lora_a.t()?)?;
        let h = h.broadcast_matmul(&self.lora_b.t()?)?;
        h.affine(self.scaling, 0.0)
    }

    /// Scaled dense update B·A
    pub fn delta_weight(&self) -> CandleResult<Tensor> {
        self.lora_b.matmul(&self.lora_a)?.affine(self.scaling, 0.0)
    }

    /// Rank
    pub fn rank(&self) -> usize {
        self.lora_a.dims()[0]
    }

    /// Scaling factor
    pub fn scaling(&self) -> f64 {
        self.scaling
    }

    /// Number of parameters
    pub fn param_count(&self) -> usize {
        self.lora_a.elem_count() + self.lora_b.elem_count()
    }
}

/// Linear layer with an optional LoRA adapter
#[derive(Clone, Debug)]
pub struct LoraLinear {
    base: Linear,
    lora: Option<LoraWeights>,
    in_features: usize,
    out_features: usize,
}

impl LoraLinear {
    /// Wrap a base layer
    pub fn new(base: Linear, lora: Option<LoraWeights>) -> CandleResult<Self> {
        let (out_features, in_features) = base.weight().dims2()?;
        Ok(Self {
            base,
            lora,
            in_features,
            out_features,
        })
    }

    /// Load the frozen weight from `vb` and attach an adapter from
    /// `adapter` when given
    pub fn load(
        in_features: usize,
        out_features: usize,
        vb: VarBuilder,
        adapter: Option<(&LoRAConfig, VarBuilder)>,
    ) -> CandleResult<Self> {
        let weight = vb.get((out_features, in_features), "weight")?;
        let lora = adapter
            .map(|(config, avb)| LoraWeights::new(in_features, out_features, config, avb))
            .transpose()?;
        Self::new(Linear::new(weight, None), lora)
    }

    /// Forward pass, with adapter dropout active when `train`
    pub fn forward_t(&self, x: &Tensor, train: bool) -> CandleResult<Tensor> {
        let out = self.base.forward(x)?;
        match &self.lora {
            Some(lora) => {
                let update = lora.forward_t(x, train)?.to_dtype(out.dtype())?;
                out + update
            }
            None => Ok(out),
        }
    }

    /// Fold the adapter into the base weight and drop it
    pub fn merge(&mut self) -> Result<()> {
        let Some(lora) = self.lora.take() else {
            return Ok(());
        };
        let weight = self.base.weight();
        let merged = weight
            .to_dtype(DType::F32)
            .and_then(|w| w + lora.delta_weight()?)
            .and_then(|w| w.to_dtype(weight.dtype()))
            .map_err(|e| Error::LoRA(format!("merge failed: {}", e)))?;
        self.base = Linear::new(merged, None);
        Ok(())
    }

    /// Base weight
    pub fn weight(&self) -> &Tensor {
        self.base.weight()
    }

    /// Adapter, if any
    pub fn lora(&self) -> Option<&LoraWeights> {
        self.lora.as_ref()
    }

    /// Input width
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Output width
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Get number of trainable parameters
    pub fn trainable_params(&self) -> usize {
        self.lora.as_ref().map(LoraWeights::param_count).unwrap_or(0)
    }

    /// Get total parameters
    pub fn total_params(&self) -> usize {
        self.base.weight().elem_count() + self.trainable_params()
    }
}

impl Module for LoraLinear {
    fn forward(&self, x: &Tensor) -> CandleResult<Tensor> {
        self.forward_t(x, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    fn base_linear(in_features: usize, out_features: usize) -> Linear {
        let weight = Tensor::randn(0f32, 1.0, (out_features, in_features), &Device::Cpu).unwrap();
        Linear::new(weight, None)
    }

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
        (a - b).unwrap().abs().unwrap().flatten_all().unwrap().max(0).unwrap().to_scalar::<f32>().unwrap()
    }

    fn adapter(varmap: &VarMap, in_features: usize, out_features: usize, config: &LoRAConfig) -> LoraWeights {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        LoraWeights::new(in_features, out_features, config, vb.pp("layer")).unwrap()
    }

    #[test]
    fn test_lora_weights_shapes() {
        let varmap = VarMap::new();
        let config = LoRAConfig::new(4, 8.0);
        let lora = adapter(&varmap, 16, 24, &config);

        assert_eq!(lora.rank(), 4);
        assert_eq!(lora.scaling(), 2.0);
        assert_eq!(lora.param_count(), 4 * 16 + 24 * 4);

        let names: Vec<String> = varmap.data().lock().unwrap().keys().cloned().collect();
        assert!(names.contains(&"layer.lora_A.weight".to_string()));
        assert!(names.contains(&"layer.lora_B.weight".to_string()));
    }

    #[test]
    fn test_fresh_adapter_is_identity() {
        let varmap = VarMap::new();
        let config = LoRAConfig::new(4, 8.0);
        let base = base_linear(16, 24);
        let plain = LoraLinear::new(base.clone(), None).unwrap();
        let adapted = LoraLinear::new(base, Some(adapter(&varmap, 16, 24, &config))).unwrap();

        let x = Tensor::randn(0f32, 1.0, (2, 3, 16), &Device::Cpu).unwrap();
        let a = plain.forward(&x).unwrap();
        let b = adapted.forward(&x).unwrap();
        assert_eq!(b.dims(), &[2, 3, 24]);

        assert!(max_abs_diff(&a, &b) < 1e-6);
    }

    #[test]
    fn test_merge_matches_unmerged_forward() {
        let config = LoRAConfig::new(2, 4.0);
        let lora_a = Tensor::randn(0f32, 1.0, (2, 8), &Device::Cpu).unwrap();
        let lora_b = Tensor::randn(0f32, 1.0, (6, 2), &Device::Cpu).unwrap();
        let lora = LoraWeights::from_weights(lora_a, lora_b, &config);

        let mut layer = LoraLinear::new(base_linear(8, 6), Some(lora)).unwrap();
        let x = Tensor::randn(0f32, 1.0, (3, 8), &Device::Cpu).unwrap();
        let before = layer.forward(&x).unwrap();

        layer.merge().unwrap();
        assert!(layer.lora().is_none());
        assert_eq!(layer.trainable_params(), 0);
        let after = layer.forward(&x).unwrap();

        assert!(max_abs_diff(&before, &after) < 1e-4);
    }

    #[test]
    fn test_param_counts() {
        let varmap = VarMap::new();
        let config = LoRAConfig::new(8, 16.0);
        let layer = LoraLinear::new(base_linear(32, 64), Some(adapter(&varmap, 32, 64, &config))).unwrap();
        assert_eq!(layer.in_features(), 32);
        assert_eq!(layer.out_features(), 64);
        assert_eq!(layer.trainable_params(), 8 * 32 + 64 * 8);
        assert_eq!(layer.total_params(), 32 * 64 + 8 * 32 + 64 * 8);
    }
}
