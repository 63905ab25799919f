//! LLaMA causal language model using Candle
//!
//! The decoder is composed from candle-nn primitives. Every projection is a
//! [`LoraLinear`], so an adapter can be attached to any of
//! `q_proj k_proj v_proj o_proj gate_proj up_proj down_proj`.
//!
//! Base weights use the HF names (`model.layers.0.self_attn.q_proj.weight`).
//! Adapter variables use the PEFT names of the wrapped model
//! (`base_model.model.model.layers.0.self_attn.q_proj.lora_A.weight`), so a
//! saved adapter loads in PEFT and back.

use crate::candle_model::ToNerResult;
use crate::config::LlamaConfig;
use crate::lora_layer::LoraLinear;
use candle_core::{DType, Device, Module, Result as CandleResult, Tensor, D};
use candle_nn::{Embedding, Linear, VarBuilder};
use instruct_ner_core::error::{Error, Result};
use instruct_ner_core::traits::model::CausalLm;
use instruct_ner_core::training::LoRAConfig;
use std::collections::HashMap;
use tracing::info;

/// Prefix PEFT adds in front of the wrapped model's parameter names
pub const PEFT_PREFIX: &str = "base_model.model";

/// Adapter configuration and the var builder its variables live under
pub type AdapterBuilder<'a> = Option<(&'a LoRAConfig, VarBuilder<'a>)>;

fn sub_adapter<'a>(adapter: &AdapterBuilder<'a>, name: &str) -> AdapterBuilder<'a> {
    adapter.as_ref().map(|(config, vb)| (*config, vb.pp(name)))
}

fn projection(
    in_features: usize,
    out_features: usize,
    name: &str,
    vb: &VarBuilder,
    adapter: &AdapterBuilder,
) -> CandleResult<LoraLinear> {
    let lora = adapter
        .as_ref()
        .filter(|(config, _)| config.targets(name))
        .map(|(config, avb)| (*config, avb.pp(name)));
    LoraLinear::load(in_features, out_features, vb.pp(name), lora)
}

/// Root-mean-square layer norm, computed in F32
#[derive(Clone, Debug)]
struct RmsNorm {
    weight: Tensor,
    eps: f64,
}

impl RmsNorm {
    fn load(size: usize, eps: f64, vb: VarBuilder) -> CandleResult<Self> {
        Ok(Self {
            weight: vb.get(size, "weight")?,
            eps,
        })
    }

    fn forward(&self, x: &Tensor) -> CandleResult<Tensor> {
        let dtype = x.dtype();
        let x = x.to_dtype(DType::F32)?;
        let variance = x.sqr()?.mean_keepdim(D::Minus1)?;
        let x = x.broadcast_div(&(variance + self.eps)?.sqrt()?)?;
        x.to_dtype(dtype)?.broadcast_mul(&self.weight)
    }
}

#[derive(Clone, Debug)]
struct RotaryEmbedding {
    sin: Tensor,
    cos: Tensor,
}

impl RotaryEmbedding {
    fn new(config: &LlamaConfig, dtype: DType, device: &Device) -> CandleResult<Self> {
        let head_dim = config.head_dim();
        let max_seq_len = config.max_position_embeddings;
        let inv_freq: Vec<f32> = (0..head_dim)
            .step_by(2)
            .map(|i| 1.0 / (config.rope_theta as f32).powf(i as f32 / head_dim as f32))
            .collect();
        let inv_freq_len = inv_freq.len();
        let inv_freq = Tensor::from_vec(inv_freq, (1, inv_freq_len), device)?;
        let t = Tensor::arange(0u32, max_seq_len as u32, device)?
            .to_dtype(DType::F32)?
            .reshape((max_seq_len, 1))?;
        let freqs = t.matmul(&inv_freq)?;
        Ok(Self {
            sin: freqs.sin()?.to_dtype(dtype)?,
            cos: freqs.cos()?.to_dtype(dtype)?,
        })
    }

    /// Rotate q and k starting at position `offset`
    ///
    /// Training uses the op-by-op variant, which has a backward pass.
    fn apply(&self, q: &Tensor, k: &Tensor, offset: usize, train: bool) -> CandleResult<(Tensor, Tensor)> {
        let (_b, _h, seq_len, _d) = q.dims4()?;
        let cos = self.cos.narrow(0, offset, seq_len)?;
        let sin = self.sin.narrow(0, offset, seq_len)?;
        if train {
            Ok((
                candle_nn::rotary_emb::rope_slow(q, &cos, &sin)?,
                candle_nn::rotary_emb::rope_slow(k, &cos, &sin)?,
            ))
        } else {
            Ok((
                candle_nn::rotary_emb::rope(&q.contiguous()?, &cos, &sin)?,
                candle_nn::rotary_emb::rope(&k.contiguous()?, &cos, &sin)?,
            ))
        }
    }
}

/// Additive causal mask of shape (1, 1, seq_len, seq_len + offset)
fn causal_mask(seq_len: usize, offset: usize, dtype: DType, device: &Device) -> CandleResult<Tensor> {
    let total_len = seq_len + offset;
    let mask: Vec<f32> = (0..seq_len)
        .flat_map(|i| (0..total_len).map(move |j| if j > i + offset { f32::NEG_INFINITY } else { 0.0 }))
        .collect();
    Tensor::from_vec(mask, (1, 1, seq_len, total_len), device)?.to_dtype(dtype)
}

fn repeat_kv(x: Tensor, n_rep: usize) -> CandleResult<Tensor> {
    if n_rep == 1 {
        return Ok(x);
    }
    let (b, n_kv_heads, seq_len, head_dim) = x.dims4()?;
    Tensor::cat(&vec![&x; n_rep], 2)?.reshape((b, n_kv_heads * n_rep, seq_len, head_dim))
}

type KvSlot = Option<(Tensor, Tensor)>;

#[derive(Clone, Debug)]
struct Attention {
    q_proj: LoraLinear,
    k_proj: LoraLinear,
    v_proj: LoraLinear,
    o_proj: LoraLinear,
    num_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
}

impl Attention {
    fn load(config: &LlamaConfig, vb: VarBuilder, adapter: AdapterBuilder) -> CandleResult<Self> {
        let hidden = config.hidden_size;
        let head_dim = config.head_dim();
        let num_heads = config.num_attention_heads;
        let num_kv_heads = config.num_kv_heads();
        Ok(Self {
            q_proj: projection(hidden, num_heads * head_dim, "q_proj", &vb, &adapter)?,
            k_proj: projection(hidden, num_kv_heads * head_dim, "k_proj", &vb, &adapter)?,
            v_proj: projection(hidden, num_kv_heads * head_dim, "v_proj", &vb, &adapter)?,
            o_proj: projection(num_heads * head_dim, hidden, "o_proj", &vb, &adapter)?,
            num_heads,
            num_kv_heads,
            head_dim,
        })
    }

    fn forward(
        &self,
        x: &Tensor,
        rope: &RotaryEmbedding,
        offset: usize,
        mask: Option<&Tensor>,
        kv: Option<&mut KvSlot>,
        train: bool,
    ) -> CandleResult<Tensor> {
        let (b, t, _) = x.dims3()?;
        let q = self
            .q_proj
            .forward_t(x, train)?
            .reshape((b, t, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let k = self
            .k_proj
            .forward_t(x, train)?
            .reshape((b, t, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let v = self
            .v_proj
            .forward_t(x, train)?
            .reshape((b, t, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        let (q, k) = rope.apply(&q, &k, offset, train)?;

        let (k, v) = match kv {
            Some(slot) => {
                let (k, v) = match slot.take() {
                    Some((past_k, past_v)) => (Tensor::cat(&[&past_k, &k], 2)?, Tensor::cat(&[&past_v, &v], 2)?),
                    None => (k, v),
                };
                *slot = Some((k.clone(), v.clone()));
                (k, v)
            }
            None => (k, v),
        };

        let n_rep = self.num_heads / self.num_kv_heads;
        let k = repeat_kv(k, n_rep)?;
        let v = repeat_kv(v, n_rep)?.contiguous()?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let att = (q.matmul(&k.t()?.contiguous()?)? * scale)?;
        let att = match mask {
            Some(mask) => att.broadcast_add(mask)?,
            None => att,
        };
        let att = candle_nn::ops::softmax(&att.to_dtype(DType::F32)?, D::Minus1)?.to_dtype(v.dtype())?;

        let y = att
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((b, t, self.num_heads * self.head_dim))?;
        self.o_proj.forward_t(&y, train)
    }

    fn projections_mut(&mut self) -> [&mut LoraLinear; 4] {
        [&mut self.q_proj, &mut self.k_proj, &mut self.v_proj, &mut self.o_proj]
    }

    fn projections(&self) -> [&LoraLinear; 4] {
        [&self.q_proj, &self.k_proj, &self.v_proj, &self.o_proj]
    }
}

#[derive(Clone, Debug)]
struct Mlp {
    gate_proj: LoraLinear,
    up_proj: LoraLinear,
    down_proj: LoraLinear,
}

impl Mlp {
    fn load(config: &LlamaConfig, vb: VarBuilder, adapter: AdapterBuilder) -> CandleResult<Self> {
        let hidden = config.hidden_size;
        let inter = config.intermediate_size;
        Ok(Self {
            gate_proj: projection(hidden, inter, "gate_proj", &vb, &adapter)?,
            up_proj: projection(hidden, inter, "up_proj", &vb, &adapter)?,
            down_proj: projection(inter, hidden, "down_proj", &vb, &adapter)?,
        })
    }

    fn forward(&self, x: &Tensor, train: bool) -> CandleResult<Tensor> {
        let gate = candle_nn::ops::silu(&self.gate_proj.forward_t(x, train)?)?;
        let up = self.up_proj.forward_t(x, train)?;
        self.down_proj.forward_t(&(gate * up)?, train)
    }
}

#[derive(Clone, Debug)]
struct DecoderLayer {
    input_layernorm: RmsNorm,
    self_attn: Attention,
    post_attention_layernorm: RmsNorm,
    mlp: Mlp,
}

impl DecoderLayer {
    fn load(config: &LlamaConfig, vb: VarBuilder, adapter: AdapterBuilder) -> CandleResult<Self> {
        Ok(Self {
            input_layernorm: RmsNorm::load(config.hidden_size, config.rms_norm_eps, vb.pp("input_layernorm"))?,
            self_attn: Attention::load(config, vb.pp("self_attn"), sub_adapter(&adapter, "self_attn"))?,
            post_attention_layernorm: RmsNorm::load(
                config.hidden_size,
                config.rms_norm_eps,
                vb.pp("post_attention_layernorm"),
            )?,
            mlp: Mlp::load(config, vb.pp("mlp"), sub_adapter(&adapter, "mlp"))?,
        })
    }

    fn forward(
        &self,
        x: &Tensor,
        rope: &RotaryEmbedding,
        offset: usize,
        mask: Option<&Tensor>,
        kv: Option<&mut KvSlot>,
        train: bool,
    ) -> CandleResult<Tensor> {
        let residual = x;
        let h = self.input_layernorm.forward(x)?;
        let h = self.self_attn.forward(&h, rope, offset, mask, kv, train)?;
        let x = (residual + h)?;
        let h = self.post_attention_layernorm.forward(&x)?;
        let h = self.mlp.forward(&h, train)?;
        x + h
    }

    fn projections(&self) -> Vec<&LoraLinear> {
        let mut all: Vec<&LoraLinear> = self.self_attn.projections().to_vec();
        all.extend([&self.mlp.gate_proj, &self.mlp.up_proj, &self.mlp.down_proj]);
        all
    }

    fn projections_mut(&mut self) -> Vec<&mut LoraLinear> {
        let mut all: Vec<&mut LoraLinear> = self.self_attn.projections_mut().into_iter().collect();
        all.extend([&mut self.mlp.gate_proj, &mut self.mlp.up_proj, &mut self.mlp.down_proj]);
        all
    }

    fn norm_params(&self) -> usize {
        self.input_layernorm.weight.elem_count() + self.post_attention_layernorm.weight.elem_count()
    }
}

/// Decoding state: per-layer key/value tensors and the number of positions
/// already processed
#[derive(Clone, Debug)]
pub struct LlamaCache {
    kvs: Vec<KvSlot>,
    seqlen_offset: usize,
}

impl LlamaCache {
    /// Empty cache for `num_layers` layers
    pub fn new(num_layers: usize) -> Self {
        Self {
            kvs: vec![None; num_layers],
            seqlen_offset: 0,
        }
    }

    /// Positions already in the cache
    pub fn seqlen_offset(&self) -> usize {
        self.seqlen_offset
    }
}

/// Parameter totals, as reported by PEFT
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParameterCount {
    /// Adapter parameters
    pub trainable: usize,
    /// Base and adapter parameters
    pub total: usize,
}

impl ParameterCount {
    /// Trainable share in percent
    pub fn trainable_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            100.0 * self.trainable as f64 / self.total as f64
        }
    }
}

/// LLaMA decoder with an LM head
#[derive(Clone, Debug)]
pub struct LlamaForCausalLM {
    embed_tokens: Embedding,
    layers: Vec<DecoderLayer>,
    norm: RmsNorm,
    lm_head: Linear,
    rope: RotaryEmbedding,
    config: LlamaConfig,
    device: Device,
    dtype: DType,
}

impl LlamaForCausalLM {
    /// Build the model from base weights in `vb`, with an adapter created in
    /// (or read from) the adapter var builder when given
    ///
    /// The adapter var builder is the root of the adapter var map; PEFT
    /// prefixes are added here.
    pub fn load(config: &LlamaConfig, vb: VarBuilder, adapter: AdapterBuilder) -> Result<Self> {
        config.validate()?;
        Self::load_inner(config, vb, adapter).ner_loading()
    }

    fn load_inner(config: &LlamaConfig, vb: VarBuilder, adapter: AdapterBuilder) -> CandleResult<Self> {
        let device = vb.device().clone();
        let dtype = vb.dtype();
        let model_vb = vb.pp("model");
        let adapter = sub_adapter(&adapter, PEFT_PREFIX);
        let adapter = sub_adapter(&adapter, "model");
        let layers_adapter = sub_adapter(&adapter, "layers");

        let embed_weight = model_vb.pp("embed_tokens").get((config.vocab_size, config.hidden_size), "weight")?;
        let embed_tokens = Embedding::new(embed_weight.clone(), config.hidden_size);

        let layers = (0..config.num_hidden_layers)
            .map(|i| {
                DecoderLayer::load(
                    config,
                    model_vb.pp("layers").pp(i),
                    sub_adapter(&layers_adapter, &i.to_string()),
                )
            })
            .collect::<CandleResult<Vec<_>>>()?;

        let norm = RmsNorm::load(config.hidden_size, config.rms_norm_eps, model_vb.pp("norm"))?;
        let lm_head = if config.tie_word_embeddings {
            Linear::new(embed_weight, None)
        } else {
            Linear::new(vb.pp("lm_head").get((config.vocab_size, config.hidden_size), "weight")?, None)
        };
        let rope = RotaryEmbedding::new(config, dtype, &device)?;

        Ok(Self {
            embed_tokens,
            layers,
            norm,
            lm_head,
            rope,
            config: config.clone(),
            device,
            dtype,
        })
    }

    /// Logits of shape (batch, seq_len, vocab) in F32
    ///
    /// `offset` is the number of positions already held by `cache`.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        offset: usize,
        cache: Option<&mut LlamaCache>,
        train: bool,
    ) -> CandleResult<Tensor> {
        let (_b, t) = input_ids.dims2()?;
        let mut x = self.embed_tokens.forward(input_ids)?;
        let mask = if t > 1 {
            Some(causal_mask(t, offset, x.dtype(), &self.device)?)
        } else {
            None
        };

        let mut cache = cache;
        for (i, layer) in self.layers.iter().enumerate() {
            let kv = cache.as_deref_mut().and_then(|c| c.kvs.get_mut(i));
            x = layer.forward(&x, &self.rope, offset, mask.as_ref(), kv, train)?;
        }

        let x = self.norm.forward(&x)?;
        self.lm_head.forward(&x)?.to_dtype(DType::F32)
    }

    /// Full-sequence forward for training or evaluation loss
    ///
    /// Right padding needs no attention mask: with causal attention, real
    /// tokens never see the padding that follows them.
    pub fn forward_train(&self, input_ids: &Tensor, train: bool) -> Result<Tensor> {
        self.forward(input_ids, 0, None, train).ner_training()
    }

    /// Fold every adapter into its base weight
    pub fn merge_adapters(&mut self) -> Result<()> {
        for layer in &mut self.layers {
            for projection in layer.projections_mut() {
                projection.merge()?;
            }
        }
        Ok(())
    }

    /// Check if any projection carries an adapter
    pub fn has_adapters(&self) -> bool {
        self.layers
            .iter()
            .flat_map(|l| l.projections())
            .any(|p| p.lora().is_some())
    }

    /// Trainable and total parameter counts
    pub fn parameter_count(&self) -> ParameterCount {
        let mut trainable = 0;
        let mut total = self.embed_tokens.embeddings().elem_count() + self.norm.weight.elem_count();
        if !self.config.tie_word_embeddings {
            total += self.lm_head.weight().elem_count();
        }
        for layer in &self.layers {
            total += layer.norm_params();
            for projection in layer.projections() {
                trainable += projection.trainable_params();
                total += projection.total_params();
            }
        }
        ParameterCount { trainable, total }
    }

    /// Log parameter counts the way PEFT prints them
    pub fn print_trainable_parameters(&self) -> ParameterCount {
        let count = self.parameter_count();
        info!(
            "trainable params: {} || all params: {} || trainable%: {:.4}",
            count.trainable,
            count.total,
            count.trainable_percent()
        );
        count
    }

    /// Architecture config
    pub fn config(&self) -> &LlamaConfig {
        &self.config
    }

    /// Device the weights live on
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Weight dtype
    pub fn dtype(&self) -> DType {
        self.dtype
    }
}

impl CausalLm for LlamaForCausalLM {
    type Cache = LlamaCache;

    fn new_cache(&self) -> Result<LlamaCache> {
        Ok(LlamaCache::new(self.config.num_hidden_layers))
    }

    fn forward_step(&self, tokens: &[u32], cache: &mut LlamaCache) -> Result<Vec<f32>> {
        if tokens.is_empty() {
            return Err(Error::Generation("forward step without tokens".to_string()));
        }
        let offset = cache.seqlen_offset;
        if offset + tokens.len() > self.max_seq_len() {
            return Err(Error::Generation(format!(
                "sequence of {} tokens exceeds the model limit of {}",
                offset + tokens.len(),
                self.max_seq_len()
            )));
        }

        let input = Tensor::new(tokens, &self.device)
            .and_then(|t| t.unsqueeze(0))
            .ner_result()?;
        let logits = self.forward(&input, offset, Some(&mut *cache), false).ner_result()?;
        cache.seqlen_offset += tokens.len();

        logits
            .squeeze(0)
            .and_then(|l| l.get(tokens.len() - 1))
            .and_then(|l| l.to_vec1::<f32>())
            .ner_result()
    }

    fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    fn max_seq_len(&self) -> usize {
        self.config.max_position_embeddings
    }
}

/// Randomly initialised base weights under HF names
///
/// Norm weights are ones, everything else is N(0, 0.02). Used for tests and
/// smoke runs without a checkpoint.
pub fn random_weights(config: &LlamaConfig, device: &Device) -> Result<HashMap<String, Tensor>> {
    let hidden = config.hidden_size;
    let inter = config.intermediate_size;
    let head_dim = config.head_dim();
    let q_out = config.num_attention_heads * head_dim;
    let kv_out = config.num_kv_heads() * head_dim;

    let mut shapes: Vec<(String, (usize, usize))> = vec![
        ("model.embed_tokens.weight".to_string(), (config.vocab_size, hidden)),
        ("lm_head.weight".to_string(), (config.vocab_size, hidden)),
    ];
    for i in 0..config.num_hidden_layers {
        let p = format!("model.layers.{}", i);
        shapes.extend([
            (format!("{}.self_attn.q_proj.weight", p), (q_out, hidden)),
            (format!("{}.self_attn.k_proj.weight", p), (kv_out, hidden)),
            (format!("{}.self_attn.v_proj.weight", p), (kv_out, hidden)),
            (format!("{}.self_attn.o_proj.weight", p), (hidden, q_out)),
            (format!("{}.mlp.gate_proj.weight", p), (inter, hidden)),
            (format!("{}.mlp.up_proj.weight", p), (inter, hidden)),
            (format!("{}.mlp.down_proj.weight", p), (hidden, inter)),
        ]);
    }

    let mut weights = HashMap::new();
    for (name, shape) in shapes {
        let tensor = Tensor::randn(0f32, 0.02, shape, device).ner_loading()?;
        weights.insert(name, tensor);
    }

    let mut norms = vec!["model.norm.weight".to_string()];
    for i in 0..config.num_hidden_layers {
        norms.push(format!("model.layers.{}.input_layernorm.weight", i));
        norms.push(format!("model.layers.{}.post_attention_layernorm.weight", i));
    }
    for name in norms {
        weights.insert(name, Tensor::ones(hidden, DType::F32, device).ner_loading()?);
    }

    Ok(weights)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use candle_nn::VarMap;

    pub(crate) fn tiny_model(varmap: Option<&VarMap>, lora: &LoRAConfig) -> LlamaForCausalLM {
        let config = LlamaConfig::tiny(16);
        let device = Device::Cpu;
        let weights = random_weights(&config, &device).unwrap();
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let adapter = varmap.map(|vm| (lora, VarBuilder::from_varmap(vm, DType::F32, &device)));
        LlamaForCausalLM::load(&config, vb, adapter).unwrap()
    }

    #[test]
    fn test_forward_shapes() {
        let model = tiny_model(None, &LoRAConfig::default());
        let input = Tensor::new(&[[1u32, 5, 6, 7], [1, 8, 9, 2]], &Device::Cpu).unwrap();
        let logits = model.forward_train(&input, false).unwrap();
        assert_eq!(logits.dims(), &[2, 4, 16]);
        assert_eq!(logits.dtype(), DType::F32);
    }

    #[test]
    fn test_adapter_variable_names() {
        let varmap = VarMap::new();
        let lora = LoRAConfig::new(4, 8.0).with_target_modules(["q_proj", "v_proj"]);
        let model = tiny_model(Some(&varmap), &lora);
        assert!(model.has_adapters());

        let names: Vec<String> = varmap.data().lock().unwrap().keys().cloned().collect();
        assert_eq!(names.len(), 2 * 2 * 2);
        assert!(names.contains(&"base_model.model.model.layers.0.self_attn.q_proj.lora_A.weight".to_string()));
        assert!(names.contains(&"base_model.model.model.layers.1.self_attn.v_proj.lora_B.weight".to_string()));
    }

    #[test]
    fn test_parameter_count() {
        let varmap = VarMap::new();
        let lora = LoRAConfig::new(4, 8.0).with_target_modules(["q_proj", "v_proj"]);
        let model = tiny_model(Some(&varmap), &lora);

        let count = model.print_trainable_parameters();
        // per layer: q (32 -> 32) and v (32 -> 16), rank 4
        let per_layer = (4 * 32 + 32 * 4) + (4 * 32 + 16 * 4);
        assert_eq!(count.trainable, 2 * per_layer);
        assert!(count.total > count.trainable);
        assert!(count.trainable_percent() > 0.0);
    }

    #[test]
    fn test_cached_steps_match_full_forward() {
        let model = tiny_model(None, &LoRAConfig::default());
        let tokens = [1u32, 4, 7, 3, 9];

        let input = Tensor::new(&tokens, &Device::Cpu).unwrap().unsqueeze(0).unwrap();
        let full = model.forward_train(&input, false).unwrap();
        let expected: Vec<f32> = full.squeeze(0).unwrap().get(4).unwrap().to_vec1().unwrap();

        let mut cache = model.new_cache().unwrap();
        model.forward_step(&tokens[..3], &mut cache).unwrap();
        model.forward_step(&tokens[3..4], &mut cache).unwrap();
        let stepped = model.forward_step(&tokens[4..], &mut cache).unwrap();
        assert_eq!(cache.seqlen_offset(), 5);

        for (a, b) in expected.iter().zip(&stepped) {
            assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_merge_keeps_logits() {
        let varmap = VarMap::new();
        let lora = LoRAConfig::new(2, 4.0).with_target_modules(["q_proj", "down_proj"]);
        let mut model = tiny_model(Some(&varmap), &lora);

        // move B away from zero so the adapter has an effect
        for (name, var) in varmap.data().lock().unwrap().iter() {
            if name.ends_with("lora_B.weight") {
                let noise = Tensor::randn(0f32, 0.5, var.shape(), &Device::Cpu).unwrap();
                var.set(&noise).unwrap();
            }
        }
        let model_before = model.clone();

        let input = Tensor::new(&[[1u32, 3, 5, 7]], &Device::Cpu).unwrap();
        let before = model_before.forward_train(&input, false).unwrap();
        model.merge_adapters().unwrap();
        assert!(!model.has_adapters());
        let after = model.forward_train(&input, false).unwrap();

        let diff = (before - after)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(diff < 1e-3);
    }

    #[test]
    fn test_step_rejects_overflow() {
        let model = tiny_model(None, &LoRAConfig::default());
        let mut cache = model.new_cache().unwrap();
        let long = vec![3u32; model.max_seq_len() + 1];
        assert!(model.forward_step(&long, &mut cache).is_err());
        assert!(model.forward_step(&[], &mut cache).is_err());
    }
}
