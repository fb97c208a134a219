//! Load-time configuration for LLM and embedding models.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::kv_config::{KvConfig, checkbox_value, entry};

pub const LLM_CONTEXT_LENGTH_KEY: &str = "llm.load.contextLength";
pub const EMBEDDING_CONTEXT_LENGTH_KEY: &str = "embedding.load.contextLength";
pub const EMBEDDING_EVAL_BATCH_SIZE_KEY: &str = "embedding.load.llama.evalBatchSize";

/// Encodes a load config as the `apiOverride` layer of a `loadModel` request.
pub trait LoadConfig {
    fn to_kv_config(&self) -> KvConfig;
}

/// How much of the model to place on the GPU.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OffloadRatio {
    /// Between 0 and 1.
    Fraction(f64),
    Max,
    Off,
}

impl OffloadRatio {
    fn to_value(self) -> Value {
        match self {
            OffloadRatio::Fraction(ratio) => json!(ratio),
            OffloadRatio::Max => json!("max"),
            OffloadRatio::Off => json!("off"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GpuSetting {
    pub ratio: Option<OffloadRatio>,
    pub main_gpu: Option<u32>,
    pub tensor_split: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GpuOffload {
    Ratio(OffloadRatio),
    Setting(GpuSetting),
}

impl GpuOffload {
    fn entries(gpu_offload: &Option<GpuOffload>) -> [(&'static str, Option<Value>); 3] {
        let (ratio, main_gpu, tensor_split) = match gpu_offload {
            None => (None, None, None),
            Some(GpuOffload::Ratio(ratio)) => (Some(ratio.to_value()), None, None),
            Some(GpuOffload::Setting(setting)) => (
                setting.ratio.map(OffloadRatio::to_value),
                entry(&setting.main_gpu),
                entry(&setting.tensor_split),
            ),
        };
        [
            ("llama.acceleration.offloadRatio", ratio),
            ("llama.acceleration.mainGpu", main_gpu),
            ("llama.acceleration.tensorSplit", tensor_split),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LlmLoadModelConfig {
    pub context_length: Option<u32>,
    pub eval_batch_size: Option<u32>,
    pub gpu_offload: Option<GpuOffload>,
    pub flash_attention: Option<bool>,
    pub keep_model_in_memory: Option<bool>,
    pub use_fp16_for_kv_cache: Option<bool>,
    pub try_mmap: Option<bool>,
    pub num_experts: Option<u32>,
    /// `0` keeps the model's own value.
    pub rope_frequency_base: Option<f64>,
    /// `0` keeps the model's own value.
    pub rope_frequency_scale: Option<f64>,
    /// `-1` picks a random seed.
    pub seed: Option<i64>,
}

impl LoadConfig for LlmLoadModelConfig {
    fn to_kv_config(&self) -> KvConfig {
        let mut entries = vec![
            (LLM_CONTEXT_LENGTH_KEY, entry(&self.context_length)),
            ("llama.evalBatchSize", entry(&self.eval_batch_size)),
            ("llama.flashAttention", entry(&self.flash_attention)),
            ("llama.keepModelInMemory", entry(&self.keep_model_in_memory)),
            ("llama.useFp16ForKVCache", entry(&self.use_fp16_for_kv_cache)),
            ("llama.tryMmap", entry(&self.try_mmap)),
            ("numExperts", entry(&self.num_experts)),
        ];
        entries.extend(GpuOffload::entries(&self.gpu_offload));
        entries.extend([
            (
                "llama.ropeFrequencyBase",
                checkbox_value(self.rope_frequency_base, 0.0, 0.0),
            ),
            (
                "llama.ropeFrequencyScale",
                checkbox_value(self.rope_frequency_scale, 0.0, 0.0),
            ),
            ("llama.seed", checkbox_value(self.seed, -1, 0)),
        ]);
        KvConfig::from_entries(entries)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmbeddingLoadModelConfig {
    pub context_length: Option<u32>,
    pub gpu_offload: Option<GpuSetting>,
    pub keep_model_in_memory: Option<bool>,
    pub try_mmap: Option<bool>,
    pub rope_frequency_base: Option<f64>,
    pub rope_frequency_scale: Option<f64>,
}

impl LoadConfig for EmbeddingLoadModelConfig {
    fn to_kv_config(&self) -> KvConfig {
        let gpu_offload = self.gpu_offload.clone().map(GpuOffload::Setting);
        let mut entries = GpuOffload::entries(&gpu_offload).to_vec();
        entries.extend([
            (EMBEDDING_CONTEXT_LENGTH_KEY, entry(&self.context_length)),
            ("llama.keepModelInMemory", entry(&self.keep_model_in_memory)),
            ("llama.tryMmap", entry(&self.try_mmap)),
            (
                "llama.ropeFrequencyBase",
                checkbox_value(self.rope_frequency_base, 0.0, 0.0),
            ),
            (
                "llama.ropeFrequencyScale",
                checkbox_value(self.rope_frequency_scale, 0.0, 0.0),
            ),
        ]);
        KvConfig::from_entries(entries)
    }
}

/// Passthrough used when a caller already holds an encoded config.
impl LoadConfig for KvConfig {
    fn to_kv_config(&self) -> KvConfig {
        self.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadModelRequest {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub load_config_stack: crate::kv_config::KvConfigStack,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_load_configs_encode_to_no_fields() {
        assert!(LlmLoadModelConfig::default().to_kv_config().is_empty());
        assert!(EmbeddingLoadModelConfig::default().to_kv_config().is_empty());
    }

    #[test]
    fn re_encoding_a_load_config_changes_nothing() {
        let once = LlmLoadModelConfig {
            context_length: Some(4096),
            seed: Some(-1),
            gpu_offload: Some(GpuOffload::Ratio(OffloadRatio::Max)),
            ..Default::default()
        }
        .to_kv_config();

        assert_eq!(KvConfig::from_entries(once.entries()), once);
    }

    #[test]
    fn llm_context_length_is_domain_qualified() {
        let config = LlmLoadModelConfig {
            context_length: Some(4096),
            ..Default::default()
        }
        .to_kv_config();
        assert_eq!(config.get(LLM_CONTEXT_LENGTH_KEY), Some(&json!(4096)));
        assert_eq!(config.get("contextLength"), None);
    }

    #[test]
    fn embedding_context_length_is_domain_qualified() {
        let config = EmbeddingLoadModelConfig {
            context_length: Some(512),
            ..Default::default()
        }
        .to_kv_config();
        assert_eq!(config.get(EMBEDDING_CONTEXT_LENGTH_KEY), Some(&json!(512)));
        assert_eq!(config.len(), 1);
    }

    #[test]
    fn seed_and_rope_are_checkbox_wrapped() {
        let config = LlmLoadModelConfig {
            seed: Some(-1),
            rope_frequency_base: Some(0.0),
            rope_frequency_scale: Some(2.0),
            ..Default::default()
        }
        .to_kv_config();
        assert_eq!(
            config.get("llama.seed"),
            Some(&json!({"checked": false, "value": 0}))
        );
        assert_eq!(
            config.get("llama.ropeFrequencyBase"),
            Some(&json!({"checked": false, "value": 0.0}))
        );
        assert_eq!(
            config.get("llama.ropeFrequencyScale"),
            Some(&json!({"checked": true, "value": 2.0}))
        );
    }

    #[test]
    fn gpu_offload_ratio_accepts_keywords() {
        let config = LlmLoadModelConfig {
            gpu_offload: Some(GpuOffload::Ratio(OffloadRatio::Max)),
            ..Default::default()
        }
        .to_kv_config();
        assert_eq!(
            config.get("llama.acceleration.offloadRatio"),
            Some(&json!("max"))
        );
        assert_eq!(config.get("llama.acceleration.mainGpu"), None);
    }

    #[test]
    fn gpu_setting_expands_to_three_keys() {
        let config = LlmLoadModelConfig {
            gpu_offload: Some(GpuOffload::Setting(GpuSetting {
                ratio: Some(OffloadRatio::Fraction(0.5)),
                main_gpu: Some(1),
                tensor_split: Some(vec![0.5, 0.5]),
            })),
            ..Default::default()
        }
        .to_kv_config();
        assert_eq!(
            config.get("llama.acceleration.offloadRatio"),
            Some(&json!(0.5))
        );
        assert_eq!(config.get("llama.acceleration.mainGpu"), Some(&json!(1)));
        assert_eq!(
            config.get("llama.acceleration.tensorSplit"),
            Some(&json!([0.5, 0.5]))
        );
    }
}
