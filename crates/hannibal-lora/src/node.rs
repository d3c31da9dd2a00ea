//! The LoRA loader node
//!
//! Ties the pieces together: resolve the file, reuse or load its tensors,
//! translate Musubi keys, keep the selected blocks and hand the result to
//! the host's merge service.

use crate::block_spec::{BlockSpec, DEFAULT_BLOCKS_SPEC};
use crate::cache::LoraCache;
use crate::config::LoaderConfig;
use crate::error::{LoraError, Result};
use crate::filter::filter_blocks;
use crate::format::convert;
use crate::host::{ModelMerger, PathResolver, TensorLoader};
use crate::loader::FileLoader;
use crate::registry::LoraRegistry;
use crate::schema::{NodeDefinition, STRENGTH_DEFAULT, STRENGTH_MAX, STRENGTH_MIN};
use crate::WeightDict;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Values the host passes to the node, besides the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInputs {
    #[serde(default)]
    pub lora_name: Option<String>,
    #[serde(default = "default_strength")]
    pub strength: f64,
    #[serde(default = "default_blocks_spec")]
    pub blocks_spec: String,
}

fn default_strength() -> f64 {
    STRENGTH_DEFAULT
}

fn default_blocks_spec() -> String {
    DEFAULT_BLOCKS_SPEC.to_string()
}

impl Default for NodeInputs {
    fn default() -> Self {
        Self {
            lora_name: None,
            strength: default_strength(),
            blocks_spec: default_blocks_spec(),
        }
    }
}

impl NodeInputs {
    pub fn new(
        lora_name: impl Into<String>,
        strength: f64,
        blocks_spec: impl Into<String>,
    ) -> Self {
        Self {
            lora_name: Some(lora_name.into()),
            strength,
            blocks_spec: blocks_spec.into(),
        }
    }

    /// Strength limited to the widget range
    pub fn clamped_strength(&self) -> f32 {
        self.strength.clamp(STRENGTH_MIN, STRENGTH_MAX) as f32
    }

    /// Key the host compares to decide whether downstream results are stale.
    /// Equal inputs always give equal keys.
    pub fn change_key(&self) -> String {
        format!(
            "{}_{:?}_{}",
            self.lora_name.as_deref().unwrap_or_default(),
            self.strength,
            self.blocks_spec
        )
    }
}

/// LoRA loader with per-block selection.
///
/// Holds the last loaded file in a [`LoraCache`]. One caller at a time; give
/// each concurrent caller its own loader.
pub struct HannibalLoraLoader<R, L> {
    resolver: R,
    loader: L,
    cache: LoraCache,
}

impl HannibalLoraLoader<LoraRegistry, FileLoader> {
    /// Loader backed by the configured search paths and the on-disk file loader
    pub fn from_config(config: &LoaderConfig) -> Self {
        Self::new(
            LoraRegistry::new(config.search_paths.clone()),
            FileLoader::new(config),
        )
    }
}

impl<R, L> HannibalLoraLoader<R, L>
where
    R: PathResolver,
    L: TensorLoader,
{
    pub fn new(resolver: R, loader: L) -> Self {
        Self {
            resolver,
            loader,
            cache: LoraCache::new(),
        }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    pub fn cache(&self) -> &LoraCache {
        &self.cache
    }

    /// Node definition listing the LoRAs currently available
    pub fn definition(&self) -> NodeDefinition {
        NodeDefinition::lora_loader(self.resolver.available())
    }

    /// Run the node with host-provided inputs
    pub fn run<M: ModelMerger>(
        &mut self,
        merger: &M,
        model: M::Model,
        inputs: &NodeInputs,
    ) -> Result<M::Model> {
        self.load_lora(
            merger,
            model,
            inputs.lora_name.as_deref(),
            inputs.clamped_strength(),
            &inputs.blocks_spec,
        )
    }

    /// Apply `lora_name` to `model` at `strength`, restricted to the blocks in
    /// `blocks_spec`.
    ///
    /// With no name the model is returned untouched. When the merge service
    /// reports a no-op the input model is returned.
    pub fn load_lora<M: ModelMerger>(
        &mut self,
        merger: &M,
        model: M::Model,
        lora_name: Option<&str>,
        strength: f32,
        blocks_spec: &str,
    ) -> Result<M::Model> {
        let Some(name) = lora_name.filter(|n| !n.is_empty()) else {
            return Ok(model);
        };

        let weights = self.prepare(name, blocks_spec)?;

        info!(lora = name, tensors = weights.len(), strength, "Applying LoRA");
        match merger.merge(&model, &weights, strength)? {
            Some(merged) => Ok(merged),
            None => {
                info!(lora = name, "merge left the model unchanged");
                Ok(model)
            }
        }
    }

    /// Resolve, load, convert and filter a LoRA without merging it
    pub fn prepare(&mut self, lora_name: &str, blocks_spec: &str) -> Result<WeightDict> {
        let path = self.locate(lora_name)?;

        let loader = &self.loader;
        let raw = self.cache.get_or_load(&path, |p| loader.load(p))?;
        let spec = BlockSpec::parse(blocks_spec)?;

        let conversion = convert(raw)?;
        let filtered = filter_blocks(&conversion.weights, &spec);

        info!(
            lora = lora_name,
            format = %conversion.report.format,
            kept = filtered.len(),
            total = conversion.weights.len(),
            "Selected LoRA blocks"
        );
        Ok(filtered.into_owned())
    }

    fn locate(&self, lora_name: &str) -> Result<PathBuf> {
        let path = self
            .resolver
            .resolve(lora_name)
            .ok_or_else(|| LoraError::NotFound {
                name: lora_name.to_string(),
                path: PathBuf::from(lora_name),
            })?;

        if !path.exists() {
            return Err(LoraError::NotFound {
                name: lora_name.to_string(),
                path,
            });
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Tensor};
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::path::Path;
    use tempfile::TempDir;

    /// Resolver over a fixed name -> path table that counts lookups
    struct MapResolver {
        paths: HashMap<String, PathBuf>,
        lookups: Cell<usize>,
    }

    impl MapResolver {
        fn new(entries: &[(&str, PathBuf)]) -> Self {
            Self {
                paths: entries.iter().map(|(n, p)| (n.to_string(), p.clone())).collect(),
                lookups: Cell::new(0),
            }
        }
    }

    impl PathResolver for MapResolver {
        fn resolve(&self, name: &str) -> Option<PathBuf> {
            self.lookups.set(self.lookups.get() + 1);
            self.paths.get(name).cloned()
        }

        fn available(&self) -> Vec<String> {
            let mut names: Vec<String> = self.paths.keys().cloned().collect();
            names.sort();
            names
        }
    }

    /// Model that records every LoRA merged into it
    #[derive(Debug, Clone, Default, PartialEq)]
    struct TestModel {
        applied: Vec<(Vec<String>, f32)>,
    }

    #[derive(Default)]
    struct RecordingMerger {
        calls: Cell<usize>,
        noop: bool,
    }

    impl ModelMerger for RecordingMerger {
        type Model = TestModel;

        fn merge(
            &self,
            model: &TestModel,
            weights: &WeightDict,
            strength: f32,
        ) -> Result<Option<TestModel>> {
            self.calls.set(self.calls.get() + 1);
            if self.noop {
                return Ok(None);
            }
            let mut keys: Vec<String> = weights.keys().cloned().collect();
            keys.sort();
            let mut merged = model.clone();
            merged.applied.push((keys, strength));
            Ok(Some(merged))
        }
    }

    fn ones(rows: usize, cols: usize) -> Tensor {
        Tensor::ones((rows, cols), DType::F32, &Device::Cpu).unwrap()
    }

    fn flux_lora() -> WeightDict {
        let mut weights = WeightDict::new();
        for (block, index) in [("double_blocks", 3), ("double_blocks", 30), ("single_blocks", 1)] {
            let prefix = format!("diffusion_model.{block}.{index}.attn");
            weights.insert(format!("{prefix}.lora_A.weight"), ones(2, 4));
            weights.insert(format!("{prefix}.lora_B.weight"), ones(4, 2));
        }
        weights
    }

    fn musubi_lora() -> WeightDict {
        let mut weights = WeightDict::new();
        let alpha = || Tensor::new(2.0f32, &Device::Cpu).unwrap();
        let qkv = "lora_unet_double_keys_0_img_attn_qkv";
        weights.insert(format!("{qkv}.alpha"), alpha());
        weights.insert(format!("{qkv}.lora_down.weight"), ones(2, 4));
        weights.insert(format!("{qkv}.lora_up.weight"), ones(4, 2));
        let linear = "lora_unet_single_keys_5_linear1";
        weights.insert(format!("{linear}.alpha"), alpha());
        weights.insert(format!("{linear}.lora_down.weight"), ones(2, 4));
        weights
    }

    fn lora_dir(names: &[&str]) -> (TempDir, Vec<(String, PathBuf)>) {
        let dir = TempDir::new().unwrap();
        let entries = names
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                std::fs::write(&path, b"").unwrap();
                (name.to_string(), path)
            })
            .collect();
        (dir, entries)
    }

    fn resolver(entries: &[(String, PathBuf)]) -> MapResolver {
        let refs: Vec<(&str, PathBuf)> =
            entries.iter().map(|(n, p)| (n.as_str(), p.clone())).collect();
        MapResolver::new(&refs)
    }

    #[test]
    fn test_applies_selected_blocks() {
        let (_dir, entries) = lora_dir(&["flux.safetensors"]);
        let loader = |_: &Path| -> Result<WeightDict> { Ok(flux_lora()) };
        let mut node = HannibalLoraLoader::new(resolver(&entries), loader);
        let merger = RecordingMerger::default();

        let model = node
            .load_lora(&merger, TestModel::default(), Some("flux.safetensors"), 0.75, "double:0-19")
            .unwrap();

        assert_eq!(model.applied.len(), 1);
        let (keys, strength) = &model.applied[0];
        assert_eq!(*strength, 0.75);
        assert_eq!(
            keys,
            &vec![
                "diffusion_model.double_blocks.3.attn.lora_A.weight".to_string(),
                "diffusion_model.double_blocks.3.attn.lora_B.weight".to_string(),
            ]
        );
    }

    #[test]
    fn test_musubi_lora_is_converted_before_filtering() {
        let (_dir, entries) = lora_dir(&["musubi.safetensors"]);
        let loader = |_: &Path| -> Result<WeightDict> { Ok(musubi_lora()) };
        let mut node = HannibalLoraLoader::new(resolver(&entries), loader);

        let weights = node.prepare("musubi.safetensors", "double:0-0").unwrap();
        let mut keys: Vec<&String> = weights.keys().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "diffusion_model.double_blocks.0.img_attn_qkv.lora_A.weight",
                "diffusion_model.double_blocks.0.img_attn_qkv.lora_B.weight",
            ]
        );

        let all = node.prepare("musubi.safetensors", "").unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.contains_key("diffusion_model.single_blocks.5.linear1.lora_A.weight"));
    }

    #[test]
    fn test_same_file_is_loaded_once() {
        let (_dir, entries) = lora_dir(&["a.safetensors", "b.safetensors"]);
        let loads = Cell::new(0);
        let loader = |_: &Path| -> Result<WeightDict> {
            loads.set(loads.get() + 1);
            Ok(flux_lora())
        };
        let mut node = HannibalLoraLoader::new(resolver(&entries), loader);
        let merger = RecordingMerger::default();

        let model = node
            .load_lora(&merger, TestModel::default(), Some("a.safetensors"), 1.0, "")
            .unwrap();
        let model = node
            .load_lora(&merger, model, Some("a.safetensors"), 0.5, "single:0-3")
            .unwrap();
        assert_eq!(loads.get(), 1);
        assert_eq!(model.applied.len(), 2);

        node.load_lora(&merger, model, Some("b.safetensors"), 1.0, "").unwrap();
        assert_eq!(loads.get(), 2);
        assert!(node.cache().holds(&entries[1].1));
        assert!(!node.cache().holds(&entries[0].1));
    }

    #[test]
    fn test_empty_name_is_noop() {
        let loads = Cell::new(0);
        let loader = |_: &Path| -> Result<WeightDict> {
            loads.set(loads.get() + 1);
            Ok(flux_lora())
        };
        let mut node = HannibalLoraLoader::new(MapResolver::new(&[]), loader);
        let merger = RecordingMerger::default();

        let model = TestModel {
            applied: vec![(vec!["base".to_string()], 1.0)],
        };
        for name in [None, Some("")] {
            let out = node.load_lora(&merger, model.clone(), name, 1.0, "double:0-1").unwrap();
            assert_eq!(out, model);
        }

        assert_eq!(node.resolver().lookups.get(), 0);
        assert_eq!(loads.get(), 0);
        assert_eq!(merger.calls.get(), 0);
    }

    #[test]
    fn test_missing_file_fails_before_load() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone.safetensors");
        let loads = Cell::new(0);
        let loader = |_: &Path| -> Result<WeightDict> {
            loads.set(loads.get() + 1);
            Ok(flux_lora())
        };
        let mut node = HannibalLoraLoader::new(
            MapResolver::new(&[("gone.safetensors", missing.clone())]),
            loader,
        );
        let merger = RecordingMerger::default();

        let err = node
            .load_lora(&merger, TestModel::default(), Some("gone.safetensors"), 1.0, "")
            .unwrap_err();
        match err {
            LoraError::NotFound { name, path } => {
                assert_eq!(name, "gone.safetensors");
                assert_eq!(path, missing);
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = node
            .load_lora(&merger, TestModel::default(), Some("unknown.safetensors"), 1.0, "")
            .unwrap_err();
        assert!(matches!(err, LoraError::NotFound { .. }));

        assert_eq!(loads.get(), 0);
        assert_eq!(merger.calls.get(), 0);
    }

    #[test]
    fn test_noop_merge_returns_input_model() {
        let (_dir, entries) = lora_dir(&["flux.safetensors"]);
        let loader = |_: &Path| -> Result<WeightDict> { Ok(flux_lora()) };
        let mut node = HannibalLoraLoader::new(resolver(&entries), loader);
        let merger = RecordingMerger {
            noop: true,
            ..Default::default()
        };

        let model = TestModel {
            applied: vec![(vec!["base".to_string()], 1.0)],
        };
        let out = node
            .load_lora(&merger, model.clone(), Some("flux.safetensors"), 1.0, "")
            .unwrap();
        assert_eq!(out, model);
        assert_eq!(merger.calls.get(), 1);
    }

    #[test]
    fn test_invalid_spec_propagates_after_load() {
        let (_dir, entries) = lora_dir(&["flux.safetensors"]);
        let loads = Cell::new(0);
        let loader = |_: &Path| -> Result<WeightDict> {
            loads.set(loads.get() + 1);
            Ok(flux_lora())
        };
        let mut node = HannibalLoraLoader::new(resolver(&entries), loader);
        let merger = RecordingMerger::default();

        let err = node
            .load_lora(&merger, TestModel::default(), Some("flux.safetensors"), 1.0, "double:9-1")
            .unwrap_err();
        assert!(matches!(err, LoraError::InvalidSpec { ref token, .. } if token == "double:9-1"));
        assert_eq!(merger.calls.get(), 0);

        // the file is loaded and cached before the spec is parsed
        assert_eq!(loads.get(), 1);
        assert!(node.cache().holds(&entries[0].1));

        let err = node.prepare("flux.safetensors", "bad").unwrap_err();
        assert!(matches!(err, LoraError::InvalidSpec { .. }));
        node.prepare("flux.safetensors", "double:0-19").unwrap();
        assert_eq!(loads.get(), 1);
    }

    #[test]
    fn test_run_clamps_strength() {
        let (_dir, entries) = lora_dir(&["flux.safetensors"]);
        let loader = |_: &Path| -> Result<WeightDict> { Ok(flux_lora()) };
        let mut node = HannibalLoraLoader::new(resolver(&entries), loader);
        let merger = RecordingMerger::default();

        let inputs = NodeInputs::new("flux.safetensors", 25.0, "single:0-39");
        let model = node.run(&merger, TestModel::default(), &inputs).unwrap();
        assert_eq!(model.applied[0].1, 10.0);
        assert_eq!(model.applied[0].0.len(), 2);
    }

    #[test]
    fn test_change_key() {
        let inputs = NodeInputs::new("style.safetensors", 1.0, "double:0-19,single:0-39");
        assert_eq!(inputs.change_key(), "style.safetensors_1.0_double:0-19,single:0-39");
        assert_eq!(inputs.change_key(), inputs.clone().change_key());

        let other = NodeInputs::new("style.safetensors", 0.5, "double:0-19,single:0-39");
        assert_ne!(inputs.change_key(), other.change_key());
    }

    #[test]
    fn test_inputs_defaults_from_json() {
        let inputs: NodeInputs =
            serde_json::from_str(r#"{ "lora_name": "a.safetensors" }"#).unwrap();
        assert_eq!(inputs.strength, 1.0);
        assert_eq!(inputs.blocks_spec, DEFAULT_BLOCKS_SPEC);
        assert_eq!(NodeInputs::default().lora_name, None);
    }

    #[test]
    fn test_definition_lists_available() {
        let (_dir, entries) = lora_dir(&["b.safetensors", "a.safetensors"]);
        let loader = |_: &Path| -> Result<WeightDict> { Ok(WeightDict::new()) };
        let node = HannibalLoraLoader::new(resolver(&entries), loader);

        let def = node.definition();
        match &def.input("lora_name").unwrap().kind {
            crate::schema::InputKind::Combo { options } => {
                assert_eq!(options, &vec!["a.safetensors".to_string(), "b.safetensors".to_string()])
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }
}
