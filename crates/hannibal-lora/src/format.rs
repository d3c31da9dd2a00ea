//! LoRA key format detection and conversion
//!
//! Musubi Tuner writes flat, underscore-joined module names with a separate
//! alpha tensor per module:
//!
//! ```text
//! lora_unet_double_keys_0_img_attn_qkv.alpha
//! lora_unet_double_keys_0_img_attn_qkv.lora_down.weight
//! lora_unet_double_keys_0_img_attn_qkv.lora_up.weight
//! ```
//!
//! The merge service expects the nested Diffusers naming with the alpha
//! already folded into the weights:
//!
//! ```text
//! diffusion_model.double_blocks.0.img_attn_qkv.lora_A.weight
//! diffusion_model.double_blocks.0.img_attn_qkv.lora_B.weight
//! ```

use crate::error::Result;
use crate::WeightDict;
use candle_core::{DType, Tensor};
use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, info};

/// Key prefix of Musubi Tuner LoRA tensors
pub const MUSUBI_PREFIX: &str = "lora_unet_";

/// Prefix given to converted keys
pub const DIFFUSERS_PREFIX: &str = "diffusion_model";

/// Literal rewrites applied to a dotted Musubi module name, in order
const MODULE_REWRITES: [(&str, &str); 5] = [
    ("double.keys.", "double_blocks."),
    ("single.keys.", "single_blocks."),
    ("img.", "img_"),
    ("txt.", "txt_"),
    ("attn.", "attn_"),
];

/// Naming convention of a loaded LoRA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoraFormat {
    /// Nested canonical keys, used as-is
    Diffusers,
    /// Flat `lora_unet_*` keys with per-module alphas
    Musubi,
}

impl fmt::Display for LoraFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Diffusers => f.write_str("Diffusers"),
            Self::Musubi => f.write_str("Musubi Tuner"),
        }
    }
}

/// What happened during conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionReport {
    pub format: LoraFormat,
    /// Tensors written to the output
    pub converted: usize,
    /// Modules whose weights were stored unscaled
    pub missing_alpha: BTreeSet<String>,
    /// Musubi keys that were neither `lora_down` nor `lora_up`
    pub unexpected_keys: Vec<String>,
    /// Keys outside the `lora_unet_` namespace, dropped by conversion
    pub ignored_keys: usize,
}

impl ConversionReport {
    fn new(format: LoraFormat) -> Self {
        Self {
            format,
            converted: 0,
            missing_alpha: BTreeSet::new(),
            unexpected_keys: Vec::new(),
            ignored_keys: 0,
        }
    }
}

/// Converted weights plus diagnostics.
///
/// Diffusers input is borrowed untouched; Musubi input produces a new dict.
#[derive(Debug)]
pub struct Conversion<'a> {
    pub weights: Cow<'a, WeightDict>,
    pub report: ConversionReport,
}

/// Per-module alpha tensors, keyed by the text before the first `.`
type AlphaTable = HashMap<String, Tensor>;

/// Scan for Musubi alpha keys.
///
/// Returns `None` when no `lora_unet_` key mentions `alpha`, meaning the dict
/// is already in canonical form. The first alpha seen for a module wins.
fn collect_alphas(weights: &WeightDict) -> Option<AlphaTable> {
    let mut keys: Vec<&String> = weights
        .keys()
        .filter(|key| key.starts_with(MUSUBI_PREFIX) && key.contains("alpha"))
        .collect();
    if keys.is_empty() {
        return None;
    }
    keys.sort();

    let mut alphas = AlphaTable::new();
    for key in keys {
        alphas
            .entry(lora_name(key).to_string())
            .or_insert_with(|| weights[key].clone());
    }
    Some(alphas)
}

/// Detect the naming convention of a weight dict
pub fn detect_format(weights: &WeightDict) -> LoraFormat {
    let musubi = weights
        .keys()
        .any(|key| key.starts_with(MUSUBI_PREFIX) && key.contains("alpha"));
    if musubi {
        LoraFormat::Musubi
    } else {
        LoraFormat::Diffusers
    }
}

/// Translate a Musubi dict into canonical keys, or pass a Diffusers dict
/// through. The input is never modified.
pub fn convert(weights: &WeightDict) -> Result<Conversion<'_>> {
    let Some(alphas) = collect_alphas(weights) else {
        info!(tensors = weights.len(), "Loading Diffusers format LoRA");
        let mut report = ConversionReport::new(LoraFormat::Diffusers);
        report.converted = weights.len();
        return Ok(Conversion {
            weights: Cow::Borrowed(weights),
            report,
        });
    };

    info!(
        tensors = weights.len(),
        modules = alphas.len(),
        "Loading Musubi Tuner format LoRA"
    );

    let mut report = ConversionReport::new(LoraFormat::Musubi);
    let mut converted = WeightDict::with_capacity(weights.len());

    for (key, weight) in weights {
        if !key.starts_with(MUSUBI_PREFIX) {
            report.ignored_keys += 1;
            continue;
        }
        if key.contains("alpha") {
            continue;
        }

        let name = lora_name(key);
        let module = module_name(name);

        let (new_key, dim) = if key.contains("lora_down") {
            (format!("{DIFFUSERS_PREFIX}.{module}.lora_A.weight"), weight.dim(0)?)
        } else if key.contains("lora_up") {
            (format!("{DIFFUSERS_PREFIX}.{module}.lora_B.weight"), weight.dim(1)?)
        } else {
            info!(key = %key, "unexpected key in Musubi LoRA format");
            report.unexpected_keys.push(key.clone());
            continue;
        };

        let weight = match alphas.get(name) {
            Some(alpha) => scale_by_alpha(weight, alpha, dim)?,
            None => {
                if report.missing_alpha.insert(name.to_string()) {
                    info!(module = name, "missing alpha");
                }
                weight.clone()
            }
        };

        converted.insert(new_key, weight);
    }

    if report.ignored_keys > 0 {
        debug!(count = report.ignored_keys, "dropped keys outside {MUSUBI_PREFIX}");
    }
    report.unexpected_keys.sort();
    report.converted = converted.len();

    Ok(Conversion {
        weights: Cow::Owned(converted),
        report,
    })
}

/// Canonical module path for a Musubi module name
/// (`lora_unet_double_keys_0_img_attn_qkv` -> `double_blocks.0.img_attn_qkv`)
pub fn module_name(lora_name: &str) -> String {
    let flat = lora_name.strip_prefix(MUSUBI_PREFIX).unwrap_or(lora_name);
    MODULE_REWRITES
        .iter()
        .fold(flat.replace('_', "."), |name, (from, to)| name.replace(from, to))
}

fn lora_name(key: &str) -> &str {
    key.split_once('.').map_or(key, |(name, _)| name)
}

/// `weight * sqrt(alpha / dim)`, computed in f32 and cast back
fn scale_by_alpha(weight: &Tensor, alpha: &Tensor, dim: usize) -> Result<Tensor> {
    let scale = (alpha.to_dtype(DType::F32)? / dim as f64)?.sqrt()?;
    let scaled = weight.to_dtype(DType::F32)?.broadcast_mul(&scale)?;
    Ok(scaled.to_dtype(weight.dtype())?)
}
