// Convolutional feature extractors for visual observations.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Linear, LinearConfig, PaddingConfig2d};
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::activation::relu;
use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ConfigError, TrainError};

/// Registered encoder types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    /// Nature CNN, the built-in extractor.
    Small,
    Medium,
    Large,
    #[serde(rename = "simclr")]
    SimClr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvSpec {
    pub out_channels: usize,
    pub kernel: usize,
    pub stride: usize,
    pub padding: usize,
}

const fn conv(out_channels: usize, kernel: usize, stride: usize, padding: usize) -> ConvSpec {
    ConvSpec {
        out_channels,
        kernel,
        stride,
        padding,
    }
}

const NATURE_CNN: [ConvSpec; 3] = [conv(32, 8, 4, 0), conv(64, 4, 2, 0), conv(64, 3, 1, 0)];
const MEDIUM_CNN: [ConvSpec; 4] = [conv(32, 8, 4, 0), conv(64, 4, 2, 0), conv(128, 3, 1, 1), conv(128, 3, 1, 1)];
const LARGE_CNN: [ConvSpec; 5] = [
    conv(32, 8, 4, 0),
    conv(64, 4, 2, 0),
    conv(128, 3, 1, 1),
    conv(256, 3, 1, 1),
    conv(256, 3, 1, 1),
];

impl EncoderKind {
    pub const DEFAULT_FEATURES_DIM: usize = 512;

    pub const ALL: [EncoderKind; 4] = [
        EncoderKind::Small,
        EncoderKind::Medium,
        EncoderKind::Large,
        EncoderKind::SimClr,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EncoderKind::Small => "small",
            EncoderKind::Medium => "medium",
            EncoderKind::Large => "large",
            EncoderKind::SimClr => "simclr",
        }
    }

    /// Extractor class name as reported in model descriptions.
    pub fn class_name(self) -> &'static str {
        match self {
            EncoderKind::Small => "NatureCNN",
            EncoderKind::Medium => "MediumCNN",
            EncoderKind::Large => "LargeCNN",
            EncoderKind::SimClr => "SimCLRBackbone",
        }
    }

    pub fn layers(self) -> &'static [ConvSpec] {
        match self {
            EncoderKind::Small => &NATURE_CNN,
            EncoderKind::Medium | EncoderKind::SimClr => &MEDIUM_CNN,
            EncoderKind::Large => &LARGE_CNN,
        }
    }
}

impl FromStr for EncoderKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lower = value.trim().to_ascii_lowercase();
        EncoderKind::ALL
            .into_iter()
            .find(|kind| kind.name() == lower)
            .ok_or_else(|| ConfigError::UnknownEncoder(value.to_string()))
    }
}

impl fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Spatial size after a convolution, or `None` if the kernel does not fit.
fn conv_output(size: usize, spec: &ConvSpec) -> Option<usize> {
    let padded = size + 2 * spec.padding;
    if padded < spec.kernel {
        return None;
    }
    Some((padded - spec.kernel) / spec.stride + 1)
}

#[derive(Debug, Clone)]
pub struct FeaturesExtractorConfig {
    pub kind: EncoderKind,
    /// Observation shape as `[height, width, channels]`.
    pub observation_shape: [usize; 3],
    pub features_dim: usize,
}

impl FeaturesExtractorConfig {
    pub fn new(kind: EncoderKind, observation_shape: [usize; 3], features_dim: usize) -> Self {
        Self {
            kind,
            observation_shape,
            features_dim,
        }
    }

    /// Flattened size of the last convolution's output.
    pub fn flattened_size(&self) -> Result<usize, ConfigError> {
        let [mut height, mut width, _] = self.observation_shape;
        let mut channels = self.observation_shape[2];
        for spec in self.kind.layers() {
            match (conv_output(height, spec), conv_output(width, spec)) {
                (Some(h), Some(w)) if h > 0 && w > 0 => {
                    height = h;
                    width = w;
                    channels = spec.out_channels;
                }
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "observation {:?} is too small for the {} encoder",
                        self.observation_shape, self.kind
                    )))
                }
            }
        }
        Ok(height * width * channels)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<FeaturesExtractor<B>, ConfigError> {
        let flattened = self.flattened_size()?;
        let mut in_channels = self.observation_shape[2];
        let mut convs = Vec::with_capacity(self.kind.layers().len());
        for spec in self.kind.layers() {
            convs.push(
                Conv2dConfig::new([in_channels, spec.out_channels], [spec.kernel, spec.kernel])
                    .with_stride([spec.stride, spec.stride])
                    .with_padding(PaddingConfig2d::Explicit(spec.padding, spec.padding))
                    .init(device),
            );
            in_channels = spec.out_channels;
        }
        let linear = LinearConfig::new(flattened, self.features_dim).init(device);
        Ok(FeaturesExtractor {
            convs,
            linear,
            features_dim: self.features_dim,
        })
    }
}

/// Convolution stack followed by a linear projection, both ReLU-activated.
#[derive(Module, Debug)]
pub struct FeaturesExtractor<B: Backend> {
    convs: Vec<Conv2d<B>>,
    linear: Linear<B>,
    features_dim: usize,
}

impl<B: Backend> FeaturesExtractor<B> {
    /// `obs` is `[batch, channels, height, width]` scaled to `[0, 1]`.
    pub fn forward(&self, obs: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = obs;
        for conv in &self.convs {
            x = relu(conv.forward(x));
        }
        let x: Tensor<B, 2> = x.flatten(1, 3);
        relu(self.linear.forward(x))
    }

    pub fn features_dim(&self) -> usize {
        self.features_dim
    }

    /// Whether each weight and bias tensor takes part in gradient updates, in layer order.
    pub fn requires_grad(&self) -> Vec<bool> {
        let mut flags = Vec::new();
        for conv in &self.convs {
            flags.push(conv.weight.val().is_require_grad());
            if let Some(bias) = &conv.bias {
                flags.push(bias.val().is_require_grad());
            }
        }
        flags.push(self.linear.weight.val().is_require_grad());
        if let Some(bias) = &self.linear.bias {
            flags.push(bias.val().is_require_grad());
        }
        flags
    }

    /// Loads pretrained weights from `<dir>/<object_background>.mpk`.
    pub fn load_pretrained(self, dir: &Path, object_background: &str, device: &B::Device) -> Result<Self, TrainError> {
        let path = dir.join(object_background);
        info!("Loading pretrained encoder from {}.mpk", path.display());
        self.load_file(path, &NamedMpkFileRecorder::<FullPrecisionSettings>::new(), device)
            .map_err(TrainError::record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_nature_cnn_output_size() {
        // 84 -> 20 -> 9 -> 7
        let config = FeaturesExtractorConfig::new(EncoderKind::Small, [84, 84, 3], 512);
        assert_eq!(config.flattened_size().unwrap(), 7 * 7 * 64);
    }

    #[test]
    fn test_too_small_observation_is_rejected() {
        let config = FeaturesExtractorConfig::new(EncoderKind::Small, [16, 16, 3], 512);
        assert!(config.flattened_size().is_err());
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        for kind in EncoderKind::ALL {
            let extractor = FeaturesExtractorConfig::new(kind, [36, 36, 3], 32)
                .init::<NdArray>(&device)
                .unwrap();
            let obs = Tensor::<NdArray, 4>::zeros([2, 3, 36, 36], &device);
            assert_eq!(extractor.forward(obs).dims(), [2, 32]);
        }
    }

    #[test]
    fn test_encoder_names_parse() {
        assert_eq!("SimCLR".parse::<EncoderKind>().unwrap(), EncoderKind::SimClr);
        assert!("resnet".parse::<EncoderKind>().is_err());
    }
}
