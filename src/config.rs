//! Compositor configuration
//!
//! Plain numeric options with a validating builder. Nothing here is read from
//! or written to disk by the crate itself; the optional `serde` feature lets
//! callers persist it however they like.

use crate::error::ConfigError;

/// How the foreground mask extractor decides that a pixel is backdrop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MaskMode {
    /// `(G − R) > 15` and `(G − B) > −10`.
    #[default]
    DominanceHeuristic,
    /// The dominance heuristic combined with the adaptive thresholds derived
    /// from the background color model.
    Adaptive,
}

/// Chroma-key options.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KeyConfig {
    /// Lower bound of the backdrop hue window (8-bit hue, 0..=179)
    pub hue_min: u8,
    /// Upper bound of the backdrop hue window (8-bit hue, 0..=179)
    pub hue_max: u8,
    pub saturation_min: u8,
    pub value_min: u8,
    pub mode: MaskMode,
    /// Morphological open/close on the extracted mask
    pub cleanup: bool,
    /// Desaturate green spill on subject pixels before compositing
    pub spill_suppression: bool,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            hue_min: 35,
            hue_max: 85,
            saturation_min: 50,
            value_min: 50,
            mode: MaskMode::DominanceHeuristic,
            cleanup: false,
            spill_suppression: true,
        }
    }
}

/// Guided-filter matting options.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MattingConfig {
    /// Box window radius; the window is `(2 * radius + 1)` pixels wide
    pub radius: u32,
    pub epsilon: f32,
    /// Sigma of the 9x9 Gaussian applied to the hard mask before filtering
    pub presmooth_sigma: f32,
}

impl Default for MattingConfig {
    fn default() -> Self {
        Self {
            radius: 6,
            epsilon: 5e-3,
            presmooth_sigma: 2.0,
        }
    }
}

/// Edge-blend options.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlendConfig {
    /// Erosion radius that separates the interior from the inner ring
    pub inner_ring: u32,
    /// Dilation radius of the outer ring
    pub outer_ring: u32,
    /// Multiplier applied to the matte inside the inner ring
    pub ring_alpha_bias: f32,
    /// Lower bound of alpha in the unmix division
    pub min_alpha: f32,
    pub edge_blur: bool,
    /// Gaussian sigma is `1.5 * edge_blur_radius`
    pub edge_blur_radius: f32,
    /// Weight of the blurred composite in the edge mix; the blurred
    /// background receives the remainder
    pub subject_weight: f32,
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            inner_ring: 1,
            outer_ring: 4,
            ring_alpha_bias: 0.6,
            min_alpha: 0.05,
            edge_blur: true,
            edge_blur_radius: 6.0,
            subject_weight: 0.6,
        }
    }
}

impl BlendConfig {
    /// Sigma of the final edge blur.
    #[must_use]
    pub fn edge_blur_sigma(&self) -> f32 {
        self.edge_blur_radius * 1.5
    }
}

/// Complete compositor configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CompositorConfig {
    pub key: KeyConfig,
    pub matting: MattingConfig,
    pub blend: BlendConfig,
    /// Scale applied to the subject before it is re-centred on the canvas
    pub person_scale: f32,
    /// Match the subject's lighting to the background template
    pub lighting_correction: bool,
    /// Try the attached compute device before the CPU path
    pub use_device: bool,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            key: KeyConfig::default(),
            matting: MattingConfig::default(),
            blend: BlendConfig::default(),
            person_scale: 1.0,
            lighting_correction: false,
            use_device: true,
        }
    }
}

impl CompositorConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> CompositorConfigBuilder {
        CompositorConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let key = &self.key;
        if key.hue_min > 179 {
            return Err(ConfigError::invalid("hue_min", "must be 0..=179"));
        }
        if key.hue_max > 179 {
            return Err(ConfigError::invalid("hue_max", "must be 0..=179"));
        }
        if key.hue_min > key.hue_max {
            return Err(ConfigError::invalid(
                "hue_min",
                format!("{} exceeds hue_max {}", key.hue_min, key.hue_max),
            ));
        }

        let matting = &self.matting;
        if matting.radius == 0 {
            return Err(ConfigError::invalid("matting.radius", "must be at least 1"));
        }
        if !(matting.epsilon.is_finite() && matting.epsilon > 0.0) {
            return Err(ConfigError::invalid("matting.epsilon", "must be finite and > 0"));
        }
        if !(matting.presmooth_sigma.is_finite() && matting.presmooth_sigma > 0.0) {
            return Err(ConfigError::invalid(
                "matting.presmooth_sigma",
                "must be finite and > 0",
            ));
        }

        let blend = &self.blend;
        if blend.outer_ring == 0 {
            return Err(ConfigError::invalid("blend.outer_ring", "must be at least 1"));
        }
        if !(blend.ring_alpha_bias > 0.0 && blend.ring_alpha_bias <= 1.0) {
            return Err(ConfigError::invalid("blend.ring_alpha_bias", "must be in (0, 1]"));
        }
        if !(blend.min_alpha > 0.0 && blend.min_alpha <= 1.0) {
            return Err(ConfigError::invalid("blend.min_alpha", "must be in (0, 1]"));
        }
        if !(blend.edge_blur_radius.is_finite() && blend.edge_blur_radius >= 0.0) {
            return Err(ConfigError::invalid(
                "blend.edge_blur_radius",
                "must be finite and >= 0",
            ));
        }
        if !(0.0..=1.0).contains(&blend.subject_weight) {
            return Err(ConfigError::invalid("blend.subject_weight", "must be in [0, 1]"));
        }

        if !(self.person_scale.is_finite() && self.person_scale > 0.0) {
            return Err(ConfigError::invalid("person_scale", "must be finite and > 0"));
        }
        Ok(())
    }

    /// Resets every out-of-range field to its default so that
    /// [`validate`](Self::validate) passes, and returns the names of the
    /// fields that were reset.
    pub fn sanitize(&mut self) -> Vec<&'static str> {
        let defaults = Self::default();
        let mut reset = Vec::new();

        let key = &mut self.key;
        if key.hue_min > 179 || key.hue_max > 179 || key.hue_min > key.hue_max {
            key.hue_min = defaults.key.hue_min;
            key.hue_max = defaults.key.hue_max;
            reset.push("key.hue_window");
        }

        let matting = &mut self.matting;
        if matting.radius == 0 {
            matting.radius = defaults.matting.radius;
            reset.push("matting.radius");
        }
        if !(matting.epsilon.is_finite() && matting.epsilon > 0.0) {
            matting.epsilon = defaults.matting.epsilon;
            reset.push("matting.epsilon");
        }
        if !(matting.presmooth_sigma.is_finite() && matting.presmooth_sigma > 0.0) {
            matting.presmooth_sigma = defaults.matting.presmooth_sigma;
            reset.push("matting.presmooth_sigma");
        }

        let blend = &mut self.blend;
        if blend.outer_ring == 0 {
            blend.outer_ring = defaults.blend.outer_ring;
            reset.push("blend.outer_ring");
        }
        if !(blend.ring_alpha_bias > 0.0 && blend.ring_alpha_bias <= 1.0) {
            blend.ring_alpha_bias = defaults.blend.ring_alpha_bias;
            reset.push("blend.ring_alpha_bias");
        }
        if !(blend.min_alpha > 0.0 && blend.min_alpha <= 1.0) {
            blend.min_alpha = defaults.blend.min_alpha;
            reset.push("blend.min_alpha");
        }
        if !(blend.edge_blur_radius.is_finite() && blend.edge_blur_radius >= 0.0) {
            blend.edge_blur_radius = defaults.blend.edge_blur_radius;
            reset.push("blend.edge_blur_radius");
        }
        if !(0.0..=1.0).contains(&blend.subject_weight) {
            blend.subject_weight = defaults.blend.subject_weight;
            reset.push("blend.subject_weight");
        }

        if !(self.person_scale.is_finite() && self.person_scale > 0.0) {
            self.person_scale = defaults.person_scale;
            reset.push("person_scale");
        }
        reset
    }
}

/// Builder for [`CompositorConfig`]
#[derive(Debug, Clone, Default)]
pub struct CompositorConfigBuilder {
    config: CompositorConfig,
}

impl CompositorConfigBuilder {
    /// Create a new builder with default values
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: CompositorConfig::default(),
        }
    }

    /// Set the backdrop hue window (8-bit hue units)
    #[must_use]
    pub fn hue_window(mut self, min: u8, max: u8) -> Self {
        self.config.key.hue_min = min;
        self.config.key.hue_max = max;
        self
    }

    #[must_use]
    pub fn saturation_min(mut self, value: u8) -> Self {
        self.config.key.saturation_min = value;
        self
    }

    #[must_use]
    pub fn value_min(mut self, value: u8) -> Self {
        self.config.key.value_min = value;
        self
    }

    #[must_use]
    pub fn mask_mode(mut self, mode: MaskMode) -> Self {
        self.config.key.mode = mode;
        self
    }

    #[must_use]
    pub fn mask_cleanup(mut self, enabled: bool) -> Self {
        self.config.key.cleanup = enabled;
        self
    }

    #[must_use]
    pub fn spill_suppression(mut self, enabled: bool) -> Self {
        self.config.key.spill_suppression = enabled;
        self
    }

    /// Set the guided filter radius and regularisation
    #[must_use]
    pub fn guided_filter(mut self, radius: u32, epsilon: f32) -> Self {
        self.config.matting.radius = radius;
        self.config.matting.epsilon = epsilon;
        self
    }

    #[must_use]
    pub fn rings(mut self, inner: u32, outer: u32) -> Self {
        self.config.blend.inner_ring = inner;
        self.config.blend.outer_ring = outer;
        self
    }

    #[must_use]
    pub fn ring_alpha_bias(mut self, bias: f32) -> Self {
        self.config.blend.ring_alpha_bias = bias;
        self
    }

    /// Set the final edge-blur radius; `None` disables the pass
    #[must_use]
    pub fn edge_blur(mut self, radius: Option<f32>) -> Self {
        match radius {
            Some(radius) => {
                self.config.blend.edge_blur = true;
                self.config.blend.edge_blur_radius = radius;
            }
            None => self.config.blend.edge_blur = false,
        }
        self
    }

    #[must_use]
    pub fn person_scale(mut self, factor: f32) -> Self {
        self.config.person_scale = factor;
        self
    }

    #[must_use]
    pub fn lighting_correction(mut self, enabled: bool) -> Self {
        self.config.lighting_correction = enabled;
        self
    }

    #[must_use]
    pub fn use_device(mut self, enabled: bool) -> Self {
        self.config.use_device = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<CompositorConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
