//! Material component for defining surface appearance of rendered entities.

use glam::Vec4;

/// How the alpha channel of the base color is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlphaMode {
    #[default]
    Opaque,
    /// Fragments with alpha below the cutoff are discarded.
    Mask,
    Blend,
}

/// Basic metallic-roughness material.
///
/// ```
/// use cyclonite_ecs::components::Material;
/// use glam::Vec4;
///
/// let material = Material::default()
///     .with_base_color(Vec4::new(1.0, 0.0, 0.0, 1.0))
///     .with_roughness(0.3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    /// Base color in linear RGBA. Default is white.
    pub base_color: Vec4,
    /// 0.0 (dielectric) to 1.0 (metal). Default is 0.0.
    pub metallic: f32,
    /// 0.0 (smooth) to 1.0 (rough). Default is 0.5.
    pub roughness: f32,
    pub alpha_mode: AlphaMode,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color: Vec4::ONE,
            metallic: 0.0,
            roughness: 0.5,
            alpha_mode: AlphaMode::Opaque,
        }
    }
}

impl Material {
    #[inline]
    #[must_use]
    pub fn with_base_color(mut self, color: Vec4) -> Self {
        self.base_color = color;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_metallic(mut self, metallic: f32) -> Self {
        self.metallic = metallic.clamp(0.0, 1.0);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness.clamp(0.0, 1.0);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_alpha_mode(mut self, mode: AlphaMode) -> Self {
        self.alpha_mode = mode;
        self
    }

    /// Blended materials are drawn without depth writes and skip the shadow pass.
    pub fn is_transparent(&self) -> bool {
        self.alpha_mode == AlphaMode::Blend
    }
}
