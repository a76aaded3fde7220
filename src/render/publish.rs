use glam::Vec2;
use rustc_hash::FxHashMap;
use smol_str::{SmolStr, format_smolstr};

/// One composited output, valid until the next publish under the same name.
/// Consumers treat a missing entry as "no background effect".
pub struct PublishedTexture {
    /// Samplable view over the full mip chain.
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    /// `(rendered / screen)` per axis, for resolution-scale-corrected
    /// sampling.
    pub uv_scale: Vec2,
}

/// Name the pre-blurred export of a group publishes under.
pub fn blur_export_name(group: &str) -> SmolStr {
    format_smolstr!("{group}_BLUR")
}

/// Well-known-name registry the glass materials sample from. Entries persist
/// across cache-hit frames so consumers always read a definitive value.
pub struct PublishedTextures {
    entries: FxHashMap<SmolStr, PublishedTexture>,
}

impl PublishedTextures {
    pub fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
        }
    }

    pub(crate) fn publish(&mut self, name: SmolStr, texture: PublishedTexture) {
        self.entries.insert(name, texture);
    }

    pub fn get(&self, name: &str) -> Option<&PublishedTexture> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &SmolStr> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PublishedTextures {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blur_exports_use_the_suffix_convention() {
        assert_eq!(blur_export_name("ui_bg_1"), "ui_bg_1_BLUR");
    }
}
