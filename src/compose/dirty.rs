use rustc_hash::FxHashMap;

use super::config::{LayerConfig, LayerKey};

/// Per-layer dirty bits. A layer that has never been seen counts as dirty;
/// a layer whose group has no output name is permanently dirty because there
/// is no identity to cache its composite under.
pub struct DirtyCache {
    flags: FxHashMap<LayerKey, bool>,
}

impl DirtyCache {
    pub fn new() -> Self {
        Self {
            flags: FxHashMap::default(),
        }
    }

    pub fn mark(&mut self, selector: LayerKey, dirty: bool) {
        self.flags.insert(selector, dirty);
    }

    pub fn is_dirty(&self, layer: &LayerConfig) -> bool {
        layer.output_group.is_empty() || self.flags.get(&layer.selector).copied().unwrap_or(true)
    }

    pub(crate) fn clear(&mut self, selector: LayerKey) {
        self.flags.insert(selector, false);
    }

    /// Drops bits for selectors no longer present in the layer list.
    pub(crate) fn retain_layers(&mut self, layers: &[LayerConfig]) {
        self.flags
            .retain(|key, _| layers.iter().any(|layer| layer.selector == *key));
    }
}

impl Default for DirtyCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::config::SelectorRegistry;

    #[test]
    fn unseen_layers_start_dirty() {
        let mut registry = SelectorRegistry::new();
        let layer = LayerConfig::new(registry.register("a"), "bg");
        let cache = DirtyCache::new();
        assert!(cache.is_dirty(&layer));
    }

    #[test]
    fn cleared_layers_stay_clean_until_marked() {
        let mut registry = SelectorRegistry::new();
        let layer = LayerConfig::new(registry.register("a"), "bg");
        let mut cache = DirtyCache::new();
        cache.clear(layer.selector);
        assert!(!cache.is_dirty(&layer));
        cache.mark(layer.selector, true);
        assert!(cache.is_dirty(&layer));
    }

    #[test]
    fn unnamed_groups_are_always_dirty() {
        let mut registry = SelectorRegistry::new();
        let layer = LayerConfig::new(registry.register("a"), "");
        let mut cache = DirtyCache::new();
        cache.clear(layer.selector);
        assert!(cache.is_dirty(&layer));
    }

    #[test]
    fn retain_drops_stale_selectors() {
        let mut registry = SelectorRegistry::new();
        let kept = LayerConfig::new(registry.register("kept"), "bg");
        let dropped = registry.register("dropped");
        let mut cache = DirtyCache::new();
        cache.clear(kept.selector);
        cache.clear(dropped);
        cache.retain_layers(std::slice::from_ref(&kept));
        assert!(!cache.is_dirty(&kept));
        let resurrected = LayerConfig::new(dropped, "bg");
        assert!(cache.is_dirty(&resurrected));
    }
}
