use super::config::LayerConfig;

/// How a foreground layer enters the stencil prepass phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrepassKind {
    /// Not a foreground layer; no prepass.
    None,
    /// Stencil reference written with color writes disabled; the opaque
    /// color is drawn later in the layer's own pass.
    StencilOnly,
    /// Stencil reference and opaque color written in one draw. Valid only
    /// when no blurred layer renders beneath the foreground, otherwise the
    /// early color would be buried by the blur composite.
    OpaqueAndStencil,
}

/// Occlusion-relevant positions of one layer within its output group.
/// Gathered once per layer so the decision functions stay pure table
/// lookups over booleans.
#[derive(Clone, Copy, Debug, Default)]
pub struct LayerFacts {
    pub foreground: bool,
    pub blur: bool,
    /// Any blurred layer anywhere in the group.
    pub blur_in_group: bool,
    /// Any blurred layer strictly before this one.
    pub blur_before_layer: bool,
    /// Any blurred layer strictly before the group's first foreground layer.
    pub blur_before_first_foreground: bool,
    /// A foreground layer strictly after this one.
    pub foreground_after: bool,
    /// A foreground layer at or after this one.
    pub foreground_at_or_after: bool,
    /// This layer opens the group.
    pub opens_group: bool,
}

impl LayerFacts {
    pub fn gather(group: &[LayerConfig], index: usize) -> Self {
        let layer = &group[index];
        let first_foreground = group.iter().position(|l| l.foreground);
        Self {
            foreground: layer.foreground,
            blur: layer.blur,
            blur_in_group: group.iter().any(|l| l.blur),
            blur_before_layer: group[..index].iter().any(|l| l.blur),
            blur_before_first_foreground: first_foreground
                .map(|fg| group[..fg].iter().any(|l| l.blur))
                .unwrap_or(false),
            foreground_after: group[index + 1..].iter().any(|l| l.foreground),
            foreground_at_or_after: group[index..].iter().any(|l| l.foreground),
            opens_group: index == 0,
        }
    }
}

/// Resolved per-layer behavior: which prepass to emit and where stencil
/// clipping applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayerDecision {
    pub prepass: PrepassKind,
    /// Constrain the layer's own draw to pixels not claimed by a nearer
    /// foreground (compare NotEqual against the reference).
    pub clip_draw: bool,
    /// Constrain the blur composite-back draw the same way.
    pub clip_composite: bool,
}

/// Decision table over `(foreground, blur, preceding blur, following
/// foreground, mix mode)`. Outside mix mode any blurred layer in the group
/// disqualifies the stencil shortcuts: the blur composite overwrites pixels
/// wholesale, so early opaque color or clipped draws would be lost. In mix
/// mode only blur beneath the relevant foreground disqualifies, because the
/// scratch is seeded from the live composite.
pub fn decide(facts: &LayerFacts, mix: bool) -> LayerDecision {
    LayerDecision {
        prepass: prepass_kind(facts, mix),
        clip_draw: clip_draw(facts, mix),
        clip_composite: clip_composite(facts, mix),
    }
}

fn prepass_kind(facts: &LayerFacts, mix: bool) -> PrepassKind {
    if !facts.foreground {
        return PrepassKind::None;
    }
    let blocked = if mix {
        facts.blur_before_layer
    } else {
        facts.blur_in_group
    };
    if blocked || facts.opens_group {
        PrepassKind::StencilOnly
    } else {
        PrepassKind::OpaqueAndStencil
    }
}

fn clip_draw(facts: &LayerFacts, mix: bool) -> bool {
    if facts.foreground || facts.blur || !facts.foreground_after {
        return false;
    }
    if mix {
        !facts.blur_before_first_foreground
    } else {
        !facts.blur_in_group
    }
}

fn clip_composite(facts: &LayerFacts, mix: bool) -> bool {
    mix && facts.foreground_after
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::config::{LayerConfig, SelectorRegistry};

    fn group(specs: &[(bool, bool)]) -> Vec<LayerConfig> {
        // (foreground, blur) per layer, all in one group
        let mut registry = SelectorRegistry::new();
        specs
            .iter()
            .map(|&(foreground, blur)| {
                let mut layer = LayerConfig::new(registry.register("layer"), "bg")
                    .with_foreground(foreground);
                layer.blur = blur;
                layer
            })
            .collect()
    }

    #[test]
    fn foreground_after_plain_background_merges_opaque() {
        let layers = group(&[(false, false), (true, false)]);
        let facts = LayerFacts::gather(&layers, 1);
        assert_eq!(decide(&facts, false).prepass, PrepassKind::OpaqueAndStencil);
    }

    #[test]
    fn foreground_after_blurred_background_cannot_merge() {
        let layers = group(&[(false, true), (true, false)]);
        let facts = LayerFacts::gather(&layers, 1);
        assert_eq!(decide(&facts, false).prepass, PrepassKind::StencilOnly);
        assert_eq!(decide(&facts, true).prepass, PrepassKind::StencilOnly);
    }

    #[test]
    fn group_opening_foreground_stays_stencil_only() {
        let layers = group(&[(true, false), (false, false)]);
        let facts = LayerFacts::gather(&layers, 0);
        assert_eq!(decide(&facts, false).prepass, PrepassKind::StencilOnly);
    }

    #[test]
    fn mix_mode_ignores_blur_above_the_foreground() {
        // Blur sits above the foreground; in mix mode the merge stays legal.
        let layers = group(&[(false, false), (true, false), (false, true)]);
        let facts = LayerFacts::gather(&layers, 1);
        assert_eq!(decide(&facts, true).prepass, PrepassKind::OpaqueAndStencil);
        assert_eq!(decide(&facts, false).prepass, PrepassKind::StencilOnly);
    }

    #[test]
    fn background_below_foreground_is_clipped() {
        let layers = group(&[(false, false), (true, false)]);
        let facts = LayerFacts::gather(&layers, 0);
        assert!(decide(&facts, false).clip_draw);
    }

    #[test]
    fn background_above_foreground_is_not_clipped() {
        let layers = group(&[(true, false), (false, false)]);
        let facts = LayerFacts::gather(&layers, 1);
        assert!(!decide(&facts, false).clip_draw);
    }

    #[test]
    fn blurred_and_foreground_layers_never_clip_their_own_draw() {
        let layers = group(&[(false, true), (true, false)]);
        assert!(!decide(&LayerFacts::gather(&layers, 0), true).clip_draw);
        assert!(!decide(&LayerFacts::gather(&layers, 1), true).clip_draw);
    }

    #[test]
    fn any_blur_in_group_disables_clip_outside_mix_mode() {
        // The blur is above both layers, but without mix mode its composite
        // rewrites the whole target, so clipping the background is unsound.
        let layers = group(&[(false, false), (true, false), (false, true)]);
        let facts = LayerFacts::gather(&layers, 0);
        assert!(!decide(&facts, false).clip_draw);
        assert!(decide(&facts, true).clip_draw);
    }

    #[test]
    fn composite_clip_requires_mix_mode_and_a_later_foreground() {
        let layers = group(&[(false, true), (true, false)]);
        let facts = LayerFacts::gather(&layers, 0);
        assert!(decide(&facts, true).clip_composite);
        assert!(!decide(&facts, false).clip_composite);

        let trailing = LayerFacts::gather(&layers, 1);
        assert!(!decide(&trailing, true).clip_composite);
    }
}
