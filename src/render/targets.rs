use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use tracing::debug;

pub(crate) const DEPTH_STENCIL_FORMAT: wgpu::TextureFormat =
    wgpu::TextureFormat::Depth24PlusStencil8;

pub(crate) fn color_format(use_hdr: bool) -> wgpu::TextureFormat {
    if use_hdr {
        wgpu::TextureFormat::Rgba16Float
    } else {
        wgpu::TextureFormat::Rgba8Unorm
    }
}

/// Full pyramid length down to 1x1.
pub(crate) fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// The surfaces one output group composites through: mip-capable color and
/// scratch, a separate depth/stencil (color needs mips, depth/stencil never
/// does), and the Gaussian ping-pong pair.
pub struct RenderTargetSet {
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
    mip_levels: u32,
    color: wgpu::Texture,
    color_sample: wgpu::TextureView,
    color_target: wgpu::TextureView,
    depth_stencil_view: wgpu::TextureView,
    scratch: wgpu::Texture,
    scratch_sample: wgpu::TextureView,
    scratch_target: wgpu::TextureView,
    gauss_tmp_view: wgpu::TextureView,
    gauss_dst_view: wgpu::TextureView,
}

impl RenderTargetSet {
    fn create(
        device: &wgpu::Device,
        name: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let mip_levels = mip_level_count(width, height);
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        let color_label = format!("{name}.color");
        let color = device.create_texture(&mipped_desc(&color_label, size, mip_levels, format));
        let color_sample = color.create_view(&wgpu::TextureViewDescriptor::default());
        let color_target = color.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&color_label),
            base_mip_level: 0,
            mip_level_count: Some(1),
            ..Default::default()
        });

        let ds_label = format!("{name}.depth_stencil");
        let depth_stencil = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&ds_label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_STENCIL_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let depth_stencil_view =
            depth_stencil.create_view(&wgpu::TextureViewDescriptor::default());

        let scratch_label = format!("{name}.blur");
        let scratch =
            device.create_texture(&mipped_desc(&scratch_label, size, mip_levels, format));
        let scratch_sample = scratch.create_view(&wgpu::TextureViewDescriptor::default());
        let scratch_target = scratch.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&scratch_label),
            base_mip_level: 0,
            mip_level_count: Some(1),
            ..Default::default()
        });

        let pingpong = |label: &str| {
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            });
            texture.create_view(&wgpu::TextureViewDescriptor::default())
        };
        let gauss_tmp_view = pingpong(&format!("{name}.gauss_tmp"));
        let gauss_dst_view = pingpong(&format!("{name}.gauss_dst"));

        Self {
            width,
            height,
            format,
            mip_levels,
            color,
            color_sample,
            color_target,
            depth_stencil_view,
            scratch,
            scratch_sample,
            scratch_target,
            gauss_tmp_view,
            gauss_dst_view,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub(crate) fn color_texture(&self) -> &wgpu::Texture {
        &self.color
    }

    pub(crate) fn scratch_texture(&self) -> &wgpu::Texture {
        &self.scratch
    }

    pub(crate) fn color_sample(&self) -> &wgpu::TextureView {
        &self.color_sample
    }

    pub(crate) fn color_target(&self) -> &wgpu::TextureView {
        &self.color_target
    }

    pub(crate) fn depth_stencil(&self) -> &wgpu::TextureView {
        &self.depth_stencil_view
    }

    pub(crate) fn scratch_sample(&self) -> &wgpu::TextureView {
        &self.scratch_sample
    }

    pub(crate) fn scratch_target(&self) -> &wgpu::TextureView {
        &self.scratch_target
    }

    pub(crate) fn gauss_tmp(&self) -> &wgpu::TextureView {
        &self.gauss_tmp_view
    }

    pub(crate) fn gauss_dst(&self) -> &wgpu::TextureView {
        &self.gauss_dst_view
    }
}

fn mipped_desc<'a>(
    label: &'a str,
    size: wgpu::Extent3d,
    mip_levels: u32,
    format: wgpu::TextureFormat,
) -> wgpu::TextureDescriptor<'a> {
    wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: mip_levels,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    }
}

/// Long-lived targets keyed by output group name. Surface allocation is the
/// expensive path; `ensure` only recreates a set when the requested extent
/// or format changed.
pub struct GroupTargetStore {
    entries: FxHashMap<SmolStr, RenderTargetSet>,
}

impl GroupTargetStore {
    pub fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
        }
    }

    pub fn ensure(
        &mut self,
        device: &wgpu::Device,
        name: &SmolStr,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> &RenderTargetSet {
        let width = width.max(1);
        let height = height.max(1);
        let recreate = match self.entries.get(name) {
            Some(existing) => {
                existing.width != width || existing.height != height || existing.format != format
            }
            None => true,
        };
        if recreate {
            debug!(group = name.as_str(), width, height, "allocating render targets");
            self.entries.insert(
                name.clone(),
                RenderTargetSet::create(device, name, width, height, format),
            );
        }
        &self.entries[name]
    }

    pub fn get(&self, name: &str) -> Option<&RenderTargetSet> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &SmolStr> {
        self.entries.keys()
    }
}

impl Default for GroupTargetStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_chain_counts_cover_the_longest_axis() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(2, 1), 2);
        assert_eq!(mip_level_count(256, 256), 9);
        assert_eq!(mip_level_count(1920, 1080), 11);
        assert_eq!(mip_level_count(0, 0), 1);
    }

    #[test]
    fn hdr_selects_a_float_color_format() {
        assert_eq!(color_format(false), wgpu::TextureFormat::Rgba8Unorm);
        assert_eq!(color_format(true), wgpu::TextureFormat::Rgba16Float);
    }
}
