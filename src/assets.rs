//! Upload a [`MaterialMapSet`] into Bevy's asset system.
//!
//! Albedo becomes an `Rgba8UnormSrgb` image, the normal map `Rgba8Unorm`, and
//! roughness + AO are packed into one ORM image (R = occlusion, G = roughness,
//! B = metallic 0), which is what [`StandardMaterial`] samples for both its
//! occlusion and metallic/roughness slots.  Every image gets a repeat sampler
//! (the maps tile) and a full mip chain.

use bevy::{
    asset::{Assets, RenderAssetUsages},
    image::{Image, ImageAddressMode, ImageFilterMode, ImageSampler, ImageSamplerDescriptor},
    pbr::StandardMaterial,
    prelude::Handle,
    render::render_resource::{Extent3d, TextureDimension, TextureFormat},
};

use crate::buffer::{MaterialMapSet, PixelBuffer};

/// Handles to the uploaded maps.
#[derive(Clone, Debug)]
pub struct MaterialHandles {
    pub albedo: Handle<Image>,
    pub normal: Handle<Image>,
    /// Packed occlusion / roughness / metallic.
    pub orm: Handle<Image>,
}

impl MaterialHandles {
    /// A [`StandardMaterial`] sampling all three images.
    pub fn standard_material(&self) -> StandardMaterial {
        StandardMaterial {
            base_color_texture: Some(self.albedo.clone()),
            normal_map_texture: Some(self.normal.clone()),
            metallic_roughness_texture: Some(self.orm.clone()),
            occlusion_texture: Some(self.orm.clone()),
            perceptual_roughness: 1.0,
            metallic: 0.0,
            ..Default::default()
        }
    }
}

/// Convert and upload all maps.  Takes `set` by value so buffers are
/// dropped as soon as they are expanded to RGBA.
pub fn map_set_to_images(set: MaterialMapSet, images: &mut Assets<Image>) -> MaterialHandles {
    let (width, height) = (set.width(), set.height());
    let orm = pack_orm(set.roughness.data(), set.ao.data());
    MaterialHandles {
        albedo: images.add(make_image(
            to_rgba(&set.albedo),
            width,
            height,
            TextureFormat::Rgba8UnormSrgb,
            MipmapMode::Srgb,
        )),
        normal: images.add(make_image(
            to_rgba(set.normal.as_buffer()),
            width,
            height,
            TextureFormat::Rgba8Unorm,
            MipmapMode::Normal,
        )),
        orm: images.add(make_image(
            orm,
            width,
            height,
            TextureFormat::Rgba8Unorm,
            MipmapMode::Linear,
        )),
    }
}

/// Expand a 1–4 channel buffer to RGBA8 (gray is replicated, alpha defaults to opaque).
fn to_rgba(buf: &PixelBuffer) -> Vec<u8> {
    let c = buf.channels() as usize;
    buf.data()
        .chunks_exact(c)
        .flat_map(|p| match c {
            1 => [p[0], p[0], p[0], 255],
            2 => [p[0], p[0], p[0], p[1]],
            3 => [p[0], p[1], p[2], 255],
            _ => [p[0], p[1], p[2], p[3]],
        })
        .collect()
}

fn pack_orm(roughness: &[u8], ao: &[u8]) -> Vec<u8> {
    ao.iter()
        .zip(roughness)
        .flat_map(|(&o, &r)| [o, r, 0, 255])
        .collect()
}

/// How a 2×2 block is averaged when building mip levels.
#[derive(Clone, Copy, Debug)]
enum MipmapMode {
    /// Average in linear light, store sRGB.
    Srgb,
    /// Decode to [-1, 1], average, renormalize.
    Normal,
    /// Plain byte average.
    Linear,
}

fn srgb_to_linear(v: u8) -> f32 {
    let c = v as f32 / 255.0;
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f32) -> u8 {
    let c = c.clamp(0.0, 1.0);
    let encoded = if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    };
    (encoded * 255.0).round() as u8
}

fn average(block: &[[u8; 4]], mode: MipmapMode) -> [u8; 4] {
    let n = block.len() as f32;
    let mean = |f: &dyn Fn(&[u8; 4]) -> f32| block.iter().map(f).sum::<f32>() / n;
    let alpha = mean(&|p| p[3] as f32).round() as u8;
    match mode {
        MipmapMode::Linear => {
            let ch = |i: usize| mean(&|p| p[i] as f32).round() as u8;
            [ch(0), ch(1), ch(2), alpha]
        }
        MipmapMode::Srgb => {
            let ch = |i: usize| linear_to_srgb(mean(&|p| srgb_to_linear(p[i])));
            [ch(0), ch(1), ch(2), alpha]
        }
        MipmapMode::Normal => {
            let v: [f32; 3] =
                std::array::from_fn(|i| mean(&|p| crate::normal::decode_component(p[i])));
            let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt().max(1e-6);
            let enc = |c: f32| ((c / len * 0.5 + 0.5).clamp(0.0, 1.0) * 255.0).round() as u8;
            [enc(v[0]), enc(v[1]), enc(v[2]), 255]
        }
    }
}

/// Append every mip level below `base` (RGBA8, `width × height`) and return
/// the full buffer with its level count.  Odd sizes clamp the 2×2 block at
/// the edge.
fn build_mip_chain(base: Vec<u8>, width: u32, height: u32, mode: MipmapMode) -> (Vec<u8>, u32) {
    let mut data = base;
    let mut levels = 1u32;
    let (mut w, mut h) = (width as usize, height as usize);
    let mut src_offset = 0usize;

    while w > 1 || h > 1 {
        let (nw, nh) = ((w / 2).max(1), (h / 2).max(1));
        let dst_offset = data.len();
        let mut level = Vec::with_capacity(nw * nh * 4);
        for y in 0..nh {
            for x in 0..nw {
                let mut block = Vec::with_capacity(4);
                for sy in (y * 2)..(y * 2 + 2).min(h) {
                    for sx in (x * 2)..(x * 2 + 2).min(w) {
                        let i = src_offset + (sy * w + sx) * 4;
                        block.push([data[i], data[i + 1], data[i + 2], data[i + 3]]);
                    }
                }
                level.extend_from_slice(&average(&block, mode));
            }
        }
        data.extend_from_slice(&level);
        src_offset = dst_offset;
        w = nw;
        h = nh;
        levels += 1;
    }
    (data, levels)
}

fn make_image(
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: TextureFormat,
    mipmap_mode: MipmapMode,
) -> Image {
    let mut image = Image::new(
        Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        TextureDimension::D2,
        data,
        format,
        RenderAssetUsages::default(),
    );
    if let Some(base) = image.data.take() {
        let (mips, levels) = build_mip_chain(base, width, height, mipmap_mode);
        image.texture_descriptor.mip_level_count = levels;
        image.data = Some(mips);
    }
    image.sampler = ImageSampler::Descriptor(ImageSamplerDescriptor {
        address_mode_u: ImageAddressMode::Repeat,
        address_mode_v: ImageAddressMode::Repeat,
        mag_filter: ImageFilterMode::Linear,
        min_filter: ImageFilterMode::Linear,
        mipmap_filter: ImageFilterMode::Linear,
        anisotropy_clamp: 16,
        ..Default::default()
    });
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{buffer::GrayscaleBuffer, normal::NormalMap};

    #[test]
    fn mip_chain_has_log2_levels_and_exact_size() {
        let base = vec![128u8; 8 * 4 * 4];
        let (data, levels) = build_mip_chain(base, 8, 4, MipmapMode::Linear);
        // 8×4, 4×2, 2×1, 1×1
        assert_eq!(levels, 4);
        assert_eq!(data.len(), (32 + 8 + 2 + 1) * 4);
        assert!(data.iter().all(|&v| v == 128));
    }

    #[test]
    fn odd_sizes_clamp_the_block() {
        let base: Vec<u8> = (0..3).flat_map(|i| [i * 10, 0, 0, 255]).collect();
        let (data, levels) = build_mip_chain(base, 3, 1, MipmapMode::Linear);
        assert_eq!(levels, 2);
        assert_eq!(&data[12..16], &[5, 0, 0, 255]);
    }

    #[test]
    fn normal_mips_stay_unit_length() {
        let px = [[255u8, 128, 128, 255], [0, 128, 128, 255]];
        let avg = average(&px, MipmapMode::Normal);
        // +X and −X cancel; the renormalized result points along Z.
        assert!(avg[2] > 250, "{avg:?}");
    }

    #[test]
    fn orm_packs_occlusion_and_roughness() {
        assert_eq!(pack_orm(&[10, 20], &[200, 100]), vec![200, 10, 0, 255, 100, 20, 0, 255]);
    }

    #[test]
    fn upload_creates_three_mipmapped_images() {
        let set = MaterialMapSet {
            albedo: PixelBuffer::filled(4, 4, &[100, 120, 140]).unwrap(),
            normal: NormalMap::flat(4, 4).unwrap(),
            roughness: GrayscaleBuffer::filled(4, 4, 127).unwrap(),
            ao: GrayscaleBuffer::filled(4, 4, 128).unwrap(),
        };
        let mut images = Assets::<Image>::default();
        let handles = map_set_to_images(set, &mut images);
        for handle in [&handles.albedo, &handles.normal, &handles.orm] {
            let image = images.get(handle).unwrap();
            assert_eq!(image.texture_descriptor.mip_level_count, 3);
        }
        let orm = images.get(&handles.orm).unwrap();
        assert_eq!(&orm.data.as_ref().unwrap()[..4], &[128, 127, 0, 255]);
        let material = handles.standard_material();
        assert!(material.occlusion_texture.is_some());
    }
}
