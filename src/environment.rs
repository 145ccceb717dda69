use anyhow::{bail, Context, Result};
use glam::{Vec2, Vec3};
use half::f16;
use image::{DynamicImage, ImageReader};
use std::f32::consts::{PI, TAU};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

/// Resolutions and sample counts used when prefiltering an environment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BakeSettings {
    pub diffuse_resolution: u32,
    pub specular_base_resolution: u32,
    pub specular_mip_count: u32,
    pub brdf_lut_size: u32,
    pub diffuse_samples: u32,
    pub specular_samples: u32,
    pub brdf_samples: u32,
}

impl Default for BakeSettings {
    fn default() -> Self {
        Self {
            diffuse_resolution: 32,
            specular_base_resolution: 128,
            specular_mip_count: 6,
            brdf_lut_size: 256,
            diffuse_samples: 64,
            specular_samples: 128,
            brdf_samples: 128,
        }
    }
}

impl BakeSettings {
    pub fn preview() -> Self {
        Self {
            diffuse_resolution: 4,
            specular_base_resolution: 8,
            specular_mip_count: 3,
            brdf_lut_size: 8,
            diffuse_samples: 16,
            specular_samples: 16,
            brdf_samples: 16,
        }
    }
}

/// Linear-light equirectangular image.
#[derive(Clone)]
pub struct HdrImage {
    width: u32,
    height: u32,
    pixels: Vec<Vec3>,
}

impl HdrImage {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format().context("Unreadable image header")?;
        let image = reader.decode().context("Failed to decode environment image")?;
        Self::from_dynamic(&image)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = ImageReader::open(path)
            .with_context(|| format!("Failed to open environment {}", path.display()))?
            .with_guessed_format()?;
        let image = reader.decode().with_context(|| format!("Failed to decode environment {}", path.display()))?;
        Self::from_dynamic(&image)
    }

    pub fn from_dynamic(image: &DynamicImage) -> Result<Self> {
        let rgb = image.to_rgb32f();
        let (width, height) = (rgb.width(), rgb.height());
        if width == 0 || height == 0 {
            bail!("Environment image is empty");
        }
        let pixels = rgb.pixels().map(|pixel| Vec3::from_array(pixel.0)).collect();
        Ok(Self { width, height, pixels })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn pixel(&self, x: u32, y: u32) -> Vec3 {
        self.pixels[(y * self.width + x) as usize]
    }
}

#[derive(Clone)]
pub struct Cubemap {
    pub size: u32,
    pub faces: [Vec<f32>; 6],
}

#[derive(Clone)]
pub struct PrefilteredCubemap {
    pub base_size: u32,
    pub levels: Vec<Cubemap>,
}

#[derive(Clone)]
pub struct Lut2D {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

/// CPU-side image based lighting: irradiance cube, GGX-prefiltered specular
/// cube with one roughness per mip, and the split-sum BRDF table. All data is
/// RGBA f32.
#[derive(Clone)]
pub struct EnvironmentMaps {
    pub label: String,
    pub diffuse: Cubemap,
    pub specular: PrefilteredCubemap,
    pub brdf: Lut2D,
}

impl EnvironmentMaps {
    pub fn bake(label: impl Into<String>, image: &HdrImage, settings: &BakeSettings) -> Self {
        Self {
            label: label.into(),
            diffuse: compute_diffuse_cubemap(image, settings.diffuse_resolution, settings.diffuse_samples),
            specular: compute_specular_cubemap(
                image,
                settings.specular_base_resolution,
                settings.specular_mip_count,
                settings.specular_samples,
            ),
            brdf: compute_brdf_lut(settings.brdf_lut_size, settings.brdf_samples),
        }
    }

    pub fn from_path(path: impl AsRef<Path>, settings: &BakeSettings) -> Result<Self> {
        let path = path.as_ref();
        let image = HdrImage::open(path)?;
        Ok(Self::bake(path.display().to_string(), &image, settings))
    }

    /// Black 1x1 maps bound while no environment has loaded.
    pub fn blank() -> Self {
        let face = || vec![0.0, 0.0, 0.0, 1.0];
        let cube = || Cubemap { size: 1, faces: [face(), face(), face(), face(), face(), face()] };
        Self {
            label: "blank".to_string(),
            diffuse: cube(),
            specular: PrefilteredCubemap { base_size: 1, levels: vec![cube()] },
            brdf: Lut2D { width: 1, height: 1, data: vec![1.0, 0.0, 0.0, 1.0] },
        }
    }

    pub fn specular_mip_count(&self) -> u32 {
        self.specular.levels.len().max(1) as u32
    }

    pub fn is_finite(&self) -> bool {
        let cube_finite = |cube: &Cubemap| cube.faces.iter().all(|face| face.iter().all(|v| v.is_finite()));
        cube_finite(&self.diffuse)
            && self.specular.levels.iter().all(cube_finite)
            && self.brdf.data.iter().all(|v| v.is_finite())
    }
}

pub struct EnvironmentGpu {
    _diffuse_texture: wgpu::Texture,
    diffuse_view: wgpu::TextureView,
    _specular_texture: wgpu::Texture,
    specular_view: wgpu::TextureView,
    _brdf_texture: wgpu::Texture,
    brdf_view: wgpu::TextureView,
    sampler: Arc<wgpu::Sampler>,
    specular_mip_count: u32,
}

impl EnvironmentGpu {
    pub fn create_sampler(device: &wgpu::Device) -> Arc<wgpu::Sampler> {
        Arc::new(device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Environment Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            anisotropy_clamp: 8,
            ..Default::default()
        }))
    }

    pub fn upload(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        maps: &EnvironmentMaps,
        sampler: Arc<wgpu::Sampler>,
    ) -> Result<Self> {
        if maps.specular.levels.is_empty() {
            bail!("Environment '{}' has no specular levels", maps.label);
        }
        let diffuse_texture = create_cube_texture(device, "Environment Diffuse Cube", maps.diffuse.size, 1);
        write_cube_level(queue, &diffuse_texture, 0, &maps.diffuse);
        let diffuse_view = diffuse_texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Environment Diffuse View"),
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        });

        let mip_count = maps.specular_mip_count();
        let specular_texture =
            create_cube_texture(device, "Environment Specular Cube", maps.specular.base_size, mip_count);
        for (level_idx, level) in maps.specular.levels.iter().enumerate() {
            write_cube_level(queue, &specular_texture, level_idx as u32, level);
        }
        let specular_view = specular_texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Environment Specular View"),
            dimension: Some(wgpu::TextureViewDimension::Cube),
            base_mip_level: 0,
            mip_level_count: Some(mip_count),
            ..Default::default()
        });

        let brdf_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Environment BRDF LUT"),
            size: wgpu::Extent3d { width: maps.brdf.width, height: maps.brdf.height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba16Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let brdf_half = f32_to_f16_bits(&maps.brdf.data);
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &brdf_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&brdf_half),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(maps.brdf.width * 8),
                rows_per_image: Some(maps.brdf.height),
            },
            wgpu::Extent3d { width: maps.brdf.width, height: maps.brdf.height, depth_or_array_layers: 1 },
        );
        let brdf_view = brdf_texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Environment BRDF View"),
            dimension: Some(wgpu::TextureViewDimension::D2),
            ..Default::default()
        });

        Ok(Self {
            _diffuse_texture: diffuse_texture,
            diffuse_view,
            _specular_texture: specular_texture,
            specular_view,
            _brdf_texture: brdf_texture,
            brdf_view,
            sampler,
            specular_mip_count: mip_count,
        })
    }

    pub fn diffuse_view(&self) -> &wgpu::TextureView {
        &self.diffuse_view
    }

    pub fn specular_view(&self) -> &wgpu::TextureView {
        &self.specular_view
    }

    pub fn brdf_view(&self) -> &wgpu::TextureView {
        &self.brdf_view
    }

    pub fn sampler(&self) -> &wgpu::Sampler {
        self.sampler.as_ref()
    }

    pub fn specular_mip_count(&self) -> u32 {
        self.specular_mip_count
    }
}

fn create_cube_texture(device: &wgpu::Device, label: &str, size: u32, mip_count: u32) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d { width: size, height: size, depth_or_array_layers: 6 },
        mip_level_count: mip_count,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba16Float,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    })
}

fn write_cube_level(queue: &wgpu::Queue, texture: &wgpu::Texture, mip_level: u32, level: &Cubemap) {
    for (face, data) in level.faces.iter().enumerate() {
        let face_half = f32_to_f16_bits(data);
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level,
                origin: wgpu::Origin3d { x: 0, y: 0, z: face as u32 },
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&face_half),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(level.size * 8),
                rows_per_image: Some(level.size),
            },
            wgpu::Extent3d { width: level.size, height: level.size, depth_or_array_layers: 1 },
        );
    }
}

fn f32_to_f16_bits(data: &[f32]) -> Vec<u16> {
    data.iter().map(|value| f16::from_f32(*value).to_bits()).collect()
}

fn empty_faces(size: u32) -> [Vec<f32>; 6] {
    std::array::from_fn(|_| vec![0.0; (size * size * 4) as usize])
}

fn compute_diffuse_cubemap(image: &HdrImage, size: u32, sample_count: u32) -> Cubemap {
    let size = size.max(1);
    let mut faces = empty_faces(size);
    for (face, data) in faces.iter_mut().enumerate() {
        for y in 0..size {
            for x in 0..size {
                let dir = cubemap_direction(face, x, y, size);
                let mut result = Vec3::ZERO;
                let mut weight_sum = 0.0f32;
                for sample in 0..sample_count {
                    let xi = hammersley(sample, sample_count);
                    let sample_dir = cosine_sample_hemisphere(dir, xi);
                    let n_dot_l = dir.dot(sample_dir).max(0.0);
                    if n_dot_l > 0.0 {
                        result += sample_equirect(image, sample_dir) * n_dot_l;
                        weight_sum += n_dot_l;
                    }
                }
                if weight_sum > 0.0 {
                    result /= weight_sum;
                }
                let idx = ((y * size + x) * 4) as usize;
                data[idx..idx + 4].copy_from_slice(&[result.x, result.y, result.z, 1.0]);
            }
        }
    }
    Cubemap { size, faces }
}

fn compute_specular_cubemap(image: &HdrImage, base_size: u32, mip_count: u32, sample_count: u32) -> PrefilteredCubemap {
    let base_size = base_size.max(1);
    let max_level = mip_count.clamp(1, base_size.ilog2() + 1);
    let mut levels = Vec::with_capacity(max_level as usize);
    for mip in 0..max_level {
        let size = (base_size >> mip).max(1);
        let roughness = mip as f32 / (max_level as f32 - 1.0).max(1.0);
        let mut faces = empty_faces(size);
        for (face, data) in faces.iter_mut().enumerate() {
            for y in 0..size {
                for x in 0..size {
                    let r = cubemap_direction(face, x, y, size);
                    let mut color = Vec3::ZERO;
                    let mut weight_sum = 0.0f32;
                    for sample in 0..sample_count {
                        let xi = hammersley(sample, sample_count);
                        let h = importance_sample_ggx(r, xi, roughness);
                        let l = reflect(-r, h).normalize();
                        let n_dot_l = r.dot(l).max(0.0);
                        if n_dot_l > 0.0 {
                            color += sample_equirect(image, l) * n_dot_l;
                            weight_sum += n_dot_l;
                        }
                    }
                    if weight_sum > 0.0 {
                        color /= weight_sum;
                    }
                    let idx = ((y * size + x) * 4) as usize;
                    data[idx..idx + 4].copy_from_slice(&[color.x, color.y, color.z, 1.0]);
                }
            }
        }
        levels.push(Cubemap { size, faces });
    }
    PrefilteredCubemap { base_size, levels }
}

fn compute_brdf_lut(size: u32, sample_count: u32) -> Lut2D {
    let size = size.max(1);
    let mut data = vec![0.0f32; (size * size * 4) as usize];
    for y in 0..size {
        let roughness = (y as f32 + 0.5) / size as f32;
        for x in 0..size {
            let n_dot_v = (x as f32 + 0.5) / size as f32;
            let (a, b) = integrate_brdf(n_dot_v, roughness, sample_count);
            let idx = ((y * size + x) * 4) as usize;
            data[idx..idx + 4].copy_from_slice(&[a, b, 0.0, 1.0]);
        }
    }
    Lut2D { width: size, height: size, data }
}

fn sample_equirect(image: &HdrImage, dir: Vec3) -> Vec3 {
    let d = dir.normalize();
    let theta = d.y.clamp(-1.0, 1.0).acos();
    let phi = d.z.atan2(d.x);
    let u = (phi + PI) / TAU;
    let v = theta / PI;
    let x = u * (image.width as f32 - 1.0);
    let y = v * (image.height as f32 - 1.0);
    let x0 = x.floor();
    let y0 = y.floor();
    let tx = x - x0;
    let ty = y - y0;

    let ix0 = x0.rem_euclid(image.width as f32) as u32;
    let ix1 = (x0 + 1.0).rem_euclid(image.width as f32) as u32;
    let iy0 = y0.clamp(0.0, (image.height - 1) as f32) as u32;
    let iy1 = (y0 + 1.0).clamp(0.0, (image.height - 1) as f32) as u32;

    let c0 = image.pixel(ix0, iy0) * (1.0 - tx) + image.pixel(ix1, iy0) * tx;
    let c1 = image.pixel(ix0, iy1) * (1.0 - tx) + image.pixel(ix1, iy1) * tx;
    c0 * (1.0 - ty) + c1 * ty
}

/// Direction through texel (x, y) of a cube face, faces ordered +X, -X, +Y, -Y, +Z, -Z.
fn cubemap_direction(face: usize, x: u32, y: u32, size: u32) -> Vec3 {
    let a = (2.0 * (x as f32 + 0.5) / size as f32) - 1.0;
    let b = (2.0 * (y as f32 + 0.5) / size as f32) - 1.0;
    match face {
        0 => Vec3::new(1.0, -b, -a),
        1 => Vec3::new(-1.0, -b, a),
        2 => Vec3::new(a, 1.0, b),
        3 => Vec3::new(a, -1.0, -b),
        4 => Vec3::new(a, -b, 1.0),
        _ => Vec3::new(-a, -b, -1.0),
    }
    .normalize()
}

fn cosine_sample_hemisphere(normal: Vec3, xi: Vec2) -> Vec3 {
    let r = xi.x.sqrt();
    let theta = TAU * xi.y;
    let z = (1.0 - xi.x).sqrt();
    tangent_to_world(normal, Vec3::new(r * theta.cos(), r * theta.sin(), z))
}

fn importance_sample_ggx(normal: Vec3, xi: Vec2, roughness: f32) -> Vec3 {
    let a = roughness.max(0.001);
    let phi = TAU * xi.x;
    let cos_theta = ((1.0 - xi.y) / (1.0 + (a * a - 1.0) * xi.y)).sqrt();
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    tangent_to_world(normal, Vec3::new(phi.cos() * sin_theta, phi.sin() * sin_theta, cos_theta))
}

fn tangent_to_world(normal: Vec3, vec: Vec3) -> Vec3 {
    let up = if normal.z.abs() < 0.999 { Vec3::Z } else { Vec3::X };
    let tangent = normal.cross(up).normalize();
    let bitangent = normal.cross(tangent);
    tangent * vec.x + bitangent * vec.y + normal * vec.z
}

fn reflect(v: Vec3, n: Vec3) -> Vec3 {
    v - 2.0 * v.dot(n) * n
}

fn hammersley(i: u32, n: u32) -> Vec2 {
    Vec2::new(i as f32 / n.max(1) as f32, radical_inverse_vdc(i))
}

fn radical_inverse_vdc(bits: u32) -> f32 {
    bits.reverse_bits() as f32 * 2.328_306_4e-10
}

fn integrate_brdf(n_dot_v: f32, roughness: f32, sample_count: u32) -> (f32, f32) {
    let normal = Vec3::Z;
    let v = Vec3::new((1.0 - n_dot_v * n_dot_v).sqrt(), 0.0, n_dot_v);
    let mut a = 0.0f32;
    let mut b = 0.0f32;
    for i in 0..sample_count {
        let xi = hammersley(i, sample_count);
        let h = importance_sample_ggx(normal, xi, roughness);
        let l = reflect(-v, h);
        let n_dot_l = l.z.max(0.0);
        let n_dot_h = h.z.max(0.0);
        let v_dot_h = v.dot(h).max(0.0);
        if n_dot_l > 0.0 {
            let g = geometry_smith(normal, v, l, roughness);
            let g_vis = (g * v_dot_h) / (n_dot_h * n_dot_v).max(1e-4);
            let fc = (1.0 - v_dot_h).powi(5);
            a += (1.0 - fc) * g_vis;
            b += fc * g_vis;
        }
    }
    let scale = 1.0 / sample_count.max(1) as f32;
    (a * scale, b * scale)
}

fn geometry_smith(normal: Vec3, v: Vec3, l: Vec3, roughness: f32) -> f32 {
    let n_dot_v = normal.dot(v).max(0.0);
    let n_dot_l = normal.dot(l).max(0.0);
    geometry_schlick_ggx(n_dot_v, roughness) * geometry_schlick_ggx(n_dot_l, roughness)
}

fn geometry_schlick_ggx(n_dot_v: f32, roughness: f32) -> f32 {
    let r = roughness + 1.0;
    let k = (r * r) * 0.125;
    n_dot_v / (n_dot_v * (1.0 - k) + k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::hdr::HdrEncoder;
    use image::{Rgb, RgbImage};
    use std::fs::File;
    use std::io::BufWriter;
    use tempfile::tempdir;

    /// Bright sky over a dark floor.
    fn write_test_hdr(path: &Path) {
        let (width, height) = (16usize, 8usize);
        let pixels: Vec<Rgb<f32>> = (0..width * height)
            .map(|i| if i / width < height / 2 { Rgb([4.0, 4.0, 4.0]) } else { Rgb([0.05, 0.05, 0.05]) })
            .collect();
        let file = BufWriter::new(File::create(path).expect("create hdr"));
        HdrEncoder::new(file).encode(&pixels, width, height).expect("encode hdr");
    }

    #[test]
    fn bakes_hdr_file_into_finite_maps() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("studio.hdr");
        write_test_hdr(&path);

        let settings = BakeSettings::preview();
        let maps = EnvironmentMaps::from_path(&path, &settings).expect("bake environment");
        assert!(maps.is_finite());
        assert_eq!(maps.diffuse.size, settings.diffuse_resolution);
        assert_eq!(maps.specular_mip_count(), settings.specular_mip_count);
        assert_eq!(maps.specular.levels[2].size, 2);

        // +Y face centre sees the bright upper hemisphere, -Y the floor.
        let centre = |face: usize| {
            let size = maps.diffuse.size;
            let idx = (((size / 2) * size + size / 2) * 4) as usize;
            maps.diffuse.faces[face][idx]
        };
        assert!(centre(2) > centre(3) * 4.0, "up {} vs down {}", centre(2), centre(3));
    }

    #[test]
    fn decodes_ldr_images_from_memory() {
        let mut img = RgbImage::new(4, 2);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = Rgb([(x as u8).saturating_mul(40), (y as u8).saturating_mul(80), 200]);
        }
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png).expect("encode png");
        let hdr = HdrImage::decode(&bytes).expect("decode png");
        assert_eq!((hdr.width(), hdr.height()), (4, 2));
    }

    #[test]
    fn rejects_garbage_bytes() {
        assert!(HdrImage::decode(b"definitely not an image").is_err());
    }

    #[test]
    fn brdf_lut_stays_in_unit_range() {
        let lut = compute_brdf_lut(8, 32);
        for texel in lut.data.chunks_exact(4) {
            assert!((0.0..=1.05).contains(&texel[0]), "scale {}", texel[0]);
            assert!((0.0..=1.05).contains(&texel[1]), "bias {}", texel[1]);
        }
    }

    #[test]
    fn cube_face_centres_point_along_axes() {
        let expected = [Vec3::X, -Vec3::X, Vec3::Y, -Vec3::Y, Vec3::Z, -Vec3::Z];
        for (face, axis) in expected.iter().enumerate() {
            let dir = cubemap_direction(face, 1, 1, 3);
            assert!((dir - *axis).length() < 1e-5, "face {face} -> {dir:?}");
        }
    }

    #[test]
    fn blank_maps_are_black() {
        let maps = EnvironmentMaps::blank();
        assert!(maps.is_finite());
        assert_eq!(maps.specular_mip_count(), 1);
        assert_eq!(maps.diffuse.faces[0][..3], [0.0, 0.0, 0.0]);
    }
}
