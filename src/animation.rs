use crate::model::{ModelAsset, ModelInstance, NodeTransform};
use anyhow::{bail, Result};
use glam::{Quat, Vec3};
use gltf::animation::util::{ReadOutputs, Rotations};
use gltf::animation::Property;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interpolation {
    Step,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Keyframe<T> {
    pub time: f32,
    pub value: T,
}

pub trait Interpolate: Copy {
    fn interpolate(self, other: Self, t: f32) -> Self;
}

impl Interpolate for Vec3 {
    fn interpolate(self, other: Self, t: f32) -> Self {
        self.lerp(other, t)
    }
}

impl Interpolate for Quat {
    fn interpolate(self, other: Self, t: f32) -> Self {
        self.slerp(other, t).normalize()
    }
}

#[derive(Clone, Debug)]
pub struct Track<T> {
    pub interpolation: Interpolation,
    pub keyframes: Arc<[Keyframe<T>]>,
}

impl<T: Interpolate> Track<T> {
    pub fn new(interpolation: Interpolation, times: &[f32], values: Vec<T>) -> Result<Self> {
        Ok(Self { interpolation, keyframes: build_keyframes(times, values)? })
    }

    /// Samples the track, holding the first and last keyframe values outside
    /// the keyed range.
    pub fn sample(&self, time: f32) -> Option<T> {
        let frames = &self.keyframes;
        let first = frames.first()?;
        let last = frames.last()?;
        if time <= first.time {
            return Some(first.value);
        }
        if time >= last.time {
            return Some(last.value);
        }
        let next = frames.partition_point(|frame| frame.time <= time);
        let (a, b) = (&frames[next - 1], &frames[next]);
        match self.interpolation {
            Interpolation::Step => Some(a.value),
            Interpolation::Linear => {
                let span = b.time - a.time;
                let t = if span > f32::EPSILON { (time - a.time) / span } else { 0.0 };
                Some(a.value.interpolate(b.value, t))
            }
        }
    }

    pub fn end_time(&self) -> f32 {
        self.keyframes.last().map(|frame| frame.time).unwrap_or(0.0)
    }
}

/// Keyed channels driving one node of a model.
#[derive(Clone, Debug)]
pub struct NodeCurve {
    pub node: usize,
    pub translation: Option<Track<Vec3>>,
    pub rotation: Option<Track<Quat>>,
    pub scale: Option<Track<Vec3>>,
}

#[derive(Clone, Debug)]
pub struct AnimationClip {
    pub name: Arc<str>,
    pub duration: f32,
    pub curves: Arc<[NodeCurve]>,
}

impl AnimationClip {
    pub fn new(name: impl Into<Arc<str>>, curves: Vec<NodeCurve>) -> Self {
        let duration = curves
            .iter()
            .flat_map(|curve| {
                [
                    curve.translation.as_ref().map(Track::end_time),
                    curve.rotation.as_ref().map(Track::end_time),
                    curve.scale.as_ref().map(Track::end_time),
                ]
            })
            .flatten()
            .fold(0.0_f32, f32::max);
        Self { name: name.into(), duration, curves: Arc::from(curves.into_boxed_slice()) }
    }

    /// Writes the sampled channels into `pose`; unkeyed properties are left untouched.
    pub fn apply(&self, time: f32, pose: &mut [NodeTransform]) {
        for curve in self.curves.iter() {
            let Some(target) = pose.get_mut(curve.node) else {
                continue;
            };
            if let Some(value) = curve.translation.as_ref().and_then(|track| track.sample(time)) {
                target.translation = value;
            }
            if let Some(value) = curve.rotation.as_ref().and_then(|track| track.sample(time)) {
                target.rotation = value;
            }
            if let Some(value) = curve.scale.as_ref().and_then(|track| track.sample(time)) {
                target.scale = value;
            }
        }
    }
}

pub fn import_clips(
    document: &gltf::Document,
    buffers: &[gltf::buffer::Data],
    label: &str,
) -> Result<Vec<AnimationClip>> {
    let mut clips = Vec::new();
    for (anim_index, animation) in document.animations().enumerate() {
        let clip_name =
            animation.name().map(str::to_string).unwrap_or_else(|| format!("animation_{anim_index}"));
        let mut builders: BTreeMap<usize, CurveBuilder> = BTreeMap::new();

        for channel in animation.channels() {
            let target_node = channel.target().node();
            let interpolation = match channel.sampler().interpolation() {
                gltf::animation::Interpolation::Linear => Interpolation::Linear,
                gltf::animation::Interpolation::Step => Interpolation::Step,
                gltf::animation::Interpolation::CubicSpline => {
                    log::warn!(
                        "[assets] {label}: animation '{clip_name}' uses CubicSpline interpolation; skipping channel (node {}).",
                        target_node.index()
                    );
                    continue;
                }
            };

            let reader = channel.reader(|buffer| buffers.get(buffer.index()).map(|data| &data.0[..]));
            let Some(inputs) = reader.read_inputs() else {
                continue;
            };
            let times: Vec<f32> = inputs.collect();
            if times.is_empty() {
                continue;
            }
            let Some(outputs) = reader.read_outputs() else {
                continue;
            };

            let builder = builders.entry(target_node.index()).or_default();
            match (channel.target().property(), outputs) {
                (Property::Translation, ReadOutputs::Translations(values)) => {
                    builder.translation =
                        Some(Track::new(interpolation, &times, values.map(Vec3::from_array).collect())?);
                }
                (Property::Rotation, ReadOutputs::Rotations(values)) => {
                    builder.rotation = Some(Track::new(interpolation, &times, convert_rotations(values))?);
                }
                (Property::Scale, ReadOutputs::Scales(values)) => {
                    builder.scale = Some(Track::new(interpolation, &times, values.map(Vec3::from_array).collect())?);
                }
                (Property::MorphTargetWeights, _) => {
                    log::debug!("[assets] {label}: morph target channel in '{clip_name}' ignored");
                }
                _ => {}
            }
        }

        let curves: Vec<NodeCurve> =
            builders.into_iter().filter_map(|(node, builder)| builder.into_curve(node)).collect();
        if curves.is_empty() {
            log::warn!("[assets] {label}: animation '{clip_name}' has no usable channels");
        }
        clips.push(AnimationClip::new(clip_name, curves));
    }
    Ok(clips)
}

#[derive(Default)]
struct CurveBuilder {
    translation: Option<Track<Vec3>>,
    rotation: Option<Track<Quat>>,
    scale: Option<Track<Vec3>>,
}

impl CurveBuilder {
    fn into_curve(self, node: usize) -> Option<NodeCurve> {
        if self.translation.is_none() && self.rotation.is_none() && self.scale.is_none() {
            None
        } else {
            Some(NodeCurve { node, translation: self.translation, rotation: self.rotation, scale: self.scale })
        }
    }
}

fn build_keyframes<T>(times: &[f32], values: Vec<T>) -> Result<Arc<[Keyframe<T>]>> {
    if times.len() != values.len() {
        bail!("Animation channel time/value count mismatch ({} vs {})", times.len(), values.len());
    }
    let mut frames: Vec<Keyframe<T>> = Vec::with_capacity(times.len());
    for (time, value) in times.iter().copied().zip(values) {
        if !time.is_finite() {
            bail!("Animation channel contains non-finite time value");
        }
        if time < 0.0 {
            bail!("Animation channel time cannot be negative");
        }
        if let Some(last) = frames.last_mut() {
            if time < last.time {
                bail!("Animation channel times must be ascending ({} after {})", time, last.time);
            }
            if (time - last.time).abs() <= f32::EPSILON {
                last.value = value;
                continue;
            }
        }
        frames.push(Keyframe { time, value });
    }
    Ok(Arc::from(frames.into_boxed_slice()))
}

fn convert_rotations(rotations: Rotations<'_>) -> Vec<Quat> {
    rotations
        .into_f32()
        .map(|c| {
            let quat = Quat::from_xyzw(c[0], c[1], c[2], c[3]);
            if quat.length_squared() > 0.0 {
                quat.normalize()
            } else {
                Quat::IDENTITY
            }
        })
        .collect()
}

/// Playback state of one clip. Time only advances while the action is
/// running and not paused; a paused running action still poses the model.
#[derive(Clone, Debug)]
pub struct AnimationAction {
    clip: usize,
    pub time: f32,
    pub paused: bool,
    running: bool,
}

impl AnimationAction {
    fn new(clip: usize) -> Self {
        Self { clip, time: 0.0, paused: false, running: false }
    }

    pub fn play(&mut self) {
        self.running = true;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    fn advance(&mut self, delta: f32, duration: f32) {
        if self.paused || !self.running {
            return;
        }
        if duration <= 0.0 {
            self.time = 0.0;
            return;
        }
        self.time = (self.time + delta).rem_euclid(duration);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ActionHandle(usize);

impl ActionHandle {
    #[cfg(test)]
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index)
    }
}

/// Owns one action per requested clip of a model and poses a
/// [`ModelInstance`] from the running ones. Later actions override earlier
/// ones on shared channels.
pub struct AnimationMixer {
    asset: Arc<ModelAsset>,
    actions: Vec<AnimationAction>,
}

impl AnimationMixer {
    pub fn new(asset: Arc<ModelAsset>) -> Self {
        Self { asset, actions: Vec::new() }
    }

    /// Returns the action for `clip`, creating it on first request.
    pub fn clip_action(&mut self, clip: usize) -> Option<ActionHandle> {
        if clip >= self.asset.clips.len() {
            return None;
        }
        if let Some(existing) = self.actions.iter().position(|action| action.clip == clip) {
            return Some(ActionHandle(existing));
        }
        self.actions.push(AnimationAction::new(clip));
        Some(ActionHandle(self.actions.len() - 1))
    }

    pub fn action_mut(&mut self, handle: ActionHandle) -> Option<&mut AnimationAction> {
        self.actions.get_mut(handle.0)
    }

    pub fn actions(&self) -> &[AnimationAction] {
        &self.actions
    }

    /// Advances every running action by `delta` seconds and rewrites the
    /// instance pose. `update(0.0)` re-evaluates the pose at the current times.
    pub fn update(&mut self, delta: f32, instance: &mut ModelInstance) {
        if !Arc::ptr_eq(&self.asset, instance.asset()) {
            log::warn!("[animation] mixer for '{}' asked to pose a different model", self.asset.label);
            return;
        }
        instance.reset_pose();
        for action in &mut self.actions {
            let Some(clip) = self.asset.clips.get(action.clip) else {
                continue;
            };
            action.advance(delta, clip.duration);
            if action.running {
                clip.apply(action.time, &mut instance.local_pose);
            }
        }
        instance.refresh();
    }
}
