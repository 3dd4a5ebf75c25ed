//! Layers: ordered groups of document channels.
//!
//! A [`Layer`] never owns pixels. It holds [`ChannelId`]s into the document's channel arena,
//! so every accessor that needs a channel name takes that arena as `&[Channel]`.

use smallvec::SmallVec;

use crate::channel::classify::{self, ChanTag, ChannelType};
use crate::channel::Channel;

pub mod blend;
pub mod builder;
pub mod codec;

pub use blend::BlendMode;

/// Index of a channel in its document's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LayerKind {
    #[default]
    Ordinary,
    /// A Cryptomatte group recognised from `cryptomatte/<id>/name` header metadata.
    Crypto,
}

/// Host-facing presentation properties, persisted through the layer string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LayerProps {
    pub visible: bool,
    pub mode: BlendMode,
    pub opacity: u8,
    pub adjustment_layer: bool,
}

impl Default for LayerProps {
    fn default() -> Self {
        Self {
            visible: true,
            mode: BlendMode::Normal,
            opacity: 255,
            adjustment_layer: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Layer {
    name: Option<String>,
    channels: SmallVec<[ChannelId; 4]>,
    kind: LayerKind,
    manifest: Option<String>,
    manif_file: Option<String>,
    assigned_alpha: Option<ChannelId>,
    load_as_layer: bool,
    pub props: LayerProps,
}

fn replace_suffix(s: &mut String, suffix: &str, with: &str) {
    if s.ends_with(suffix) {
        s.truncate(s.len() - suffix.len());
        s.push_str(with);
    }
}

impl Layer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn crypto(name: impl Into<String>, manifest: Option<String>, manif_file: Option<String>) -> Self {
        Self {
            name: Some(name.into()),
            kind: LayerKind::Crypto,
            manifest,
            manif_file,
            ..Self::default()
        }
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn explicit_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn manifest(&self) -> Option<&str> {
        self.manifest.as_deref()
    }

    pub fn manif_file(&self) -> Option<&str> {
        self.manif_file.as_deref()
    }

    pub fn load_as_layer(&self) -> bool {
        self.load_as_layer
    }

    pub fn set_load_as_layer(&mut self, load_as_layer: bool) {
        self.load_as_layer = load_as_layer;
    }

    pub fn channels(&self) -> &[ChannelId] {
        &self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn contains(&self, id: ChannelId) -> bool {
        self.channels.contains(&id)
    }

    /// Append `id` unless it is already a member.
    pub fn add_channel(&mut self, id: ChannelId) {
        if !self.contains(id) {
            self.channels.push(id);
        }
    }

    pub fn remove_channel(&mut self, id: ChannelId) -> bool {
        match self.channels.iter().position(|c| *c == id) {
            Some(pos) => {
                self.channels.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Display name: the explicit name, else the first channel's layer prefix, else the
    /// bracket form of [`Layer::ps_name`].
    pub fn name(&self, chans: &[Channel]) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match self.channels.first() {
            Some(first) if chans[first.0].channel_type() == ChannelType::Layer => {
                classify::layer_name(chans[first.0].name()).to_owned()
            }
            _ => self.ps_name(chans),
        }
    }

    /// Bracket form listing every channel: `layer.[a][b]` for dotted channels, `[a][b]`
    /// otherwise, abbreviating a trailing `[R][G][B][A]` or `[R][G][B]`.
    pub fn ps_name(&self, chans: &[Channel]) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let Some(first) = self.channels.first() else {
            return String::new();
        };
        let dotted = chans[first.0].channel_type() == ChannelType::Layer;
        let mut out = if dotted {
            format!("{}.", classify::layer_name(chans[first.0].name()))
        } else {
            String::new()
        };
        for id in &self.channels {
            let chan = chans[id.0].name();
            let shown = if dotted {
                classify::channel_name(chan)
            } else {
                chan
            };
            out.push('[');
            out.push_str(shown);
            out.push(']');
        }
        replace_suffix(&mut out, "[R][G][B][A]", "RGBA");
        replace_suffix(&mut out, "[R][G][B]", "RGB");
        out
    }

    pub fn find_channel(&self, chans: &[Channel], name: &str) -> Option<ChannelId> {
        self.channels
            .iter()
            .copied()
            .find(|id| chans[id.0].name() == name)
    }

    /// Tagged channels first in tag order (R, G, B, Y, RY, BY, A, AR, AG, AB), then the
    /// general channels by channel name. Stable for equal keys.
    pub fn sort_channels(&mut self, chans: &[Channel]) {
        self.channels.sort_by(|a, b| {
            let (ca, cb) = (&chans[a.0], &chans[b.0]);
            let (ta, tb) = (ca.tag(), cb.tag());
            ta.cmp(&tb).then_with(|| {
                if ta == ChanTag::General {
                    classify::channel_name(ca.name()).cmp(classify::channel_name(cb.name()))
                } else {
                    std::cmp::Ordering::Equal
                }
            })
        });
    }

    /// The alpha used for this layer's colour math: an assigned alpha, else its own
    /// A-tagged channel.
    pub fn alpha_channel(&self, chans: &[Channel]) -> Option<ChannelId> {
        self.assigned_alpha.or_else(|| self.own_alpha(chans))
    }

    /// First member tagged A.
    pub fn own_alpha(&self, chans: &[Channel]) -> Option<ChannelId> {
        self.channels
            .iter()
            .copied()
            .find(|id| chans[id.0].tag() == ChanTag::A)
    }

    pub fn assigned_alpha(&self) -> Option<ChannelId> {
        self.assigned_alpha
    }

    /// With `force`, use `external` unconditionally. Otherwise only fill an empty slot: the
    /// layer's own alpha wins over `external`.
    pub fn assign_alpha(&mut self, chans: &[Channel], external: Option<ChannelId>, force: bool) {
        if force {
            self.assigned_alpha = external;
        } else if self.assigned_alpha.is_none() {
            self.assigned_alpha = self.own_alpha(chans).or(external);
        }
    }

    pub fn non_alpha_channels(&self, chans: &[Channel]) -> SmallVec<[ChannelId; 4]> {
        self.channels
            .iter()
            .copied()
            .filter(|id| chans[id.0].tag() != ChanTag::A)
            .collect()
    }

    /// Members the colour math applies to: everything except the first own alpha.
    pub fn color_channels(&self, chans: &[Channel]) -> SmallVec<[ChannelId; 4]> {
        let own = self.own_alpha(chans);
        self.channels
            .iter()
            .copied()
            .filter(|id| Some(*id) != own)
            .collect()
    }

    pub fn loaded(&self, chans: &[Channel]) -> bool {
        self.channels.iter().all(|id| chans[id.0].loaded())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::PixelType;

    fn arena(names: &[&str]) -> Vec<Channel> {
        names
            .iter()
            .map(|n| Channel::new(*n, PixelType::Half))
            .collect()
    }

    fn layer_of(ids: &[usize]) -> Layer {
        let mut layer = Layer::new();
        for &i in ids {
            layer.add_channel(ChannelId(i));
        }
        layer
    }

    #[test]
    fn names_follow_the_first_channel() {
        let chans = arena(&["beauty.R", "beauty.G", "R", "G", "B", "A", "Z"]);
        assert_eq!(layer_of(&[0, 1]).name(&chans), "beauty");
        assert_eq!(layer_of(&[0, 1]).ps_name(&chans), "beauty.[R][G]");
        assert_eq!(layer_of(&[2, 3, 4, 5]).name(&chans), "RGBA");
        assert_eq!(layer_of(&[2, 3, 4]).name(&chans), "RGB");
        assert_eq!(layer_of(&[6]).name(&chans), "[Z]");
        let mut named = layer_of(&[6]);
        named.set_name("depth");
        assert_eq!(named.name(&chans), "depth");
    }

    #[test]
    fn sort_puts_tags_first_then_names() {
        let chans = arena(&["x.Z", "x.A", "x.B", "x.R", "x.G", "x.N"]);
        let mut layer = layer_of(&[0, 1, 2, 3, 4, 5]);
        layer.sort_channels(&chans);
        let names: Vec<_> = layer.channels().iter().map(|c| chans[c.0].name()).collect();
        assert_eq!(names, vec!["x.R", "x.G", "x.B", "x.A", "x.N", "x.Z"]);
    }

    #[test]
    fn assign_alpha_prefers_own_alpha_unless_forced() {
        let chans = arena(&["R", "A", "mask"]);
        let mut layer = layer_of(&[0, 1]);
        layer.assign_alpha(&chans, Some(ChannelId(2)), false);
        assert_eq!(layer.alpha_channel(&chans), Some(ChannelId(1)));
        layer.assign_alpha(&chans, Some(ChannelId(2)), true);
        assert_eq!(layer.alpha_channel(&chans), Some(ChannelId(2)));

        let mut bare = layer_of(&[0]);
        assert_eq!(bare.alpha_channel(&chans), None);
        bare.assign_alpha(&chans, Some(ChannelId(2)), false);
        assert_eq!(bare.alpha_channel(&chans), Some(ChannelId(2)));
    }

    #[test]
    fn duplicate_members_are_ignored() {
        let mut layer = layer_of(&[0, 0, 1]);
        assert_eq!(layer.len(), 2);
        assert!(layer.remove_channel(ChannelId(0)));
        assert!(!layer.remove_channel(ChannelId(0)));
        assert_eq!(layer.channels(), &[ChannelId(1)]);
    }

    #[test]
    fn color_channels_exclude_only_the_own_alpha() {
        let chans = arena(&["R", "A", "G"]);
        let layer = layer_of(&[0, 1, 2]);
        assert_eq!(
            layer.color_channels(&chans).as_slice(),
            &[ChannelId(0), ChannelId(2)]
        );
        assert_eq!(layer.non_alpha_channels(&chans).len(), 2);
    }
}
