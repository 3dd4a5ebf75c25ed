//! Reconstruct layers from a flat channel list.

use std::collections::BTreeMap;

use crate::channel::classify::{self, ChanTag, ChannelType};
use crate::channel::Channel;
use crate::foundation::core::PixelType;
use crate::io::Header;

use super::{ChannelId, Layer};

/// Cryptomatte metadata for one matte group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CryptoManifest {
    pub manifest: Option<String>,
    pub manif_file: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BuiltLayers {
    pub layers: Vec<Layer>,
    pub crypto_layers: Vec<Layer>,
}

impl BuiltLayers {
    /// Ordinary layer named `name`, else a crypto layer whose name is `name` minus its last
    /// two characters.
    pub fn find_layer_mut(&mut self, chans: &[Channel], name: &str) -> Option<&mut Layer> {
        if let Some(pos) = self.layers.iter().position(|l| l.name(chans) == name) {
            return self.layers.get_mut(pos);
        }
        let trimmed = name
            .len()
            .checked_sub(2)
            .filter(|n| *n > 0)
            .and_then(|n| name.get(..n))?;
        self.crypto_layers
            .iter_mut()
            .find(|l| l.name(chans) == trimmed)
    }
}

/// Collect `cryptomatte/<id>/name` groups, keyed by part prefix plus the group name.
pub fn collect_crypto_manifests<'a, I>(parts: I) -> BTreeMap<String, CryptoManifest>
where
    I: IntoIterator<Item = (&'a str, &'a Header)>,
{
    let mut out = BTreeMap::new();
    for (prefix, header) in parts {
        for (key, value) in header.string_attributes() {
            let Some(id) = key
                .strip_prefix("cryptomatte/")
                .and_then(|rest| rest.strip_suffix("/name"))
            else {
                continue;
            };
            let lookup = |field: &str| {
                header
                    .string_attribute(&format!("cryptomatte/{id}/{field}"))
                    .map(str::to_owned)
            };
            out.insert(
                format!("{prefix}{value}"),
                CryptoManifest {
                    manifest: lookup("manifest"),
                    manif_file: lookup("manif_file"),
                },
            );
        }
    }
    out
}

#[derive(Default)]
struct ReservedChannels {
    found: BTreeMap<&'static str, ChannelId>,
}

impl ReservedChannels {
    fn insert(&mut self, name: &str, id: ChannelId) {
        if let Some(&reserved) = classify::RESERVED_NAMES.iter().find(|r| **r == name) {
            self.found.insert(reserved, id);
        }
    }

    fn get(&self, name: &str) -> Option<ChannelId> {
        self.found.get(name).copied()
    }

    fn has(&self, name: &str) -> bool {
        self.found.contains_key(name)
    }

    fn layer_of(&self, chans: &[Channel], names: &[&str]) -> Layer {
        let mut layer = Layer::new();
        for id in names.iter().filter_map(|n| self.get(n)) {
            layer.add_channel(id);
        }
        layer.sort_channels(chans);
        layer
    }
}

/// Group `chans` into layers.
///
/// Dotted channels join the layer named by their prefix, in first-seen order; UINT channels
/// always start their own layer. Channels of a recognised Cryptomatte group go to the crypto
/// layers. Reserved channels are gathered into up to three layers appended at the end:
/// coloured alpha, Y/RY/BY(/A) and R/G/B(/A). Layers with more than three non-alpha channels
/// are then split, and with `split_alpha` every alpha moves to a layer of its own.
pub fn build_layers(
    chans: &[Channel],
    crypto: &BTreeMap<String, CryptoManifest>,
    split_alpha: bool,
) -> BuiltLayers {
    let mut built = BuiltLayers::default();
    let mut reserved = ReservedChannels::default();

    for (idx, chan) in chans.iter().enumerate() {
        let id = ChannelId(idx);
        let channel_type = chan.channel_type();
        if channel_type == ChannelType::Reserved {
            reserved.insert(chan.name(), id);
            continue;
        }

        let key = classify::layer_key(chan.name());
        let is_uint = chan.pixel_type() == PixelType::Uint;
        if !is_uint && let Some(layer) = built.find_layer_mut(chans, &key) {
            layer.add_channel(id);
            layer.sort_channels(chans);
            continue;
        }

        let crypto_group = (channel_type == ChannelType::Layer)
            .then(|| {
                crypto
                    .iter()
                    .find(|(name, _)| key.len() == name.len() + 2 && key.starts_with(name.as_str()))
            })
            .flatten();
        if let Some((name, manifest)) = crypto_group {
            let mut layer = Layer::crypto(
                name.clone(),
                manifest.manifest.clone(),
                manifest.manif_file.clone(),
            );
            layer.add_channel(id);
            built.crypto_layers.push(layer);
            continue;
        }

        let mut layer = if is_uint {
            Layer::named(chan.name())
        } else {
            Layer::new()
        };
        layer.add_channel(id);
        built.layers.push(layer);
    }

    let has = |n: &str| reserved.has(n);
    if has("AR") || has("AG") || has("AB") {
        built
            .layers
            .push(reserved.layer_of(chans, &["AR", "AG", "AB"]));
    }
    if has("Y") || has("RY") || has("BY") {
        let mut names = vec!["Y", "RY", "BY"];
        if has("A") && !has("R") && !has("G") && !has("B") {
            names.push("A");
        }
        let mut layer = reserved.layer_of(chans, &names);
        layer.set_load_as_layer(has("Y") && has("RY") && has("BY"));
        built.layers.push(layer);
    }
    if has("R") || has("G") || has("B") || (has("A") && !has("Y") && !has("RY") && !has("BY")) {
        built
            .layers
            .push(reserved.layer_of(chans, &["R", "G", "B", "A"]));
    }

    overflow_channels(chans, &mut built.layers);
    if split_alpha {
        separate_alphas(chans, &mut built.layers);
    }
    built
}

/// `base`, or `base` incremented until no layer in `layers` carries that name.
pub fn unique_layer_name(layers: &[Layer], chans: &[Channel], base: &str) -> String {
    let mut name = base.to_owned();
    while layers.iter().any(|l| l.name(chans) == name) {
        name = classify::increment_text(&name);
    }
    name
}

fn insert_split_layer(chans: &[Channel], layers: &mut Vec<Layer>, at: usize, id: ChannelId) {
    let mut layer = Layer::new();
    layer.add_channel(id);
    let natural = layer.name(chans);
    let name = unique_layer_name(layers, chans, &natural);
    if name != natural {
        layer.set_name(name);
    }
    layers.insert(at, layer);
}

/// Move channels out of layers holding more than three non-alpha channels until none do.
///
/// The first general channel goes first; lacking one, the last non-alpha channel. Each moved
/// channel gets a new layer inserted just before its source.
pub fn overflow_channels(chans: &[Channel], layers: &mut Vec<Layer>) {
    loop {
        let next = layers.iter().enumerate().find_map(|(pos, layer)| {
            let non_alpha = layer.non_alpha_channels(chans);
            if non_alpha.len() <= 3 {
                return None;
            }
            layer
                .channels()
                .iter()
                .copied()
                .find(|id| chans[id.0].tag().is_general())
                .or_else(|| non_alpha.last().copied())
                .map(|id| (pos, id))
        });
        let Some((pos, id)) = next else { break };
        layers[pos].remove_channel(id);
        insert_split_layer(chans, layers, pos, id);
    }
}

/// Give every alpha of a multi-channel layer a layer of its own, remembering it on the
/// source layer for later unmultiplying.
pub fn separate_alphas(chans: &[Channel], layers: &mut Vec<Layer>) {
    loop {
        let next = layers.iter().enumerate().find_map(|(pos, layer)| {
            if layer.len() <= 1 {
                return None;
            }
            layer
                .channels()
                .iter()
                .copied()
                .find(|id| chans[id.0].tag() == ChanTag::A)
                .map(|id| (pos, id))
        });
        let Some((pos, id)) = next else { break };
        layers[pos].remove_channel(id);
        layers[pos].assign_alpha(chans, Some(id), false);
        insert_split_layer(chans, layers, pos, id);
    }
}
