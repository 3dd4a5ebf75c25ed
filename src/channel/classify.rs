//! Context-free classification of flat EXR channel names.
//!
//! A channel name is either one of the ten reserved single-word names, a top-level
//! "single" channel, or `layer.channel` where the channel part is the last dotted segment.

/// Names that are never a layer prefix.
pub const RESERVED_NAMES: [&str; 10] = ["R", "G", "B", "A", "Y", "RY", "BY", "AR", "AG", "AB"];

/// Role of a channel inside a layer. The declaration order is the in-layer sort order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum ChanTag {
    R,
    G,
    B,
    Y,
    RY,
    BY,
    A,
    AR,
    AG,
    AB,
    General,
}

impl ChanTag {
    pub fn is_general(self) -> bool {
        self == ChanTag::General
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ChannelType {
    Reserved,
    Single,
    Layer,
}

/// Split on the last dot. A dot at either end means there is no layer.
pub fn channel_parts(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos != 0 && pos != name.len() - 1 => (&name[..pos], &name[pos + 1..]),
        _ => ("", name),
    }
}

pub fn channel_type(name: &str) -> ChannelType {
    if RESERVED_NAMES.contains(&name) {
        ChannelType::Reserved
    } else if channel_parts(name).0.is_empty() {
        ChannelType::Single
    } else {
        ChannelType::Layer
    }
}

/// Layer prefix of a dotted name, `""` for single and reserved names.
pub fn layer_name(name: &str) -> &str {
    match channel_type(name) {
        ChannelType::Layer => channel_parts(name).0,
        ChannelType::Single | ChannelType::Reserved => "",
    }
}

pub fn channel_name(name: &str) -> &str {
    match channel_type(name) {
        ChannelType::Layer => channel_parts(name).1,
        ChannelType::Single | ChannelType::Reserved => name,
    }
}

/// Name under which a channel's layer is looked up while grouping.
///
/// Single channels form bracketed layers (`Z` lives in `[Z]`), matching the display name
/// such a one-channel layer ends up with.
pub fn layer_key(name: &str) -> String {
    match channel_type(name) {
        ChannelType::Layer => channel_parts(name).0.to_string(),
        ChannelType::Single => format!("[{name}]"),
        ChannelType::Reserved => name.to_string(),
    }
}

pub fn channel_tag(name: &str) -> ChanTag {
    let n = channel_name(name);
    let is = |synonyms: &[&str]| synonyms.iter().any(|s| n.eq_ignore_ascii_case(s));

    if is(&["r", "red"]) {
        ChanTag::R
    } else if is(&["g", "green"]) {
        ChanTag::G
    } else if is(&["b", "blue"]) {
        ChanTag::B
    } else if is(&["a", "alpha"]) {
        ChanTag::A
    } else {
        // luminance/chroma and coloured alpha are case sensitive: "ab" or "by" in
        // lower case are too common as ordinary pass names
        match n {
            "Y" => ChanTag::Y,
            "RY" => ChanTag::RY,
            "BY" => ChanTag::BY,
            "AR" => ChanTag::AR,
            "AG" => ChanTag::AG,
            "AB" => ChanTag::AB,
            _ => ChanTag::General,
        }
    }
}

/// Bump a trailing decimal number, or append `2` when there is none.
pub fn increment_text(text: &str) -> String {
    let digits = text
        .bytes()
        .rev()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits == 0 {
        return format!("{text}2");
    }

    let (base, num) = text.split_at(text.len() - digits);
    match num.parse::<u64>() {
        Ok(n) => format!("{base}{}", n + 1),
        // absurdly long digit runs: keep them and start a new counter
        Err(_) => format!("{text}2"),
    }
}

/// Next candidate name when `name` collides with an existing channel.
pub fn increment_name(name: &str) -> String {
    match channel_type(name) {
        ChannelType::Layer => {
            let (layer, chan) = channel_parts(name);
            format!("{}.{chan}", increment_text(layer))
        }
        ChannelType::Single => increment_text(name),
        ChannelType::Reserved => format!("layer1.{name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_last_dot_only() {
        assert_eq!(channel_parts("beauty.diffuse.R"), ("beauty.diffuse", "R"));
        assert_eq!(layer_name("beauty.diffuse.R"), "beauty.diffuse");
        assert_eq!(channel_name("beauty.diffuse.R"), "R");
        assert_eq!(channel_type("beauty.diffuse.R"), ChannelType::Layer);
    }

    #[test]
    fn edge_dots_mean_no_layer() {
        for n in [".R", "depth.", "."] {
            assert_eq!(channel_type(n), ChannelType::Single, "{n}");
            assert_eq!(layer_name(n), "");
            assert_eq!(channel_name(n), n);
        }
    }

    #[test]
    fn reserved_names_are_exact() {
        for n in RESERVED_NAMES {
            assert_eq!(channel_type(n), ChannelType::Reserved);
            assert_eq!(channel_name(n), n);
            assert_eq!(layer_name(n), "");
        }
        assert_eq!(channel_type("r"), ChannelType::Single);
        assert_eq!(channel_type("Z"), ChannelType::Single);
    }

    #[test]
    fn layer_names_reconstruct_the_input() {
        for n in ["a.b", "x.y.z", "light group.specular", "a..b", "cryptomatte00.R"] {
            assert_eq!(channel_type(n), ChannelType::Layer);
            assert_eq!(format!("{}.{}", layer_name(n), channel_name(n)), n);
        }
    }

    #[test]
    fn tags_follow_synonym_table() {
        assert_eq!(channel_tag("R"), ChanTag::R);
        assert_eq!(channel_tag("specular.red"), ChanTag::R);
        assert_eq!(channel_tag("specular.RED"), ChanTag::R);
        assert_eq!(channel_tag("g"), ChanTag::G);
        assert_eq!(channel_tag("x.Blue"), ChanTag::B);
        assert_eq!(channel_tag("beauty.Alpha"), ChanTag::A);
        assert_eq!(channel_tag("RY"), ChanTag::RY);
        assert_eq!(channel_tag("AB"), ChanTag::AB);
        assert_eq!(channel_tag("beauty.Z"), ChanTag::General);
        assert_eq!(channel_tag("uv.u"), ChanTag::General);
        assert_eq!(channel_tag("ry"), ChanTag::General);
    }

    #[test]
    fn layer_key_brackets_single_channels() {
        assert_eq!(layer_key("Z"), "[Z]");
        assert_eq!(layer_key("beauty.R"), "beauty");
        assert_eq!(layer_key("A"), "A");
    }

    #[test]
    fn increment_bumps_trailing_number() {
        assert_eq!(increment_text("layer"), "layer2");
        assert_eq!(increment_text("layer2"), "layer3");
        assert_eq!(increment_text("v09"), "v10");
        assert_eq!(increment_text("99"), "100");
    }

    #[test]
    fn increment_name_respects_channel_type() {
        assert_eq!(increment_name("beauty.R"), "beauty2.R");
        assert_eq!(increment_name("beauty2.R"), "beauty3.R");
        assert_eq!(increment_name("depth"), "depth2");
        assert_eq!(increment_name("R"), "layer1.R");
        assert_eq!(increment_name("layer1.R"), "layer2.R");
    }
}
