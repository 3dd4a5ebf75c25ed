//! The layer-string header attribute.
//!
//! ```text
//! beauty[visible:true, mode:Normal]{r:beauty.R, g:beauty.G, b:beauty.B, a:beauty.A}, "my mask"[visible:false, mode:Multiply, opacity:128]{r:mask.Y}
//! ```
//!
//! Layers are separated by commas outside quotes, brackets and braces. Layer names and channel
//! references are quoted when they contain a space, a quote, a backslash, `,`, `:` or a
//! bracket. Inside quoted text `"` and `\` are escaped with a backslash.

use crate::channel::classify::ChanTag;
use crate::channel::Channel;
use crate::foundation::error::{ExrLayersError, ExrLayersResult};

use super::{BlendMode, Layer, LayerProps};

/// Header attribute holding the encoded layer list.
pub const LAYERS_STRING_KEY: &str = "PSlayers";

const QUOTE_CHARS: &str = " \"\\,:[]{}";

/// One channel reference of a layer entry: `role:name`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelRef {
    pub role: char,
    pub name: String,
}

/// One decoded layer entry. Channel names are unresolved document channel names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerRecord {
    pub name: String,
    pub props: LayerProps,
    pub channels: Vec<ChannelRef>,
}

impl LayerRecord {
    /// Describe `layer`: its first A-tagged channel becomes `a`, the rest fill `r`, `g`, `b`
    /// and then `a` in order. A lone alpha of a normal layer is written as `r`.
    pub fn from_layer(layer: &Layer, chans: &[Channel]) -> Self {
        let mut red = None;
        let mut green = None;
        let mut blue = None;
        let mut alpha = None;
        for id in layer.channels() {
            let chan = &chans[id.0];
            if chan.tag() == ChanTag::A && alpha.is_none() {
                alpha = Some(chan.name());
            } else if red.is_none() {
                red = Some(chan.name());
            } else if green.is_none() {
                green = Some(chan.name());
            } else if blue.is_none() {
                blue = Some(chan.name());
            } else if alpha.is_none() {
                alpha = Some(chan.name());
            }
        }
        if alpha.is_some() && red.is_none() && !layer.props.adjustment_layer {
            red = alpha.take();
        }

        let channels = [('r', red), ('g', green), ('b', blue), ('a', alpha)]
            .into_iter()
            .filter_map(|(role, name)| {
                name.map(|n| ChannelRef {
                    role,
                    name: n.to_owned(),
                })
            })
            .collect();
        Self {
            name: layer.name(chans),
            props: layer.props,
            channels,
        }
    }

    pub fn encode(&self) -> String {
        let mut out = enquote_if_necessary(&self.name, QUOTE_CHARS);
        out.push_str("[visible:");
        out.push_str(if self.props.visible { "true" } else { "false" });
        out.push_str(", mode:");
        out.push_str(self.props.mode.name());
        if self.props.opacity != 255 {
            out.push_str(&format!(", opacity:{}", self.props.opacity));
        }
        if self.props.adjustment_layer {
            out.push_str(", adjustment_layer:true");
        }
        out.push_str("]{");
        for (i, chan) in self.channels.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push(chan.role);
            out.push(':');
            out.push_str(&enquote_if_necessary(&chan.name, QUOTE_CHARS));
        }
        out.push('}');
        out
    }

    /// Parse one `name[props]{channels}` entry.
    pub fn parse(entry: &str) -> ExrLayersResult<Self> {
        let parts = quoted_tokenize(entry, "[]{}")?;
        let [name, props, channels] = parts.as_slice() else {
            return Err(ExrLayersError::parse(format!(
                "layer entry '{entry}' does not have name, properties and channels"
            )));
        };

        let mut record = LayerRecord {
            name: dequote(name),
            props: LayerProps::default(),
            channels: Vec::new(),
        };

        for prop in quoted_tokenize(props, ", ")? {
            let kv = quoted_tokenize(&prop, ":")?;
            let [key, value] = kv.as_slice() else {
                continue;
            };
            match (key.as_str(), value.as_str()) {
                ("visible", "false") => record.props.visible = false,
                ("adjustment_layer", "true") => record.props.adjustment_layer = true,
                ("mode", mode) => record.props.mode = BlendMode::from_name(mode),
                ("opacity", opacity) => {
                    if let Ok(v) = opacity.trim().parse::<u8>() {
                        record.props.opacity = v;
                    }
                }
                _ => {}
            }
        }

        for part in quoted_tokenize(channels, ", ")? {
            let mut chars = part.chars();
            let (Some(role), Some(':')) = (chars.next(), chars.next()) else {
                return Err(ExrLayersError::parse(format!("bad channel reference '{part}'")));
            };
            let rest = chars.as_str();
            if rest.is_empty() {
                return Err(ExrLayersError::parse(format!("bad channel reference '{part}'")));
            }
            record.channels.push(ChannelRef {
                role,
                name: dequote(rest),
            });
        }
        Ok(record)
    }
}

/// Encode every layer, comma-separated.
pub fn encode_layers(layers: &[Layer], chans: &[Channel]) -> String {
    layers
        .iter()
        .map(|l| LayerRecord::from_layer(l, chans).encode())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Decode a whole attribute value. Entries that do not split into three parts are skipped;
/// a malformed entry fails the whole decode.
pub fn decode_layers(s: &str) -> ExrLayersResult<Vec<LayerRecord>> {
    split_layers_string(s)?
        .iter()
        .map(|entry| LayerRecord::parse(entry))
        .collect()
}

/// Split on commas outside quotes, brackets and braces, keeping only pieces with three parts.
pub fn split_layers_string(s: &str) -> ExrLayersResult<Vec<String>> {
    let bytes = s.as_bytes();
    let mut out = Vec::new();
    let mut in_quotes = false;
    let mut in_brackets = false;
    let mut in_braces = false;
    let mut begin = 0;

    let keep = |piece: &str, out: &mut Vec<String>| -> ExrLayersResult<()> {
        if quoted_tokenize(piece, "[]{}")?.len() == 3 {
            out.push(piece.to_owned());
        }
        Ok(())
    };

    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if in_quotes && c == b'\\' {
            i += 2;
            continue;
        }
        if c == b'"' {
            in_quotes = !in_quotes;
        } else if !in_quotes {
            match c {
                b'[' => in_brackets = true,
                b']' => in_brackets = false,
                b'{' => in_braces = true,
                b'}' => in_braces = false,
                b',' if !in_brackets && !in_braces => {
                    keep(&s[begin..i], &mut out)?;
                    let next = s[i..]
                        .find(|ch: char| ch != ',' && ch != ' ')
                        .map(|off| i + off);
                    match next {
                        Some(n) => {
                            begin = n;
                            i = n;
                            continue;
                        }
                        None => begin = bytes.len(),
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    if begin < bytes.len() {
        keep(&s[begin..], &mut out)?;
    }
    Ok(out)
}

/// Split on any of `delimiters`, ignoring delimiters inside double quotes. Inside quotes a
/// backslash escapes the next character.
///
/// Leading delimiters are skipped and runs of delimiters produce no empty tokens. Quotes stay
/// in the tokens. An unterminated quote is a parse error.
pub fn quoted_tokenize(s: &str, delimiters: &str) -> ExrLayersResult<Vec<String>> {
    let bytes = s.as_bytes();
    let is_delim = |b: u8| delimiters.as_bytes().contains(&b);
    let mut tokens = Vec::new();

    let mut i = 0;
    while i < bytes.len() && bytes[i] != b'"' && is_delim(bytes[i]) {
        i += 1;
    }
    let mut last = i;
    let mut in_quotes = false;

    while i < bytes.len() {
        let c = bytes[i];
        if in_quotes && c == b'\\' {
            i += 2;
            continue;
        }
        if c == b'"' {
            in_quotes = !in_quotes;
        } else if !in_quotes && is_delim(c) {
            tokens.push(s[last..i].to_owned());
            last = i + 1;
            while last < bytes.len() && bytes[last] != b'"' && is_delim(bytes[last]) {
                last += 1;
            }
            i = last;
            continue;
        }
        i += 1;
    }

    if in_quotes {
        return Err(ExrLayersError::parse(format!("unbalanced quote in '{s}'")));
    }
    if last < bytes.len() {
        tokens.push(s[last..].to_owned());
    }
    Ok(tokens)
}

pub fn enquote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

pub fn enquote_if_necessary(s: &str, quote_chars: &str) -> String {
    if s.chars().any(|c| quote_chars.contains(c)) {
        enquote(s)
    } else {
        s.to_owned()
    }
}

/// Strip the surrounding quotes of a quoted token and undo its backslash escapes. Unquoted
/// tokens are returned as they are.
pub fn dequote(s: &str) -> String {
    let Some(inner) = s.strip_prefix('"') else {
        return s.to_owned();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '"' => break,
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::PixelType;
    use crate::layer::ChannelId;

    fn record(name: &str, channels: &[(char, &str)]) -> LayerRecord {
        LayerRecord {
            name: name.to_owned(),
            props: LayerProps::default(),
            channels: channels
                .iter()
                .map(|(role, name)| ChannelRef {
                    role: *role,
                    name: (*name).to_owned(),
                })
                .collect(),
        }
    }

    #[test]
    fn encodes_minimal_entry() {
        let r = record("beauty", &[('r', "beauty.R"), ('g', "beauty.G")]);
        assert_eq!(r.encode(), "beauty[visible:true, mode:Normal]{r:beauty.R, g:beauty.G}");
    }

    #[test]
    fn awkward_names_survive_a_round_trip() {
        let mut tricky = record(
            "say \"hi\" [v2]{x}",
            &[('r', "a b.R"), ('g', "c,d:e"), ('a', "q\"uote")],
        );
        tricky.props = LayerProps {
            visible: false,
            mode: BlendMode::LinearDodge,
            opacity: 17,
            adjustment_layer: true,
        };
        let plain = record("plain", &[('r', "Z")]);
        let encoded = [tricky.encode(), plain.encode()].join(", ");
        let decoded = decode_layers(&encoded).unwrap();
        assert_eq!(decoded, vec![tricky, plain]);
    }

    #[test]
    fn separators_and_backslashes_in_layer_names_round_trip() {
        let names = ["a,b", "key:value", "a b\\", "C:\\renders\\", "back\\\"slash"];
        let records: Vec<_> = names
            .iter()
            .map(|n| record(n, &[('r', "x"), ('g', "dir\\y")]))
            .collect();
        let encoded = records
            .iter()
            .map(LayerRecord::encode)
            .collect::<Vec<_>>()
            .join(", ");
        assert!(encoded.starts_with("\"a,b\"[visible:true"));
        assert_eq!(decode_layers(&encoded).unwrap(), records);
    }

    #[test]
    fn quoted_text_escapes_backslashes() {
        assert_eq!(enquote("a b\\"), "\"a b\\\\\"");
        assert_eq!(dequote("\"a b\\\\\""), "a b\\");
        assert_eq!(
            quoted_tokenize("\"x\\\\\", y", ", ").unwrap(),
            vec!["\"x\\\\\"", "y"]
        );
    }

    #[test]
    fn tokenizer_respects_quotes_and_collapses_delimiters() {
        assert_eq!(
            quoted_tokenize(",, a,\"b, c\" ,,d", ", ").unwrap(),
            vec!["a", "\"b, c\"", "d"]
        );
        assert!(quoted_tokenize("\"open", ",").is_err());
    }

    #[test]
    fn split_skips_pieces_without_three_parts() {
        let s = "junk, a[visible:true, mode:Normal]{r:x}, b[visible:true]{r:y}";
        let pieces = split_layers_string(s).unwrap();
        assert_eq!(
            pieces,
            vec!["a[visible:true, mode:Normal]{r:x}", "b[visible:true]{r:y}"]
        );
    }

    #[test]
    fn bad_channel_part_is_a_parse_error() {
        let err = LayerRecord::parse("a[visible:true]{rx}").unwrap_err();
        assert!(matches!(err, ExrLayersError::Parse(_)));
        assert!(LayerRecord::parse("a[visible:true]{r:}").is_err());
    }

    #[test]
    fn out_of_range_opacity_is_ignored() {
        let r = LayerRecord::parse("a[visible:true, opacity:300, mode:Screen]{r:x}").unwrap();
        assert_eq!(r.props.opacity, 255);
        assert_eq!(r.props.mode, BlendMode::Screen);
    }

    #[test]
    fn dequote_handles_escapes() {
        assert_eq!(dequote("\"a \\\"b\\\"\""), "a \"b\"");
        assert_eq!(dequote("plain"), "plain");
    }

    #[test]
    fn record_from_layer_assigns_roles() {
        let chans: Vec<Channel> = ["m.A", "m.X", "m.Y2", "m.Z", "m.W"]
            .iter()
            .map(|n| Channel::new(*n, PixelType::Float))
            .collect();
        let mut layer = Layer::new();
        for i in 0..5 {
            layer.add_channel(ChannelId(i));
        }
        let rec = LayerRecord::from_layer(&layer, &chans);
        let roles: Vec<_> = rec.channels.iter().map(|c| (c.role, c.name.as_str())).collect();
        assert_eq!(
            roles,
            vec![('r', "m.X"), ('g', "m.Y2"), ('b', "m.Z"), ('a', "m.A")]
        );

        let mut alpha_only = Layer::new();
        alpha_only.add_channel(ChannelId(0));
        let rec = LayerRecord::from_layer(&alpha_only, &chans);
        assert_eq!(rec.channels[0].role, 'r');
        assert_eq!(rec.name, "m");
    }
}
