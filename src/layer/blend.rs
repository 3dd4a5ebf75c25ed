use std::fmt;

macro_rules! blend_modes {
    ($($mode:ident),+ $(,)?) => {
        /// Layer transfer mode carried through the layer-string attribute.
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum BlendMode {
            #[default]
            $($mode),+
        }

        impl BlendMode {
            pub const ALL: &'static [BlendMode] = &[$(BlendMode::$mode),+];

            pub fn name(self) -> &'static str {
                match self {
                    $(BlendMode::$mode => stringify!($mode)),+
                }
            }

            /// Exact, case-sensitive lookup; unknown names give [`BlendMode::Normal`].
            pub fn from_name(name: &str) -> BlendMode {
                match name {
                    $(stringify!($mode) => BlendMode::$mode,)+
                    _ => BlendMode::Normal,
                }
            }
        }
    };
}

blend_modes!(
    Normal,
    Dissolve,
    Darken,
    Multiply,
    ColorBurn,
    LinearBurn,
    DarkerColor,
    Lighten,
    Screen,
    ColorDodge,
    LinearDodge,
    LighterColor,
    Overlay,
    SoftLight,
    HardLight,
    VividLight,
    LinearLight,
    PinLight,
    HardMix,
    Difference,
    Exclusion,
    Hue,
    Saturation,
    Color,
    Luminosity,
    DancingDissolve,
    ClassicColorBurn,
    Add,
    ClassicColorDodge,
    ClassicDifference,
    StencilAlpha,
    StencilLuma,
    SilhouetteAlpha,
    SilhouetteLuma,
    AlphaAdd,
    LuminescentPremul,
    Subtract,
    Divide,
);

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_mode_parses_back_from_its_name() {
        assert_eq!(BlendMode::ALL.len(), 38);
        for &mode in BlendMode::ALL {
            assert_eq!(BlendMode::from_name(&mode.to_string()), mode);
        }
    }

    #[test]
    fn unknown_names_fall_back_to_normal() {
        assert_eq!(BlendMode::from_name("multiply"), BlendMode::Normal);
        assert_eq!(BlendMode::from_name(""), BlendMode::Normal);
        assert_eq!(BlendMode::default(), BlendMode::Normal);
    }
}
