use bitflags::bitflags;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// The pipeline stage a profile targets.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub enum ShaderKind {
    Pixel,
    Vertex,
    Geometry,
    Hull,
    Domain,
    Compute,
    Library,
    Mesh,
    Amplification,
}

impl ShaderKind {
    /// The profile prefix, e.g. `ps` for pixel shaders.
    pub fn prefix(self) -> &'static str {
        match self {
            ShaderKind::Pixel => "ps",
            ShaderKind::Vertex => "vs",
            ShaderKind::Geometry => "gs",
            ShaderKind::Hull => "hs",
            ShaderKind::Domain => "ds",
            ShaderKind::Compute => "cs",
            ShaderKind::Library => "lib",
            ShaderKind::Mesh => "ms",
            ShaderKind::Amplification => "as",
        }
    }

    fn from_prefix(prefix: &str) -> Option<ShaderKind> {
        Some(match prefix {
            "ps" => ShaderKind::Pixel,
            "vs" => ShaderKind::Vertex,
            "gs" => ShaderKind::Geometry,
            "hs" => ShaderKind::Hull,
            "ds" => ShaderKind::Domain,
            "cs" => ShaderKind::Compute,
            "lib" => ShaderKind::Library,
            "ms" => ShaderKind::Mesh,
            "as" => ShaderKind::Amplification,
            _ => return None,
        })
    }

    /// Program kind code stored in the DXIL program header.
    pub fn program_kind(self) -> u32 {
        match self {
            ShaderKind::Pixel => 0,
            ShaderKind::Vertex => 1,
            ShaderKind::Geometry => 2,
            ShaderKind::Hull => 3,
            ShaderKind::Domain => 4,
            ShaderKind::Compute => 5,
            ShaderKind::Library => 6,
            ShaderKind::Mesh => 13,
            ShaderKind::Amplification => 14,
        }
    }

    /// Compute-like stages need `[numthreads]`.
    pub fn needs_thread_group(self) -> bool {
        matches!(
            self,
            ShaderKind::Compute | ShaderKind::Mesh | ShaderKind::Amplification
        )
    }
}

/// A shader model version, 6.0 through 6.8.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ShaderModel {
    pub major: u8,
    pub minor: u8,
}

impl ShaderModel {
    pub const MIN: ShaderModel = ShaderModel { major: 6, minor: 0 };
    pub const MAX: ShaderModel = ShaderModel { major: 6, minor: 8 };
}

impl Display for ShaderModel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// A `-T` target profile such as `ps_6_0`.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct TargetProfile {
    pub kind: ShaderKind,
    pub model: ShaderModel,
}

impl TargetProfile {
    pub fn new(kind: ShaderKind, model: ShaderModel) -> Self {
        Self { kind, model }
    }

    /// DXIL program version word: kind in the high half, model in the low byte.
    pub fn program_version(&self) -> u32 {
        (self.kind.program_kind() << 16) | ((self.model.major as u32) << 4) | self.model.minor as u32
    }
}

impl Display for TargetProfile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.kind.prefix(),
            self.model.major,
            self.model.minor
        )
    }
}

/// Failure to parse a target profile string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidProfile;

impl FromStr for TargetProfile {
    type Err = InvalidProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('_');
        let (Some(prefix), Some(major), Some(minor), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(InvalidProfile);
        };

        let kind = ShaderKind::from_prefix(prefix).ok_or(InvalidProfile)?;
        let major: u8 = major.parse().map_err(|_| InvalidProfile)?;
        let minor: u8 = minor.parse().map_err(|_| InvalidProfile)?;
        let model = ShaderModel { major, minor };

        if model < ShaderModel::MIN || model > ShaderModel::MAX {
            return Err(InvalidProfile);
        }

        // Mesh and amplification shaders appeared in 6.5, libraries in 6.3.
        let min_model = match kind {
            ShaderKind::Mesh | ShaderKind::Amplification => ShaderModel { major: 6, minor: 5 },
            ShaderKind::Library => ShaderModel { major: 6, minor: 3 },
            _ => ShaderModel::MIN,
        };
        if model < min_model {
            return Err(InvalidProfile);
        }

        Ok(TargetProfile { kind, model })
    }
}

/// Optimization level selected with `-O0` through `-O3`.
#[derive(Debug, Default, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptimizationLevel {
    O0,
    O1,
    O2,
    #[default]
    O3,
}

bitflags! {
    /// Boolean compile switches.
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct CompileFlags: u32 {
        /// `-Zi`: keep debug information.
        const DEBUG_INFO = 1 << 0;
        /// `-Qstrip_debug`: drop debug parts from the container.
        const STRIP_DEBUG = 1 << 1;
        /// `-Qstrip_reflect`: drop reflection parts from the container.
        const STRIP_REFLECTION = 1 << 2;
        /// `-WX`
        const WARNINGS_AS_ERRORS = 1 << 3;
        /// `-no-warnings`
        const NO_WARNINGS = 1 << 4;
        /// `-Od`
        const SKIP_OPTIMIZATIONS = 1 << 5;
        /// `-Vd`
        const SKIP_VALIDATION = 1 << 6;
        const ENABLE_16BIT_TYPES = 1 << 7;
        /// `-Zpr`
        const PACK_ROW_MAJOR = 1 << 8;
        /// `-Zpc`
        const PACK_COLUMN_MAJOR = 1 << 9;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_profiles() {
        let profile: TargetProfile = "ps_6_0".parse().unwrap();
        assert_eq!(profile.kind, ShaderKind::Pixel);
        assert_eq!(profile.model, ShaderModel { major: 6, minor: 0 });
        assert_eq!(profile.to_string(), "ps_6_0");

        let lib: TargetProfile = "lib_6_3".parse().unwrap();
        assert_eq!(lib.kind, ShaderKind::Library);
    }

    #[test]
    fn rejects_bad_profiles() {
        for bad in ["ps_5_0", "xs_6_0", "ps_6", "ps_6_0_1", "lib_6_1", "ms_6_4", "ps_6_9", ""] {
            assert!(bad.parse::<TargetProfile>().is_err(), "{bad}");
        }
    }

    #[test]
    fn program_version_layout() {
        let cs: TargetProfile = "cs_6_5".parse().unwrap();
        assert_eq!(cs.program_version(), (5 << 16) | 0x65);
    }
}
