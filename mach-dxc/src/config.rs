use crate::enums::{CompileFlags, OptimizationLevel, TargetProfile};
use crate::logger::DiagnosticLog;
use crate::diagnostic::Severity;
use std::path::PathBuf;

/// Source name used in diagnostics when the arguments do not name one.
pub const DEFAULT_SOURCE_NAME: &str = "hlsl.hlsl";

/// A `-D` or `-U` argument, in command-line order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacroDefinition {
    Define { name: String, value: Option<String> },
    Undefine(String),
}

/// Options for one compile, parsed from the argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    pub entry_point: String,
    /// Required; `None` only when `-T` was missing, which is reported as an error.
    pub profile: Option<TargetProfile>,
    pub macros: Vec<MacroDefinition>,
    pub include_dirs: Vec<PathBuf>,
    pub optimization: OptimizationLevel,
    pub flags: CompileFlags,
    /// Value of `__HLSL_VERSION`.
    pub hlsl_version: u32,
    pub source_name: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            entry_point: String::from("main"),
            profile: None,
            macros: Vec::new(),
            include_dirs: Vec::new(),
            optimization: OptimizationLevel::O3,
            flags: CompileFlags::empty(),
            hlsl_version: 2021,
            source_name: String::from(DEFAULT_SOURCE_NAME),
        }
    }
}

/// Options taking a value, either joined (`-Emain`) or separate (`-E main`).
const VALUE_OPTIONS: &[&str] = &["-HV", "-E", "-T", "-D", "-U", "-I"];

impl CompileOptions {
    /// Parses dxc-style arguments. Later arguments override earlier ones.
    ///
    /// Problems are reported to `diags` as errors; the returned options are still usable for
    /// anything that parsed.
    pub fn from_args<S: AsRef<str>>(args: &[S], diags: &mut DiagnosticLog) -> CompileOptions {
        let mut options = CompileOptions::default();
        let mut args = args.iter().map(|arg| arg.as_ref());

        while let Some(arg) = args.next() {
            if options.apply_switch(arg) {
                continue;
            }

            if let Some(&option) = VALUE_OPTIONS.iter().find(|o| arg.starts_with(**o)) {
                let joined = &arg[option.len()..];
                let value = if !joined.is_empty() {
                    joined
                } else if let Some(value) = args.next() {
                    value
                } else {
                    diags.report(
                        Severity::Error,
                        None,
                        format!("missing argument to '{option}'"),
                    );
                    continue;
                };

                options.apply_value(option, value, diags);
                continue;
            }

            if arg.starts_with('-') {
                diags.report(Severity::Error, None, format!("unknown argument: '{arg}'"));
            } else {
                options.source_name = arg.to_owned();
            }
        }

        if options.flags.contains(CompileFlags::WARNINGS_AS_ERRORS | CompileFlags::NO_WARNINGS) {
            diags.report(
                Severity::Error,
                None,
                "argument '-WX' conflicts with '-no-warnings'",
            );
        }

        if options.profile.is_none() {
            diags.report(Severity::Error, None, "target profile is required (-T)");
        }

        options
    }

    fn apply_switch(&mut self, arg: &str) -> bool {
        let flag = match arg {
            "-Zi" => CompileFlags::DEBUG_INFO,
            "-Qstrip_debug" => CompileFlags::STRIP_DEBUG,
            "-Qstrip_reflect" => CompileFlags::STRIP_REFLECTION,
            "-WX" => CompileFlags::WARNINGS_AS_ERRORS,
            "-no-warnings" => CompileFlags::NO_WARNINGS,
            "-Vd" => CompileFlags::SKIP_VALIDATION,
            "-enable-16bit-types" => CompileFlags::ENABLE_16BIT_TYPES,
            "-Zpr" => {
                self.flags.remove(CompileFlags::PACK_COLUMN_MAJOR);
                CompileFlags::PACK_ROW_MAJOR
            }
            "-Zpc" => {
                self.flags.remove(CompileFlags::PACK_ROW_MAJOR);
                CompileFlags::PACK_COLUMN_MAJOR
            }
            "-Od" => CompileFlags::SKIP_OPTIMIZATIONS,
            "-O0" | "-O1" | "-O2" | "-O3" => {
                self.optimization = match arg {
                    "-O0" => OptimizationLevel::O0,
                    "-O1" => OptimizationLevel::O1,
                    "-O2" => OptimizationLevel::O2,
                    _ => OptimizationLevel::O3,
                };
                self.flags.remove(CompileFlags::SKIP_OPTIMIZATIONS);
                return true;
            }
            _ => return false,
        };

        self.flags.insert(flag);
        true
    }

    fn apply_value(&mut self, option: &str, value: &str, diags: &mut DiagnosticLog) {
        match option {
            "-E" => self.entry_point = value.to_owned(),
            "-T" => match value.parse::<TargetProfile>() {
                Ok(profile) => self.profile = Some(profile),
                Err(_) => diags.report(
                    Severity::Error,
                    None,
                    format!("unknown target profile '{value}'"),
                ),
            },
            "-D" => {
                let (name, value) = match value.split_once('=') {
                    Some((name, value)) => (name, Some(value.to_owned())),
                    None => (value, None),
                };
                if !is_identifier(name) {
                    diags.report(
                        Severity::Error,
                        None,
                        format!("macro name must be an identifier in '-D{name}'"),
                    );
                    return;
                }
                self.macros.push(MacroDefinition::Define {
                    name: name.to_owned(),
                    value,
                });
            }
            "-U" => self.macros.push(MacroDefinition::Undefine(value.to_owned())),
            "-I" => self.include_dirs.push(PathBuf::from(value)),
            "-HV" => match value {
                "2016" | "2017" | "2018" | "2021" => {
                    self.hlsl_version = value.parse().unwrap_or(2021)
                }
                _ => diags.report(
                    Severity::Error,
                    None,
                    format!("unsupported HLSL version '{value}'"),
                ),
            },
            _ => unreachable!("unhandled value option {option}"),
        }
    }

    /// Whether the backend should run its transform passes.
    pub fn optimizations_enabled(&self) -> bool {
        self.optimization != OptimizationLevel::O0
            && !self.flags.contains(CompileFlags::SKIP_OPTIMIZATIONS)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::ShaderKind;

    fn parse(args: &[&str]) -> (CompileOptions, DiagnosticLog) {
        let mut diags = DiagnosticLog::new();
        let options = CompileOptions::from_args(args, &mut diags);
        (options, diags)
    }

    #[test]
    fn parses_joined_and_separate_values() {
        let (options, diags) = parse(&["-E", "PSMain", "-Tps_6_0", "-DA=1", "-D", "B", "-Iinc"]);
        assert!(!diags.has_errors());
        assert_eq!(options.entry_point, "PSMain");
        assert_eq!(options.profile.unwrap().kind, ShaderKind::Pixel);
        assert_eq!(
            options.macros,
            vec![
                MacroDefinition::Define {
                    name: "A".into(),
                    value: Some("1".into())
                },
                MacroDefinition::Define {
                    name: "B".into(),
                    value: None
                },
            ]
        );
        assert_eq!(options.include_dirs, vec![PathBuf::from("inc")]);
    }

    #[test]
    fn later_arguments_win() {
        let (options, _) = parse(&["-T", "ps_6_0", "-E", "a", "-E", "b", "-Od", "-O2"]);
        assert_eq!(options.entry_point, "b");
        assert!(options.optimizations_enabled());

        let (options, _) = parse(&["-T", "ps_6_0", "-O2", "-Od"]);
        assert!(!options.optimizations_enabled());
    }

    #[test]
    fn reports_argument_errors() {
        let (_, diags) = parse(&["-T", "ps_6_0", "-bogus"]);
        let text = diags.finish().unwrap();
        assert!(text.as_str().contains("unknown argument: '-bogus'"));

        let (_, diags) = parse(&["-T", "ps_6_0", "-E"]);
        assert!(diags.finish().unwrap().as_str().contains("missing argument to '-E'"));

        let (_, diags) = parse(&["-T", "ps_6_0", "-WX", "-no-warnings"]);
        assert!(diags.has_errors());
    }

    #[test]
    fn profile_is_required() {
        let (options, diags) = parse(&[]);
        assert_eq!(options.entry_point, "main");
        assert!(diags.finish().unwrap().as_str().contains("target profile is required"));
    }

    #[test]
    fn positional_names_the_source() {
        let (options, _) = parse(&["shaders/blit.hlsl", "-T", "vs_6_0"]);
        assert_eq!(options.source_name, "shaders/blit.hlsl");
    }
}
