//! Renders a [`SandboxSpec`] into the isolation engine's ini-like syntax.
//!
//! ```text
//! ; certbox sandbox configuration
//! [certbox_kbstar]
//! DisplayName=KB Kookmin Bank (certbox)
//! Service=kbstar
//! Url=https://obank.kbstar.com/
//! Certificate=1|CN=…|CN=…|01|2030-01-01T00:00:00Z|exact
//! MappedFile=/host/signCert.der|NPKI/1/signCert.der|ro
//! Launch=firefox|https://obank.kbstar.com/
//! ```
//!
//! Keys always appear in that order. Multi-field values are joined with `|`;
//! inside a field `\` and `|` are backslash-escaped. A value containing `;`,
//! `#`, `"`, `=` or surrounding whitespace is double-quoted with `"` escaped.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::SecondsFormat;

use super::SandboxSpec;

pub const HEADER: &str = "; certbox sandbox configuration";

/// Longest section name the engine accepts.
pub const MAX_SECTION_LEN: usize = 32;

/// Longest rendered value the engine accepts.
pub const MAX_VALUE_LEN: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("section name `{0}` must be 1-32 characters of A-Z, a-z, 0-9 or _")]
    InvalidSectionName(String),

    #[error("value of `{key}` is {len} characters long (limit {})", MAX_VALUE_LEN)]
    ValueTooLong { key: &'static str, len: usize },

    #[error("value of `{key}` contains a control character")]
    ControlCharacter { key: &'static str },

    #[error("host path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),
}

/// Renders a spec into configuration text. Rendering the same spec twice
/// yields the same text.
pub trait SandboxSpecSerializer: Send + Sync {
    fn serialize(&self, spec: &SandboxSpec) -> Result<String, SerializationError>;

    /// File extension of the rendered configuration.
    fn extension(&self) -> &'static str {
        "ini"
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IniRenderer;

impl SandboxSpecSerializer for IniRenderer {
    fn serialize(&self, spec: &SandboxSpec) -> Result<String, SerializationError> {
        check_section(&spec.box_name)?;

        let mut out = Section::new(&spec.box_name);
        out.entry("DisplayName", &[spec.name.as_str()])?;
        out.entry("Service", &[spec.service.id.as_str()])?;
        for url in &spec.service.urls {
            out.entry("Url", &[url.as_str()])?;
        }

        for (i, pair) in spec.certificates.iter().enumerate() {
            let index = (i + 1).to_string();
            let not_after = pair.not_after.to_rfc3339_opts(SecondsFormat::Secs, true);
            let confidence = pair.confidence.to_string();
            out.entry(
                "Certificate",
                &[
                    index.as_str(),
                    &pair.subject,
                    &pair.issuer,
                    &pair.serial,
                    &not_after,
                    &confidence,
                ],
            )?;
        }

        for mapping in &spec.mappings {
            let host = utf8(&mapping.host)?;
            let mode = if mapping.read_only { "ro" } else { "rw" };
            out.entry("MappedFile", &[host, mapping.sandbox.as_str(), mode])?;
        }

        for entry in &spec.launch {
            let mut fields: Vec<&str> = Vec::with_capacity(entry.args.len() + 1);
            fields.push(entry.command.as_str());
            fields.extend(entry.args.iter().map(String::as_str));
            out.entry("Launch", &fields)?;
        }

        Ok(out.finish())
    }
}

struct Section {
    text: String,
}

impl Section {
    fn new(name: &str) -> Self {
        let mut text = String::new();
        let _ = writeln!(text, "{}", HEADER);
        let _ = writeln!(text, "[{}]", name);
        Self { text }
    }

    fn entry(&mut self, key: &'static str, fields: &[&str]) -> Result<(), SerializationError> {
        if fields.iter().any(|f| f.chars().any(char::is_control)) {
            return Err(SerializationError::ControlCharacter { key });
        }

        let value = render_value(fields);
        let len = value.chars().count();
        if len > MAX_VALUE_LEN {
            return Err(SerializationError::ValueTooLong { key, len });
        }

        let _ = writeln!(self.text, "{}={}", key, value);
        Ok(())
    }

    fn finish(mut self) -> String {
        self.text.push('\n');
        self.text
    }
}

fn check_section(name: &str) -> Result<(), SerializationError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_SECTION_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SerializationError::InvalidSectionName(name.to_string()))
    }
}

fn utf8(path: &Path) -> Result<&str, SerializationError> {
    path.to_str()
        .ok_or_else(|| SerializationError::NonUtf8Path(path.to_path_buf()))
}

fn escape_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        if c == '\\' || c == '|' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn render_value(fields: &[&str]) -> String {
    let joined = fields
        .iter()
        .map(|f| escape_field(f))
        .collect::<Vec<_>>()
        .join("|");

    let needs_quotes = joined.contains([';', '#', '"', '='])
        || joined.starts_with(char::is_whitespace)
        || joined.ends_with(char::is_whitespace);
    if needs_quotes {
        format!("\"{}\"", joined.replace('"', "\\\""))
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::builder::tests::{layout, pair, service};
    use crate::spec::{SandboxSpecBuilder, SpecAssembler, UserSelections};

    fn sample() -> SandboxSpec {
        let pairs = vec![pair("alice", "aaaaaaaa")];
        SpecAssembler::new(layout())
            .build(&service(true), &pairs, &UserSelections::default())
            .unwrap()
    }

    #[test]
    fn test_renders_keys_in_fixed_order() {
        let text = IniRenderer.serialize(&sample()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[1], "[certbox_kb_star]");
        assert_eq!(lines[2], "DisplayName=KB Kookmin Bank (certbox)");
        assert_eq!(lines[3], "Service=kb-star");
        assert_eq!(lines[4], "Url=https://obank.kbstar.com/");
        assert_eq!(lines[5], "Url=https://www.kbstar.com/");
        assert_eq!(
            lines[6],
            "Certificate=\"1|CN=alice|CN=yessignCA|01|2030-01-01T00:00:00Z|exact\""
        );
        assert_eq!(
            lines[7],
            "MappedFile=/home/user/NPKI/yessign/USER/alice/signCert.der|NPKI/1/signCert.der|ro"
        );
        assert_eq!(
            lines[8],
            "MappedFile=/home/user/NPKI/yessign/USER/alice/signPri.key|NPKI/1/signPri.key|ro"
        );
        assert_eq!(lines[9], "MappedFile=/srv/tools/astx.exe|Tools/astx.exe|ro");
        assert_eq!(lines[10], "MappedFile=/srv/tools/delfino.exe|Tools/delfino.exe|ro");
        assert_eq!(lines[11], "Launch=Tools/astx.exe|/silent");
        assert_eq!(
            lines[12],
            "Launch=firefox|https://obank.kbstar.com/|https://www.kbstar.com/"
        );
        assert_eq!(lines.len(), 14);
        assert_eq!(lines[13], "");
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn test_serialize_is_idempotent() {
        let spec = sample();
        assert_eq!(
            IniRenderer.serialize(&spec).unwrap(),
            IniRenderer.serialize(&spec).unwrap()
        );
    }

    #[test]
    fn test_field_escaping_and_quoting() {
        assert_eq!(render_value(&["a|b", "c\\d"]), "a\\|b|c\\\\d");
        assert_eq!(render_value(&["say \"hi\""]), "\"say \\\"hi\\\"\"");
        assert_eq!(render_value(&["x=1"]), "\"x=1\"");
        assert_eq!(render_value(&["#tag"]), "\"#tag\"");
        assert_eq!(render_value(&[" padded"]), "\" padded\"");
        assert_eq!(render_value(&["C:/Program Files/x"]), "C:/Program Files/x");
    }

    #[test]
    fn test_invalid_section_names() {
        let mut spec = sample();
        let too_long = "x".repeat(33);
        for name in ["", "has-dash", too_long.as_str()] {
            spec.box_name = name.to_string();
            assert!(matches!(
                IniRenderer.serialize(&spec),
                Err(SerializationError::InvalidSectionName(_))
            ));
        }
        spec.box_name = "x".repeat(32);
        assert!(IniRenderer.serialize(&spec).is_ok());
    }

    #[test]
    fn test_value_limits() {
        let mut spec = sample();
        spec.name = "n".repeat(MAX_VALUE_LEN + 1);
        assert!(matches!(
            IniRenderer.serialize(&spec),
            Err(SerializationError::ValueTooLong {
                key: "DisplayName",
                ..
            })
        ));

        let mut spec = sample();
        spec.launch[0].args.push("line\nbreak".to_string());
        assert!(matches!(
            IniRenderer.serialize(&spec),
            Err(SerializationError::ControlCharacter { key: "Launch" })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_host_path() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let mut spec = sample();
        spec.mappings[0].host = PathBuf::from(OsStr::from_bytes(b"/tmp/\xff.der"));
        assert!(matches!(
            IniRenderer.serialize(&spec),
            Err(SerializationError::NonUtf8Path(_))
        ));
    }
}
