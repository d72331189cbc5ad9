use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, TmResult};
use crate::grammars::compiled::{CompileError, CompiledGrammar};

/// The declarative formats a grammar can be written in
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GrammarFormat {
    Yaml,
    Json,
    /// XML property list, usually a `.tmLanguage` file
    Plist,
}

impl GrammarFormat {
    /// Guess the format from the file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "yml" | "yaml" => Some(GrammarFormat::Yaml),
            "json" => Some(GrammarFormat::Json),
            "tmlanguage" | "plist" => Some(GrammarFormat::Plist),
            _ => None,
        }
    }
}

/// A number or a boolean: `applyEndPatternLast` and `disabled` are written both ways
/// in the wild and we keep whichever form the author used.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    Int(i64),
}

impl Flag {
    pub fn is_set(self) -> bool {
        match self {
            Flag::Bool(b) => b,
            Flag::Int(i) => i != 0,
        }
    }
}

/// Capture rules keyed by group index.
///
/// ```yaml
/// captures:
///   '1': { name: keyword.other.using.cs }
///   '2': { name: entity.name.type.namespace.cs }
/// ```
///
/// Keys are strings in JSON/plist but YAML authors often write bare integers,
/// so both are accepted. They are always written back as strings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Captures(pub BTreeMap<usize, RawRule>);

impl Captures {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn max_index(&self) -> Option<usize> {
        self.0.keys().next_back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&usize, &RawRule)> {
        self.0.iter()
    }
}

struct CaptureIndex(usize);

impl<'de> Deserialize<'de> for CaptureIndex {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct IndexVisitor;

        impl Visitor<'_> for IndexVisitor {
            type Value = CaptureIndex;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a capture group index")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                usize::try_from(v)
                    .map(CaptureIndex)
                    .map_err(|_| E::custom(format!("capture index {v} is too large")))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                usize::try_from(v)
                    .map(CaptureIndex)
                    .map_err(|_| E::custom(format!("invalid capture index {v}")))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.trim()
                    .parse()
                    .map(CaptureIndex)
                    .map_err(|_| E::custom(format!("invalid capture index '{v}'")))
            }
        }

        deserializer.deserialize_any(IndexVisitor)
    }
}

impl<'de> Deserialize<'de> for Captures {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct CapturesVisitor;

        impl<'de> Visitor<'de> for CapturesVisitor {
            type Value = Captures;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of capture index to rule")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut out = BTreeMap::new();
                while let Some((CaptureIndex(index), rule)) = map.next_entry::<_, RawRule>()? {
                    out.insert(index, rule);
                }
                Ok(Captures(out))
            }
        }

        deserializer.deserialize_map(CapturesVisitor)
    }
}

impl Serialize for Captures {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (index, rule) in &self.0 {
            map.serialize_entry(&index.to_string(), rule)?;
        }
        map.end()
    }
}

/// One node of the rule tree, as authored.
///
/// TextMate doesn't tag rule kinds: which keys are present decides what the rule is.
/// - `match` => single regex rule
/// - `begin` + `end` => multi-line span
/// - `begin` + `while` => span continuing while a condition holds on each line
/// - `include` => reference to another rule, everything else is ignored
/// - only `patterns` => a group flattened into its parent
/// - only `name` => scope-only capture
///
/// ```yaml
/// name: string.quoted.double.cs
/// begin: '"'
/// beginCaptures:
///   '0': { name: punctuation.definition.string.begin.cs }
/// end: '(")|((?:[^\\\n])$)'
/// endCaptures:
///   '1': { name: punctuation.definition.string.end.cs }
///   '2': { name: invalid.illegal.newline.cs }
/// patterns:
///   - include: '#string-character-escape'
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_name: Option<String>,
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(default, rename = "while", skip_serializing_if = "Option::is_none")]
    pub while_: Option<String>,
    #[serde(default, skip_serializing_if = "Captures::is_empty")]
    pub captures: Captures,
    #[serde(default, skip_serializing_if = "Captures::is_empty")]
    pub begin_captures: Captures,
    #[serde(default, skip_serializing_if = "Captures::is_empty")]
    pub end_captures: Captures,
    #[serde(default, skip_serializing_if = "Captures::is_empty")]
    pub while_captures: Captures,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_end_pattern_last: Option<Flag>,
    /// When `false`, an unterminated span is closed at the end of the line it started on
    /// instead of carrying over to the next one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applies_line_break: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<Flag>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<RawRule>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub repository: BTreeMap<String, RawRule>,
    /// Anything else the author wrote, `comment` usually
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RawRule {
    pub fn is_disabled(&self) -> bool {
        self.disabled.is_some_and(Flag::is_set)
    }
}

/// Top-level structure of a grammar source
///
/// ```yaml
/// name: C#
/// scopeName: source.cs
/// fileTypes: [cs]
/// uuid: f7de61e2-bdde-4e2a-a139-8221b179584e
/// patterns:
///   - include: '#preprocessor'
///   - include: '#comment'
/// repository:
///   comment:
///     patterns: [...]
/// ```
///
/// Field order is the order keys are written in when building artifacts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawGrammar {
    /// Only present in the JSON artifact
    #[serde(
        default,
        rename = "information_for_contributors",
        skip_serializing_if = "Option::is_none"
    )]
    pub information_for_contributors: Option<Vec<String>>,
    /// Only present in the JSON artifact: `https://<repo>/commit/<sha>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Human-readable name of the language
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Unique identifier for this grammar's scope, eg "source.cs"
    #[serde(default)]
    pub scope_name: String,
    /// File extensions this grammar applies to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_line_match: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folding_start_marker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folding_stop_marker: Option<String>,
    /// Root patterns, the active set when nothing else is
    #[serde(default)]
    pub patterns: Vec<RawRule>,
    /// Named rules that can be referenced by includes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub repository: BTreeMap<String, RawRule>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RawGrammar {
    pub fn from_str(content: &str, format: GrammarFormat) -> TmResult<Self> {
        let grammar = match format {
            GrammarFormat::Yaml => serde_yaml::from_str(content)?,
            GrammarFormat::Json => serde_json::from_str(content)?,
            GrammarFormat::Plist => plist::from_reader(std::io::Cursor::new(content.as_bytes()))?,
        };
        Ok(grammar)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> TmResult<Self> {
        let path = path.as_ref();
        let format = GrammarFormat::from_path(path)
            .ok_or_else(|| Error::UnsupportedFormat(path.to_path_buf()))?;
        let content = fs::read_to_string(path)?;
        Self::from_str(&content, format)
    }

    /// Compile this raw grammar into a validated, immutable grammar
    pub fn compile(&self) -> Result<CompiledGrammar, CompileError> {
        CompiledGrammar::from_raw_grammar(self)
    }
}
