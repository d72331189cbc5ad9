//! Packages a grammar source into the files editors load: a property list for
//! TextMate-like hosts, JSON for VS Code and CSON for Atom.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, TmResult};
use crate::grammars::RawGrammar;

mod cson;

pub use cson::to_cson;

/// Which artifact to produce
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum Target {
    /// XML property list (`.tmLanguage`)
    Plist,
    /// JSON with the source revision (`.tmLanguage.json`)
    Json,
    /// CSON (`.cson`)
    Cson,
}

impl Target {
    /// Name of the artifact for a grammar whose source file is `<stem>.<anything>`
    pub fn file_name(self, stem: &str) -> String {
        match self {
            Target::Plist => format!("{stem}.tmLanguage"),
            Target::Json => format!("{stem}.tmLanguage.json"),
            Target::Cson => format!("{stem}.cson"),
        }
    }
}

/// Where the grammar source comes from, recorded in the JSON artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRevision {
    repository: String,
    commit: String,
}

impl SourceRevision {
    /// `repository` is a host and path like `github.com/dotnet/csharp-tmLanguage`,
    /// `commit` a full 40 characters hex sha.
    pub fn new(repository: impl Into<String>, commit: impl Into<String>) -> TmResult<Self> {
        let commit = commit.into().trim().to_ascii_lowercase();
        if commit.len() != 40 || !commit.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidCommit(commit));
        }

        let repository = repository.into();
        let repository = repository
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .trim_end_matches(".git")
            .to_string();

        Ok(Self { repository, commit })
    }

    /// Reads the commit currently checked out in the git repository containing `dir`
    pub fn from_git(repository: impl Into<String>, dir: &Path) -> TmResult<Self> {
        const COMMAND: &str = "git rev-parse HEAD";

        let output = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(dir)
            .output()
            .map_err(|err| Error::ExternalCommand {
                command: COMMAND.to_string(),
                message: err.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::ExternalCommand {
                command: COMMAND.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Self::new(repository, String::from_utf8_lossy(&output.stdout))
    }

    pub fn commit(&self) -> &str {
        &self.commit
    }

    /// `https://<repository>/commit/<sha>`
    pub fn version_url(&self) -> String {
        format!("https://{}/commit/{}", self.repository, self.commit)
    }

    fn contributor_notes(&self) -> Vec<String> {
        vec![
            format!(
                "This file has been converted from https://{}",
                self.repository
            ),
            "If you want to provide a fix or improvement, please create a pull request against the original repository.".to_string(),
            "Once accepted there, we are happy to receive an update request.".to_string(),
        ]
    }
}

/// Where and how to write artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub out_dir: PathBuf,
    /// Required for [`Target::Json`], ignored otherwise
    pub revision: Option<SourceRevision>,
}

impl BuildOptions {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            revision: None,
        }
    }

    pub fn revision(mut self, revision: SourceRevision) -> Self {
        self.revision = Some(revision);
        self
    }
}

/// Serializes a grammar for the given target.
///
/// The JSON artifact drops `uuid` and `fileTypes` and starts with
/// `information_for_contributors` and `version`; the other two keep every key.
pub fn transform(
    grammar: &RawGrammar,
    target: Target,
    revision: Option<&SourceRevision>,
) -> TmResult<Vec<u8>> {
    let mut out = Vec::new();

    match target {
        Target::Plist => {
            plist::to_writer_xml(&mut out, grammar)?;
            out.push(b'\n');
        }
        Target::Json => {
            let revision = revision.ok_or(Error::MissingRevision)?;
            let mut grammar = grammar.clone();
            grammar.uuid = None;
            grammar.file_types.clear();
            grammar.information_for_contributors = Some(revision.contributor_notes());
            grammar.version = Some(revision.version_url());
            serde_json::to_writer_pretty(&mut out, &grammar)?;
            out.push(b'\n');
        }
        Target::Cson => {
            let value = serde_json::to_value(grammar)?;
            out.extend_from_slice(to_cson(&value).as_bytes());
        }
    }

    Ok(out)
}

/// `csharp.tmLanguage.yml` -> `csharp`
fn source_stem(input: &Path) -> String {
    input
        .file_name()
        .map(|name| name.to_string_lossy())
        .and_then(|name| name.split('.').next().map(str::to_string))
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "grammar".to_string())
}

/// Reads the grammar at `input`, transforms it and writes the artifact in the output
/// directory, creating it if needed. Returns the path of the artifact.
///
/// The artifact is written to a temporary file first and only moved in place once
/// complete, so a failure never leaves a truncated file behind.
pub fn build(input: &Path, target: Target, options: &BuildOptions) -> TmResult<PathBuf> {
    let grammar = RawGrammar::load_from_file(input)?;
    let content = transform(&grammar, target, options.revision.as_ref())?;

    fs::create_dir_all(&options.out_dir)?;
    let destination = options.out_dir.join(target.file_name(&source_stem(input)));

    let mut file = tempfile::NamedTempFile::new_in(&options.out_dir)?;
    file.write_all(&content)?;
    file.as_file().sync_all()?;
    file.persist(&destination)?;

    #[cfg(feature = "debug")]
    log::info!("[build] wrote {}", destination.display());

    Ok(destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammars::GrammarFormat;

    const FIXTURE: &str = "src/fixtures/grammars/csharp.tmLanguage.yml";
    const SHA: &str = "0123456789abcdef0123456789abcdef01234567";

    fn fixture() -> RawGrammar {
        RawGrammar::load_from_file(FIXTURE).unwrap()
    }

    fn revision() -> SourceRevision {
        SourceRevision::new("github.com/example/csharp-grammar", SHA).unwrap()
    }

    #[test]
    fn plist_artifact_round_trips() {
        let grammar = fixture();
        let bytes = transform(&grammar, Target::Plist, None).unwrap();
        let back =
            RawGrammar::from_str(std::str::from_utf8(&bytes).unwrap(), GrammarFormat::Plist)
                .unwrap();
        assert_eq!(back, grammar);
        assert!(back.uuid.is_some());
        assert!(!back.file_types.is_empty());
    }

    #[test]
    fn json_artifact_round_trips_rule_tree() {
        let grammar = fixture();
        let bytes = transform(&grammar, Target::Json, Some(&revision())).unwrap();
        let back =
            RawGrammar::from_str(std::str::from_utf8(&bytes).unwrap(), GrammarFormat::Json)
                .unwrap();

        assert_eq!(back.scope_name, grammar.scope_name);
        assert_eq!(back.patterns, grammar.patterns);
        assert_eq!(back.repository, grammar.repository);
        assert_eq!(back.uuid, None);
        assert!(back.file_types.is_empty());
        assert_eq!(
            back.version.as_deref(),
            Some("https://github.com/example/csharp-grammar/commit/0123456789abcdef0123456789abcdef01234567")
        );
        assert_eq!(back.information_for_contributors.map(|v| v.len()), Some(3));
    }

    #[test]
    fn json_artifact_starts_with_revision_info() {
        let bytes = transform(&fixture(), Target::Json, Some(&revision())).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let info = text.find("\"information_for_contributors\"").unwrap();
        let version = text.find("\"version\"").unwrap();
        let scope = text.find("\"scopeName\"").unwrap();
        assert!(info < version && version < scope);
    }

    #[test]
    fn json_artifact_needs_a_revision() {
        let err = transform(&fixture(), Target::Json, None).unwrap_err();
        assert!(matches!(err, Error::MissingRevision));
    }

    #[test]
    fn cson_artifact_keeps_the_same_content() {
        let grammar = fixture();
        let bytes = transform(&grammar, Target::Cson, None).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("'name': 'C#'\n'scopeName': 'source.cs'\n"));
        assert!(text.contains("'repository':\n"));
    }

    #[test]
    fn rejects_short_or_non_hex_commits() {
        assert!(matches!(
            SourceRevision::new("github.com/a/b", "abc123"),
            Err(Error::InvalidCommit(_))
        ));
        assert!(matches!(
            SourceRevision::new("github.com/a/b", "z".repeat(40)),
            Err(Error::InvalidCommit(_))
        ));
    }

    #[test]
    fn normalizes_repository() {
        let revision = SourceRevision::new("https://github.com/a/b.git/", SHA.to_uppercase()).unwrap();
        assert_eq!(revision.version_url(), format!("https://github.com/a/b/commit/{SHA}"));
    }

    #[test]
    fn artifact_names_follow_source_stem() {
        assert_eq!(source_stem(Path::new("grammars/csharp.tmLanguage.yml")), "csharp");
        assert_eq!(Target::Plist.file_name("csharp"), "csharp.tmLanguage");
        assert_eq!(Target::Json.file_name("csharp"), "csharp.tmLanguage.json");
        assert_eq!(Target::Cson.file_name("csharp"), "csharp.cson");
    }

    #[test]
    fn build_writes_into_a_new_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("grammars");
        let options = BuildOptions::new(&out_dir).revision(revision());

        for target in [Target::Plist, Target::Json, Target::Cson] {
            let path = build(Path::new(FIXTURE), target, &options).unwrap();
            assert_eq!(path, out_dir.join(target.file_name("csharp")));
            assert!(fs::metadata(&path).unwrap().len() > 0);
        }
        // Only the artifacts, no leftover temporary files
        assert_eq!(fs::read_dir(&out_dir).unwrap().count(), 3);
    }

    #[test]
    fn failed_build_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("out");
        let options = BuildOptions::new(&out_dir);

        let err = build(Path::new(FIXTURE), Target::Json, &options).unwrap_err();
        assert!(matches!(err, Error::MissingRevision));
        assert!(!out_dir.join("csharp.tmLanguage.json").exists());

        let missing = build(Path::new("does/not/exist.yml"), Target::Plist, &options);
        assert!(matches!(missing, Err(Error::Io(_))));
    }
}
