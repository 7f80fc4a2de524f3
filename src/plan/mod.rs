//! Plan files for the `txfs apply` command.
//!
//! A plan is a TOML document with one `[[step]]` table per operation:
//!
//! ```toml
//! [[step]]
//! op = "mkdir"
//! path = "out"
//!
//! [[step]]
//! op = "write"
//! path = "out/greeting.txt"
//! contents = "hello"
//!
//! [[step]]
//! op = "move"
//! from = "draft.txt"
//! to = "out/final.txt"
//! overwrite = true
//! ```
//!
//! Paths are relative to the directory containing the plan file.

pub mod preflight;

use crate::error::{Result, TxError};
use crate::fs::{Encoding, Operation};

use std::fs;
use std::path::{Component, Path, PathBuf};
use toml_edit::{DocumentMut, Item, Table};

/// One parsed `[[step]]`.
#[derive(Debug, Clone)]
pub struct Step {
    /// 1-based position in the plan.
    pub number: usize,
    pub operation: Operation,
}

#[derive(Debug, Clone)]
pub struct Plan {
    base: PathBuf,
    steps: Vec<Step>,
}

impl Plan {
    /// Reads and parses the plan at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            log::error!("Failed to read plan {}: {}", path.display(), e);
            TxError::Plan(format!("cannot read {}: {}", path.display(), e))
        })?;

        let absolute = std::path::absolute(path)?;
        let base = absolute
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Self::parse(&content, base)
    }

    /// Parses plan text, resolving paths against `base`.
    pub fn parse(content: &str, base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        let doc: DocumentMut = content.parse()?;

        let steps = match doc.get("step") {
            None => Vec::new(),
            Some(item) => {
                let tables = item.as_array_of_tables().ok_or_else(|| {
                    TxError::Plan("`step` must be an array of tables ([[step]])".to_string())
                })?;
                tables
                    .iter()
                    .enumerate()
                    .map(|(i, table)| parse_step(i + 1, table, &base))
                    .collect::<Result<Vec<_>>>()?
            }
        };

        log::debug!("Parsed {} step(s), base {}", steps.len(), base.display());
        Ok(Self { base, steps })
    }

    /// Directory the plan's relative paths are resolved against.
    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn into_steps(self) -> Vec<Step> {
        self.steps
    }
}

fn parse_step(number: usize, table: &Table, base: &Path) -> Result<Step> {
    let fields = StepFields { number, table, base };
    let op = fields.string("op")?;

    let operation = match op {
        "write" => Operation::WriteText {
            path: fields.path("path")?,
            contents: fields.string("contents")?.to_string(),
            encoding: fields.encoding()?,
        },
        "write-lines" => Operation::WriteLines {
            path: fields.path("path")?,
            lines: fields.lines()?,
            encoding: fields.encoding()?,
        },
        "append" => Operation::AppendText {
            path: fields.path("path")?,
            contents: fields.string("contents")?.to_string(),
            encoding: fields.encoding()?,
        },
        "append-lines" => Operation::AppendLines {
            path: fields.path("path")?,
            lines: fields.lines()?,
            encoding: fields.encoding()?,
        },
        "copy" => Operation::Copy {
            source: fields.path("from")?,
            destination: fields.path("to")?,
            overwrite: fields.flag("overwrite")?,
        },
        "move" => Operation::Move {
            source: fields.path("from")?,
            destination: fields.path("to")?,
            overwrite: fields.flag("overwrite")?,
        },
        "delete" => Operation::Delete {
            path: fields.path("path")?,
        },
        "mkdir" => Operation::CreateDirectory {
            path: fields.path("path")?,
        },
        "rmdir" => Operation::DeleteDirectory {
            path: fields.path("path")?,
        },
        "replace" => Operation::Replace {
            source: fields.path("from")?,
            destination: fields.path("to")?,
            destination_backup: fields.optional_path("backup")?,
        },
        "snapshot" => Operation::Snapshot {
            path: fields.path("path")?,
        },
        other => return Err(fields.error(format!("unknown op '{}'", other))),
    };

    let allowed = allowed_keys(op);
    for (key, _) in table.iter() {
        if key != "op" && !allowed.contains(&key) {
            return Err(fields.error(format!("unexpected key '{}' for op '{}'", key, op)));
        }
    }

    Ok(Step { number, operation })
}

fn allowed_keys(op: &str) -> &'static [&'static str] {
    match op {
        "write" | "append" => &["path", "contents", "encoding"],
        "write-lines" | "append-lines" => &["path", "lines", "encoding"],
        "copy" | "move" => &["from", "to", "overwrite"],
        "replace" => &["from", "to", "backup"],
        _ => &["path"],
    }
}

struct StepFields<'a> {
    number: usize,
    table: &'a Table,
    base: &'a Path,
}

impl<'a> StepFields<'a> {
    fn error(&self, message: String) -> TxError {
        TxError::Plan(format!("step {}: {}", self.number, message))
    }

    fn get(&self, key: &str) -> Option<&'a Item> {
        self.table.get(key)
    }

    fn string(&self, key: &str) -> Result<&'a str> {
        let item = self
            .get(key)
            .ok_or_else(|| self.error(format!("missing `{}`", key)))?;
        item.as_str()
            .ok_or_else(|| self.error(format!("`{}` must be a string", key)))
    }

    fn path(&self, key: &str) -> Result<PathBuf> {
        let raw = self.string(key)?;
        self.resolve(key, raw)
    }

    fn optional_path(&self, key: &str) -> Result<Option<PathBuf>> {
        match self.get(key) {
            None => Ok(None),
            Some(_) => self.path(key).map(Some),
        }
    }

    /// Plan paths must stay inside the plan directory.
    fn resolve(&self, key: &str, raw: &str) -> Result<PathBuf> {
        if raw.trim().is_empty() {
            return Err(self.error(format!("`{}` is empty", key)));
        }

        let path = Path::new(raw);
        if path.is_absolute() || path.has_root() {
            return Err(self.error(format!("`{}` must be relative: {}", key, raw)));
        }
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(self.error(format!("`{}` contains '..': {}", key, raw)));
        }

        Ok(self.base.join(path))
    }

    fn flag(&self, key: &str) -> Result<bool> {
        match self.get(key) {
            None => Ok(false),
            Some(item) => item
                .as_bool()
                .ok_or_else(|| self.error(format!("`{}` must be true or false", key))),
        }
    }

    fn lines(&self) -> Result<Vec<String>> {
        let array = self
            .get("lines")
            .ok_or_else(|| self.error("missing `lines`".to_string()))?
            .as_array()
            .ok_or_else(|| self.error("`lines` must be an array of strings".to_string()))?;

        array
            .iter()
            .map(|value| {
                value
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.error("`lines` must be an array of strings".to_string()))
            })
            .collect()
    }

    fn encoding(&self) -> Result<Encoding> {
        match self.get("encoding") {
            None => Ok(Encoding::default()),
            Some(item) => item
                .as_str()
                .ok_or_else(|| self.error("`encoding` must be a string".to_string()))?
                .parse::<Encoding>()
                .map_err(|e| self.error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::OperationKind;

    fn parse(content: &str) -> Result<Plan> {
        Plan::parse(content, "/plans")
    }

    #[test]
    fn test_parse_all_ops() {
        let plan = parse(
            r#"
[[step]]
op = "mkdir"
path = "out"

[[step]]
op = "write"
path = "out/a.txt"
contents = "hello"
encoding = "utf-16le"

[[step]]
op = "write-lines"
path = "out/b.txt"
lines = ["one", "two"]

[[step]]
op = "append"
path = "out/a.txt"
contents = "!"

[[step]]
op = "append-lines"
path = "out/b.txt"
lines = ["three"]

[[step]]
op = "copy"
from = "out/a.txt"
to = "out/c.txt"

[[step]]
op = "move"
from = "out/c.txt"
to = "out/d.txt"
overwrite = true

[[step]]
op = "replace"
from = "out/d.txt"
to = "out/b.txt"
backup = "out/b.bak"

[[step]]
op = "snapshot"
path = "notes.txt"

[[step]]
op = "delete"
path = "out/a.txt"

[[step]]
op = "rmdir"
path = "out"
"#,
        )
        .unwrap();

        let kinds: Vec<_> = plan.steps().iter().map(|s| s.operation.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                OperationKind::CreateDirectory,
                OperationKind::WriteText,
                OperationKind::WriteLines,
                OperationKind::AppendText,
                OperationKind::AppendLines,
                OperationKind::Copy,
                OperationKind::Move,
                OperationKind::Replace,
                OperationKind::Snapshot,
                OperationKind::Delete,
                OperationKind::DeleteDirectory,
            ]
        );
        assert_eq!(plan.steps()[0].number, 1);
        assert_eq!(plan.steps()[0].operation.target(), Path::new("/plans/out"));

        match &plan.steps()[1].operation {
            Operation::WriteText { encoding, .. } => assert_eq!(*encoding, Encoding::Utf16Le),
            other => panic!("unexpected {:?}", other),
        }
        match &plan.steps()[6].operation {
            Operation::Move { overwrite, .. } => assert!(*overwrite),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_empty_document_has_no_steps() {
        let plan = parse("").unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_unknown_op_rejected() {
        let err = parse("[[step]]\nop = \"chmod\"\npath = \"a\"\n").unwrap_err();
        assert!(err.to_string().contains("step 1: unknown op 'chmod'"));
    }

    #[test]
    fn test_missing_field_rejected() {
        let err = parse("[[step]]\nop = \"copy\"\nfrom = \"a\"\n").unwrap_err();
        assert!(err.to_string().contains("missing `to`"));
    }

    #[test]
    fn test_unexpected_key_rejected() {
        let err = parse("[[step]]\nop = \"delete\"\npath = \"a\"\noverwrite = true\n").unwrap_err();
        assert!(err.to_string().contains("unexpected key 'overwrite'"));
    }

    #[test]
    fn test_parent_dir_rejected() {
        let err = parse("[[step]]\nop = \"delete\"\npath = \"../escape\"\n").unwrap_err();
        assert!(err.to_string().contains("contains '..'"));
    }

    #[test]
    fn test_absolute_path_rejected() {
        let err = parse("[[step]]\nop = \"delete\"\npath = \"/etc/passwd\"\n").unwrap_err();
        assert!(err.to_string().contains("must be relative"));
    }

    #[test]
    fn test_bad_encoding_rejected() {
        let err =
            parse("[[step]]\nop = \"write\"\npath = \"a\"\ncontents = \"x\"\nencoding = \"latin1\"\n")
                .unwrap_err();
        assert!(err.to_string().contains("unsupported encoding"));
    }

    #[test]
    fn test_step_must_be_array_of_tables() {
        let err = parse("step = \"nope\"\n").unwrap_err();
        assert!(matches!(err, TxError::Plan(_)));
    }

    #[test]
    fn test_invalid_toml() {
        let err = parse("[[step]\n").unwrap_err();
        assert!(matches!(err, TxError::Toml(_)));
    }
}
