// src/repository/desc.rs

//! `desc` and `files` record grammar
//!
//! Both records are sequences of `%TAG%` blocks, one value per line, each
//! block terminated by an empty line. Unknown tags are ignored on read.

use crate::error::{Error, Result};
use crate::packages::PackageMetadata;
use crate::version::PackageVersion;
use std::collections::HashMap;

/// File name of the metadata record inside a store entry
pub const DESC_RECORD: &str = "desc";

/// File name of the file-manifest record inside a store entry
pub const FILES_RECORD: &str = "files";

fn push_block(out: &mut String, tag: &str, values: &[&str]) {
    out.push('%');
    out.push_str(tag);
    out.push_str("%\n");
    for value in values {
        out.push_str(value);
        out.push('\n');
    }
    out.push('\n');
}

fn push_list(out: &mut String, tag: &str, values: &[String]) {
    if !values.is_empty() {
        let values: Vec<&str> = values.iter().map(String::as_str).collect();
        push_block(out, tag, &values);
    }
}

/// Render the `desc` record for an artifact
pub fn write_desc(filename: &str, meta: &PackageMetadata) -> String {
    let mut out = String::new();
    let version = meta.version.canonical();
    let csize = meta.compressed_size.to_string();
    let installed = meta.installed_size.to_string();
    let build_date = meta.build_date.to_string();

    push_block(&mut out, "FILENAME", &[filename]);
    push_block(&mut out, "NAME", &[meta.name.as_str()]);
    push_block(&mut out, "BASE", &[meta.base.as_str()]);
    push_block(&mut out, "VERSION", &[version.as_str()]);
    push_block(&mut out, "DESC", &[meta.description.as_str()]);
    push_list(&mut out, "GROUPS", &meta.groups);
    push_block(&mut out, "CSIZE", &[csize.as_str()]);
    push_block(&mut out, "ISIZE", &[installed.as_str()]);
    push_block(&mut out, "MD5SUM", &[meta.md5sum.as_str()]);
    push_block(&mut out, "SHA256SUM", &[meta.sha256sum.as_str()]);
    if let Some(url) = &meta.url {
        push_block(&mut out, "URL", &[url.as_str()]);
    }
    push_block(&mut out, "ARCH", &[meta.architecture.as_str()]);
    push_block(&mut out, "BUILDDATE", &[build_date.as_str()]);
    push_block(&mut out, "PACKAGER", &[meta.packager.as_str()]);
    push_list(&mut out, "REPLACES", &meta.replaces);
    push_list(&mut out, "DEPENDS", &meta.depends);

    out
}

/// Render the `files` record for a manifest
pub fn write_files(files: &[String]) -> String {
    let mut out = String::from("%FILES%\n");
    for file in files {
        out.push_str(file);
        out.push('\n');
    }
    out
}

/// Split a record into its `%TAG%` blocks
///
/// A tag line is only recognised at the start of a block, so values that
/// happen to look like `%TAG%` are kept as values.
fn parse_fields(content: &str) -> HashMap<String, Vec<String>> {
    let mut fields = HashMap::new();
    let mut current: Option<(String, Vec<String>)> = None;

    for line in content.lines() {
        let line = line.trim_end_matches('\r');

        if line.is_empty() {
            if let Some((tag, values)) = current.take() {
                fields.insert(tag, values);
            }
            continue;
        }

        match &mut current {
            Some((_, values)) => values.push(line.to_string()),
            None => {
                if line.len() > 2 && line.starts_with('%') && line.ends_with('%') {
                    current = Some((line[1..line.len() - 1].to_string(), Vec::new()));
                }
            }
        }
    }

    if let Some((tag, values)) = current {
        fields.insert(tag, values);
    }

    fields
}

struct Fields<'a> {
    entry: &'a str,
    fields: HashMap<String, Vec<String>>,
}

impl Fields<'_> {
    fn malformed(&self, reason: String) -> Error {
        Error::MalformedDescriptor {
            entry: self.entry.to_string(),
            reason,
        }
    }

    fn first(&self, tag: &str) -> Option<String> {
        self.fields.get(tag).and_then(|v| v.first()).cloned()
    }

    fn required(&self, tag: &str) -> Result<String> {
        self.first(tag)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| self.malformed(format!("missing %{}% field", tag)))
    }

    fn number(&self, tag: &str) -> Result<u64> {
        match self.first(tag) {
            None => Ok(0),
            Some(v) => v
                .parse()
                .map_err(|_| self.malformed(format!("invalid %{}% value '{}'", tag, v))),
        }
    }

    fn list(&mut self, tag: &str) -> Vec<String> {
        self.fields.remove(tag).unwrap_or_default()
    }
}

/// A parsed `desc` record
#[derive(Debug, Clone, PartialEq)]
pub struct DescRecord {
    pub filename: String,
    pub metadata: PackageMetadata,
}

/// Parse a `desc` record
///
/// `%FILENAME%`, `%NAME%` and `%VERSION%` are required; numeric tags must
/// parse when present. Other absent tags take empty defaults.
pub fn parse_desc(entry: &str, content: &str) -> Result<DescRecord> {
    let mut fields = Fields {
        entry,
        fields: parse_fields(content),
    };

    let filename = fields.required("FILENAME")?;
    let name = fields.required("NAME")?;
    let version = PackageVersion::parse(&fields.required("VERSION")?);

    let metadata = PackageMetadata {
        base: fields.first("BASE").unwrap_or_else(|| name.clone()),
        name,
        version,
        description: fields.first("DESC").unwrap_or_default(),
        url: fields.first("URL").filter(|u| !u.is_empty()),
        architecture: fields.first("ARCH").unwrap_or_else(|| "any".to_string()),
        packager: fields.first("PACKAGER").unwrap_or_default(),
        build_date: fields.number("BUILDDATE")?,
        installed_size: fields.number("ISIZE")?,
        compressed_size: fields.number("CSIZE")?,
        md5sum: fields.first("MD5SUM").unwrap_or_default(),
        sha256sum: fields.first("SHA256SUM").unwrap_or_default(),
        replaces: fields.list("REPLACES"),
        groups: fields.list("GROUPS"),
        depends: fields.list("DEPENDS"),
    };

    Ok(DescRecord { filename, metadata })
}

/// Parse a `files` record into its manifest
pub fn parse_files(entry: &str, content: &str) -> Result<Vec<String>> {
    parse_fields(content)
        .remove("FILES")
        .ok_or_else(|| Error::MalformedDescriptor {
            entry: entry.to_string(),
            reason: "missing %FILES% field".to_string(),
        })
}
