//! Manifest templating boundary.
//!
//! The loader hands the raw manifest bytes and a [`VariableBag`] to a
//! [`TemplateRenderer`] before parsing. The renderer is a capability: the
//! CLI wires in whichever implementation it wants, and tests substitute
//! their own. [`SubstitutionRenderer`] is the built-in default, resolving
//! `{{ name }}` placeholders from the bag.
//!
//! Helper values that require engine I/O (currently `bridgeIp`) are
//! evaluated at most once per run and injected into the bag under their
//! helper name before rendering, so a render pass shares one memoized
//! value and nothing is cached across runs.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Key/value variables available to the template.
pub type VariableBag = BTreeMap<String, String>;

/// Capability that expands a raw manifest into parseable text.
///
/// Implementations must be pure with respect to the declared variables:
/// the same `source` and `vars` always yield the same output.
pub trait TemplateRenderer {
    fn render(&self, source: &str, vars: &VariableBag) -> Result<String>;
}

/// Default renderer: replaces `{{ name }}` with the bag's value for
/// `name`. An unknown variable fails the render; the manifest author
/// either supplies it with `--var` or removes the placeholder.
#[derive(Debug, Default)]
pub struct SubstitutionRenderer;

impl TemplateRenderer for SubstitutionRenderer {
    fn render(&self, source: &str, vars: &VariableBag) -> Result<String> {
        let mut out = String::with_capacity(source.len());
        let mut rest = source;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| {
                Error::ManifestRender("unterminated '{{' placeholder".to_string())
            })?;
            let key = after[..end].trim();
            match vars.get(key) {
                Some(value) => out.push_str(value),
                None => {
                    return Err(Error::ManifestRender(format!(
                        "undefined template variable '{}'",
                        key
                    )))
                }
            }
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// Parses a `K=V` command-line variable assignment.
pub fn parse_var_assignment(s: &str) -> Result<(String, String)> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(Error::InvalidReference {
            reference: s.to_string(),
            reason: "expected K=V".to_string(),
        }),
    }
}

/// Parses a flat key/value document (one of the vars-file or artifact
/// formats: a YAML mapping of scalars) into bag entries.
pub fn parse_var_document(text: &str) -> Result<VariableBag> {
    let doc: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| Error::ManifestParse(e.to_string()))?;
    let mapping = doc
        .as_mapping()
        .ok_or_else(|| Error::ManifestParse("variables document is not a mapping".to_string()))?;

    let mut bag = VariableBag::new();
    for (k, v) in mapping {
        let key = k
            .as_str()
            .ok_or_else(|| Error::ManifestParse("variable key is not a string".to_string()))?;
        let value = match v {
            serde_yaml::Value::String(s) => s.clone(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Number(n) => n.to_string(),
            _ => {
                return Err(Error::ManifestParse(format!(
                    "variable '{}' is not a scalar",
                    key
                )))
            }
        };
        bag.insert(key.to_string(), value);
    }
    Ok(bag)
}

/// True if the source references the named helper, so the caller knows
/// whether the helper's value must be fetched before rendering.
pub fn references_helper(source: &str, helper: &str) -> bool {
    let mut rest = source;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return false;
        };
        if after[..end].trim() == helper {
            return true;
        }
        rest = &after[end + 2..];
    }
    false
}
