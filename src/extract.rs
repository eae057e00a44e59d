//! Artifact extraction from raw model responses.
//!
//! Models wrap their output in prose, markdown fences, or nothing at all.
//! Document extraction tries strategies in a fixed precedence order and stops
//! at the first hit:
//!
//! 1. a fenced block labeled `html`
//! 2. a root-element span (`<!DOCTYPE ...</html>` or `<html ...</html>`)
//! 3. the whole response, when it already starts with a tag and contains a
//!    structural element
//! 4. any generic outermost tag pair, as a last resort
//!
//! Project extraction collects labeled fenced blocks only; unlabeled fences
//! are discarded rather than guessed at.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

// =============================================================================
// Document extraction
// =============================================================================

static HTML_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)```html\s*\n(.*?)```").unwrap()
});

static ROOT_SPAN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)(<!DOCTYPE\s+html.*</html\s*>|<html[\s>].*</html\s*>)").unwrap()
});

static GENERIC_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<([a-z][a-z0-9]*)\b[^>]*>.*</([a-z][a-z0-9]*)\s*>").unwrap()
});

const STRUCTURAL_TAGS: &[&str] = &[
    "<html", "<head", "<body", "<div", "<section", "<main", "<header", "<footer", "<nav",
    "<article", "<h1", "<p", "<table", "<form",
];

fn has_structural_element(text: &str) -> bool {
    let lower = text.to_lowercase();
    STRUCTURAL_TAGS.iter().any(|t| lower.contains(t)) || GENERIC_PAIR.is_match(text)
}

/// Pull a single HTML document out of a raw response. Returns `None` when no
/// strategy matches.
pub fn extract_document(response: &str) -> Option<String> {
    if let Some(caps) = HTML_FENCE.captures(response) {
        let inner = caps.get(1)?.as_str().trim();
        if !inner.is_empty() {
            debug!(strategy = "fence", "document extracted");
            return Some(inner.to_string());
        }
    }

    if let Some(m) = ROOT_SPAN.find(response) {
        debug!(strategy = "root-span", "document extracted");
        return Some(m.as_str().trim().to_string());
    }

    let trimmed = response.trim();
    if trimmed.starts_with('<') && has_structural_element(trimmed) {
        debug!(strategy = "whole-response", "document extracted");
        return Some(trimmed.to_string());
    }

    if let Some(m) = GENERIC_PAIR.find(response) {
        debug!(strategy = "generic-pair", "document extracted");
        return Some(m.as_str().trim().to_string());
    }

    None
}

// =============================================================================
// Validation
// =============================================================================

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<[a-z][a-z0-9]*\b").unwrap());
static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());

/// Structural facts about an extracted document. Advisory, never gating:
/// an artifact with errors is still rendered and judged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub has_doctype: bool,
    pub has_html_tag: bool,
    pub has_head: bool,
    pub has_body: bool,
    pub has_title: bool,
    pub tag_count: usize,
    pub text_len: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

pub fn validate_document(html: &str) -> ValidationReport {
    let lower = html.to_lowercase();
    let mut report = ValidationReport {
        has_doctype: lower.contains("<!doctype"),
        has_html_tag: lower.contains("<html"),
        has_head: lower.contains("<head"),
        has_body: lower.contains("<body"),
        has_title: lower.contains("<title"),
        tag_count: TAG.find_iter(html).count(),
        text_len: ANY_TAG.replace_all(html, " ").split_whitespace().count(),
        ..Default::default()
    };

    if report.tag_count == 0 {
        report.errors.push("no HTML tags found".to_string());
    }
    if !report.has_doctype {
        report.warnings.push("missing DOCTYPE declaration".to_string());
    }
    if !report.has_html_tag {
        report.warnings.push("missing <html> element".to_string());
    }
    if !report.has_body {
        report.warnings.push("missing <body> element".to_string());
    }
    if !report.has_title {
        report.warnings.push("missing <title> element".to_string());
    }
    if report.text_len == 0 {
        report.warnings.push("document has no visible text".to_string());
    }

    report.is_valid = report.errors.is_empty();
    report
}

// =============================================================================
// Project extraction
// =============================================================================

static FILE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```([^\n`]*)\n(.*?)```").unwrap()
});

static FILE_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:filename|file)\s*:\s*(.+?)\s*$").unwrap()
});

fn clean_filename(label: &str) -> Option<String> {
    let name = match FILE_LABEL.captures(label) {
        Some(caps) => caps.get(1)?.as_str(),
        None => label,
    };
    let name = name.trim().trim_matches(['"', '\'', '*']).trim();
    let valid = !name.is_empty()
        && name.len() < 200
        && !name.contains('`')
        && !name.contains(char::is_whitespace)
        && (name.contains('.') || name.contains('/'));
    if valid {
        Some(name.trim_start_matches("./").to_string())
    } else {
        None
    }
}

/// Structural sanity check for an extracted file tree.
pub fn validate_project(files: &BTreeMap<String, String>) -> ValidationReport {
    let mut report = ValidationReport::default();
    if files.is_empty() {
        report.errors.push("no files extracted".to_string());
    }
    let has_entry = files
        .keys()
        .any(|p| p.ends_with(".html") || p.ends_with(".htm"));
    report.has_html_tag = has_entry;
    if !has_entry {
        report
            .warnings
            .push("no HTML entry point among the files".to_string());
    }
    report.tag_count = files.values().map(|body| TAG.find_iter(body).count()).sum();
    report.text_len = files.values().map(|body| body.len()).sum();
    report.is_valid = report.errors.is_empty();
    report
}

/// Pull a file tree out of a raw response. Fences whose info string does not
/// look like a path (a bare language label, or nothing) are skipped.
pub fn extract_project_files(response: &str) -> BTreeMap<String, String> {
    let mut files = BTreeMap::new();
    for caps in FILE_FENCE.captures_iter(response) {
        let label = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let body = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        if let Some(path) = clean_filename(label) {
            files.insert(path, body.trim_end().to_string());
        } else {
            debug!(label, "discarding fence without a usable path");
        }
    }
    files
}
