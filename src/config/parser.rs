//! Config-file parsing with base-file adjustments.
//!
//! # File format
//!
//! INI-style sections of `key = value` pairs. A value continues across
//! lines when the following lines are indented; blank lines are allowed
//! inside such a multi-line value. `#` and `;` start comment lines. Keys
//! inside a `[DEFAULT]` section are not part of the result — they only act
//! as interpolation variables, with `here` pre-set to the directory of the
//! parsed file.
//!
//! Values may reference other values with `${key}` (same section, then
//! DEFAULT) or `${section:key}`. `$$` yields a literal dollar sign; a bare
//! `$` passes through unchanged.
//!
//! # Adjustment files
//!
//! A file whose meta section carries a `based_on` key does not stand alone:
//! the named base file is parsed first and the current file mangles it.
//! Every key of the adjustment file updates the base configuration:
//!
//! - the value `<delete>` removes the base key (sections left empty are
//!   dropped),
//! - a value starting with `<diff>` applies a line-based pseudo-diff to the
//!   base value: additions (`+line`), removals (`-line`) and anchor lines;
//!   additions land right after the last anchor, removals anchor too,
//! - a value of the form `<replace:regex:replacement>` rewrites the first
//!   regex match in the base value (`:` may be any separator character;
//!   append `:g` to replace all occurrences; multiple replace directives
//!   may be chained; replacements use `$1`-style group references),
//! - any other value simply overwrites the base value.
//!
//! Base files may themselves be based on further files; a loop in that
//! chain is a configuration error.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::warn;

use crate::confdict::{BASED_ON_KEY, ConfSection, Confdict, META_SECTION};
use crate::config::helpers::{expand_home, parse_list};
use crate::error::InitError;

/// Interpolation recursion limit.
const MAX_INTERPOLATION_DEPTH: usize = 10;

/// Name of the section providing interpolation variables.
const DEFAULT_SECTION: &str = "DEFAULT";

/// Parse a configuration file, following its `based_on` chain.
pub fn parse_config_file(path: &Path) -> Result<Confdict, InitError> {
    parse_chain(path, &mut Vec::new())
}

/// Parse a stand-alone configuration text.
///
/// `here` becomes the `${here}` interpolation variable. The `based_on`
/// mechanism is only available through [`parse_config_file`].
pub fn parse_config_str(text: &str, here: &Path) -> Result<Confdict, InitError> {
    parse_text(text, here)
}

fn parse_chain(file: &Path, visited: &mut Vec<PathBuf>) -> Result<Confdict, InitError> {
    let text = fs::read_to_string(file)
        .map_err(|e| InitError::config(format!("cannot read {}: {e}", file.display())))?;
    let here = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let settings = parse_text(&text, &here)?;
    let Some(base) = settings.get(META_SECTION, BASED_ON_KEY).map(str::to_string) else {
        return Ok(settings);
    };

    let base = expand_home(&base);
    let base = if base.is_absolute() { base } else { here.join(base) };
    visited.push(fs::canonicalize(file).unwrap_or_else(|_| file.to_path_buf()));
    let base_id = fs::canonicalize(&base).map_err(|e| {
        InitError::config(format!("cannot resolve base file {}: {e}", base.display()))
    })?;
    if visited.contains(&base_id) {
        let chain: Vec<String> = visited
            .iter()
            .chain(std::iter::once(&base_id))
            .map(|p| p.display().to_string())
            .collect();
        return Err(InitError::config(format!(
            "configuration file loop:\n - {}",
            chain.join("\n - ")
        )));
    }

    let adjustments = settings;
    let mut settings = parse_chain(&base, visited)?;
    apply_adjustments(&mut settings, &adjustments)?;
    Ok(settings)
}

struct RawFile {
    defaults: ConfSection,
    sections: BTreeMap<String, ConfSection>,
}

fn parse_text(text: &str, here: &Path) -> Result<Confdict, InitError> {
    let raw = parse_sections(text)?;
    interpolate(raw, here)
}

fn parse_sections(text: &str) -> Result<RawFile, InitError> {
    let mut defaults = ConfSection::new();
    let mut sections: BTreeMap<String, ConfSection> = BTreeMap::new();
    let mut current: Option<String> = None;
    // section + key of the value that indented lines continue
    let mut active: Option<(String, String)> = None;

    for (idx, raw_line) in text.lines().enumerate() {
        let lineno = idx + 1;
        let trimmed = raw_line.trim();

        if trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }
        if trimmed.is_empty() {
            // blank lines inside a multi-line value survive until the
            // final right-trim
            if let Some((section, key)) = &active {
                append_value_line(&mut defaults, &mut sections, section, key, "");
            }
            continue;
        }
        if raw_line.starts_with([' ', '\t']) {
            let Some((section, key)) = &active else {
                return Err(InitError::config(format!(
                    "line {lineno}: continuation line without a preceding key: {trimmed:?}"
                )));
            };
            append_value_line(&mut defaults, &mut sections, section, key, trimmed);
            continue;
        }
        if let Some(name) = trimmed.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            let name = name.trim();
            if name.is_empty() {
                return Err(InitError::config(format!("line {lineno}: empty section name")));
            }
            if name != DEFAULT_SECTION {
                sections.entry(name.to_string()).or_default();
            }
            current = Some(name.to_string());
            active = None;
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            return Err(InitError::config(format!(
                "line {lineno}: expected `key = value` or `[section]`: {trimmed:?}"
            )));
        };
        let key = key.trim().to_string();
        if key.is_empty() {
            return Err(InitError::config(format!("line {lineno}: empty key")));
        }
        let Some(section) = current.clone() else {
            return Err(InitError::config(format!(
                "line {lineno}: key {key:?} outside of any section"
            )));
        };
        let value = value.trim().to_string();
        section_target(&mut defaults, &mut sections, &section).insert(key.clone(), value);
        active = Some((section, key));
    }

    for value in defaults.values_mut() {
        *value = value.trim_end().to_string();
    }
    for section in sections.values_mut() {
        for value in section.values_mut() {
            *value = value.trim_end().to_string();
        }
    }
    Ok(RawFile { defaults, sections })
}

fn section_target<'a>(
    defaults: &'a mut ConfSection,
    sections: &'a mut BTreeMap<String, ConfSection>,
    section: &str,
) -> &'a mut ConfSection {
    if section == DEFAULT_SECTION {
        defaults
    } else {
        sections.entry(section.to_string()).or_default()
    }
}

fn append_value_line(
    defaults: &mut ConfSection,
    sections: &mut BTreeMap<String, ConfSection>,
    section: &str,
    key: &str,
    line: &str,
) {
    if let Some(value) = section_target(defaults, sections, section).get_mut(key) {
        value.push('\n');
        value.push_str(line);
    }
}

fn interpolate(raw: RawFile, here: &Path) -> Result<Confdict, InitError> {
    let mut defaults = raw.defaults;
    defaults
        .entry("here".to_string())
        .or_insert_with(|| here.display().to_string());
    let sections = raw.sections;

    let mut result = Confdict::new();
    for name in sections.keys() {
        result.section_mut(name);
    }
    for (name, section) in &sections {
        for (key, value) in section {
            let resolved = resolve_value(&sections, &defaults, name, value, 0).map_err(|msg| {
                InitError::config(format!("interpolation error in {name}/{key}: {msg}"))
            })?;
            result.insert(name, key, resolved);
        }
    }
    Ok(result)
}

/// Expand `${...}` references in `value`, resolving plain keys against
/// `section` first and `DEFAULT` second.
fn resolve_value(
    sections: &BTreeMap<String, ConfSection>,
    defaults: &ConfSection,
    section: &str,
    value: &str,
    depth: usize,
) -> Result<String, String> {
    if depth > MAX_INTERPOLATION_DEPTH {
        return Err("interpolation depth exceeded".to_string());
    }
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
            continue;
        }
        let Some(body) = after.strip_prefix('{') else {
            // bare dollar signs pass through; adjustment directives rely
            // on this for regexes like `\.sqlite3$`
            out.push('$');
            rest = after;
            continue;
        };
        let Some(end) = body.find('}') else {
            return Err(format!("unterminated interpolation in {value:?}"));
        };
        let reference = &body[..end];
        let (target_section, key) = match reference.split_once(':') {
            Some((s, k)) => (s, k),
            None => (section, reference),
        };
        let target = sections
            .get(target_section)
            .and_then(|s| s.get(key))
            .or_else(|| defaults.get(key))
            .ok_or_else(|| format!("unknown reference ${{{reference}}}"))?;
        let nested = resolve_value(sections, defaults, target_section, target, depth + 1)?;
        out.push_str(&nested);
        rest = &body[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn apply_adjustments(settings: &mut Confdict, adjustments: &Confdict) -> Result<(), InitError> {
    for (section, keys) in adjustments.sections() {
        for (key, value) in keys {
            let trimmed = value.trim();
            if trimmed == "<delete>" {
                if settings.remove_key(section, key).is_none() {
                    warn!(
                        section,
                        key = key.as_str(),
                        "delete-adjustment target does not exist in base file"
                    );
                }
                if settings.section(section).is_some_and(ConfSection::is_empty) {
                    settings.remove_section(section);
                }
            } else if trimmed.starts_with("<diff>") {
                let original = settings.get(section, key).ok_or_else(|| {
                    InitError::config(format!(
                        "original value of diff-adjustment to {section}/{key} not found"
                    ))
                })?;
                let merged = apply_diff(section, key, original, trimmed)?;
                settings.insert(section, key, merged);
            } else if parse_replace_directive(trimmed).is_some() {
                let original = settings.get(section, key).map(str::to_string).ok_or_else(|| {
                    InitError::config(format!(
                        "original value of replace-adjustment to {section}/{key} not found"
                    ))
                })?;
                let replaced = apply_replace(section, key, &original, trimmed)?;
                settings.insert(section, key, replaced);
            } else {
                settings.insert(section, key, value.clone());
            }
        }
    }
    Ok(())
}

/// Apply a `<diff>` adjustment to a newline-separated base value.
///
/// The format has no line numbers: removals (leading `-`) and anchor lines
/// position the insertion point; additions (leading `+`) are inserted right
/// after it, at the start when no anchor was seen yet.
fn apply_diff(section: &str, key: &str, original: &str, diff: &str) -> Result<String, InitError> {
    let body = diff.strip_prefix("<diff>").unwrap_or(diff);
    let mut lines = parse_list(original);
    let mut anchor = 0usize;
    for line in parse_list(body) {
        if let Some(rest) = line.strip_prefix('-') {
            let target = rest.trim();
            let pos = lines.iter().position(|l| l == target).ok_or_else(|| {
                InitError::config(format!(
                    "error parsing diff in {section}/{key}: line does not exist in base value: {line:?}"
                ))
            })?;
            lines.remove(pos);
            anchor = pos;
        } else if let Some(rest) = line.strip_prefix('+') {
            let at = anchor.min(lines.len());
            lines.insert(at, rest.trim().to_string());
            anchor = at + 1;
        } else {
            let pos = lines.iter().position(|l| *l == line).ok_or_else(|| {
                InitError::config(format!(
                    "error parsing diff in {section}/{key}: line does not exist in base value: {line:?}"
                ))
            })?;
            anchor = pos + 1;
        }
    }
    Ok(lines.join("\n"))
}

/// Parse a single `<replace SEP regex SEP replacement [SEP flags]>`
/// directive at the start of `input`.
///
/// Returns the regex, replacement and flag segments plus the number of
/// bytes consumed, including any whitespace after the closing `>`.
fn parse_replace_directive(input: &str) -> Option<(&str, &str, &str, usize)> {
    let rest = input.strip_prefix("<replace")?;
    let sep = rest.chars().next()?;
    if sep == '>' {
        return None;
    }
    let body = &rest[sep.len_utf8()..];
    let first_sep = body.find(sep)?;
    let regex = &body[..first_sep];
    let after = &body[first_sep + sep.len_utf8()..];
    let gt = after.find('>')?;
    let (replacement, flags) = match after[..gt].find(sep) {
        Some(i) => (&after[..i], &after[i + sep.len_utf8()..gt]),
        None => (&after[..gt], ""),
    };
    let directive_len =
        "<replace".len() + sep.len_utf8() + first_sep + sep.len_utf8() + gt + '>'.len_utf8();
    let tail = &input[directive_len..];
    let consumed = directive_len + (tail.len() - tail.trim_start().len());
    Some((regex, replacement, flags, consumed))
}

/// Apply one or more chained `<replace ...>` directives to a base value.
fn apply_replace(
    section: &str,
    key: &str,
    original: &str,
    definition: &str,
) -> Result<String, InitError> {
    let mut replaced = original.to_string();
    let mut rest = definition.trim();
    while !rest.is_empty() {
        let Some((regex_src, replacement, flags, consumed)) = parse_replace_directive(rest) else {
            return Err(InitError::config(format!(
                "adjustment value for {section}/{key} contains invalid replacements"
            )));
        };
        let re = Regex::new(regex_src).map_err(|e| {
            InitError::config(format!(
                "invalid regex in replace-adjustment for {section}/{key}: {e}"
            ))
        })?;
        let updated = if flags.contains('g') {
            re.replace_all(&replaced, replacement).into_owned()
        } else {
            re.replace(&replaced, replacement).into_owned()
        };
        if updated == replaced {
            warn!(
                section,
                key,
                regex = regex_src,
                "replace-adjustment regex did not match anything"
            );
        }
        replaced = updated;
        rest = &rest[consumed..];
    }
    Ok(replaced)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Confdict {
        parse_config_str(text, Path::new("/tmp")).unwrap()
    }

    #[test]
    fn basic_sections_and_values() {
        let conf = parse("[foo]\nbar = 42\n\n[baz]\nqux = hello world\n");
        assert_eq!(conf.get("foo", "bar"), Some("42"));
        assert_eq!(conf.get("baz", "qux"), Some("hello world"));
    }

    #[test]
    fn comments_are_skipped() {
        let conf = parse("# leading comment\n[foo]\n; other comment\nbar = 1\n");
        assert_eq!(conf.get("foo", "bar"), Some("1"));
    }

    #[test]
    fn multiline_values_with_blanks() {
        let conf = parse("[rootstock]\nmodules =\n\n    ctx\n    db\n\n[other]\nx = 1\n");
        assert_eq!(
            parse_list(conf.get("rootstock", "modules").unwrap()),
            vec!["ctx", "db"]
        );
    }

    #[test]
    fn here_is_interpolated() {
        let conf = parse_config_str("[db]\nurl = sqlite:///${here}/app.db\n", Path::new("/srv/app"))
            .unwrap();
        assert_eq!(conf.get("db", "url"), Some("sqlite:////srv/app/app.db"));
    }

    #[test]
    fn same_section_and_cross_section_references() {
        let conf = parse(
            "[paths]\nroot = /var/www\nstatic = ${root}/static\n\n[app]\nassets = ${paths:static}/assets\n",
        );
        assert_eq!(conf.get("paths", "static"), Some("/var/www/static"));
        assert_eq!(conf.get("app", "assets"), Some("/var/www/static/assets"));
    }

    #[test]
    fn default_section_provides_variables_only() {
        let conf = parse("[DEFAULT]\nbase = /opt\n\n[app]\nhome = ${base}/app\n");
        assert_eq!(conf.get("app", "home"), Some("/opt/app"));
        assert!(!conf.contains_section("DEFAULT"));
    }

    #[test]
    fn dollar_escapes() {
        let conf = parse("[app]\nprice = $$5\nregex = \\.sqlite3$\n");
        assert_eq!(conf.get("app", "price"), Some("$5"));
        assert_eq!(conf.get("app", "regex"), Some("\\.sqlite3$"));
    }

    #[test]
    fn unknown_reference_errors() {
        let result = parse_config_str("[app]\nhome = ${nowhere}\n", Path::new("."));
        assert!(result.is_err());
    }

    #[test]
    fn recursive_reference_errors() {
        let result = parse_config_str("[app]\na = ${b}\nb = ${a}\n", Path::new("."));
        assert!(result.is_err());
    }

    #[test]
    fn key_outside_section_errors() {
        assert!(parse_config_str("bar = 1\n", Path::new(".")).is_err());
    }

    #[test]
    fn malformed_line_errors() {
        assert!(parse_config_str("[foo]\nnot a pair\n", Path::new(".")).is_err());
    }

    fn adjust(base: &str, adjustment: &str) -> Result<Confdict, InitError> {
        let mut settings = parse(base);
        let adjustments = parse(adjustment);
        apply_adjustments(&mut settings, &adjustments)?;
        Ok(settings)
    }

    #[test]
    fn adjustment_plain_replacement_and_new_keys() {
        let conf = adjust("[db]\nurl = old\n", "[db]\nurl = new\n\n[mail]\nhost = localhost\n")
            .unwrap();
        assert_eq!(conf.get("db", "url"), Some("new"));
        assert_eq!(conf.get("mail", "host"), Some("localhost"));
    }

    #[test]
    fn adjustment_delete_drops_key_and_empty_section() {
        let conf = adjust("[db]\ndestroyable = true\n", "[db]\ndestroyable = <delete>\n").unwrap();
        assert!(!conf.contains_section("db"));
    }

    #[test]
    fn adjustment_diff_removes_and_adds_lines() {
        let conf = adjust(
            "[rootstock]\nmodules =\n    ctx\n    db\n    es\n",
            "[rootstock]\nmodules = <diff>\n    -es\n    +mail\n",
        )
        .unwrap();
        assert_eq!(
            parse_list(conf.get("rootstock", "modules").unwrap()),
            vec!["ctx", "db", "mail"]
        );
    }

    #[test]
    fn adjustment_diff_inserts_after_anchor() {
        let conf = adjust(
            "[rootstock]\nmodules =\n    foo\n    bar\n",
            "[rootstock]\nmodules = <diff>\n    foo\n    +baz\n",
        )
        .unwrap();
        assert_eq!(
            parse_list(conf.get("rootstock", "modules").unwrap()),
            vec!["foo", "baz", "bar"]
        );
    }

    #[test]
    fn adjustment_diff_missing_anchor_errors() {
        let result = adjust(
            "[rootstock]\nmodules =\n    foo\n",
            "[rootstock]\nmodules = <diff>\n    -nope\n",
        );
        assert!(result.is_err());
    }

    #[test]
    fn adjustment_replace_first_occurrence() {
        let conf = adjust(
            "[db]\nurl = sqlite:///database/database.sqlite3\n",
            "[db]\nurl = <replace:database:app>\n",
        )
        .unwrap();
        assert_eq!(conf.get("db", "url"), Some("sqlite:///app/database.sqlite3"));
    }

    #[test]
    fn adjustment_replace_global_flag() {
        let conf = adjust(
            "[db]\nurl = sqlite:///database/database.sqlite3\n",
            "[db]\nurl = <replace:database:app:g>\n",
        )
        .unwrap();
        assert_eq!(conf.get("db", "url"), Some("sqlite:///app/app.sqlite3"));
    }

    #[test]
    fn adjustment_replace_chained() {
        let conf = adjust(
            "[db]\nurl = sqlite:///${here}/database.sqlite3\n",
            "[db]\nurl =\n    <replace:database:app>\n    <replace:\\.sqlite3:.db>\n",
        )
        .unwrap();
        assert_eq!(conf.get("db", "url"), Some("sqlite:////tmp/app.db"));
    }

    #[test]
    fn adjustment_replace_custom_separator() {
        let conf = adjust(
            "[db]\nurl = sqlite:///data/app.sqlite3\n",
            "[db]\nurl = <replace/data/var>\n",
        )
        .unwrap();
        assert_eq!(conf.get("db", "url"), Some("sqlite:///var/app.sqlite3"));
    }

    #[test]
    fn adjustment_replace_invalid_chain_errors() {
        let result = adjust(
            "[db]\nurl = something\n",
            "[db]\nurl =\n    <replace:some:other>\n    garbage\n",
        );
        assert!(result.is_err());
    }

    #[test]
    fn adjustment_diff_on_missing_key_errors() {
        let result = adjust("[db]\nurl = x\n", "[db]\nother = <diff>\n    +line\n");
        assert!(result.is_err());
    }
}
