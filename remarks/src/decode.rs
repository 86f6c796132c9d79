//! Decoding of a single YAML remark document.
//!
//! A document looks like:
//!
//! ```text
//! --- !Passed
//! Pass:            inline
//! Name:            Inlined
//! DebugLoc:        { File: code.c, Line: 56, Column: 12 }
//! Function:        main
//! Args:
//!   - Callee:          add
//!   - DebugLoc:        { File: code.c, Line: 1, Column: 0 }
//!   - String:          ' inlined into '
//!   - Caller:          main
//! ...
//! ```

use crate::model::ArgValue;
use crate::model::DebugLocation;
use crate::model::OneBasedLine;
use crate::model::Remark;
use crate::model::RemarkArg;
use crate::model::RemarkKind;
use serde_yaml::Mapping;
use serde_yaml::Value;
use tracing::trace;

pub const DOCUMENT_TAG_PREFIX: &str = "--- !";
pub const DOCUMENT_END: &str = "...";
const LOCATION_KEY: &str = "DebugLoc";

/// Decodes one remark document given as lines, the first of which is the
/// `--- !<Kind>` marker. Returns `None` for anything that is not a complete
/// remark.
pub fn decode<S: AsRef<str>>(lines: &[S]) -> Option<Remark> {
    let (marker, body) = lines.split_first()?;
    let tag = marker.as_ref().strip_prefix(DOCUMENT_TAG_PREFIX)?.trim_end();
    let Some(kind) = RemarkKind::from_tag(tag) else {
        trace!(tag, "rejecting remark with unknown kind");
        return None;
    };

    let body = match body.split_last() {
        Some((last, rest)) if last.as_ref().trim_end() == DOCUMENT_END => rest,
        _ => body,
    };
    let text = body
        .iter()
        .map(|line| line.as_ref())
        .collect::<Vec<&str>>()
        .join("\n");

    let parsed: Value = match serde_yaml::from_str(&text) {
        Ok(value) => value,
        Err(err) => {
            trace!(%err, "rejecting unparsable remark body");
            return None;
        }
    };
    let Some(mapping) = parsed.as_mapping() else {
        trace!("rejecting remark whose body is not a mapping");
        return None;
    };

    let debug_location = field(mapping, LOCATION_KEY).and_then(location)?;
    let function = field(mapping, "Function").and_then(scalar)?;
    let name = field(mapping, "Name").and_then(scalar)?;
    let pass = field(mapping, "Pass").and_then(scalar)?;
    let args = field(mapping, "Args").and_then(args)?;

    Some(Remark {
        pass,
        kind,
        name,
        function,
        debug_location,
        args,
    })
}

fn field<'a>(mapping: &'a Mapping, key: &str) -> Option<&'a Value> {
    let value = mapping.get(key);
    if value.is_none() {
        trace!(key, "rejecting remark with missing key");
    }
    value
}

/// Scalars become strings; `Function: 123` is still a function name.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Tagged(tagged) => scalar(&tagged.value),
        Value::Null | Value::Sequence(_) | Value::Mapping(_) => None,
    }
}

/// `{ File, Line, Column }`. `Line: 0` and `Column: 0` are valid.
fn location(value: &Value) -> Option<DebugLocation> {
    let mapping = value.as_mapping()?;
    let file = mapping.get("File").and_then(scalar)?;
    if file.is_empty() {
        return None;
    }
    let line = mapping.get("Line").and_then(unsigned)?;
    let column = mapping.get("Column").and_then(unsigned)?;
    Some(DebugLocation {
        file,
        line: OneBasedLine(line),
        column,
    })
}

fn unsigned(value: &Value) -> Option<u32> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Each list item yields exactly one pair. An item is a single-key mapping,
/// optionally followed by a `DebugLoc` key that pins the value to a source
/// location (`- Callee: foo` / `DebugLoc: {...}`).
fn args(value: &Value) -> Option<Vec<RemarkArg>> {
    let items = match value {
        Value::Sequence(items) => items,
        // `Args:` with nothing under it
        Value::Null => return Some(Vec::new()),
        _ => return None,
    };

    let mut pairs = Vec::with_capacity(items.len());
    for item in items {
        pairs.push(arg(item.as_mapping()?)?);
    }
    Some(pairs)
}

fn arg(item: &Mapping) -> Option<RemarkArg> {
    let mut entries = item.iter();
    let (key, value) = entries.next()?;
    let key = scalar(key)?;
    let value = match value {
        Value::Mapping(_) => ArgValue::Location(location(value)?),
        other => ArgValue::String(scalar(other).unwrap_or_default()),
    };

    let location = match entries.next() {
        None => None,
        Some((extra, site)) if extra.as_str() == Some(LOCATION_KEY) && key != LOCATION_KEY => {
            Some(location(site)?)
        }
        Some(_) => {
            trace!(keys = item.len(), "rejecting remark with multi-key argument");
            return None;
        }
    };
    if entries.next().is_some() {
        trace!(keys = item.len(), "rejecting remark with multi-key argument");
        return None;
    }

    Some(RemarkArg {
        key,
        value,
        location,
    })
}
