//! Parameter validation and merging.
//!
//! Turns a base parameter set plus a free-form external response into a new,
//! always schema-valid parameter set:
//!
//! ```text
//! response text ──extract──▶ patch object ──merge onto base──▶ merged ──conform──▶ candidate
//!                 (last fenced               (per-field,              (coerce + clamp,
//!                  block wins)                base keys only)          base as fallback)
//! ```
//!
//! Only extraction can fail. Once a patch object exists, whatever it contains,
//! the output lies inside the declared domain.

mod extract;
mod schema;

pub use extract::{ExtractedPatch, PatchSource, extract_patch, fenced_blocks};
pub use schema::{Field, FieldKind, ParamRange, Schema};

use serde_json::{Map, Value};

use crate::error::{EvolverError, Result};
use crate::types::ParameterSet;

/// Merge `patch` onto `base` field by field.
///
/// Objects recurse so a patch touching one nested field keeps its siblings.
/// Keys absent from the base are ignored at every level, which makes
/// record-keyed tables merge key-by-key: categories missing from the patch
/// stay untouched and unknown categories are dropped.
pub fn merge(base: &Value, patch: &Map<String, Value>) -> Value {
    let Some(base_map) = base.as_object() else {
        return base.clone();
    };

    let mut out = base_map.clone();
    for (key, patch_value) in patch {
        let Some(base_value) = base_map.get(key) else {
            continue;
        };
        let merged = match (base_value, patch_value) {
            (Value::Object(_), Value::Object(nested)) => merge(base_value, nested),
            // A scalar can't replace a whole sub-object; conform would drop it anyway.
            (Value::Object(_), _) => base_value.clone(),
            (_, v) => v.clone(),
        };
        out.insert(key.clone(), merged);
    }
    Value::Object(out)
}

/// Extract, merge and conform an external response against `base`.
pub fn apply(schema: &Schema, base: &ParameterSet, raw: &str) -> Result<ParameterSet> {
    let extracted = extract_patch(raw)?;
    tracing::debug!(
        source = ?extracted.source,
        fields = extracted.patch.len(),
        "extracted patch"
    );
    let merged = merge(base.as_value(), &extracted.patch);
    let conformed = schema.conform(&merged, base.as_value()).map_err(|violations| {
        EvolverError::Storage(anyhow::anyhow!(
            "base parameters violate their schema: {}",
            violations.join("; ")
        ))
    })?;
    Ok(ParameterSet::new(conformed))
}
