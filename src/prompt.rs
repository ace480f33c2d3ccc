//! Prompt rendering for the external proposer.
//!
//! Pure and deterministic: the same brief, schema, parameters and failures
//! always produce the same text. Sections, in order:
//!
//! 1. title and goal
//! 2. current parameter values
//! 3. failures to fix (or an explicit "no failures" line)
//! 4. rules: every field with its type, range and fixed table keys
//! 5. response format

use std::fmt::Write;

use serde_json::Value;

use crate::patch::{FieldKind, Schema};
use crate::types::{FailureRecord, ParameterSet};

/// Static, per-problem prompt text.
#[derive(Debug, Clone, Copy)]
pub struct PromptBrief {
    pub title: &'static str,
    pub goal: &'static str,
    pub tips: &'static [&'static str],
}

pub struct PromptBuilder<'a> {
    brief: &'a PromptBrief,
    schema: &'a Schema,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(brief: &'a PromptBrief, schema: &'a Schema) -> Self {
        Self { brief, schema }
    }

    pub fn render(&self, params: &ParameterSet, failures: &[FailureRecord]) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "# {}\n", self.brief.title);
        let _ = writeln!(out, "{}\n", self.brief.goal);

        out.push_str("## Current parameters\n\n```json\n");
        out.push_str(&params.to_pretty_json());
        out.push_str("\n```\n\n");

        out.push_str("## Failures to fix\n\n");
        if failures.is_empty() {
            out.push_str("No failures: every metric is within target. Look for improvements without breaking anything.\n");
        } else {
            for (i, f) in failures.iter().enumerate() {
                let _ = writeln!(out, "{}. [{}] value={} - {}", i + 1, f.metric, fmt_value(f.value), f.description);
            }
        }
        out.push('\n');

        out.push_str("## Rules\n\n");
        for line in self.schema.describe() {
            let _ = writeln!(out, "- {}", line);
        }
        for (name, keys) in table_keys(self.schema, params) {
            let _ = writeln!(
                out,
                "- `{}` entries are fixed: {}. Entries cannot be added or removed.",
                name,
                keys.join(", ")
            );
        }
        out.push_str("- Values outside a range are clamped. Unknown fields are ignored.\n");
        for tip in self.brief.tips {
            let _ = writeln!(out, "- {}", tip);
        }
        out.push('\n');

        out.push_str("## Response format\n\n");
        out.push_str(
            "Reply with a single ```json fenced block containing only the fields you change. \
             Nested objects may be partial. If you write several blocks, only the last one is used.\n",
        );
        out
    }
}

/// Shorthand for [`PromptBuilder::render`].
pub fn render(
    brief: &PromptBrief,
    schema: &Schema,
    params: &ParameterSet,
    failures: &[FailureRecord],
) -> String {
    PromptBuilder::new(brief, schema).render(params, failures)
}

fn table_keys(schema: &Schema, params: &ParameterSet) -> Vec<(&'static str, Vec<String>)> {
    schema
        .fields()
        .iter()
        .filter(|f| matches!(f.kind, FieldKind::Table(_)))
        .filter_map(|f| {
            let keys = params.get(f.name).and_then(Value::as_object)?.keys().cloned().collect();
            Some((f.name, keys))
        })
        .collect()
}

fn fmt_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{:.3}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::Field;
    use serde_json::json;

    const BRIEF: PromptBrief = PromptBrief {
        title: "Test problem",
        goal: "Make it good.",
        tips: &["Bigger is better."],
    };

    fn schema() -> Schema {
        Schema::new(vec![
            Field::float("rate", 0.0, 1.0, "how often"),
            Field::table("items", vec![Field::int("price", 1, 100, "coins")], "shop"),
        ])
    }

    fn params() -> ParameterSet {
        ParameterSet::new(json!({"rate": 0.5, "items": {"apple": {"price": 3}, "pear": {"price": 4}}}))
    }

    #[test]
    fn test_sections_in_order() {
        let failures = vec![FailureRecord::new("rate", 0.5, "too slow")];
        let text = render(&BRIEF, &schema(), &params(), &failures);
        let order = ["# Test problem", "## Current parameters", "## Failures to fix", "## Rules", "## Response format"];
        let positions: Vec<usize> = order.iter().map(|s| text.find(s).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(text.contains("1. [rate] value=0.500 - too slow"));
        assert!(text.contains("\"rate\": 0.5"));
    }

    #[test]
    fn test_rules_name_ranges_and_table_keys() {
        let text = render(&BRIEF, &schema(), &params(), &[]);
        assert!(text.contains("rate"));
        assert!(text.contains("[0, 1]"));
        assert!(text.contains("`items` entries are fixed: apple, pear"));
        assert!(text.contains("Bigger is better."));
    }

    #[test]
    fn test_empty_failures_are_explicit() {
        let text = render(&BRIEF, &schema(), &params(), &[]);
        assert!(text.contains("No failures"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let failures = vec![FailureRecord::new("x", 2.0, "d")];
        let a = render(&BRIEF, &schema(), &params(), &failures);
        let b = render(&BRIEF, &schema(), &params(), &failures);
        assert_eq!(a, b);
        assert!(a.contains("value=2 -"));
    }
}
