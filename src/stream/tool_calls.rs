/// Aggregation of streamed tool-call fragments into complete records.
use std::collections::BTreeMap;

use serde::Serialize;

/// One tool-call delta as it appears in a single streaming chunk.
///
/// Every field is optional; `function_args` carries an argument-text piece to
/// be appended to whatever arrived before it at the same index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub index: Option<u64>,
    pub id: Option<String>,
    pub call_type: Option<String>,
    pub function_name: Option<String>,
    pub function_args: Option<String>,
}

/// The aggregated result of merging all fragments at one index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ToolCallRecord {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub call_type: Option<String>,
    pub function_name: Option<String>,
    pub function_args: String,
}

/// Stateful accumulator keyed by tool-call index.
///
/// Records finalize in ascending index order regardless of fragment arrival
/// order; argument text is appended, never replaced.
#[derive(Debug, Default)]
pub struct ToolCallAggregator {
    entries: BTreeMap<u64, ToolCallRecord>,
}

impl ToolCallAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn merge(&mut self, fragment: ToolCallFragment) {
        let index = fragment.index.unwrap_or_else(|| {
            // Providers that omit the index get the next unused slot.
            self.entries.keys().next_back().map_or(0, |last| last + 1)
        });
        let entry = self.entries.entry(index).or_default();
        if entry.id.is_none() {
            entry.id = fragment.id;
        }
        if entry.call_type.is_none() {
            entry.call_type = fragment.call_type;
        }
        if entry.function_name.is_none() {
            entry.function_name = fragment.function_name;
        }
        if let Some(piece) = fragment.function_args {
            entry.function_args.push_str(&piece);
        }
    }

    /// Emit one record per index, in ascending index order.
    #[must_use]
    pub fn finalize(self) -> Vec<ToolCallRecord> {
        self.entries.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(index: Option<u64>, args: &str) -> ToolCallFragment {
        ToolCallFragment {
            index,
            function_args: Some(args.to_string()),
            ..ToolCallFragment::default()
        }
    }

    #[test]
    fn test_empty_aggregator_finalizes_empty() {
        assert!(ToolCallAggregator::new().finalize().is_empty());
    }

    #[test]
    fn test_interleaved_indices_ordered_and_appended() {
        let mut agg = ToolCallAggregator::new();
        agg.merge(ToolCallFragment {
            index: Some(0),
            id: Some("call_a".to_string()),
            call_type: Some("function".to_string()),
            function_name: Some("get_weather".to_string()),
            function_args: Some("{\"city\":".to_string()),
        });
        agg.merge(ToolCallFragment {
            index: Some(1),
            id: Some("call_b".to_string()),
            call_type: Some("function".to_string()),
            function_name: Some("get_time".to_string()),
            function_args: Some("{\"zone\":".to_string()),
        });
        agg.merge(frag(Some(0), "\"Oslo\"}"));
        agg.merge(frag(Some(1), "\"CET\"}"));

        let records = agg.finalize();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id.as_deref(), Some("call_a"));
        assert_eq!(records[0].function_args, "{\"city\":\"Oslo\"}");
        assert_eq!(records[1].function_name.as_deref(), Some("get_time"));
        assert_eq!(records[1].function_args, "{\"zone\":\"CET\"}");
    }

    #[test]
    fn test_later_fragments_fill_unset_fields_only() {
        let mut agg = ToolCallAggregator::new();
        agg.merge(ToolCallFragment {
            index: Some(0),
            id: Some("call_1".to_string()),
            ..ToolCallFragment::default()
        });
        agg.merge(ToolCallFragment {
            index: Some(0),
            id: Some("call_other".to_string()),
            function_name: Some("lookup".to_string()),
            ..ToolCallFragment::default()
        });
        let records = agg.finalize();
        assert_eq!(records[0].id.as_deref(), Some("call_1"));
        assert_eq!(records[0].function_name.as_deref(), Some("lookup"));
    }

    #[test]
    fn test_missing_index_assigns_next_unused() {
        let mut agg = ToolCallAggregator::new();
        agg.merge(frag(None, "first"));
        agg.merge(frag(Some(5), "fifth"));
        agg.merge(frag(None, "sixth"));
        let records = agg.finalize();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].function_args, "first");
        assert_eq!(records[1].function_args, "fifth");
        assert_eq!(records[2].function_args, "sixth");
    }
}
