//! Structured description of a single client call
//!
//! A compliance fixture's snippet is parsed once into a [`ClientCall`];
//! backends interpret the description instead of evaluating source text.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use restcheck_common::{Error, Result};

/// What the call is addressed to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallTarget {
    Table { name: String },
    Rpc { function: String, params: Value },
}

/// Row-count strategy requested with `{ count: ... }`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountMode {
    Exact,
    Planned,
    Estimated,
}

impl CountMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CountMode::Exact => "exact",
            CountMode::Planned => "planned",
            CountMode::Estimated => "estimated",
        }
    }
}

impl FromStr for CountMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "exact" => Ok(CountMode::Exact),
            "planned" => Ok(CountMode::Planned),
            "estimated" => Ok(CountMode::Estimated),
            other => Err(Error::CallParse(format!("unknown count mode '{}'", other))),
        }
    }
}

/// The verb of the call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "snake_case")]
pub enum CallAction {
    Select {
        columns: Option<String>,
        head: bool,
        count: Option<CountMode>,
    },
    Insert {
        payload: Value,
        upsert: bool,
        on_conflict: Option<String>,
        ignore_duplicates: bool,
        count: Option<CountMode>,
    },
    Update {
        payload: Value,
        count: Option<CountMode>,
    },
    Delete {
        count: Option<CountMode>,
    },
}

impl CallAction {
    pub fn count(&self) -> Option<CountMode> {
        match self {
            CallAction::Select { count, .. }
            | CallAction::Insert { count, .. }
            | CallAction::Update { count, .. }
            | CallAction::Delete { count } => *count,
        }
    }
}

/// Coarse operation verb used for status inference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Select,
    Insert,
    Upsert,
    Update,
    Delete,
    Rpc,
}

/// Filter operators understood by PostgREST
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    Ilike,
    Is,
    In,
    Contains,
    ContainedBy,
    Overlaps,
    RangeGt,
    RangeGte,
    RangeLt,
    RangeLte,
    RangeAdjacent,
    TextSearch {
        kind: TextSearchKind,
        config: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSearchKind {
    Default,
    Plain,
    Phrase,
    Websearch,
}

impl FilterOp {
    /// Operator as it appears in a PostgREST query string
    pub fn postgrest_name(&self) -> String {
        let name = match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::Like => "like",
            FilterOp::Ilike => "ilike",
            FilterOp::Is => "is",
            FilterOp::In => "in",
            FilterOp::Contains => "cs",
            FilterOp::ContainedBy => "cd",
            FilterOp::Overlaps => "ov",
            FilterOp::RangeGt => "sr",
            FilterOp::RangeGte => "nxl",
            FilterOp::RangeLt => "sl",
            FilterOp::RangeLte => "nxr",
            FilterOp::RangeAdjacent => "adj",
            FilterOp::TextSearch { kind, config } => {
                let base = match kind {
                    TextSearchKind::Default => "fts",
                    TextSearchKind::Plain => "plfts",
                    TextSearchKind::Phrase => "phfts",
                    TextSearchKind::Websearch => "wfts",
                };
                return match config {
                    Some(cfg) => format!("{}({})", base, cfg),
                    None => base.to_string(),
                };
            }
        };
        name.to_string()
    }
}

impl FromStr for FilterOp {
    type Err = Error;

    /// Accepts both PostgREST abbreviations and client method names
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "eq" => FilterOp::Eq,
            "neq" => FilterOp::Neq,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "like" => FilterOp::Like,
            "ilike" => FilterOp::Ilike,
            "is" => FilterOp::Is,
            "in" => FilterOp::In,
            "cs" | "contains" => FilterOp::Contains,
            "cd" | "containedBy" => FilterOp::ContainedBy,
            "ov" | "overlaps" => FilterOp::Overlaps,
            "sr" | "rangeGt" => FilterOp::RangeGt,
            "nxl" | "rangeGte" => FilterOp::RangeGte,
            "sl" | "rangeLt" => FilterOp::RangeLt,
            "nxr" | "rangeLte" => FilterOp::RangeLte,
            "adj" | "rangeAdjacent" => FilterOp::RangeAdjacent,
            "fts" => FilterOp::TextSearch {
                kind: TextSearchKind::Default,
                config: None,
            },
            "plfts" => FilterOp::TextSearch {
                kind: TextSearchKind::Plain,
                config: None,
            },
            "phfts" => FilterOp::TextSearch {
                kind: TextSearchKind::Phrase,
                config: None,
            },
            "wfts" => FilterOp::TextSearch {
                kind: TextSearchKind::Websearch,
                config: None,
            },
            other => return Err(Error::CallParse(format!("unknown filter operator '{}'", other))),
        })
    }
}

/// A row predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Filter {
    Compare {
        column: String,
        op: FilterOp,
        value: Value,
        negated: bool,
    },
    /// PostgREST logic-tree expression, e.g. `id.eq.2,name.eq.Han`
    Or {
        expression: String,
        foreign_table: Option<String>,
    },
}

impl Filter {
    pub fn compare(column: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Filter::Compare {
            column: column.into(),
            op,
            value,
            negated: false,
        }
    }

    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self::compare(column, FilterOp::Eq, value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
    pub nulls_first: Option<bool>,
    pub foreign_table: Option<String>,
}

/// Result shaping applied after the verb
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Modifiers {
    /// Projection requested with `.select()` after a mutation
    pub returning: Option<String>,
    pub order: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub range: Option<(u64, u64)>,
    pub single: bool,
    pub maybe_single: bool,
    pub explain: bool,
}

/// One fully described client call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientCall {
    pub target: CallTarget,
    pub action: CallAction,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub modifiers: Modifiers,
    /// Non-default schema selected with `.schema()`
    #[serde(default)]
    pub schema: Option<String>,
}

impl ClientCall {
    pub fn table(name: impl Into<String>, action: CallAction) -> Self {
        Self {
            target: CallTarget::Table { name: name.into() },
            action,
            filters: Vec::new(),
            modifiers: Modifiers::default(),
            schema: None,
        }
    }

    pub fn select(table: impl Into<String>, columns: Option<String>) -> Self {
        Self::table(
            table,
            CallAction::Select {
                columns,
                head: false,
                count: None,
            },
        )
    }

    pub fn insert(table: impl Into<String>, payload: Value) -> Self {
        Self::table(
            table,
            CallAction::Insert {
                payload,
                upsert: false,
                on_conflict: None,
                ignore_duplicates: false,
                count: None,
            },
        )
    }

    pub fn update(table: impl Into<String>, payload: Value) -> Self {
        Self::table(table, CallAction::Update { payload, count: None })
    }

    pub fn delete(table: impl Into<String>) -> Self {
        Self::table(table, CallAction::Delete { count: None })
    }

    pub fn rpc(function: impl Into<String>, params: Value) -> Self {
        Self {
            target: CallTarget::Rpc {
                function: function.into(),
                params,
            },
            action: CallAction::Select {
                columns: None,
                head: false,
                count: None,
            },
            filters: Vec::new(),
            modifiers: Modifiers::default(),
            schema: None,
        }
    }

    pub fn with_filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }

    pub fn returning(mut self, columns: impl Into<String>) -> Self {
        self.modifiers.returning = Some(columns.into());
        self
    }

    pub fn verb(&self) -> Verb {
        if matches!(self.target, CallTarget::Rpc { .. }) {
            return Verb::Rpc;
        }
        match &self.action {
            CallAction::Select { .. } => Verb::Select,
            CallAction::Insert { upsert: false, .. } => Verb::Insert,
            CallAction::Insert { upsert: true, .. } => Verb::Upsert,
            CallAction::Update { .. } => Verb::Update,
            CallAction::Delete { .. } => Verb::Delete,
        }
    }

    /// Whether a mutation asked for the affected rows back
    pub fn requests_projection(&self) -> bool {
        self.modifiers.returning.is_some()
    }

    pub fn is_head(&self) -> bool {
        matches!(self.action, CallAction::Select { head: true, .. })
    }

    /// Table or function name, for logs
    pub fn target_name(&self) -> &str {
        match &self.target {
            CallTarget::Table { name } => name,
            CallTarget::Rpc { function, .. } => function,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn verb_distinguishes_upsert() {
        let mut call = ClientCall::insert("countries", json!({"id": 1}));
        assert_eq!(call.verb(), Verb::Insert);
        if let CallAction::Insert { upsert, .. } = &mut call.action {
            *upsert = true;
        }
        assert_eq!(call.verb(), Verb::Upsert);
    }

    #[test]
    fn rpc_verb_wins_over_action() {
        let call = ClientCall::rpc("hello_world", json!({}));
        assert_eq!(call.verb(), Verb::Rpc);
        assert_eq!(call.target_name(), "hello_world");
    }

    #[test]
    fn filter_op_names() {
        assert_eq!("containedBy".parse::<FilterOp>().unwrap().postgrest_name(), "cd");
        let fts = FilterOp::TextSearch {
            kind: TextSearchKind::Websearch,
            config: Some("english".into()),
        };
        assert_eq!(fts.postgrest_name(), "wfts(english)");
        assert!("between".parse::<FilterOp>().is_err());
    }
}
