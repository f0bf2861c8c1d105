//! Backend-neutral search query tree
//!
//! Query templates are built once per model with [`QueryNode::Variable`]
//! placeholders and bound to the user's text with
//! [`QueryNode::swap_variables`]. Bound trees render to Elasticsearch DSL here
//! and compile to tantivy queries in the backend module.

use crate::search::error::{SearchError, SearchResult};
use crate::search::types::{AnalysisType, SearchQueryType};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchOperator {
    And,
    Or,
}

/// Restriction on the content types a branch of the query applies to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentTypeFilter {
    Contains(String),
    Excludes(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum QueryNode {
    /// Placeholder for the user's text, bound later
    Variable { query_type: SearchQueryType },
    Phrase { text: String },
    Match { text: String, operator: MatchOperator },
    Fuzzy { text: String },
    /// Every word must start a word of the field; built already bound
    Autocomplete { text: String },
    Boost { boost: f64, subquery: Box<QueryNode> },
    OnlyFields { fields: Vec<String>, subquery: Box<QueryNode> },
    Nested { path: String, subquery: Box<QueryNode> },
    Filtered {
        subquery: Box<QueryNode>,
        filters: Vec<ContentTypeFilter>,
    },
    Or { subqueries: Vec<QueryNode> },
    /// Rescale the subquery's scores by a decay over a numeric field
    FunctionScore {
        subquery: Box<QueryNode>,
        function: ScoreFunction,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DecayFunction {
    Linear,
    Exp,
    Gauss,
}

/// Decay applied to a document's score based on how far a numeric field
/// sits from `origin`. Scores are multiplied by the decay factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreFunction {
    pub decay_function: DecayFunction,
    pub field: String,
    pub origin: f64,
    pub offset: f64,
    pub scale: f64,
    pub decay: f64,
}

impl ScoreFunction {
    pub fn linear(field: impl Into<String>, origin: f64, offset: f64, scale: f64, decay: f64) -> Self {
        Self {
            decay_function: DecayFunction::Linear,
            field: field.into(),
            origin,
            offset,
            scale,
            decay,
        }
    }

    /// Multiplier in `[0, 1]` for a document whose field holds `value`
    pub fn factor(&self, value: f64) -> f64 {
        let distance = ((value - self.origin).abs() - self.offset).max(0.0);
        match self.decay_function {
            DecayFunction::Linear => {
                let s = self.scale / (1.0 - self.decay);
                ((s - distance) / s).max(0.0)
            }
            DecayFunction::Exp => (self.decay.ln() / self.scale * distance).exp(),
            DecayFunction::Gauss => {
                let sigma_sq = -self.scale.powi(2) / (2.0 * self.decay.ln());
                (-distance.powi(2) / (2.0 * sigma_sq)).exp()
            }
        }
    }

    fn to_dsl(&self) -> Value {
        let mut placement = Map::new();
        placement.insert(
            self.field.clone(),
            json!({
                "origin": self.origin,
                "offset": self.offset,
                "scale": self.scale,
                "decay": self.decay,
            }),
        );
        let mut function = Map::new();
        function.insert(self.decay_function.to_string(), Value::Object(placement));
        Value::Object(function)
    }
}

/// One weighted leaf of a model's query, as listed on the explore page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLeafInfo {
    pub query_type: SearchQueryType,
    pub field: String,
    pub analyzer: AnalysisType,
    pub boost: f64,
}

impl QueryNode {
    pub fn variable(query_type: SearchQueryType) -> Self {
        QueryNode::Variable { query_type }
    }

    pub fn boosted(self, boost: f64) -> Self {
        QueryNode::Boost {
            boost,
            subquery: Box::new(self),
        }
    }

    pub fn only_fields(self, fields: Vec<String>) -> Self {
        QueryNode::OnlyFields {
            fields,
            subquery: Box::new(self),
        }
    }

    pub fn nested(self, path: impl Into<String>) -> Self {
        QueryNode::Nested {
            path: path.into(),
            subquery: Box::new(self),
        }
    }

    pub fn filtered(self, filters: Vec<ContentTypeFilter>) -> Self {
        QueryNode::Filtered {
            subquery: Box::new(self),
            filters,
        }
    }

    /// Disjunction of the nodes, flattening nested ORs; `None` when empty
    pub fn or(nodes: impl IntoIterator<Item = QueryNode>) -> Option<QueryNode> {
        let mut flat = Vec::new();
        for node in nodes {
            match node {
                QueryNode::Or { subqueries } => flat.extend(subqueries),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(QueryNode::Or { subqueries: flat }),
        }
    }

    pub fn scored_by(self, function: ScoreFunction) -> Self {
        QueryNode::FunctionScore {
            subquery: Box::new(self),
            function,
        }
    }

    /// Score functions applying to the tree, outermost first
    pub fn score_functions(&self) -> Vec<&ScoreFunction> {
        let mut functions = Vec::new();
        self.collect_score_functions(&mut functions);
        functions
    }

    fn collect_score_functions<'a>(&'a self, functions: &mut Vec<&'a ScoreFunction>) {
        match self {
            QueryNode::FunctionScore { subquery, function } => {
                functions.push(function);
                subquery.collect_score_functions(functions);
            }
            QueryNode::Boost { subquery, .. }
            | QueryNode::OnlyFields { subquery, .. }
            | QueryNode::Nested { subquery, .. }
            | QueryNode::Filtered { subquery, .. } => subquery.collect_score_functions(functions),
            QueryNode::Or { subqueries } => {
                for q in subqueries {
                    q.collect_score_functions(functions);
                }
            }
            _ => {}
        }
    }

    /// OR two optional queries together
    pub fn combine(left: Option<QueryNode>, right: Option<QueryNode>) -> Option<QueryNode> {
        QueryNode::or(left.into_iter().chain(right))
    }

    /// Bind placeholders to `text`, pruning branches left with nothing to match
    pub fn swap_variables(&self, text: &str) -> Option<QueryNode> {
        match self {
            QueryNode::Variable { query_type } => bind_variable(*query_type, text),
            QueryNode::Phrase { .. }
            | QueryNode::Match { .. }
            | QueryNode::Fuzzy { .. }
            | QueryNode::Autocomplete { .. } => Some(self.clone()),
            QueryNode::Boost { boost, subquery } => {
                subquery.swap_variables(text).map(|q| q.boosted(*boost))
            }
            QueryNode::OnlyFields { fields, subquery } => subquery
                .swap_variables(text)
                .map(|q| q.only_fields(fields.clone())),
            QueryNode::Nested { path, subquery } => {
                subquery.swap_variables(text).map(|q| q.nested(path.clone()))
            }
            QueryNode::Filtered { subquery, filters } => subquery
                .swap_variables(text)
                .map(|q| q.filtered(filters.clone())),
            QueryNode::Or { subqueries } => {
                QueryNode::or(subqueries.iter().filter_map(|q| q.swap_variables(text)))
            }
            QueryNode::FunctionScore { subquery, function } => subquery
                .swap_variables(text)
                .map(|q| q.scored_by(function.clone())),
        }
    }

    /// Render as an Elasticsearch query body
    pub fn to_dsl(&self) -> SearchResult<Value> {
        self.render_dsl(&[], 1.0)
    }

    fn render_dsl(&self, fields: &[String], boost: f64) -> SearchResult<Value> {
        let fields: Vec<String> = if fields.is_empty() {
            vec!["*".to_string()]
        } else {
            fields.to_vec()
        };

        Ok(match self {
            QueryNode::Variable { query_type } => {
                return Err(SearchError::UnboundVariable(query_type.to_string()))
            }
            QueryNode::Phrase { text } => json!({
                "multi_match": {
                    "query": text,
                    "fields": fields,
                    "type": "phrase",
                    "boost": boost,
                }
            }),
            QueryNode::Match { text, operator } => json!({
                "multi_match": {
                    "query": text,
                    "fields": fields,
                    "operator": operator.to_string(),
                    "boost": boost,
                }
            }),
            QueryNode::Fuzzy { text } => json!({
                "multi_match": {
                    "query": text,
                    "fields": fields,
                    "fuzziness": "AUTO",
                    "boost": boost,
                }
            }),
            QueryNode::Autocomplete { text } => json!({
                "multi_match": {
                    "query": text,
                    "fields": fields,
                    "type": "bool_prefix",
                    "operator": "and",
                    "boost": boost,
                }
            }),
            QueryNode::Boost {
                boost: factor,
                subquery,
            } => subquery.render_dsl(&fields, boost * factor)?,
            QueryNode::OnlyFields {
                fields: only,
                subquery,
            } => subquery.render_dsl(only, boost)?,
            QueryNode::Nested { path, subquery } => json!({
                "nested": {
                    "path": path,
                    "query": subquery.render_dsl(&fields, boost)?,
                }
            }),
            QueryNode::Filtered { subquery, filters } => {
                let mut filter = Vec::new();
                let mut must_not = Vec::new();
                for f in filters {
                    match f {
                        ContentTypeFilter::Contains(label) => {
                            filter.push(json!({ "match": { "content_type": label } }))
                        }
                        ContentTypeFilter::Excludes(labels) => {
                            must_not.push(json!({ "terms": { "content_type": labels } }))
                        }
                    }
                }
                json!({
                    "bool": {
                        "must": subquery.render_dsl(&fields, boost)?,
                        "filter": filter,
                        "must_not": must_not,
                    }
                })
            }
            QueryNode::Or { subqueries } => {
                let should = subqueries
                    .iter()
                    .map(|q| q.render_dsl(&fields, boost))
                    .collect::<SearchResult<Vec<_>>>()?;
                json!({ "bool": { "should": should } })
            }
            QueryNode::FunctionScore { subquery, function } => json!({
                "function_score": {
                    "query": subquery.render_dsl(&fields, boost)?,
                    "functions": [function.to_dsl()],
                    "boost_mode": "multiply",
                }
            }),
        })
    }

    /// List the weighted leaves of a template that apply once bound to `text`.
    ///
    /// `suffixes` maps each analyzer to its index field name suffix; a field
    /// with no matching suffix is reported as tokenized.
    pub fn query_info(&self, text: &str, suffixes: &[(AnalysisType, String)]) -> Vec<QueryLeafInfo> {
        let mut info = Vec::new();
        self.collect_info(text, suffixes, &mut info);
        info
    }

    fn collect_info(
        &self,
        text: &str,
        suffixes: &[(AnalysisType, String)],
        info: &mut Vec<QueryLeafInfo>,
    ) {
        match self {
            QueryNode::Or { subqueries } => {
                for q in subqueries {
                    q.collect_info(text, suffixes, info);
                }
            }
            QueryNode::Nested { subquery, .. }
            | QueryNode::Filtered { subquery, .. }
            | QueryNode::FunctionScore { subquery, .. } => {
                subquery.collect_info(text, suffixes, info)
            }
            QueryNode::OnlyFields { fields, subquery } => {
                let QueryNode::Boost { boost, subquery: core } = subquery.as_ref() else {
                    return;
                };
                let QueryNode::Variable { query_type } = core.as_ref() else {
                    return;
                };
                if core.swap_variables(text).is_none() {
                    return;
                }
                let Some(field) = fields.first() else {
                    return;
                };
                let analyzer = suffixes
                    .iter()
                    .filter(|(_, suffix)| !suffix.is_empty() && field.ends_with(suffix.as_str()))
                    .map(|(analyzer, _)| *analyzer)
                    .last()
                    .unwrap_or(AnalysisType::Tokenized);
                info.push(QueryLeafInfo {
                    query_type: *query_type,
                    field: field.clone(),
                    analyzer,
                    boost: *boost,
                });
            }
            _ => {}
        }
    }
}

fn bind_variable(query_type: SearchQueryType, text: &str) -> Option<QueryNode> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let node = match query_type {
        SearchQueryType::Phrase => QueryNode::Phrase {
            text: text.to_string(),
        },
        // a single word needs no AND; it becomes a plain term match
        SearchQueryType::QueryAnd => QueryNode::Match {
            text: text.to_string(),
            operator: if text.split_whitespace().count() > 1 {
                MatchOperator::And
            } else {
                MatchOperator::Or
            },
        },
        SearchQueryType::QueryOr => QueryNode::Match {
            text: text.to_string(),
            operator: MatchOperator::Or,
        },
        SearchQueryType::Fuzzy => QueryNode::Fuzzy {
            text: text.to_string(),
        },
    };
    Some(node)
}

/// Median of the distinct boosts (rounded to 2dp) among the leaves; 0 when there are none
pub fn median_boost(leaves: &[QueryLeafInfo]) -> f64 {
    let mut boosts: Vec<i64> = leaves
        .iter()
        .map(|leaf| (leaf.boost * 100.0).round() as i64)
        .collect();
    boosts.sort_unstable();
    boosts.dedup();

    match boosts.len() {
        0 => 0.0,
        n if n % 2 == 1 => boosts[n / 2] as f64 / 100.0,
        n => (boosts[n / 2 - 1] + boosts[n / 2]) as f64 / 200.0,
    }
}
