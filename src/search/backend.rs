//! Compiles bound query trees into tantivy queries

use crate::search::document::{
    autocomplete_field_name, autocomplete_words, numeric_field_name, schema_field_name,
    AUTOCOMPLETE_MAX_GRAM, CONTENT_TYPE_FIELD,
};
use crate::search::error::{SearchError, SearchResult};
use crate::search::query::{ContentTypeFilter, MatchOperator, QueryNode, ScoreFunction};
use crate::search::types::AnalysisType;
use std::collections::HashSet;
use tantivy::collector::{Collector, TopDocs};
use tantivy::query::{
    BooleanQuery, BoostQuery, ConstScoreQuery, DisjunctionMaxQuery, FuzzyTermQuery, Occur,
    PhraseQuery, Query, TermQuery,
};
use tantivy::schema::{Field, IndexRecordOption};
use tantivy::tokenizer::TokenStream;
use tantivy::{DocAddress, DocId, Index, Score, SegmentReader, Term};

/// Translates [`QueryNode`] trees for one tantivy index
pub struct TantivyBackend<'a> {
    index: &'a Index,
    suffixes: Vec<(AnalysisType, String)>,
}

/// Edit distance for fuzzy matching, following the usual AUTO rule
fn fuzzy_distance(token: &str) -> u8 {
    match token.chars().count() {
        0..=2 => 0,
        3..=5 => 1,
        _ => 2,
    }
}

/// Non-scoring exact-match filter on the content type labels of a document
pub fn content_type_term(index: &Index, label: &str) -> SearchResult<Box<dyn Query>> {
    let field = index.schema().get_field(CONTENT_TYPE_FIELD)?;
    let term = TermQuery::new(Term::from_field_text(field, label), IndexRecordOption::Basic);
    Ok(Box::new(ConstScoreQuery::new(Box::new(term), 0.0)))
}

/// Top `limit` hits after `offset`, each score multiplied by the decay of
/// every function whose field the document holds
pub fn scored_top_docs(
    functions: Vec<ScoreFunction>,
    limit: usize,
    offset: usize,
) -> impl Collector<Fruit = Vec<(Score, DocAddress)>> {
    TopDocs::with_limit(limit)
        .and_offset(offset)
        .tweak_score(move |segment_reader: &SegmentReader| {
            let columns: Vec<_> = functions
                .iter()
                .map(|function| {
                    let column = segment_reader
                        .fast_fields()
                        .f64(&numeric_field_name(&function.field))
                        .ok();
                    (function.clone(), column)
                })
                .collect();
            move |doc: DocId, score: Score| {
                columns.iter().fold(score, |score, (function, column)| {
                    match column.as_ref().and_then(|column| column.first(doc)) {
                        Some(value) => score * function.factor(value) as f32,
                        None => score,
                    }
                })
            }
        })
}

impl<'a> TantivyBackend<'a> {
    /// `suffixes` maps analyzers to the suffix the query builder appends to field names
    pub fn new(index: &'a Index, suffixes: Vec<(AnalysisType, String)>) -> Self {
        Self { index, suffixes }
    }

    /// Compile a bound tree; `None` when no part of it can match anything
    pub fn compile(&self, node: &QueryNode) -> SearchResult<Option<Box<dyn Query>>> {
        self.compile_with(node, &[], 1.0)
    }

    fn compile_with(
        &self,
        node: &QueryNode,
        fields: &[String],
        boost: f32,
    ) -> SearchResult<Option<Box<dyn Query>>> {
        let query: Option<Box<dyn Query>> = match node {
            QueryNode::Variable { query_type } => {
                return Err(SearchError::UnboundVariable(query_type.to_string()))
            }
            QueryNode::Phrase { text } => self.per_field(fields, |field| {
                let terms = self.terms(field, text)?;
                Ok(match terms.len() {
                    0 => None,
                    1 => terms.into_iter().next().map(|term| {
                        Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs))
                            as Box<dyn Query>
                    }),
                    _ if self.has_positions(field) => {
                        Some(Box::new(PhraseQuery::new(terms)) as Box<dyn Query>)
                    }
                    _ => Some(conjunction(terms)),
                })
            })?,
            QueryNode::Match { text, operator } => self.per_field(fields, |field| {
                let mut seen = HashSet::new();
                let mut terms = self.terms(field, text)?;
                terms.retain(|term| seen.insert(term.clone()));
                if terms.is_empty() {
                    return Ok(None);
                }
                Ok(Some(match operator {
                    MatchOperator::And => conjunction(terms),
                    MatchOperator::Or => disjunction(terms),
                }))
            })?,
            QueryNode::Fuzzy { text } => self.per_field(fields, |field| {
                let queries: Vec<(Occur, Box<dyn Query>)> = self
                    .tokens(field, text)?
                    .into_iter()
                    .map(|token| {
                        let term = Term::from_field_text(field, &token);
                        (
                            Occur::Should,
                            Box::new(FuzzyTermQuery::new(term, fuzzy_distance(&token), true))
                                as Box<dyn Query>,
                        )
                    })
                    .collect();
                Ok((!queries.is_empty()).then(|| Box::new(BooleanQuery::new(queries)) as Box<dyn Query>))
            })?,
            QueryNode::Autocomplete { text } => {
                let mut seen = HashSet::new();
                let prefixes: Vec<String> = autocomplete_words(text)
                    .map(|word| word.to_lowercase().chars().take(AUTOCOMPLETE_MAX_GRAM).collect())
                    .filter(|prefix: &String| seen.insert(prefix.clone()))
                    .collect();
                let mut queries = Vec::new();
                for name in fields {
                    let Ok(field) = self.index.schema().get_field(&autocomplete_field_name(name)) else {
                        continue;
                    };
                    if !prefixes.is_empty() {
                        queries.push(conjunction(
                            prefixes
                                .iter()
                                .map(|prefix| Term::from_field_text(field, prefix))
                                .collect(),
                        ));
                    }
                }
                match queries.len() {
                    0 => None,
                    1 => queries.pop(),
                    _ => Some(Box::new(DisjunctionMaxQuery::new(queries)) as Box<dyn Query>),
                }
            }
            QueryNode::Boost {
                boost: factor,
                subquery,
            } => {
                return self.compile_with(subquery, fields, boost * (*factor as f32));
            }
            QueryNode::OnlyFields {
                fields: only,
                subquery,
            } => return self.compile_with(subquery, only, boost),
            // nested objects are flattened into dotted fields at index time
            QueryNode::Nested { subquery, .. } => return self.compile_with(subquery, fields, boost),
            // applied at collection time by scored_top_docs
            QueryNode::FunctionScore { subquery, .. } => {
                return self.compile_with(subquery, fields, boost)
            }
            QueryNode::Filtered { subquery, filters } => {
                let Some(inner) = self.compile_with(subquery, fields, boost)? else {
                    return Ok(None);
                };
                let mut clauses = vec![(Occur::Must, inner)];
                for filter in filters {
                    match filter {
                        ContentTypeFilter::Contains(label) => {
                            clauses.push((Occur::Must, content_type_term(self.index, label)?))
                        }
                        ContentTypeFilter::Excludes(labels) => {
                            for label in labels {
                                clauses.push((Occur::MustNot, content_type_term(self.index, label)?));
                            }
                        }
                    }
                }
                return Ok(Some(Box::new(BooleanQuery::new(clauses))));
            }
            QueryNode::Or { subqueries } => {
                let mut clauses = Vec::new();
                for subquery in subqueries {
                    if let Some(query) = self.compile_with(subquery, fields, boost)? {
                        clauses.push((Occur::Should, query));
                    }
                }
                return Ok(match clauses.len() {
                    0 => None,
                    1 => clauses.pop().map(|(_, query)| query),
                    _ => Some(Box::new(BooleanQuery::new(clauses))),
                });
            }
        };

        Ok(query.map(|q| {
            if (boost - 1.0).abs() < f32::EPSILON {
                q
            } else {
                Box::new(BoostQuery::new(q, boost)) as Box<dyn Query>
            }
        }))
    }

    /// Run `build` on every resolvable field and take the best match among them
    fn per_field<F>(&self, fields: &[String], build: F) -> SearchResult<Option<Box<dyn Query>>>
    where
        F: Fn(Field) -> SearchResult<Option<Box<dyn Query>>>,
    {
        let mut queries = Vec::new();
        for name in fields {
            if let Some(field) = self.resolve_field(name) {
                if let Some(query) = build(field)? {
                    queries.push(query);
                }
            }
        }
        Ok(match queries.len() {
            0 => None,
            1 => queries.pop(),
            _ => Some(Box::new(DisjunctionMaxQuery::new(queries))),
        })
    }

    /// Map an analyzer-suffixed field name back to its tantivy field
    fn resolve_field(&self, indexed_name: &str) -> Option<Field> {
        let (path, analyzer) = self
            .suffixes
            .iter()
            .filter(|(_, suffix)| !suffix.is_empty() && indexed_name.ends_with(suffix.as_str()))
            .max_by_key(|(_, suffix)| suffix.len())
            .map(|(analyzer, suffix)| (&indexed_name[..indexed_name.len() - suffix.len()], *analyzer))
            .unwrap_or((indexed_name, AnalysisType::Tokenized));

        self.index
            .schema()
            .get_field(&schema_field_name(path, analyzer))
            .ok()
    }

    fn has_positions(&self, field: Field) -> bool {
        self.index
            .schema()
            .get_field_entry(field)
            .field_type()
            .get_index_record_option()
            .map(|option| option.has_positions())
            .unwrap_or(false)
    }

    /// Tokens produced by the field's own analyzer
    fn tokens(&self, field: Field, text: &str) -> SearchResult<Vec<String>> {
        let mut analyzer = self.index.tokenizer_for_field(field)?;
        let mut stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        stream.process(&mut |token| tokens.push(token.text.clone()));
        Ok(tokens)
    }

    fn terms(&self, field: Field, text: &str) -> SearchResult<Vec<Term>> {
        Ok(self
            .tokens(field, text)?
            .iter()
            .map(|token| Term::from_field_text(field, token))
            .collect())
    }
}

fn conjunction(terms: Vec<Term>) -> Box<dyn Query> {
    combine_terms(terms, Occur::Must)
}

fn disjunction(terms: Vec<Term>) -> Box<dyn Query> {
    combine_terms(terms, Occur::Should)
}

fn combine_terms(terms: Vec<Term>, occur: Occur) -> Box<dyn Query> {
    Box::new(BooleanQuery::new(
        terms
            .into_iter()
            .map(|term| {
                (
                    occur,
                    Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs)) as Box<dyn Query>,
                )
            })
            .collect(),
    ))
}
