use std::path::Path;

use ahash::AHashMap;
use anyhow::{Context, Result as AnyResult};
use common::{
    DocumentStore, EngineError, FieldTermConfig, IngestReport, JsonLines, Language, LexicalQuery,
    NewsDocument, Result, ScoredHit, TermStat,
};
use tantivy::{
    DocAddress, DocSet, Index, IndexReader, IndexWriter, Searcher, TantivyDocument, Term,
    collector::{Count, TopDocs},
    query::{BooleanQuery, EnableScoring, Occur, Query, Scorer, TermQuery, Weight},
    schema::{
        FAST, Field, INDEXED, IndexRecordOption, STORED, STRING, Schema, TextFieldIndexing,
        TextOptions, Value,
    },
    tokenizer::{
        Language as StemLanguage, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer,
        TextAnalyzer, TokenStream,
    },
};

const WRITER_HEAP_BYTES: usize = 50_000_000;

pub struct TantivyDocumentStore {
    index: Index,
    reader: IndexReader,
    fields: StoreFields,
}

#[derive(Clone, Copy)]
struct StoreFields {
    id: Field,
    title: Field,
    body: Field,
    published: Field,
}

impl TantivyDocumentStore {
    pub fn new_in_memory(language: Language) -> AnyResult<Self> {
        let index = Index::create_in_ram(build_schema(language));
        from_index(index)
    }

    pub fn open_or_create_on_disk(index_dir: &Path, language: Language) -> AnyResult<Self> {
        std::fs::create_dir_all(index_dir)
            .with_context(|| format!("failed creating index dir {}", index_dir.display()))?;
        let index = if index_dir.join("meta.json").exists() {
            Index::open_in_dir(index_dir)?
        } else {
            Index::create_in_dir(index_dir, build_schema(language))?
        };
        from_index(index)
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn index_documents<I>(&self, docs: I) -> AnyResult<u64>
    where
        I: IntoIterator<Item = NewsDocument>,
    {
        let mut writer: IndexWriter = self.index.writer(WRITER_HEAP_BYTES)?;
        let mut added = 0u64;
        for doc in docs {
            self.write_document(&mut writer, &doc)?;
            added += 1;
        }
        writer.commit()?;
        self.reader.reload()?;
        Ok(added)
    }

    pub fn index_file(&self, input: &Path) -> AnyResult<IngestReport> {
        let mut writer: IndexWriter = self.index.writer(WRITER_HEAP_BYTES)?;
        let mut report = IngestReport::default();
        for (line_no, parsed) in JsonLines::<NewsDocument>::open(input)? {
            report.processed += 1;
            match parsed {
                Ok(doc) if doc.id.trim().is_empty() => report.skipped_no_id += 1,
                Ok(doc) => {
                    self.write_document(&mut writer, &doc)?;
                    report.inserted += 1;
                }
                Err(err) => {
                    tracing::warn!(line = line_no, error = %err, "skipping unparseable document");
                    report.skipped_unparseable += 1;
                }
            }
        }
        writer.commit()?;
        self.reader.reload()?;
        tracing::info!(
            input = %input.display(),
            processed = report.processed,
            indexed = report.inserted,
            skipped = report.skipped(),
            "document indexing finished"
        );
        Ok(report)
    }

    fn write_document(&self, writer: &mut IndexWriter, doc: &NewsDocument) -> AnyResult<()> {
        writer.delete_term(Term::from_field_text(self.fields.id, &doc.id));
        let mut out = TantivyDocument::default();
        out.add_text(self.fields.id, &doc.id);
        out.add_text(self.fields.title, &doc.title);
        out.add_text(self.fields.body, &doc.body);
        out.add_i64(self.fields.published, doc.published);
        writer.add_document(out)?;
        Ok(())
    }

    fn address_of(&self, searcher: &Searcher, id: &str) -> AnyResult<Option<DocAddress>> {
        let query = TermQuery::new(
            Term::from_field_text(self.fields.id, id),
            IndexRecordOption::Basic,
        );
        let hits = searcher.search(&query, &TopDocs::with_limit(1))?;
        Ok(hits.first().map(|(_, address)| *address))
    }

    fn field(&self, name: &str) -> Result<Field> {
        match name {
            "title" => Ok(self.fields.title),
            "body" => Ok(self.fields.body),
            other => Err(EngineError::Configuration(format!(
                "unknown text field: {other}"
            ))),
        }
    }

    fn boolean_query(&self, query: &LexicalQuery) -> Result<BooleanQuery> {
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for name in &query.fields {
            let field = self.field(name)?;
            for term in &query.terms {
                clauses.push((
                    Occur::Should,
                    Box::new(TermQuery::new(
                        Term::from_field_text(field, &term.to_lowercase()),
                        IndexRecordOption::WithFreqs,
                    )),
                ));
            }
        }
        Ok(BooleanQuery::new(clauses))
    }

    fn search_hits(&self, query: &LexicalQuery, size: usize) -> AnyResult<Vec<ScoredHit>> {
        let searcher = self.reader.searcher();
        let parsed = self.boolean_query(query)?;
        let docs = searcher.search(&parsed, &TopDocs::with_limit(size))?;

        let mut out = Vec::with_capacity(docs.len());
        for (score, address) in docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            let id = text_value(&doc, self.fields.id);
            if !id.is_empty() {
                out.push(ScoredHit { id, score });
            }
        }
        Ok(out)
    }

    fn term_stats(&self, id: &str, filter: &FieldTermConfig) -> AnyResult<Option<Vec<TermStat>>> {
        let field = self.field(&filter.field)?;
        let searcher = self.reader.searcher();
        let Some(address) = self.address_of(&searcher, id)? else {
            return Ok(None);
        };
        let doc: TantivyDocument = searcher.doc(address)?;
        let text = text_value(&doc, field);

        let mut analyzer = self.index.tokenizer_for_field(field)?;
        let mut counts: AHashMap<String, u32> = AHashMap::new();
        let mut stream = analyzer.token_stream(&text);
        while stream.advance() {
            *counts.entry(stream.token().text.clone()).or_insert(0) += 1;
        }

        let total = searcher.num_docs() as f32;
        let mut stats = Vec::new();
        for (term, term_freq) in counts {
            if term_freq < filter.min_term_freq {
                continue;
            }
            let doc_freq = live_doc_freq(&searcher, Term::from_field_text(field, &term))?;
            if u64::from(doc_freq) < filter.min_doc_freq {
                continue;
            }
            let df = doc_freq as f32;
            let idf = (1.0 + (total - df + 0.5) / (df + 0.5)).ln();
            stats.push(TermStat {
                score: term_freq as f32 * idf,
                term,
                term_freq,
                doc_freq: doc_freq.into(),
            });
        }
        stats.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.term.cmp(&b.term)));
        stats.truncate(filter.max_terms);
        Ok(Some(stats))
    }

    fn explain_score(&self, id: &str, query: &LexicalQuery) -> Result<f32> {
        if query.is_empty() {
            return Ok(0.0);
        }
        let searcher = self.reader.searcher();
        let address = self
            .address_of(&searcher, id)?
            .ok_or_else(|| EngineError::not_found(id))?;
        let parsed = self.boolean_query(query)?;
        Ok(scored_at(&searcher, &parsed, address)?)
    }
}

impl DocumentStore for TantivyDocumentStore {
    fn get(&self, id: &str) -> AnyResult<Option<NewsDocument>> {
        let searcher = self.reader.searcher();
        let Some(address) = self.address_of(&searcher, id)? else {
            return Ok(None);
        };
        let doc: TantivyDocument = searcher.doc(address)?;
        Ok(Some(NewsDocument {
            id: text_value(&doc, self.fields.id),
            title: text_value(&doc, self.fields.title),
            body: text_value(&doc, self.fields.body),
            published: doc
                .get_first(self.fields.published)
                .and_then(|value| value.as_i64())
                .unwrap_or_default(),
        }))
    }

    fn search(&self, query: &LexicalQuery, size: usize) -> Result<Vec<ScoredHit>> {
        if query.is_empty() || size == 0 {
            return Ok(Vec::new());
        }
        Ok(self.search_hits(query, size)?)
    }

    fn term_vectors(&self, id: &str, filter: &FieldTermConfig) -> Result<Option<Vec<TermStat>>> {
        Ok(self.term_stats(id, filter)?)
    }

    fn explain(&self, id: &str, query: &LexicalQuery) -> Result<f32> {
        self.explain_score(id, query)
    }
}

// `Searcher::doc_freq` still counts replaced documents until their segment merges.
fn live_doc_freq(searcher: &Searcher, term: Term) -> AnyResult<u32> {
    let query = TermQuery::new(term, IndexRecordOption::Basic);
    let count = searcher.search(&query, &Count)?;
    Ok(u32::try_from(count).unwrap_or(u32::MAX))
}

fn scored_at(searcher: &Searcher, query: &dyn Query, address: DocAddress) -> AnyResult<f32> {
    let weight = query.weight(EnableScoring::enabled_from_searcher(searcher))?;
    let segment = searcher.segment_reader(address.segment_ord);
    let mut scorer = weight.scorer(segment, 1.0)?;
    let current = scorer.doc();
    let hit = current == address.doc_id
        || (current < address.doc_id && scorer.seek(address.doc_id) == address.doc_id);
    Ok(if hit { scorer.score() } else { 0.0 })
}

fn text_value(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|value| value.as_str())
        .unwrap_or_default()
        .to_string()
}

const fn analyzer_name(language: Language) -> &'static str {
    match language {
        Language::German => "news_de",
        Language::English => "news_en",
    }
}

fn analyzer(language: Language) -> TextAnalyzer {
    let stem = match language {
        Language::German => StemLanguage::German,
        Language::English => StemLanguage::English,
    };
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(stem))
        .build()
}

fn build_schema(language: Language) -> Schema {
    let text = TextOptions::default().set_stored().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(analyzer_name(language))
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    );
    let mut schema_builder = Schema::builder();
    let _ = schema_builder.add_text_field("id", STRING | STORED);
    let _ = schema_builder.add_text_field("title", text.clone());
    let _ = schema_builder.add_text_field("body", text);
    let _ = schema_builder.add_i64_field("published", INDEXED | STORED | FAST);
    schema_builder.build()
}

fn from_index(index: Index) -> AnyResult<TantivyDocumentStore> {
    for language in [Language::German, Language::English] {
        index
            .tokenizers()
            .register(analyzer_name(language), analyzer(language));
    }
    let schema = index.schema();
    let fields = StoreFields {
        id: schema.get_field("id")?,
        title: schema.get_field("title")?,
        body: schema.get_field("body")?,
        published: schema.get_field("published")?,
    };
    let reader = index.reader()?;
    Ok(TantivyDocumentStore {
        index,
        reader,
        fields,
    })
}
