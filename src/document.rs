//! Input document model for segment builds.
//!
//! Documents arrive already analyzed: text fields carry their stored bytes
//! plus the token frequencies and locations an analyzer produced, vector
//! fields carry raw floats, and synonym fields carry synonym definitions.
//! The builder only ever sees documents through the [`IndexDocument`]
//! visitor contract, so callers can index their own types without copying
//! them into [`Document`].

use serde::{Deserialize, Serialize};

use crate::vector::{IndexOptimization, VectorMetric};

/// Name of the implicit identifier field every document carries.
pub const ID_FIELD: &str = "_id";

/// Type byte recorded with stored text values.
pub const TEXT_TYPE: u8 = b't';

/// Per-field indexing flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOptions {
    /// Keep the raw value in the stored-fields area.
    pub stored: bool,
    /// Add the field's tokens to the term dictionary.
    pub indexed: bool,
    /// Record the field's terms per document for value lookup.
    pub doc_values: bool,
}

impl FieldOptions {
    const STORED: u8 = 0x01;
    const INDEXED: u8 = 0x02;
    const DOC_VALUES: u8 = 0x04;

    /// Pack into the low three bits of a byte.
    pub fn to_bits(self) -> u8 {
        let mut bits = 0;
        if self.stored {
            bits |= Self::STORED;
        }
        if self.indexed {
            bits |= Self::INDEXED;
        }
        if self.doc_values {
            bits |= Self::DOC_VALUES;
        }
        bits
    }

    /// Unpack from the low three bits of a byte.
    pub fn from_bits(bits: u8) -> Self {
        FieldOptions {
            stored: bits & Self::STORED != 0,
            indexed: bits & Self::INDEXED != 0,
            doc_values: bits & Self::DOC_VALUES != 0,
        }
    }
}

impl Default for FieldOptions {
    fn default() -> Self {
        FieldOptions {
            stored: true,
            indexed: true,
            doc_values: false,
        }
    }
}

/// One occurrence of a term within a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLocation {
    /// 1-based token position.
    pub position: u64,
    /// Byte offset of the token start.
    pub start: u64,
    /// Byte offset one past the token end.
    pub end: u64,
    /// Array indexes when the field value sits inside nested arrays.
    pub array_positions: Vec<u64>,
}

/// Analyzed frequency of one term within a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenFreq {
    pub term: Vec<u8>,
    pub frequency: u64,
    /// Either empty or exactly `frequency` entries.
    pub locations: Vec<TokenLocation>,
}

impl TokenFreq {
    /// A term occurring `frequency` times without location data.
    pub fn new<T: Into<Vec<u8>>>(term: T, frequency: u64) -> Self {
        TokenFreq {
            term: term.into(),
            frequency,
            locations: Vec::new(),
        }
    }
}

/// Dense vector payload of a vector field.
///
/// `data` holds one or more vectors of `dims` floats back to back; a
/// document may own several vectors in the same field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPayload {
    pub dims: usize,
    pub data: Vec<f32>,
    pub metric: VectorMetric,
    pub optimized_for: IndexOptimization,
}

impl VectorPayload {
    pub fn new(dims: usize, data: Vec<f32>, metric: VectorMetric) -> Self {
        VectorPayload {
            dims,
            data,
            metric,
            optimized_for: IndexOptimization::default(),
        }
    }

    /// Iterate over the individual vectors.
    pub fn vectors(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dims.max(1))
    }

    /// Number of vectors in the payload.
    pub fn len(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A synonym rule.
///
/// With a non-empty `input`, every input term maps to every synonym
/// (explicit mapping). With an empty `input`, the synonyms are treated as
/// equivalent and each one maps to all of the others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynonymDefinition {
    pub input: Vec<String>,
    pub synonyms: Vec<String>,
}

impl SynonymDefinition {
    /// Explicit `input => synonyms` mapping.
    pub fn mapping<I, S>(input: I, synonyms: S) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
    {
        SynonymDefinition {
            input: input.into_iter().map(Into::into).collect(),
            synonyms: synonyms.into_iter().map(Into::into).collect(),
        }
    }

    /// Equivalence class of interchangeable terms.
    pub fn equivalent<S>(synonyms: S) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
    {
        SynonymDefinition {
            input: Vec::new(),
            synonyms: synonyms.into_iter().map(Into::into).collect(),
        }
    }

    /// Every `(term, synonym)` pair the rule produces.
    pub fn pairs(&self) -> Vec<(&str, &str)> {
        let mut pairs = Vec::new();
        if self.input.is_empty() {
            for term in &self.synonyms {
                for synonym in &self.synonyms {
                    if term != synonym {
                        pairs.push((term.as_str(), synonym.as_str()));
                    }
                }
            }
        } else {
            for term in &self.input {
                for synonym in &self.synonyms {
                    if term != synonym {
                        pairs.push((term.as_str(), synonym.as_str()));
                    }
                }
            }
        }
        pairs
    }
}

/// Typed payload of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Text (or any encoded scalar) with its type byte.
    Text { type_byte: u8, value: Vec<u8> },
    /// Dense vectors.
    Vector(VectorPayload),
    /// Synonym rules.
    Synonyms(Vec<SynonymDefinition>),
}

/// One field of an input document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,
    pub options: FieldOptions,
    pub tokens: Vec<TokenFreq>,
    /// Number of tokens in the field value, used for the norm factor.
    pub length: u64,
    pub array_positions: Vec<u64>,
}

impl Field {
    /// A text field with pre-analyzed tokens.
    pub fn text_with_tokens<N, V>(name: N, value: V, tokens: Vec<TokenFreq>) -> Self
    where
        N: Into<String>,
        V: Into<Vec<u8>>,
    {
        let length = tokens.iter().map(|t| t.frequency).sum();
        Field {
            name: name.into(),
            value: FieldValue::Text {
                type_byte: TEXT_TYPE,
                value: value.into(),
            },
            options: FieldOptions::default(),
            tokens,
            length,
            array_positions: Vec::new(),
        }
    }

    /// A text field split on whitespace, with positions and byte offsets.
    ///
    /// This is a convenience for callers without an analyzer; terms are
    /// kept verbatim.
    pub fn text<N: Into<String>>(name: N, text: &str) -> Self {
        let mut tokens: Vec<TokenFreq> = Vec::new();
        let mut position = 0u64;
        let mut offset = 0usize;

        for word in text.split_whitespace() {
            // split_whitespace yields subslices of `text`, so this finds
            // the word's own start.
            let start = offset + text[offset..].find(word).unwrap_or(0);
            let end = start + word.len();
            offset = end;
            position += 1;

            let location = TokenLocation {
                position,
                start: start as u64,
                end: end as u64,
                array_positions: Vec::new(),
            };
            match tokens.iter_mut().find(|t| t.term == word.as_bytes()) {
                Some(token) => {
                    token.frequency += 1;
                    token.locations.push(location);
                }
                None => tokens.push(TokenFreq {
                    term: word.as_bytes().to_vec(),
                    frequency: 1,
                    locations: vec![location],
                }),
            }
        }

        Field::text_with_tokens(name, text.as_bytes(), tokens)
    }

    /// A keyword field: the whole value is a single token without locations.
    pub fn keyword<N: Into<String>>(name: N, value: &str) -> Self {
        let tokens = vec![TokenFreq::new(value.as_bytes(), 1)];
        Field::text_with_tokens(name, value.as_bytes(), tokens)
    }

    /// A vector field.
    pub fn vector<N: Into<String>>(name: N, payload: VectorPayload) -> Self {
        Field {
            name: name.into(),
            value: FieldValue::Vector(payload),
            options: FieldOptions {
                stored: false,
                indexed: true,
                doc_values: false,
            },
            tokens: Vec::new(),
            length: 0,
            array_positions: Vec::new(),
        }
    }

    /// A synonym field.
    pub fn synonyms<N: Into<String>>(name: N, definitions: Vec<SynonymDefinition>) -> Self {
        Field {
            name: name.into(),
            value: FieldValue::Synonyms(definitions),
            options: FieldOptions {
                stored: false,
                indexed: true,
                doc_values: false,
            },
            tokens: Vec::new(),
            length: 0,
            array_positions: Vec::new(),
        }
    }

    /// A composite field indexing the tokens of several other fields.
    ///
    /// Composites are indexed only; they are never stored.
    pub fn composite<N: Into<String>>(name: N, sources: &[&Field]) -> Self {
        let mut tokens: Vec<TokenFreq> = Vec::new();
        let mut length = 0;
        for source in sources {
            length += source.length;
            for token in &source.tokens {
                match tokens.iter_mut().find(|t| t.term == token.term) {
                    Some(existing) => {
                        existing.frequency += token.frequency;
                        existing.locations.extend(token.locations.iter().cloned());
                    }
                    None => tokens.push(token.clone()),
                }
            }
        }
        // Location lists must stay all-or-nothing per term.
        for token in &mut tokens {
            if token.locations.len() as u64 != token.frequency {
                token.locations.clear();
            }
        }

        Field {
            name: name.into(),
            value: FieldValue::Text {
                type_byte: TEXT_TYPE,
                value: Vec::new(),
            },
            options: FieldOptions {
                stored: false,
                indexed: true,
                doc_values: false,
            },
            tokens,
            length,
            array_positions: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: FieldOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_array_positions(mut self, array_positions: Vec<u64>) -> Self {
        self.array_positions = array_positions;
        self
    }

    /// Whether the field carries a vector payload.
    pub fn is_vector(&self) -> bool {
        matches!(self.value, FieldValue::Vector(_))
    }

    /// Whether the field carries synonym rules.
    pub fn is_synonym(&self) -> bool {
        matches!(self.value, FieldValue::Synonyms(_))
    }

    /// Stored text bytes and type byte, if this is a text field.
    pub fn text_value(&self) -> Option<(u8, &[u8])> {
        match &self.value {
            FieldValue::Text { type_byte, value } => Some((*type_byte, value.as_slice())),
            _ => None,
        }
    }
}

/// Visitor contract the segment builder consumes.
pub trait IndexDocument {
    /// Visit every regular field, in document order.
    fn visit_fields(&self, visitor: &mut dyn FnMut(&Field));

    /// Visit every composite field.
    fn visit_composite(&self, visitor: &mut dyn FnMut(&Field));
}

/// A concrete document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    fields: Vec<Field>,
    composites: Vec<Field>,
}

impl Document {
    /// A document with the given identifier.
    ///
    /// The identifier is stored and indexed as a single term so segments
    /// can resolve external ids to document numbers.
    pub fn new(id: &str) -> Self {
        Document {
            fields: vec![Field::keyword(ID_FIELD, id)],
            composites: Vec::new(),
        }
    }

    /// A document without an identifier. Builds reject these; useful for
    /// assembling fields before the id is known.
    pub fn without_id() -> Self {
        Document::default()
    }

    pub fn add_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn add_composite(mut self, field: Field) -> Self {
        self.composites.push(field);
        self
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn composites(&self) -> &[Field] {
        &self.composites
    }

    /// The identifier bytes, if an `_id` text field is present.
    pub fn id(&self) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|f| f.name == ID_FIELD)
            .and_then(|f| f.text_value())
            .map(|(_, value)| value)
    }
}

impl IndexDocument for Document {
    fn visit_fields(&self, visitor: &mut dyn FnMut(&Field)) {
        for field in &self.fields {
            visitor(field);
        }
    }

    fn visit_composite(&self, visitor: &mut dyn FnMut(&Field)) {
        for field in &self.composites {
            visitor(field);
        }
    }
}
