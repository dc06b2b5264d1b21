//! Troceado de documentos en chunks solapados.
//!
//! Los cortes se buscan por prioridad: párrafo → línea → frase → palabra y,
//! si no hay ningún separador dentro del presupuesto, carácter. Todas las
//! medidas son en caracteres, nunca en bytes.

use anyhow::{ensure, Result};

use crate::models::{Chunk, Document};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Separadores por nivel de prioridad. El separador queda al final del chunk
/// que se corta.
const SEPARATORS: &[&[&str]] = &[
    &["\n\n"],
    &["\n"],
    &[". ", "! ", "? "],
    &[" ", "\t"],
];

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        ensure!(chunk_size > 0, "El tamaño de chunk debe ser mayor que 0");
        ensure!(
            chunk_overlap < chunk_size,
            "El solape ({chunk_overlap}) debe ser menor que el tamaño de chunk ({chunk_size})"
        );
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    /// Secuencia perezosa de chunks de `document`. Se puede volver a llamar
    /// (o clonar el iterador) para recorrerla de nuevo.
    pub fn split<'a>(&self, document: &'a Document) -> Chunks<'a> {
        let text = document.content.as_str();
        let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        bounds.push(text.len());

        Chunks {
            document,
            bounds,
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            start: 0,
            covered: 0,
            index: 0,
        }
    }

    /// Trocea todos los documentos, en orden.
    pub fn split_all(&self, documents: &[Document]) -> Vec<Chunk> {
        documents.iter().flat_map(|doc| self.split(doc)).collect()
    }
}

/// Iterador de chunks de un documento.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    document: &'a Document,
    /// Offset en bytes de cada carácter, más la longitud total al final.
    bounds: Vec<usize>,
    chunk_size: usize,
    chunk_overlap: usize,
    /// Carácter donde empieza el próximo chunk (incluye el solape).
    start: usize,
    /// Caracteres ya cubiertos por los chunks emitidos.
    covered: usize,
    index: usize,
}

impl Chunks<'_> {
    fn text(&self) -> &str {
        &self.document.content
    }

    fn char_count(&self) -> usize {
        self.bounds.len() - 1
    }

    fn char_at_byte(&self, byte: usize) -> usize {
        self.bounds.binary_search(&byte).unwrap_or_else(|i| i)
    }

    /// Mejor punto de corte en `(from, limit]`. Primero se intenta cortar en
    /// la segunda mitad de la ventana para no emitir chunks diminutos.
    fn find_cut(&self, from: usize, limit: usize) -> usize {
        let half = from + (limit - from) / 2;
        for min_cut in [half, from] {
            for level in SEPARATORS {
                if let Some(cut) = self.last_separator(level, min_cut, limit) {
                    return cut;
                }
            }
        }
        limit
    }

    fn last_separator(&self, seps: &[&str], min_cut: usize, limit: usize) -> Option<usize> {
        let window_start = self.bounds[min_cut];
        let window = &self.text()[window_start..self.bounds[limit]];
        seps.iter()
            .filter_map(|sep| window.rfind(sep).map(|pos| window_start + pos + sep.len()))
            .max()
            .map(|byte| self.char_at_byte(byte))
            .filter(|&cut| cut > min_cut)
    }

    /// Inicio del siguiente chunk: retrocede como mucho `chunk_overlap`
    /// caracteres y avanza hasta el comienzo de una palabra si puede.
    fn next_start(&self, end: usize, current_start: usize) -> usize {
        let earliest = end
            .saturating_sub(self.chunk_overlap)
            .max(current_start + 1)
            .min(end);
        let window_start = self.bounds[earliest];
        let window = &self.text()[window_start..self.bounds[end]];
        match window.find(char::is_whitespace) {
            Some(pos) => self.char_at_byte(window_start + pos) + 1,
            None => earliest,
        }
    }
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let total = self.char_count();
        if self.covered >= total {
            return None;
        }

        let start = self.start;
        let limit = (start + self.chunk_size).min(total);
        let end = if limit == total {
            total
        } else {
            self.find_cut(self.covered, limit)
        };

        let chunk = Chunk {
            id: format!("{}-{}", self.document.id, self.index),
            document_id: self.document.id.clone(),
            index: self.index,
            start,
            overlap: self.covered - start,
            content: self.text()[self.bounds[start]..self.bounds[end]].to_string(),
            source: self.document.source.clone(),
        };

        self.start = if end < total {
            self.next_start(end, start)
        } else {
            end
        };
        self.covered = end;
        self.index += 1;
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SourceRecord, SourceType};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn doc(content: &str) -> Document {
        Document {
            id: "doc".into(),
            content: content.to_string(),
            source: Arc::new(SourceRecord {
                title: "Test".into(),
                url: String::new(),
                source_type: SourceType::Podcast,
                relevance: String::new(),
                notes: String::new(),
            }),
        }
    }

    fn rebuild(chunks: &[Chunk]) -> String {
        chunks.iter().map(|c| c.fresh_content()).collect()
    }

    #[test]
    fn empty_document_yields_no_chunks() {
        let chunker = Chunker::new(100, 20).unwrap();
        assert_eq!(chunker.split(&doc("")).count(), 0);
    }

    #[test]
    fn short_document_is_a_single_chunk() {
        let chunker = Chunker::default();
        let chunks: Vec<_> = chunker.split(&doc("Protein matters.")).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Protein matters.");
        assert_eq!(chunks[0].overlap, 0);
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        assert!(Chunker::new(100, 100).is_err());
        assert!(Chunker::new(0, 0).is_err());
        assert!(Chunker::new(100, 99).is_ok());
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let first = "a".repeat(30);
        let second = "b".repeat(30);
        let text = format!("{first}\n\n{second}");
        let chunker = Chunker::new(40, 0).unwrap();
        let chunks: Vec<_> = chunker.split(&doc(&text)).collect();
        assert_eq!(chunks[0].content, format!("{first}\n\n"));
        assert_eq!(chunks[1].content, second);
    }

    #[test]
    fn falls_back_to_words_then_characters() {
        let chunker = Chunker::new(10, 0).unwrap();
        let words: Vec<_> = chunker.split(&doc("alpha beta gamma delta")).collect();
        assert_eq!(words[0].content, "alpha ");

        let chars: Vec<_> = chunker.split(&doc(&"x".repeat(25))).collect();
        assert_eq!(
            chars.iter().map(|c| c.content.len()).collect::<Vec<_>>(),
            vec![10, 10, 5]
        );
    }

    #[test]
    fn overlap_starts_on_a_word_boundary() {
        let text = "one two three four five six seven eight nine ten eleven twelve";
        let chunker = Chunker::new(20, 8).unwrap();
        let chunks: Vec<_> = chunker.split(&doc(text)).collect();
        assert!(chunks.len() > 1);
        for chunk in &chunks[1..] {
            assert!(chunk.overlap <= 8);
            assert!(!chunk.content.starts_with(' '));
        }
        assert_eq!(rebuild(&chunks), text);
    }

    #[test]
    fn iteration_is_restartable() {
        let text = "Sleep is crucial.\nAdults need 7-9 hours.\n\nGrowth hormone is released.";
        let chunker = Chunker::new(25, 5).unwrap();
        let document = doc(text);
        let iter = chunker.split(&document);
        let first: Vec<_> = iter.clone().map(|c| c.content).collect();
        let second: Vec<_> = iter.map(|c| c.content).collect();
        assert_eq!(first, second);
    }

    proptest! {
        #[test]
        fn chunks_reconstruct_the_document(
            text in "[a-zñ0-9 .!?,\n]{0,600}",
            size in 5usize..120,
            overlap_ratio in 0.0f64..0.9,
        ) {
            let overlap = ((size as f64) * overlap_ratio) as usize;
            let chunker = Chunker::new(size, overlap).unwrap();
            let document = doc(&text);
            let chunks: Vec<_> = chunker.split(&document).collect();

            prop_assert_eq!(rebuild(&chunks), text.clone());
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert!(!chunk.content.is_empty());
                prop_assert!(!chunk.fresh_content().is_empty());
                prop_assert!(chunk.content.chars().count() <= size);
                prop_assert!(chunk.overlap <= overlap);
                prop_assert_eq!(chunk.index, i);
                if i > 0 {
                    let prev = &chunks[i - 1];
                    let shared: String = chunk.content.chars().take(chunk.overlap).collect();
                    prop_assert!(prev.content.ends_with(&shared));
                }
            }
        }
    }
}
