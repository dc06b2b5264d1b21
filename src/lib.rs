//! FitScience Coach: respuestas de fitness y nutrición con RAG sobre un corpus
//! curado, más calculadoras de gasto energético.

pub mod api;
pub mod app_state;
pub mod calculators;
pub mod chunker;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod quiz;
pub mod rag;
pub mod retriever;
pub mod vector_store;
