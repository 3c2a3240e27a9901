//! PetikSendiri Assistant — knowledge-base ingestion and retrieval-augmented
//! chat engine for an urban-farming assistant.
//!
//! The engine ingests PDF, DOCX, and plain-text documents into a persisted
//! vector index, and answers chat questions grounded in the retrieved
//! passages. Two surfaces drive it: the `petik` CLI and a JSON HTTP API.
//!
//! Pipeline: [`loader`] → [`chunk`] → [`embedding`] → [`index`], with
//! per-document status tracked in the [`ledger`]. Chat turns run through
//! [`rag`] on top of [`chat`] session storage. [`service::Assistant`] wires
//! it all together.

pub mod chat;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod index;
pub mod ingest;
pub mod ledger;
pub mod llm;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod rag;
pub mod server;
pub mod service;
