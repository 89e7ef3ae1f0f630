//! # ragpack
//!
//! Turns a zip archive of course material into a queryable retrieval index,
//! and answers questions, writes practice tasks, and grades submissions
//! against it.
//!
//! An archive is either raw documents (PDF, Word, text, HTML) or a packaged
//! index from an earlier build. The [`detect`] module tells them apart; both
//! paths end in the same [`index::RetrievalIndex`].
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌────────────┐   ┌───────────────┐
//! │  upload  │──▶│ workspace │──▶│   detect   │──▶│ load package  │──┐
//! │  (zip)   │   │ WorkUnit  │   │ raw / pre- │   └───────────────┘  │
//! └──────────┘   └───────────┘   │   built    │   ┌───────────────┐  ▼
//!                                └────────────┘──▶│ corpus→chunk→ │ RetrievalIndex
//!                                                 │ embed (build) │──▶ query / package
//!                                                 └───────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`loader`] | Per-file text extraction |
//! | [`corpus`] | Archive unpacking and corpus walk |
//! | [`chunk`] | Overlapping text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`completion`] | Chat completion abstraction |
//! | [`index`] | Retrieval index build, load, persist, package |
//! | [`detect`] | Ingestion mode detection |
//! | [`workspace`] | Per-request work units and cleanup |
//! | [`pipeline`] | Archive → index orchestration |
//! | [`tutor`] | Ask, question generation, grading |
//! | [`server`] | HTTP server |

pub mod chunk;
pub mod completion;
pub mod config;
pub mod corpus;
pub mod detect;
pub mod embedding;
pub mod error;
pub mod index;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod tutor;
pub mod workspace;
