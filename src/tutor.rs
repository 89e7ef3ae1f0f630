//! Retrieval-backed tutoring operations.
//!
//! Each operation retrieves the top-k chunks for a query from a prepared
//! [`RetrievalIndex`], places them in a prompt, and asks the
//! [`CompletionService`]. Question generation and grading request a JSON
//! object and parse it into a fixed-shape reply.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::completion::{parse_json_reply, CompletionService, ResponseFormat};
use crate::config::{CompletionConfig, Config};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::RetrievalIndex;
use crate::models::ScoredChunk;

/// Question-type markers that select the conceptual grading rubric.
const CONCEPTUAL_MARKERS: &[&str] = &["簡答", "Short Answer", "Intro"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AskResponse {
    pub question: String,
    pub answer: String,
    /// Unique file names of the retrieved chunks, sorted.
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedQuestion {
    pub question_content: String,
    pub hint: String,
    pub target_filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GradeReport {
    pub score: serde_json::Number,
    pub level: String,
    #[serde(default)]
    pub rubric: Vec<serde_json::Value>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub missing_items: Vec<String>,
    #[serde(default)]
    pub action_items: Vec<String>,
}

#[derive(Clone)]
pub struct Tutor {
    embedder: Arc<dyn EmbeddingProvider>,
    completion: Arc<dyn CompletionService>,
    settings: CompletionConfig,
    top_k: usize,
}

impl Tutor {
    pub fn new(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        completion: Arc<dyn CompletionService>,
    ) -> Self {
        Self {
            embedder,
            completion,
            settings: config.completion.clone(),
            top_k: config.retrieval.top_k,
        }
    }

    async fn retrieve(&self, index: &RetrievalIndex, query: &str) -> Result<Vec<ScoredChunk>> {
        index.query(query, self.embedder.as_ref(), self.top_k).await
    }

    /// Answer `question` from the retrieved course material.
    pub async fn ask(&self, index: &RetrievalIndex, question: &str) -> Result<AskResponse> {
        let question = require("question", question)?;
        let hits = self.retrieve(index, question).await?;

        let user = format!(
            "Context:\n{}\n\nQuestion: {}\n\nAnswer:",
            join_context(&hits),
            question
        );
        let answer = self
            .completion
            .complete(
                ASK_SYSTEM,
                &user,
                ResponseFormat::Text,
                self.settings.answer_temperature,
            )
            .await?;

        let sources: BTreeSet<String> = hits
            .iter()
            .map(|h| h.chunk.provenance.filename.clone())
            .collect();

        Ok(AskResponse {
            question: question.to_string(),
            answer,
            sources: sources.into_iter().collect(),
        })
    }

    /// Design a practice task around the material and one of `data_files`.
    pub async fn generate_question(
        &self,
        index: &RetrievalIndex,
        qtype: &str,
        level: &str,
        data_files: &[String],
    ) -> Result<GeneratedQuestion> {
        let qtype = require("qtype", qtype)?;
        let level = require("level", level)?;

        let query = format!("spatial analysis {} {} key concepts and procedures", level, qtype);
        let hits = self.retrieve(index, &query).await?;

        let files = if data_files.is_empty() {
            "None".to_string()
        } else {
            data_files.join(", ")
        };
        let system = format!(
            "You are a spatial analysis teaching assistant writing a practice task.\n\
             Question type: {qtype}. Difficulty: {level}.\n\
             Base the task on the reference material the user provides and on one file from \
             this list of real files: [{files}]. For a shapefile mention only the .shp file.\n\
             Hands-on work must use R (for example sf, terra, tmap, tidyverse); do not mention \
             other GIS software.\n\
             'question_content' states only the goal and the data to use, never the steps. \
             'hint' lists the steps and suggested R functions.\n\
             Reply with a JSON object: \
             {{\"question_content\": \"...\", \"hint\": \"...\", \"target_filename\": \"...\"}}"
        );
        let user = format!("Reference material:\n{}", join_context(&hits));

        let reply = self
            .completion
            .complete(
                &system,
                &user,
                ResponseFormat::JsonObject,
                self.settings.question_temperature,
            )
            .await?;
        parse_json_reply(&reply)
    }

    /// Grade `student_answer` against the material retrieved for `question_text`.
    pub async fn grade_submission(
        &self,
        index: &RetrievalIndex,
        question_text: &str,
        student_answer: &str,
        qtype: &str,
    ) -> Result<GradeReport> {
        let question_text = require("question_text", question_text)?;
        let student_answer = require("student_answer", student_answer)?;

        let hits = self.retrieve(index, question_text).await?;
        let rubric = if is_conceptual(qtype) {
            CONCEPTUAL_RUBRIC
        } else {
            CODING_RUBRIC
        };
        let prompt = format!(
            "{rubric}\n\
             Reply with a JSON object: {{\"score\": int, \"level\": str, \"rubric\": [], \
             \"strengths\": [], \"weaknesses\": [], \"missing_items\": [], \"action_items\": []}}\n\
             [Question] {question_text}\n\
             [Student answer] {student_answer}\n\
             [Reference material] {}",
            join_context(&hits)
        );

        let reply = self
            .completion
            .complete(
                "",
                &prompt,
                ResponseFormat::JsonObject,
                self.settings.grading_temperature,
            )
            .await?;
        parse_json_reply(&reply)
    }
}

const ASK_SYSTEM: &str =
    "You are a teaching assistant. Answer the student's question using the context provided.";

const CONCEPTUAL_RUBRIC: &str = "You are a spatial analysis teaching assistant grading a \
    conceptual short-answer question. Assess understanding of GIS principles, reasoning, and \
    clarity. Criteria: A) conceptual correctness (3 points), B) reasoning and explanation \
    (4 points), C) completeness (3 points).";

const CODING_RUBRIC: &str = "You are a spatial analysis teaching assistant grading an R \
    programming task. Assess correctness, reproducibility, and spatial logic of the code. \
    Criteria: A) requirement coverage (3 points), B) spatial logic (4 points), C) R code rigor \
    (3 points).";

/// True when `qtype` names a conceptual (non-coding) question.
pub fn is_conceptual(qtype: &str) -> bool {
    CONCEPTUAL_MARKERS.iter().any(|m| qtype.contains(m))
}

fn require<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RagError::BadRequest(format!("{} must not be empty", field)));
    }
    Ok(trimmed)
}

fn join_context(hits: &[ScoredChunk]) -> String {
    hits.iter()
        .map(|h| h.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
