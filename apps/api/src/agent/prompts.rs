//! Prompts for the LLM-backed refinement policy. Each prompt demands
//! JSON-only output so the client's `call_json` helper can parse it.

pub const REWRITE_SYSTEM: &str = "You rewrite search queries for a resume/job retrieval system. \
Respond with JSON only, no prose.";

pub const REWRITE_PROMPT: &str = r#"Rewrite the following search query to improve recall for
semantic retrieval over resumes and job postings. Expand abbreviations and add
closely related terms. Keep it under 30 words.

Query: {query}

Respond with JSON: {"rewritten": "<rewritten query>"}"#;

pub const RERANK_SYSTEM: &str = "You rerank retrieval candidates for relevance. \
Respond with JSON only, no prose.";

pub const RERANK_PROMPT: &str = r#"Order the following candidate documents from most to least
relevant to the query. Use only the ids given; include every id exactly once.

Query: {query}

Candidates:
{candidates}

Respond with JSON: {"order": ["<id>", ...]}"#;

pub const JUSTIFY_SYSTEM: &str = "You explain why retrieved documents match a query. \
Respond with JSON only, no prose.";

pub const JUSTIFY_PROMPT: &str = r#"For each candidate, explain in one sentence why it does or
does not match the query. Use only the ids given.

Query: {query}

Candidates:
{candidates}

Respond with JSON: {"justifications": [{"document_id": "<id>", "explanation": "<sentence>"}]}"#;
