use std::collections::BTreeMap;
use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::ClassifierConfig;
use crate::error::AppError;
use crate::models::classification::ClassificationFragment;
use crate::models::file_entry::FileDescriptor;

const PING_PROMPT: &str = "Hello, please reply with 'test ok'.";
const PING_MAX_TOKENS: u32 = 50;

/// Everything the classifier needs for one batch of files.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub files: Vec<FileDescriptor>,
    pub target_base_path: String,
    /// Existing top-level target directories with their sub-directories.
    pub existing_structure: Vec<(String, Vec<String>)>,
    pub ambiguity_marker: String,
    pub preview_chars: usize,
    pub batch_index: usize,
    pub total_batches: usize,
}

/// The external model that turns file descriptors into a PARA mapping.
pub trait ClassificationClient: Send + Sync {
    fn classify_batch(
        &self,
        request: &BatchRequest,
    ) -> impl Future<Output = Result<ClassificationFragment, AppError>> + Send;

    /// Trivial round trip used to validate credentials.
    fn ping(&self) -> impl Future<Output = Result<String, AppError>> + Send;

    fn model_name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct PromptFile<'a> {
    filename: &'a str,
    original_directory: &'a str,
    content_preview: String,
}

pub fn build_batch_prompt(request: &BatchRequest) -> String {
    let top_level: Vec<&str> = request
        .existing_structure
        .iter()
        .map(|(name, _)| name.as_str())
        .collect();
    let structure: BTreeMap<&str, &[String]> = request
        .existing_structure
        .iter()
        .map(|(name, children)| (name.as_str(), children.as_slice()))
        .collect();
    let files: Vec<PromptFile<'_>> = request
        .files
        .iter()
        .map(|f| PromptFile {
            filename: &f.name,
            original_directory: &f.original_directory,
            content_preview: f.content_preview.chars().take(request.preview_chars).collect(),
        })
        .collect();

    let structure_json = serde_json::to_string_pretty(&structure).unwrap_or_else(|_| "{}".into());
    let files_json = serde_json::to_string_pretty(&files).unwrap_or_else(|_| "[]".into());
    let top_level_list = format!("{top_level:?}");
    let first_dir = top_level.first().copied().unwrap_or("01-Projects");
    let base = request.target_base_path.trim_end_matches('/');
    let marker = &request.ambiguity_marker;

    format!(
        "You are an expert in personal knowledge management and the PARA method. \
         Propose a complete, actionable reorganization for the files below.\n\n\
         Hard constraints:\n\
         1. Use ONLY these existing directories as top-level categories: {top_level_list}\n\
         2. Never create a new top-level directory.\n\
         3. Every new path must start with one of those directories.\n\
         4. If you are unsure where a file belongs, include \"{marker}\" in its path.\n\n\
         PARA principles:\n\
         - Projects: active work with a goal and a deadline, including plans, progress notes, \
           retrospectives and summaries that still have reference value.\n\
         - Areas: ongoing responsibilities without an end date (health, finance, growth).\n\
         - Resources: reference material useful across projects (docs, templates, guides).\n\
         - Archives: content that is finished and has no remaining reference value.\n\
         Retrospectives are not archives. When in doubt between Archives and Projects, prefer Projects.\n\n\
         Existing directory structure:\n```json\n{structure_json}\n```\n\n\
         Directory name hints: \"project\"/\"01-\"/\"10-\" usually means Projects, \
         \"area\"/\"20-\" Areas, \"resource\"/\"30-\" Resources, \"archive\"/\"40-\" Archives.\n\n\
         Files (batch {batch} of {total}):\n```json\n{files_json}\n```\n\n\
         Target root: `{base}`\n\n\
         Task 1, mapping_table: one row per file. new_directory format: \
         `{base}/<existing top-level dir>/<level 2>/<optional level 3>/<filename>`, \
         for example `{base}/{first_dir}/Programming/Python/example.py`.\n\
         Task 2, directory_structure: the full proposed tree. Top-level keys must be existing directories only.\n\
         Task 3, discussion_points: suggestions for files that cannot be placed with confidence.\n\n\
         Output format:\n```json\n\
         {{\n  \"mapping_table\": [\n    {{\"filename\": \"name.ext\", \"original_directory\": \"dir\", \
         \"new_directory\": \"{base}/{first_dir}/sub/name.ext\"}}\n  ],\n  \
         \"directory_structure\": {{\"{first_dir}\": {{}}}},\n  \
         \"discussion_points\": [{{\"filename\": \"name.ext\", \"suggestion\": \"...\"}}]\n}}\n```\n",
        batch = request.batch_index + 1,
        total = request.total_batches.max(1),
    )
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

pub fn extract_json_payload(text: &str) -> Option<String> {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + "```json".len()..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim().to_string());
        }
    }

    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        if let Some(newline) = rest.find('\n') {
            let body = &rest[newline + 1..];
            if let Some(end) = body.find("```") {
                return Some(body[..end].trim().to_string());
            }
        }
    }

    let first = trimmed.find('{')?;
    let last = trimmed.rfind('}')?;
    if first <= last {
        return Some(trimmed[first..=last].to_string());
    }

    None
}

pub fn parse_fragment(text: &str) -> Result<ClassificationFragment, AppError> {
    let payload = extract_json_payload(text).ok_or_else(|| {
        AppError::Classification("model response did not contain a JSON payload".to_string())
    })?;
    serde_json::from_str(&payload)
        .map_err(|e| AppError::Classification(format!("unparsable classification payload: {e}")))
}

// ---------------------------------------------------------------------------
// OpenAI-compatible chat completion client
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

fn completion_text(response: CompletionResponse) -> Result<String, AppError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .ok_or_else(|| AppError::Classification("model returned no choices".to_string()))
}

#[derive(Clone)]
pub struct ChatCompletionClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
}

impl ChatCompletionClient {
    pub fn from_config(config: &ClassifierConfig) -> Result<Self, AppError> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| AppError::Config("API key not provided".to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            endpoint: format!(
                "{}/chat/completions",
                config.api_base_url.trim_end_matches('/')
            ),
            model: config.model.clone(),
            api_key: api_key.to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, AppError> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
            "max_tokens": max_tokens,
        });
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::Classification(format!(
                "API returned {status}: {}",
                detail.chars().take(300).collect::<String>()
            )));
        }

        let parsed: CompletionResponse = response.json().await?;
        let text = completion_text(parsed)?;
        tracing::debug!(
            chars = text.len(),
            preview = %text.chars().take(200).collect::<String>(),
            "model response"
        );
        Ok(text)
    }
}

impl ClassificationClient for ChatCompletionClient {
    async fn classify_batch(&self, request: &BatchRequest) -> Result<ClassificationFragment, AppError> {
        let prompt = build_batch_prompt(request);
        let text = self.complete(&prompt, self.max_tokens).await.map_err(|e| match e {
            AppError::Http(e) => AppError::Classification(format!("request failed: {e}")),
            other => other,
        })?;
        parse_fragment(&text)
    }

    async fn ping(&self) -> Result<String, AppError> {
        self.complete(PING_PROMPT, PING_MAX_TOKENS).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Credential check
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiFailureKind {
    Unauthorized,
    Forbidden,
    RateLimited,
    Timeout,
    Connection,
    Other,
}

impl ApiFailureKind {
    pub fn message(self) -> &'static str {
        match self {
            Self::Unauthorized => "API key is invalid or expired",
            Self::Forbidden => "Permission denied, check the key's permissions or account balance",
            Self::RateLimited => "Too many requests, try again later",
            Self::Timeout => "API request timed out, check the network connection",
            Self::Connection => "Cannot reach the API server, check the network connection",
            Self::Other => "Unexpected error while testing the API key",
        }
    }
}

pub fn classify_api_failure(error: &AppError) -> ApiFailureKind {
    if let AppError::Http(e) = error {
        if e.is_timeout() {
            return ApiFailureKind::Timeout;
        }
        if e.is_connect() {
            return ApiFailureKind::Connection;
        }
    }
    let text = error.to_string().to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));
    if has(&["401", "unauthorized", "authentication", "api key"]) {
        ApiFailureKind::Unauthorized
    } else if has(&["403", "forbidden", "permission"]) {
        ApiFailureKind::Forbidden
    } else if has(&["429", "rate limit", "too many"]) {
        ApiFailureKind::RateLimited
    } else if has(&["timeout", "timed out"]) {
        ApiFailureKind::Timeout
    } else if has(&["connection", "connect"]) {
        ApiFailureKind::Connection
    } else {
        ApiFailureKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, preview: &str) -> FileDescriptor {
        FileDescriptor {
            path: format!("/src/inbox/{name}"),
            name: name.into(),
            extension: ".md".into(),
            size: 10,
            modified_time: None,
            original_directory: "inbox".into(),
            content_preview: preview.into(),
        }
    }

    fn request() -> BatchRequest {
        BatchRequest {
            files: vec![descriptor("plan.md", "abcdefghij")],
            target_base_path: "/t/PARA/".into(),
            existing_structure: vec![
                ("01-Projects".into(), vec!["WebApp".into()]),
                ("03-Resources".into(), vec![]),
            ],
            ambiguity_marker: "(ambiguous)".into(),
            preview_chars: 4,
            batch_index: 1,
            total_batches: 3,
        }
    }

    #[test]
    fn prompt_names_directories_marker_and_files() {
        let prompt = build_batch_prompt(&request());
        assert!(prompt.contains("[\"01-Projects\", \"03-Resources\"]"));
        assert!(prompt.contains("(ambiguous)"));
        assert!(prompt.contains("plan.md"));
        assert!(prompt.contains("batch 2 of 3"));
        assert!(prompt.contains("`/t/PARA/01-Projects/Programming/Python/example.py`"));
        assert!(prompt.contains("\"abcd\""));
        assert!(!prompt.contains("abcde"));
    }

    #[test]
    fn extract_json_payload_handles_codeblock() {
        let text = "hello\n```json\n{\"mapping_table\": []}\n```\n";
        assert_eq!(extract_json_payload(text).unwrap(), "{\"mapping_table\": []}");
    }

    #[test]
    fn extract_json_payload_falls_back_to_braces() {
        let text = "Sure! {\"a\": {\"b\": 1}} hope that helps";
        assert_eq!(extract_json_payload(text).unwrap(), "{\"a\": {\"b\": 1}}");
        assert!(extract_json_payload("no json here").is_none());
    }

    #[test]
    fn parse_fragment_is_lenient_about_missing_sections() {
        let text = "```json\n{\"mapping_table\":[{\"filename\":\"a.txt\",\"new_directory\":\"/t/P/a.txt\"}]}\n```";
        let fragment = parse_fragment(text).unwrap();
        assert_eq!(fragment.mapping_table.len(), 1);
        assert_eq!(fragment.mapping_table[0].original_directory, "");
        assert!(fragment.directory_structure.is_empty());
        assert!(fragment.discussion_points.is_empty());
    }

    #[test]
    fn unparsable_payload_is_a_classification_error() {
        let err = parse_fragment("I could not decide").unwrap_err();
        assert_eq!(err.kind(), "classification");
        let err = parse_fragment("{not json}").unwrap_err();
        assert_eq!(err.kind(), "classification");
    }

    #[test]
    fn completion_text_takes_first_choice() {
        let parsed: CompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"  hi  "}}]}"#,
        )
        .unwrap();
        assert_eq!(completion_text(parsed).unwrap(), "hi");
        let empty: CompletionResponse = serde_json::from_str("{}").unwrap();
        assert!(completion_text(empty).is_err());
    }

    #[test]
    fn client_requires_api_key() {
        let config = ClassifierConfig {
            api_key: Some("   ".into()),
            ..ClassifierConfig::default()
        };
        let err = ChatCompletionClient::from_config(&config).err().unwrap();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn api_failures_are_classified_by_message() {
        let cases = [
            ("API returned 401 Unauthorized: bad key", ApiFailureKind::Unauthorized),
            ("API returned 403 Forbidden: nope", ApiFailureKind::Forbidden),
            ("API returned 429 Too Many Requests", ApiFailureKind::RateLimited),
            ("upstream timeout", ApiFailureKind::Timeout),
            ("connection reset", ApiFailureKind::Connection),
            ("something odd", ApiFailureKind::Other),
        ];
        for (message, expected) in cases {
            let err = AppError::Classification(message.into());
            assert_eq!(classify_api_failure(&err), expected, "{message}");
        }
    }
}
