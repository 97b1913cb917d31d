//! sqlchat-cli — terminal client for the sqlchat streaming API
//!
//! Consumes the same `/chat/stream` SSE feed as the browser client: tool
//! activity goes to stderr, the answer is streamed to stdout.
//!
//! # Subcommands
//! - `ask <message> [-c <id>]` — ask a question (new conversation unless `-c`)
//! - `new`                      — allocate a conversation id
//! - `history <id>`             — print a conversation's messages
//! - `status`                   — show server health

use std::io::{BufRead, BufReader, Write};

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";
const RESULT_PREVIEW_CHARS: usize = 200;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "sqlchat-cli",
    version,
    about = "Ask questions about the company database from the terminal"
)]
struct Cli {
    /// sqlchat HTTP server URL (overrides SQLCHAT_HTTP_URL env var)
    #[arg(long, env = "SQLCHAT_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ask a question and stream the answer
    Ask {
        /// The question
        message: String,

        /// Continue an existing conversation
        #[arg(short, long)]
        conversation: Option<String>,

        /// Hide tool activity
        #[arg(short, long)]
        quiet: bool,
    },

    /// Allocate a fresh conversation id
    New,

    /// Print a conversation's history
    History {
        /// Conversation id
        id: String,
    },

    /// Show sqlchat server status
    Status,
}

// ============================================================================
// Stream Events
// ============================================================================

/// One event of the `/chat/stream` feed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    ToolCall {
        id: String,
        name: String,
        args: serde_json::Value,
    },
    ToolResult {
        id: String,
        name: String,
        result: String,
        is_error: bool,
    },
    Chunk(String),
    Done(String),
    Error(String),
}

/// Decode one SSE line. Non-data lines (keep-alive comments, blank
/// separators) yield `None`.
pub fn parse_sse_line(line: &str) -> Option<Result<StreamEvent, serde_json::Error>> {
    let line = line.trim_end_matches(['\r', '\n']);
    let data = line.strip_prefix("data:")?;
    Some(serde_json::from_str(data.trim_start()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finish {
    Completed,
    Failed,
}

/// Renders one request's events: answer text to `out`, activity and
/// failures to `err`.
pub struct Transcript<O: Write, E: Write> {
    out: O,
    err: E,
    show_activity: bool,
    streamed: bool,
    finished: Option<Finish>,
}

impl<O: Write, E: Write> Transcript<O, E> {
    pub fn new(out: O, err: E, show_activity: bool) -> Self {
        Self {
            out,
            err,
            show_activity,
            streamed: false,
            finished: None,
        }
    }

    pub fn finished(&self) -> Option<Finish> {
        self.finished
    }

    /// Apply one event. Events after the terminal one are ignored.
    pub fn apply(&mut self, event: StreamEvent) -> std::io::Result<Option<Finish>> {
        if self.finished.is_some() {
            return Ok(self.finished);
        }

        match event {
            StreamEvent::ToolCall { name, args, .. } => {
                if self.show_activity {
                    let detail = args["query"]
                        .as_str()
                        .map(String::from)
                        .unwrap_or_else(|| args.to_string());
                    writeln!(self.err, "  → {} {}", name, detail)?;
                }
            }
            StreamEvent::ToolResult {
                result, is_error, ..
            } => {
                if self.show_activity {
                    let marker = if is_error { "✗" } else { "←" };
                    writeln!(self.err, "  {} {}", marker, preview(&result))?;
                }
            }
            StreamEvent::Chunk(text) => {
                write!(self.out, "{}", text)?;
                self.out.flush()?;
                self.streamed = true;
            }
            StreamEvent::Done(answer) => {
                if !self.streamed {
                    write!(self.out, "{}", answer)?;
                }
                writeln!(self.out)?;
                self.out.flush()?;
                self.finished = Some(Finish::Completed);
            }
            StreamEvent::Error(message) => {
                if self.streamed {
                    writeln!(self.out)?;
                }
                writeln!(self.err, "error: {}", message)?;
                self.finished = Some(Finish::Failed);
            }
        }
        Ok(self.finished)
    }
}

fn preview(text: &str) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= RESULT_PREVIEW_CHARS {
        single_line
    } else {
        let cut: String = single_line.chars().take(RESULT_PREVIEW_CHARS).collect();
        format!("{}…", cut)
    }
}

/// Drive a transcript from an SSE body until the terminal event.
pub fn consume_stream<R: BufRead, O: Write, E: Write>(
    reader: R,
    transcript: &mut Transcript<O, E>,
) -> anyhow::Result<Finish> {
    for line in reader.lines() {
        let line = line?;
        match parse_sse_line(&line) {
            Some(Ok(event)) => {
                if let Some(finish) = transcript.apply(event)? {
                    return Ok(finish);
                }
            }
            Some(Err(e)) => anyhow::bail!("malformed event {:?}: {}", line, e),
            None => {}
        }
    }
    anyhow::bail!("stream ended without a terminal event")
}

/// Render a `GET /conversations/{id}` body.
pub fn format_history(body: &serde_json::Value) -> String {
    let mut lines = Vec::new();
    for message in body["messages"].as_array().into_iter().flatten() {
        let role = message["role"].as_str().unwrap_or("?");
        match role {
            "system" => continue,
            "tool" => lines.push(format!(
                "tool ({}): {}",
                message["name"].as_str().unwrap_or("?"),
                preview(message["content"].as_str().unwrap_or(""))
            )),
            "assistant" => {
                for call in message["tool_calls"].as_array().into_iter().flatten() {
                    lines.push(format!(
                        "assistant → {} {}",
                        call["name"].as_str().unwrap_or("?"),
                        call["args"]
                    ));
                }
                if let Some(text) = message["content"].as_str() {
                    lines.push(format!("assistant: {}", text));
                }
            }
            _ => lines.push(format!(
                "{}: {}",
                role,
                message["content"].as_str().unwrap_or("")
            )),
        }
    }
    lines.join("\n")
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?)
}

fn new_conversation(server: &str) -> anyhow::Result<String> {
    let url = format!("{}/conversations", server);
    let resp = client(10)?.post(&url).send()?;
    if !resp.status().is_success() {
        anyhow::bail!("server returned {}", resp.status());
    }
    let body: serde_json::Value = resp.json()?;
    body["conversation_id"]
        .as_str()
        .map(String::from)
        .ok_or_else(|| anyhow::anyhow!("response has no conversation_id"))
}

fn do_ask(
    server: &str,
    message: &str,
    conversation: Option<String>,
    quiet: bool,
) -> anyhow::Result<()> {
    let conversation_id = match conversation {
        Some(id) => id,
        None => {
            let id = new_conversation(server)?;
            eprintln!("conversation: {}", id);
            id
        }
    };

    let url = format!("{}/chat/stream", server);
    let resp = client(300)?
        .post(&url)
        .header("accept", "text/event-stream")
        .json(&serde_json::json!({
            "conversation_id": conversation_id,
            "message": message,
        }))
        .send();

    let resp = match resp {
        Ok(r) => r,
        Err(e) => {
            eprintln!("sqlchat-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        eprintln!("sqlchat-cli: server returned {}: {}", status, body);
        std::process::exit(1);
    }

    let mut transcript = Transcript::new(std::io::stdout(), std::io::stderr(), !quiet);
    match consume_stream(BufReader::new(resp), &mut transcript)? {
        Finish::Completed => Ok(()),
        Finish::Failed => std::process::exit(2),
    }
}

fn do_new(server: &str) -> anyhow::Result<()> {
    println!("{}", new_conversation(server)?);
    Ok(())
}

fn do_history(server: &str, id: &str) -> anyhow::Result<()> {
    let url = format!("{}/conversations/{}", server, id);
    let resp = client(10)?.get(&url).send()?;

    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        eprintln!("sqlchat-cli: no conversation {}", id);
        std::process::exit(1);
    }
    if !resp.status().is_success() {
        anyhow::bail!("server returned {}", resp.status());
    }

    let body: serde_json::Value = resp.json()?;
    println!("{}", format_history(&body));
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);
    let resp = client(10)?.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("sqlchat server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:        {}", body["version"].as_str().unwrap_or("?"));
            println!("SQLite:         {}", body["sqlite"].as_str().unwrap_or("?"));
            println!("Tables:         {}", body["tables"]);
            println!("Conversations:  {}", body["conversations"]);
        }
        Ok(r) => {
            let status = r.status();
            eprintln!("sqlchat-cli: server unhealthy (HTTP {})", status);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("sqlchat-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Ask {
            message,
            conversation,
            quiet,
        } => do_ask(&server, &message, conversation, quiet),
        Commands::New => do_new(&server),
        Commands::History { id } => do_history(&server, &id),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("sqlchat-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn render(events: Vec<StreamEvent>, show_activity: bool) -> (String, String, Option<Finish>) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let finished = {
            let mut transcript = Transcript::new(&mut out, &mut err, show_activity);
            for event in events {
                transcript.apply(event).unwrap();
            }
            transcript.finished()
        };
        (
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
            finished,
        )
    }

    #[test]
    fn test_parse_sse_line() {
        assert_eq!(
            parse_sse_line(r#"data: {"type":"chunk","data":"Hi"}"#).unwrap().unwrap(),
            StreamEvent::Chunk("Hi".to_string())
        );
        assert!(parse_sse_line("").is_none());
        assert!(parse_sse_line(":").is_none());
        assert!(parse_sse_line("data: not json").unwrap().is_err());
    }

    #[test]
    fn test_transcript_streams_answer_and_activity() {
        let (out, err, finished) = render(
            vec![
                StreamEvent::ToolCall {
                    id: "1".to_string(),
                    name: "sql_db_query".to_string(),
                    args: serde_json::json!({"query": "SELECT COUNT(*) FROM Employees"}),
                },
                StreamEvent::ToolResult {
                    id: "1".to_string(),
                    name: "sql_db_query".to_string(),
                    result: "[[6]]".to_string(),
                    is_error: false,
                },
                StreamEvent::Chunk("There are ".to_string()),
                StreamEvent::Chunk("6.".to_string()),
                StreamEvent::Done("There are 6.".to_string()),
            ],
            true,
        );

        assert_eq!(out, "There are 6.\n");
        assert!(err.contains("→ sql_db_query SELECT COUNT(*) FROM Employees"));
        assert!(err.contains("← [[6]]"));
        assert_eq!(finished, Some(Finish::Completed));
    }

    #[test]
    fn test_transcript_done_without_chunks_prints_answer() {
        let (out, _, _) = render(vec![StreamEvent::Done("Hello".to_string())], false);
        assert_eq!(out, "Hello\n");
    }

    #[test]
    fn test_transcript_error_is_distinguishable() {
        let (out, err, finished) = render(
            vec![
                StreamEvent::Chunk("Part".to_string()),
                StreamEvent::Error("model request failed".to_string()),
                StreamEvent::Chunk("ignored".to_string()),
            ],
            false,
        );
        assert_eq!(out, "Part\n");
        assert_eq!(err, "error: model request failed\n");
        assert_eq!(finished, Some(Finish::Failed));
    }

    #[test]
    fn test_quiet_hides_activity() {
        let (_, err, _) = render(
            vec![StreamEvent::ToolCall {
                id: "1".to_string(),
                name: "sql_db_list_tables".to_string(),
                args: serde_json::json!({}),
            }],
            false,
        );
        assert!(err.is_empty());
    }

    #[test]
    fn test_consume_stream_stops_at_terminal_event() {
        let body = ": keep-alive\n\n\
data: {\"type\":\"chunk\",\"data\":\"Hi\"}\n\n\
data: {\"type\":\"done\",\"data\":\"Hi\"}\n\n";
        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut transcript = Transcript::new(&mut out, &mut err, true);

        let finish = consume_stream(Cursor::new(body), &mut transcript).unwrap();
        assert_eq!(finish, Finish::Completed);
        drop(transcript);
        assert_eq!(String::from_utf8(out).unwrap(), "Hi\n");
    }

    #[test]
    fn test_consume_stream_without_terminal_is_error() {
        let body = "data: {\"type\":\"chunk\",\"data\":\"Hi\"}\n\n";
        let mut transcript = Transcript::new(Vec::new(), Vec::new(), true);
        let err = consume_stream(Cursor::new(body), &mut transcript).unwrap_err();
        assert!(err.to_string().contains("without a terminal event"));
    }

    #[test]
    fn test_format_history_skips_system_prompt() {
        let body = serde_json::json!({
            "id": "c1",
            "messages": [
                {"role": "system", "content": "You are..."},
                {"role": "user", "content": "How many employees?"},
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "1", "name": "sql_db_query", "args": {"query": "SELECT COUNT(*) FROM Employees"}}
                ]},
                {"role": "tool", "tool_call_id": "1", "name": "sql_db_query", "content": "[[6]]", "is_error": false},
                {"role": "assistant", "content": "There are 6 employees."}
            ]
        });

        let text = format_history(&body);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "user: How many employees?");
        assert!(lines[1].starts_with("assistant → sql_db_query"));
        assert_eq!(lines[2], "tool (sql_db_query): [[6]]");
        assert_eq!(lines[3], "assistant: There are 6 employees.");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_preview_truncates_long_results() {
        let long = "x".repeat(RESULT_PREVIEW_CHARS + 50);
        let shown = preview(&long);
        assert!(shown.ends_with('…'));
        assert_eq!(shown.chars().count(), RESULT_PREVIEW_CHARS + 1);
    }
}
