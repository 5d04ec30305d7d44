//! Terminal chat: one-shot answers and the interactive REPL.

use anyhow::Result;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::config::SearchMode;
use crate::rag::{RagPipeline, RagResponse};
use crate::session::Session;

const SEPARATOR_WIDTH: usize = 80;
const SNIPPET_CHARS: usize = 200;

/// Render an answer between separator lines, followed by its sources.
pub fn format_response(response: &RagResponse) -> String {
    let rule = "=".repeat(SEPARATOR_WIDTH);
    let mut out = format!("\nResponse:\n{}\n{}\n{}\n", rule, response.answer, rule);

    if !response.sources.is_empty() {
        out.push_str("\nSources used:\n");
        for (i, source) in response.sources.iter().enumerate() {
            let snippet: String = source
                .snippet
                .chars()
                .take(SNIPPET_CHARS)
                .map(|c| if c == '\n' { ' ' } else { c })
                .collect();
            out.push_str(&format!(
                "{}. [{}] (score {:.2}) {}...\n",
                i + 1,
                source.chunk_id,
                source.score,
                snippet
            ));
        }
    } else if response.context_free {
        out.push_str("\n(no matching incident records; answered without context)\n");
    }
    out
}

/// Answer one question and print it.
pub async fn run_once(rag: &RagPipeline, question: &str, mode: Option<SearchMode>) -> Result<()> {
    let mut session = Session::new();
    let response = session.ask(rag, question, mode).await;
    print!("{}", format_response(&response));
    std::io::stdout().flush()?;
    Ok(())
}

/// Interactive loop over stdin until `exit`, `quit`, or end of input.
pub async fn run_repl(rag: &RagPipeline, mode: Option<SearchMode>) -> Result<Session> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    repl(rag, mode, stdin, &mut stdout).await
}

/// REPL over arbitrary input and output streams.
pub async fn repl<R, W>(rag: &RagPipeline, mode: Option<SearchMode>, input: R, out: &mut W) -> Result<Session>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut session = Session::new();
    let mut lines = input.lines();

    writeln!(out, "\nEnter your query (or 'exit' to quit):")?;
    loop {
        write!(out, "> ")?;
        out.flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.eq_ignore_ascii_case("exit") || query.eq_ignore_ascii_case("quit") {
            break;
        }
        if query.is_empty() {
            continue;
        }

        let response = session.ask(rag, query, mode).await;
        write!(out, "{}", format_response(&response))?;
        writeln!(out, "\nEnter another query (or 'exit' to quit):")?;
    }
    Ok(session)
}
