//! Argument and prompt parsing for the `quiz-client` binary.

use std::fmt::Write as _;

use crate::models::{Answer, LeaderboardEntry, Question, QuestionKind, SubmissionResult};
use crate::session::QuestionView;

pub const USAGE: &str = "usage:
  quiz-client take <CODE>
  quiz-client leaderboard <QUIZ_ID>
  quiz-client flag <QUIZ_ID> <QUESTION_ID> <REASON...>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Take { code: String },
    Leaderboard { quiz_id: String },
    Flag { quiz_id: String, question_id: String, reason: String },
}

impl Invocation {
    pub fn parse<I, S>(args: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        match args.as_slice() {
            [cmd, code] if cmd == "take" => Some(Invocation::Take { code: code.clone() }),
            [cmd, quiz_id] if cmd == "leaderboard" => Some(Invocation::Leaderboard {
                quiz_id: quiz_id.clone(),
            }),
            [cmd, quiz_id, question_id, reason @ ..] if cmd == "flag" && !reason.is_empty() => {
                Some(Invocation::Flag {
                    quiz_id: quiz_id.clone(),
                    question_id: question_id.clone(),
                    reason: reason.join(" "),
                })
            }
            _ => None,
        }
    }
}

/// One line typed at the prompt while taking a quiz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptCommand {
    /// 1-based option number as displayed.
    Choose(usize),
    Text(String),
    /// 1-based display positions of the code blocks, in the chosen order.
    Arrange(Vec<usize>),
    Next,
    Previous,
    /// 1-based question number.
    GoTo(usize),
    Submit,
    Quit,
    Help,
}

impl PromptCommand {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };
        match head {
            "n" | "next" => Some(PromptCommand::Next),
            "p" | "prev" => Some(PromptCommand::Previous),
            "s" | "submit" => Some(PromptCommand::Submit),
            "q" | "quit" => Some(PromptCommand::Quit),
            "h" | "help" | "?" => Some(PromptCommand::Help),
            "g" | "goto" => rest
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .map(PromptCommand::GoTo),
            "t" | "text" if !rest.is_empty() => Some(PromptCommand::Text(rest.to_string())),
            "o" | "order" => {
                let positions = rest
                    .split(|c: char| c.is_whitespace() || c == ',')
                    .filter(|p| !p.is_empty())
                    .map(|p| p.parse::<usize>().ok().filter(|n| *n > 0))
                    .collect::<Option<Vec<_>>>()?;
                (!positions.is_empty()).then_some(PromptCommand::Arrange(positions))
            }
            other => other
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0 && rest.is_empty())
                .map(PromptCommand::Choose),
        }
    }
}

pub const PROMPT_HELP: &str = "commands: <number> choose option, t <text> answer, o <i j k> order blocks, \
n next, p previous, g <k> go to question, s submit, q quit (progress is kept)";

pub fn format_clock(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

pub fn render_question(view: &QuestionView, question: &Question) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "\n[{}/{}] {}   (time left {})",
        view.index + 1,
        view.total,
        view.prompt,
        format_clock(view.time_left)
    );
    for (pos, option) in view.options.iter().enumerate() {
        let marker = match (&question.kind, &view.answer) {
            (
                QuestionKind::Mcq { .. } | QuestionKind::TrueFalse { .. },
                Some(Answer::Choice(chosen)),
            ) if *chosen == option.original_index => "*",
            _ => " ",
        };
        let _ = writeln!(out, " {marker} {}. {}", pos + 1, option.text);
    }
    match (&question.kind, &view.answer) {
        (QuestionKind::FillInBlank { .. } | QuestionKind::Essay, Some(Answer::Text(text))) => {
            let _ = writeln!(out, "   your answer: {text}");
        }
        (QuestionKind::CodeDragDrop { blocks, .. }, Some(Answer::Order(order))) => {
            let _ = writeln!(out, "   your order:");
            for idx in order {
                if let Some(line) = blocks.get(*idx) {
                    let _ = writeln!(out, "     {line}");
                }
            }
        }
        (QuestionKind::FillInBlank { .. } | QuestionKind::Essay, None) => {
            let _ = writeln!(out, "   (type `t <answer>`)");
        }
        (QuestionKind::CodeDragDrop { .. }, None) => {
            let _ = writeln!(out, "   (type `o <positions>` to order the blocks)");
        }
        _ => {}
    }
    out
}

pub fn render_result(result: &SubmissionResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "\nScore: {}/{} ({:.1}%){}",
        result.score,
        result.total_questions,
        result.percentage,
        if result.is_practice { "  [practice attempt]" } else { "" }
    );
    if let Some(n) = result.attempt_number {
        let _ = writeln!(out, "Attempt #{n}");
    }
    for detail in &result.detailed_results {
        let _ = writeln!(
            out,
            " {} {}{}",
            if detail.is_correct { "✔" } else { "✘" },
            detail.question_id,
            detail
                .explanation
                .as_deref()
                .map(|e| format!(": {e}"))
                .unwrap_or_default()
        );
    }
    out
}

pub fn render_leaderboard(entries: &[LeaderboardEntry]) -> String {
    if entries.is_empty() {
        return "no submissions yet\n".to_string();
    }
    let mut out = String::new();
    for (i, entry) in entries.iter().enumerate() {
        let rank = entry.rank.unwrap_or(i as u32 + 1);
        let _ = writeln!(
            out,
            "{rank:>3}. {:<24} {:>4} ({:.1}%)",
            entry.name, entry.score, entry.percentage
        );
    }
    out
}
