//! Minimal reader for the mid-1980s COBOL procedure-division subset
//!
//! Line-oriented: tokenizes the source, finds `PROCEDURE DIVISION`, and
//! groups sentences into sections and paragraphs. Only the verbs with
//! control-flow meaning (`if`/`else`, `go to`, `perform`, `exit`, `stop run`,
//! `next sentence`) are parsed structurally; every other verb is carried as
//! an opaque [`StatementKind::Other`] (or [`StatementKind::Move`]) with its
//! source text. This is deliberately not a full COBOL parser; the typed tree
//! in [`crate::cobol`] is the real pipeline interface.

use crate::cobol::source::SourceLocation;
use crate::cobol::{Paragraph, Program, Section, Sentence, Statement, StatementKind};
use std::path::Path;

/// Verbs that begin a new statement inside a sentence
const VERBS: &[&str] = &[
    "accept", "add", "alter", "call", "cancel", "close", "compute", "continue", "delete",
    "display", "divide", "evaluate", "exit", "go", "if", "initialize", "inspect", "merge",
    "move", "multiply", "next", "open", "perform", "read", "release", "return", "rewrite",
    "search", "set", "sort", "start", "stop", "string", "subtract", "unstring", "write",
];

#[derive(Debug, Clone)]
struct Token {
    text: String,
    line: usize,
    col: usize,
}

impl Token {
    fn lower(&self) -> String {
        self.text.to_ascii_lowercase()
    }

    fn start(&self) -> (usize, usize) {
        (self.line, self.col)
    }

    fn end(&self) -> (usize, usize) {
        (self.line, self.col + self.text.chars().count())
    }
}

fn is_verb(tok: &Token) -> bool {
    VERBS.contains(&tok.lower().as_str())
}

fn is_name(tok: &Token) -> bool {
    let t = &tok.text;
    !t.is_empty()
        && t.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && t.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        && !is_verb(tok)
}

/// Parse COBOL source text into the typed procedure-division tree
///
/// `file` is recorded on every source location. Statements that precede the
/// first `SECTION` header are wrapped in a synthetic section named `main`.
pub fn parse_source(file: impl AsRef<Path>, text: &str) -> Program {
    let file = file.as_ref().to_path_buf();
    let tokens = tokenize(text);
    let tokens = skip_to_procedure_division(tokens);

    let mut sections: Vec<Section> = Vec::new();
    let mut rest: &[Token] = &tokens;

    while !rest.is_empty() {
        let (sentence, after) = take_sentence(rest);
        rest = after;
        if sentence.is_empty() {
            continue;
        }

        let first = &sentence[0];
        let low = first.lower();

        // `END PROGRAM x.` terminates the procedure division
        if low == "end" && sentence.get(1).is_some_and(|t| t.lower() == "program") {
            break;
        }
        if low == "declaratives" || (low == "end" && sentence.len() == 2) {
            continue;
        }

        // Section header: `<name> SECTION [priority].`
        if sentence.len() >= 2 && is_name(first) && sentence[1].lower() == "section" {
            sections.push(Section {
                name: first.lower(),
                synthetic: false,
                paragraphs: Vec::new(),
                location: loc_span(&file, first, first),
            });
            continue;
        }

        // Paragraph header: a lone non-verb name
        if sentence.len() == 1 && is_name(first) {
            let section = current_section(&mut sections, &file, first);
            section.paragraphs.push(Paragraph {
                name: Some(first.lower()),
                sentences: Vec::new(),
                location: loc_span(&file, first, first),
            });
            continue;
        }

        // Ordinary sentence
        let (statements, _) = parse_statements(&sentence, &file, false);
        if statements.is_empty() {
            continue;
        }
        let location = statements
            .iter()
            .skip(1)
            .fold(statements[0].location.clone(), |acc, s| acc.merge(&s.location));
        let section = current_section(&mut sections, &file, first);
        if section.paragraphs.is_empty() {
            // Unnamed leading paragraph
            section.paragraphs.push(Paragraph {
                name: None,
                sentences: Vec::new(),
                location: location.clone(),
            });
        }
        let paragraph = section.paragraphs.last_mut().unwrap();
        paragraph.sentences.push(Sentence {
            statements,
            location,
        });
    }

    Program { file, sections }
}

/// Current section, creating the synthetic `main` wrapper on demand
fn current_section<'a>(
    sections: &'a mut Vec<Section>,
    file: &Path,
    at: &Token,
) -> &'a mut Section {
    if sections.is_empty() {
        sections.push(Section {
            name: "main".to_string(),
            synthetic: true,
            paragraphs: Vec::new(),
            location: loc_span(file, at, at),
        });
    }
    sections.last_mut().unwrap()
}

fn loc_span(file: &Path, from: &Token, to: &Token) -> SourceLocation {
    let (sl, sc) = from.start();
    let (el, ec) = to.end();
    SourceLocation::new(file.to_path_buf(), sl, sc, el, ec)
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let (line, offset) = strip_fixed_form(raw);
        let Some(line) = line else { continue };
        let trimmed = line.trim_start();
        if trimmed.starts_with('*') {
            continue;
        }
        tokenize_line(line, line_no, offset, &mut tokens);
    }
    tokens
}

/// Strip the fixed-form sequence area when present
///
/// A line whose first six characters are digits or spaces (with content
/// beyond) is treated as fixed-form: column 7 is the indicator (`*` or `/`
/// comments the line) and the text starts at column 8. Anything else is
/// taken as free-form.
fn strip_fixed_form(raw: &str) -> (Option<&str>, usize) {
    let mut indices = raw.char_indices();
    let head: Vec<(usize, char)> = indices.by_ref().take(7).collect();
    if head.len() == 7 && head[..6].iter().all(|(_, c)| c.is_ascii_digit()) {
        match head[6].1 {
            '*' | '/' => (None, 0),
            _ => {
                let rest = indices.next().map(|(i, _)| i).unwrap_or(raw.len());
                (Some(&raw[rest..]), 7)
            }
        }
    } else {
        (Some(raw), 0)
    }
}

fn tokenize_line(line: &str, line_no: usize, offset: usize, out: &mut Vec<Token>) {
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let col = offset + i + 1;
        if c == '\'' || c == '"' {
            // Quoted literal, kept with its quotes
            let quote = c;
            let start = i;
            i += 1;
            while i < chars.len() && chars[i] != quote {
                i += 1;
            }
            i = (i + 1).min(chars.len());
            out.push(Token {
                text: chars[start..i].iter().collect(),
                line: line_no,
                col,
            });
            continue;
        }
        if c == '.' {
            out.push(Token {
                text: ".".to_string(),
                line: line_no,
                col,
            });
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && !chars[i].is_whitespace() {
            i += 1;
        }
        let mut word: String = chars[start..i].iter().collect();
        // A trailing period ends the sentence, not the word
        if word.len() > 1 && word.ends_with('.') {
            word.pop();
            out.push(Token {
                text: word,
                line: line_no,
                col,
            });
            out.push(Token {
                text: ".".to_string(),
                line: line_no,
                col: offset + i,
            });
        } else {
            out.push(Token {
                text: word,
                line: line_no,
                col,
            });
        }
    }
}

/// Drop everything up to and including the `PROCEDURE DIVISION ... .` header
///
/// Sources without the header (test snippets) are taken whole.
fn skip_to_procedure_division(tokens: Vec<Token>) -> Vec<Token> {
    for i in 0..tokens.len() {
        if tokens[i].lower() == "procedure"
            && tokens.get(i + 1).is_some_and(|t| t.lower() == "division")
        {
            let end = tokens[i..]
                .iter()
                .position(|t| t.text == ".")
                .map(|p| i + p + 1)
                .unwrap_or(tokens.len());
            return tokens[end..].to_vec();
        }
    }
    tokens
}

fn take_sentence(tokens: &[Token]) -> (Vec<Token>, &[Token]) {
    match tokens.iter().position(|t| t.text == ".") {
        Some(p) => (tokens[..p].to_vec(), &tokens[p + 1..]),
        None => (tokens.to_vec(), &[]),
    }
}

// ---------------------------------------------------------------------------
// Statement parser
// ---------------------------------------------------------------------------

/// Parse the statements of one sentence (or one if-arm)
///
/// With `in_if` set, parsing stops before `else` / `end-if` so the enclosing
/// `if` can claim them; `else` binds to the nearest open `if`, scope runs to
/// the end of the sentence unless `end-if` closes it early.
fn parse_statements<'a>(
    toks: &'a [Token],
    file: &Path,
    in_if: bool,
) -> (Vec<Statement>, &'a [Token]) {
    let mut stmts = Vec::new();
    let mut rest = toks;
    while let Some(first) = rest.first() {
        let low = first.lower();
        if in_if && (low == "else" || low == "end-if") {
            break;
        }
        let (stmt, after) = parse_one(rest, file);
        rest = after;
        if let Some(stmt) = stmt {
            stmts.push(stmt);
        }
    }
    (stmts, rest)
}

fn parse_one<'a>(toks: &'a [Token], file: &Path) -> (Option<Statement>, &'a [Token]) {
    let first = &toks[0];
    match first.lower().as_str() {
        "if" => parse_if(toks, file),
        "go" => {
            let mut i = 1;
            if toks.get(i).is_some_and(|t| t.lower() == "to") {
                i += 1;
            }
            match toks.get(i) {
                Some(t) if is_name(t) => {
                    let target = t.lower();
                    let stmt = make(toks, i + 1, file, StatementKind::GoTo { target });
                    (Some(stmt), &toks[i + 1..])
                }
                // `GO TO.` with no target (altered goto) is opaque
                _ => take_opaque(toks, file, StatementKind::Other),
            }
        }
        "perform" => parse_perform(toks, file),
        "exit" => {
            let next = toks.get(1).map(|t| t.lower());
            match next.as_deref() {
                Some("program") => {
                    let stmt = make(toks, 2, file, StatementKind::ExitProgram);
                    (Some(stmt), &toks[2..])
                }
                Some("section") => {
                    let stmt = make(toks, 2, file, StatementKind::ExitSection);
                    (Some(stmt), &toks[2..])
                }
                _ => {
                    let stmt = make(toks, 1, file, StatementKind::ExitSection);
                    (Some(stmt), &toks[1..])
                }
            }
        }
        "stop" => {
            if toks.get(1).is_some_and(|t| t.lower() == "run") {
                let stmt = make(toks, 2, file, StatementKind::ExitProgram);
                (Some(stmt), &toks[2..])
            } else {
                take_opaque(toks, file, StatementKind::Other)
            }
        }
        "next" => {
            if toks.get(1).is_some_and(|t| t.lower() == "sentence") {
                let stmt = make(toks, 2, file, StatementKind::NextSentence);
                (Some(stmt), &toks[2..])
            } else {
                take_opaque(toks, file, StatementKind::Other)
            }
        }
        "move" => take_opaque(toks, file, StatementKind::Move),
        // Stray else/end-if outside an if; consume one token to make progress
        "else" | "end-if" => (None, &toks[1..]),
        _ => take_opaque(toks, file, StatementKind::Other),
    }
}

/// Consume tokens up to the next verb and wrap them as one opaque statement
fn take_opaque<'a>(
    toks: &'a [Token],
    file: &Path,
    kind: StatementKind,
) -> (Option<Statement>, &'a [Token]) {
    let mut end = 1;
    while end < toks.len() && !is_boundary(&toks[end]) {
        end += 1;
    }
    let stmt = make(toks, end, file, kind);
    (Some(stmt), &toks[end..])
}

fn is_boundary(tok: &Token) -> bool {
    let low = tok.lower();
    is_verb(tok) || low == "else" || low == "end-if" || low == "end-perform"
}

fn parse_if<'a>(toks: &'a [Token], file: &Path) -> (Option<Statement>, &'a [Token]) {
    // Condition: everything up to the first verb / `next`
    let mut cond_end = 1;
    while cond_end < toks.len() && !is_boundary(&toks[cond_end]) {
        cond_end += 1;
    }
    let condition = join(&toks[1..cond_end]);
    let mut rest = &toks[cond_end..];
    // Optional `then` noise word
    if rest.first().is_some_and(|t| t.lower() == "then") {
        rest = &rest[1..];
    }

    let (then_body, after_then) = parse_statements(rest, file, true);
    let mut rest = after_then;
    let mut else_body = None;
    if rest.first().is_some_and(|t| t.lower() == "else") {
        let (body, after_else) = parse_statements(&rest[1..], file, true);
        else_body = Some(body);
        rest = after_else;
    }
    if rest.first().is_some_and(|t| t.lower() == "end-if") {
        rest = &rest[1..];
    }

    let last = last_token(toks, rest);
    let location = loc_span(file, &toks[0], last);
    let text = format!("if {}", condition);
    (
        Some(Statement {
            kind: StatementKind::If {
                condition,
                then_body,
                else_body,
            },
            text,
            location,
        }),
        rest,
    )
}

fn parse_perform<'a>(toks: &'a [Token], file: &Path) -> (Option<Statement>, &'a [Token]) {
    match toks.get(1) {
        Some(t) if is_name(t) => {
            let target = t.lower();
            let mut i = 2;
            let mut thru = None;
            if toks
                .get(i)
                .is_some_and(|t| matches!(t.lower().as_str(), "thru" | "through"))
            {
                if let Some(t2) = toks.get(i + 1) {
                    thru = Some(t2.lower());
                    i += 2;
                }
            }
            // Trailing repetition clauses (`n times`, `until ...`) ride along
            // as text; the call shape is what the graph needs
            while i < toks.len() && !is_boundary(&toks[i]) {
                i += 1;
            }
            let stmt = make(toks, i, file, StatementKind::Perform { target, thru });
            (Some(stmt), &toks[i..])
        }
        _ => {
            // Inline perform: opaque through `end-perform`
            let mut end = 1;
            while end < toks.len() && toks[end].lower() != "end-perform" {
                end += 1;
            }
            end = (end + 1).min(toks.len());
            let stmt = make(toks, end, file, StatementKind::PerformInline);
            (Some(stmt), &toks[end..])
        }
    }
}

fn make(toks: &[Token], end: usize, file: &Path, kind: StatementKind) -> Statement {
    let end = end.max(1).min(toks.len());
    Statement {
        kind,
        text: join(&toks[..end]),
        location: loc_span(file, &toks[0], &toks[end - 1]),
    }
}

fn join(toks: &[Token]) -> String {
    toks.iter()
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn last_token<'a>(all: &'a [Token], rest: &[Token]) -> &'a Token {
    let consumed = all.len() - rest.len();
    &all[consumed.saturating_sub(1)]
}
