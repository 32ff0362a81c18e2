//! Error reports with the failing source line and live variable values

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

use crate::error::HostError;
use crate::evaluator::Token;
use crate::principal::PrincipalRef;
use crate::value::Value;

/// Shown instead of a value whose rendering failed
pub const RENDER_FAILURE_PLACEHOLDER: &str =
    "<exception while rendering variable, there seems to be a recursive reference in there>";

/// Marks the failing column
pub const MARKER: &str = " HERE>> ";

/// A piece of an annotated source line
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    /// An occurrence of a live local variable
    Local {
        name: String,
        type_tag: &'static str,
        value: String,
    },
    Marker,
}

/// One source line, split into segments
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceLine {
    pub segments: Vec<Segment>,
}

impl SourceLine {
    fn plain(text: &str) -> Self {
        Self {
            segments: vec![Segment::Text(text.to_string())],
        }
    }

    /// Occurrences of live locals on this line
    pub fn locals(&self) -> impl Iterator<Item = (&str, &'static str, &str)> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Local {
                name,
                type_tag,
                value,
            } => Some((name.as_str(), *type_tag, value.as_str())),
            _ => None,
        })
    }

    pub fn has_marker(&self) -> bool {
        self.segments.contains(&Segment::Marker)
    }

    /// The line as text, with the column marker inlined
    pub fn render(&self) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Text(text) => text.as_str(),
                Segment::Local { name, .. } => name.as_str(),
                Segment::Marker => MARKER,
            })
            .collect()
    }
}

/// A composed error report
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Diagnostic {
    /// `<message> in <app>[ at line L, pos C]`
    pub headline: String,
    /// Up to three lines around the failure
    pub lines: Vec<SourceLine>,
    /// Innermost frame first
    pub stack: Vec<String>,
    /// `<intro>: <message>`
    pub summary: String,
}

impl Diagnostic {
    pub fn render_lines(&self) -> Vec<String> {
        let mut out = vec![self.headline.clone()];
        for line in &self.lines {
            out.push(line.render());
            for (name, type_tag, value) in line.locals() {
                out.push(format!("  {} ({}) = {}", name, type_tag, value));
            }
        }
        for frame in &self.stack {
            out.push(format!("  in {}", frame));
        }
        out.push(self.summary.clone());
        out
    }
}

/// Find non-overlapping occurrences of `names` in `line`, scanning left to
/// right. The longest name wins at a given offset; equal lengths go to the
/// lexicographically smallest. Offsets are byte offsets.
pub fn find_locals<'n>(line: &str, names: impl IntoIterator<Item = &'n str>) -> Vec<(usize, &'n str)> {
    let mut best: BTreeMap<usize, &'n str> = BTreeMap::new();
    for name in names {
        if name.is_empty() {
            continue;
        }
        let mut from = 0;
        while let Some(found) = line[from..].find(name) {
            let at = from + found;
            best.entry(at)
                .and_modify(|current| {
                    if name.len() > current.len()
                        || (name.len() == current.len() && name < *current)
                    {
                        *current = name;
                    }
                })
                .or_insert(name);
            // Step one character so overlapping occurrences are seen
            from = at + line[at..].chars().next().map_or(1, char::len_utf8);
        }
    }

    let mut hits = Vec::new();
    let mut end = 0;
    for (at, name) in best {
        if at < end {
            continue;
        }
        hits.push((at, name));
        end = at + name.len();
    }
    hits
}

fn render_value(value: &Value) -> String {
    match catch_unwind(AssertUnwindSafe(|| value.pretty())) {
        Ok(Ok(text)) => text,
        _ => RENDER_FAILURE_PLACEHOLDER.to_string(),
    }
}

/// Split `line` into text and local segments, inserting the marker at
/// `column` (in characters)
pub fn annotate_line(line: &str, column: usize, locals: &BTreeMap<String, Value>) -> SourceLine {
    let marker_at = line
        .char_indices()
        .nth(column)
        .map_or(line.len(), |(at, _)| at);

    let mut segments = Vec::new();
    let mut marked = false;
    let mut cursor = 0;
    let push_text = |segments: &mut Vec<Segment>, marked: &mut bool, from: usize, to: usize| {
        if !*marked && marker_at >= from && marker_at < to {
            if marker_at > from {
                segments.push(Segment::Text(line[from..marker_at].to_string()));
            }
            segments.push(Segment::Marker);
            *marked = true;
            segments.push(Segment::Text(line[marker_at..to].to_string()));
        } else if to > from {
            segments.push(Segment::Text(line[from..to].to_string()));
        }
    };

    for (at, name) in find_locals(line, locals.keys().map(String::as_str)) {
        push_text(&mut segments, &mut marked, cursor, at);
        if !marked && marker_at >= at && marker_at < at + name.len() {
            segments.push(Segment::Marker);
            marked = true;
        }
        let value = &locals[name];
        segments.push(Segment::Local {
            name: name.to_string(),
            type_tag: value.type_tag(),
            value: render_value(value),
        });
        cursor = at + name.len();
    }
    push_text(&mut segments, &mut marked, cursor, line.len());
    if !marked {
        segments.push(Segment::Marker);
    }
    SourceLine { segments }
}

/// Build the location part of a report
pub fn compose(
    app: &str,
    source: &str,
    message: &str,
    token: Option<Token>,
    locals: &BTreeMap<String, Value>,
) -> Diagnostic {
    let lines: Vec<&str> = source.lines().collect();
    let mut headline = format!("{} in {}", message, app);
    let mut shown = Vec::new();

    if let Some(token) = token {
        if lines.len() > 1 {
            headline.push_str(&format!(" at line {}, pos {}", token.line + 1, token.column + 1));
        } else {
            headline.push_str(&format!(" at pos {}", token.position + 1));
        }
        if let Some(failing) = lines.get(token.line) {
            if token.line > 0 {
                shown.push(SourceLine::plain(lines[token.line - 1]));
            }
            shown.push(annotate_line(failing, token.column, locals));
            if let Some(next) = lines.get(token.line + 1) {
                shown.push(SourceLine::plain(next));
            }
        }
    }

    Diagnostic {
        headline,
        lines: shown,
        stack: Vec::new(),
        summary: String::new(),
    }
}

/// Turns failures into diagnostics for the attached sink, or the log when
/// no sink is attached or it does not take diagnostics
#[derive(Clone, Default)]
pub struct ErrorReporter {
    sink: Option<PrincipalRef>,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, sink: PrincipalRef) {
        self.sink = Some(sink);
    }

    pub fn detach(&mut self) {
        self.sink = None;
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// Report `err`. Never fails and never panics.
    pub fn report(&self, intro: &str, app: &str, source: &str, err: &HostError) {
        let intro = err.intro(intro);
        let built = catch_unwind(AssertUnwindSafe(|| build_report(intro, app, source, err)));
        let diagnostic = match built {
            Ok(diagnostic) => diagnostic,
            Err(_) => Diagnostic {
                headline: format!("{} in {}", err, app),
                summary: format!("{}: {}", intro, err),
                ..Diagnostic::default()
            },
        };

        match &self.sink {
            Some(sink) if sink.accepts_diagnostics() => sink.send_diagnostic(&diagnostic),
            _ => {
                for line in diagnostic.render_lines() {
                    error!(target: "apphost", "{}", line);
                }
            }
        }
    }

    /// Whether reports currently reach a principal instead of the log
    pub fn reaches_sink(&self) -> bool {
        self.sink.as_ref().is_some_and(|sink| sink.accepts_diagnostics())
    }
}

fn build_report(intro: &str, app: &str, source: &str, err: &HostError) -> Diagnostic {
    match err.eval_error() {
        Some(eval) => {
            let mut diagnostic = compose(app, source, &eval.message, eval.token, &eval.locals);
            diagnostic.stack = eval.stack.clone();
            diagnostic.summary = format!("{}: {}", intro, eval.message);
            diagnostic
        }
        None => Diagnostic {
            headline: format!("{} in {}", err, app),
            summary: format!("{}: {}", intro, err),
            ..Diagnostic::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::EvalError;
    use crate::testing::{LogCapture, RecordingPrincipal};
    use std::sync::Arc;

    fn locals(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_annotates_every_occurrence() {
        let vars = locals(&[("a", Value::Number(5.0)), ("x", Value::Number(1.0))]);
        let line = annotate_line("x = a + a", 4, &vars);
        let found: Vec<_> = line.locals().map(|(name, _, value)| (name, value)).collect();
        assert_eq!(found, vec![("x", "1"), ("a", "5"), ("a", "5")]);
        assert_eq!(line.render(), "x =  HERE>> a + a");
    }

    #[test]
    fn test_longest_name_wins_at_offset() {
        let hits = find_locals("abc + ab", ["a", "ab", "abc"]);
        assert_eq!(hits, vec![(0, "abc"), (6, "ab")]);
    }

    #[test]
    fn test_occurrences_do_not_overlap() {
        // "ab" at 0 swallows the "b" at 1
        let hits = find_locals("ab", ["ab", "b"]);
        assert_eq!(hits, vec![(0, "ab")]);
    }

    #[test]
    fn test_equal_length_tie_is_deterministic() {
        assert_eq!(find_locals("xy", ["xy", "xy"]), vec![(0, "xy")]);
        assert_eq!(find_locals("q", ["q", ""]), vec![(0, "q")]);
    }

    #[test]
    fn test_unrenderable_value_gets_placeholder() {
        let mut deep = Value::Null;
        for _ in 0..200 {
            deep = Value::List(vec![deep]);
        }
        let vars = locals(&[("loop", deep)]);
        let line = annotate_line("loop", 0, &vars);
        let (_, type_tag, value) = line.locals().next().unwrap();
        assert_eq!(type_tag, "list");
        assert_eq!(value, RENDER_FAILURE_PLACEHOLDER);
    }

    #[test]
    fn test_multi_line_location() {
        let source = "a = 1;\nb = a / 0;\nc = 2;";
        let d = compose("calc", source, "division by zero", Some(Token::new(1, 6, 13)), &BTreeMap::new());
        assert_eq!(d.headline, "division by zero in calc at line 2, pos 7");
        assert_eq!(d.lines.len(), 3);
        assert!(d.lines[1].has_marker());
        assert!(!d.lines[0].has_marker());
        assert_eq!(d.lines[1].render(), "b = a  HERE>> / 0;");
    }

    #[test]
    fn test_single_line_uses_position() {
        let d = compose("calc", "1/0", "division by zero", Some(Token::new(0, 1, 1)), &BTreeMap::new());
        assert_eq!(d.headline, "division by zero in calc at pos 2");
        assert_eq!(d.lines.len(), 1);
    }

    #[test]
    fn test_no_token_no_lines() {
        let d = compose("calc", "1/0", "boom", None, &BTreeMap::new());
        assert_eq!(d.headline, "boom in calc");
        assert!(d.lines.is_empty());
    }

    #[test]
    fn test_report_goes_to_sink() {
        let sink = Arc::new(RecordingPrincipal::player("alex"));
        let mut reporter = ErrorReporter::new();
        reporter.attach(sink.clone());
        let err = HostError::from_eval(EvalError::arithmetic("division by zero").at(Token::new(0, 1, 1)));
        reporter.report("Error while running custom command", "calc", "1/0", &err);

        let messages = sink.messages();
        assert_eq!(messages.first().unwrap(), "division by zero in calc at pos 2");
        assert_eq!(messages.last().unwrap(), "Arithmetic failed: division by zero");
    }

    fn captured_logs(run: impl FnOnce()) -> String {
        let capture = LogCapture::new();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, run);
        capture.contents()
    }

    #[test]
    fn test_report_without_sink_goes_to_log() {
        let reporter = ErrorReporter::new();
        let logs = captured_logs(|| {
            reporter.report("Callback failed", "calc", "", &HostError::Paused);
        });
        assert!(!reporter.has_sink());
        assert!(logs.contains("ERROR"));
        assert!(logs.contains("Callback failed: "));
    }

    #[test]
    fn test_server_sink_does_not_take_reports() {
        let server = Arc::new(RecordingPrincipal::server());
        let mut reporter = ErrorReporter::new();
        reporter.attach(server.clone());
        assert!(reporter.has_sink());
        assert!(!reporter.reaches_sink());

        let err = HostError::from_eval(EvalError::arithmetic("division by zero").at(Token::new(0, 1, 1)));
        let logs = captured_logs(|| {
            reporter.report("Error while running custom command", "calc", "1/0", &err);
        });

        assert!(server.messages().is_empty());
        assert!(logs.contains("division by zero in calc at pos 2"));
        assert!(logs.contains("Arithmetic failed: division by zero"));
    }
}
