//! Parser for the bracketed directives a model embeds in its replies.
//!
//! Grammar, case-insensitive on tag names:
//!
//! ```text
//! [MEMORY_SAVE: key=..., value=..., tags=a, b]
//! [MEMORY_DELETE: key=...]
//! [SCHEDULE: name=..., prompt=..., cron=... | at=...]
//! [SKILL_CREATE: name=..., description=...] body [/SKILL_CREATE]
//! [DAILY_LOG: free text]
//! [NOTIFY: title=..., message=...]
//! ```
//!
//! Fields are separated by commas that are followed by `name=`, so values may
//! themselves contain commas. Balanced brackets inside a directive belong to
//! it. Every directive span is removed from the visible text, whether or not
//! the directive was well formed.

use kairos_rs_store::CronSchedule;
use kairos_rs_store::schedule::parse_instant;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::LazyLock;

static OPEN_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\[\s*(MEMORY_SAVE|MEMORY_DELETE|SCHEDULE|SKILL_CREATE|DAILY_LOG|NOTIFY)\s*:",
    )
    .expect("directive regex should compile")
});

static SKILL_CLOSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[\s*/\s*SKILL_CREATE\s*\]").expect("close regex should compile")
});

static FIELD_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|,)\s*([A-Za-z][A-Za-z0-9_-]*)\s*=").expect("field regex should compile")
});

static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("newline regex should compile"));

/// When a schedule directive fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleSpec {
    /// `HH:MM` or five-field cron.
    Cron(String),
    /// Absolute instant, as written.
    At(String),
}

/// A well-formed directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    MemorySave {
        key: String,
        value: String,
        tags: Vec<String>,
    },
    MemoryDelete {
        key: String,
    },
    ScheduleCreate {
        name: String,
        prompt: String,
        when: ScheduleSpec,
    },
    SkillCreate {
        name: String,
        description: String,
        body: String,
    },
    DailyLog {
        text: String,
    },
    Notify {
        title: String,
        message: String,
    },
}

impl Directive {
    /// Upper-case tag name.
    pub fn tag(&self) -> &'static str {
        match self {
            Directive::MemorySave { .. } => "MEMORY_SAVE",
            Directive::MemoryDelete { .. } => "MEMORY_DELETE",
            Directive::ScheduleCreate { .. } => "SCHEDULE",
            Directive::SkillCreate { .. } => "SKILL_CREATE",
            Directive::DailyLog { .. } => "DAILY_LOG",
            Directive::Notify { .. } => "NOTIFY",
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::MemorySave { key, .. } | Directive::MemoryDelete { key } => {
                write!(f, "{}({key})", self.tag())
            }
            Directive::ScheduleCreate { name, .. } | Directive::SkillCreate { name, .. } => {
                write!(f, "{}({name})", self.tag())
            }
            Directive::DailyLog { .. } => f.write_str(self.tag()),
            Directive::Notify { title, .. } => write!(f, "{}({title})", self.tag()),
        }
    }
}

/// A directive that was recognised but could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveError {
    pub tag: String,
    pub reason: String,
    /// Byte range of the offending span in the original text.
    pub span: Range<usize>,
}

impl fmt::Display for DirectiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.tag, self.reason)
    }
}

/// Result of parsing a model reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedReply {
    /// Reply text with every directive span removed.
    pub visible: String,
    /// Well-formed directives in order of appearance.
    pub directives: Vec<Directive>,
    /// Malformed directives, each isolated to its own span.
    pub errors: Vec<DirectiveError>,
}

/// Extract directives from `text` and compute the visible remainder.
pub fn parse_reply(text: &str) -> ParsedReply {
    let mut parsed = ParsedReply::default();
    let mut spans: Vec<Range<usize>> = Vec::new();
    let mut cursor = 0;

    while let Some(caps) = OPEN_TAG.captures_at(text, cursor) {
        let Some(head) = caps.get(0) else {
            break;
        };
        let Some(end) = closing_bracket(text, head.end()) else {
            break;
        };
        let tag = caps[1].to_ascii_uppercase();
        let fields_text = &text[head.end()..end];
        let mut span = head.start()..end + 1;

        let result = if tag == "SKILL_CREATE" {
            let body_start = span.end;
            match SKILL_CLOSE.find_at(text, body_start) {
                Some(close) => {
                    span.end = close.end();
                    parse_skill(fields_text, &text[body_start..close.start()])
                }
                None => Err("missing closing [/SKILL_CREATE]".to_string()),
            }
        } else {
            parse_directive(&tag, fields_text)
        };

        match result {
            Ok(directive) => parsed.directives.push(directive),
            Err(reason) => parsed.errors.push(DirectiveError {
                tag,
                reason,
                span: span.clone(),
            }),
        }
        cursor = span.end;
        spans.push(span);
    }

    let strays: Vec<Range<usize>> = SKILL_CLOSE
        .find_iter(text)
        .map(|m| m.range())
        .filter(|stray| {
            !spans
                .iter()
                .any(|span| span.start <= stray.start && stray.end <= span.end)
        })
        .collect();
    spans.extend(strays);
    spans.sort_by_key(|span| span.start);
    parsed.visible = strip_spans(text, &spans);
    parsed
}

/// Byte offset of the `]` closing a tag whose body starts at `from`.
///
/// Nested brackets are skipped while they balance. An unbalanced body closes
/// at the first `]`.
fn closing_bracket(text: &str, from: usize) -> Option<usize> {
    let rest = &text[from..];
    let mut depth = 0usize;
    for (offset, ch) in rest.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' if depth == 0 => return Some(from + offset),
            ']' => depth -= 1,
            _ => {}
        }
    }
    rest.find(']').map(|offset| from + offset)
}

fn parse_directive(tag: &str, fields_text: &str) -> Result<Directive, String> {
    match tag {
        "MEMORY_SAVE" => {
            let mut fields = parse_fields(fields_text);
            let key = required(&mut fields, "key")?;
            let value = required(&mut fields, "value")?;
            let tags = fields
                .remove("tags")
                .map(|tags| split_list(&tags))
                .unwrap_or_default();
            Ok(Directive::MemorySave { key, value, tags })
        }
        "MEMORY_DELETE" => {
            let mut fields = parse_fields(fields_text);
            Ok(Directive::MemoryDelete {
                key: required(&mut fields, "key")?,
            })
        }
        "SCHEDULE" => {
            let mut fields = parse_fields(fields_text);
            let name = required(&mut fields, "name")?;
            let prompt = required(&mut fields, "prompt")?;
            let cron = fields.remove("cron").filter(|value| !value.is_empty());
            let at = fields.remove("once_at").filter(|value| !value.is_empty());
            let when = match (cron, at) {
                (Some(_), Some(_)) => return Err("set either cron or at, not both".to_string()),
                (None, None) => return Err("missing required field: cron or at".to_string()),
                (Some(cron), None) => {
                    CronSchedule::parse(&cron).map_err(|err| err.to_string())?;
                    ScheduleSpec::Cron(cron)
                }
                (None, Some(at)) => {
                    parse_instant(&at).map_err(|err| err.to_string())?;
                    ScheduleSpec::At(at)
                }
            };
            Ok(Directive::ScheduleCreate { name, prompt, when })
        }
        "DAILY_LOG" => {
            let text = fields_text.trim();
            let lowered = text.to_ascii_lowercase();
            let text = ["text=", "entry="]
                .iter()
                .find(|prefix| lowered.starts_with(*prefix))
                .map_or(text, |prefix| text[prefix.len()..].trim());
            let text = unquote(text);
            if text.is_empty() {
                return Err("empty log entry".to_string());
            }
            Ok(Directive::DailyLog {
                text: text.to_string(),
            })
        }
        "NOTIFY" => {
            let mut fields = parse_fields(fields_text);
            Ok(Directive::Notify {
                title: required(&mut fields, "title")?,
                message: required(&mut fields, "message")?,
            })
        }
        other => Err(format!("unsupported tag {other}")),
    }
}

fn parse_skill(fields_text: &str, body: &str) -> Result<Directive, String> {
    let mut fields = parse_fields(fields_text);
    let name = required(&mut fields, "name")?;
    let description = required(&mut fields, "description")?;
    let body = body.trim();
    if body.is_empty() {
        return Err("empty skill body".to_string());
    }
    Ok(Directive::SkillCreate {
        name,
        description,
        body: body.to_string(),
    })
}

/// Split `a=1, b=x, y, c=2` into normalized names and trimmed values.
fn parse_fields(text: &str) -> HashMap<String, String> {
    let starts: Vec<(usize, usize, String)> = FIELD_START
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?.as_str();
            Some((whole.start(), whole.end(), normalize_field_name(name)))
        })
        .collect();

    let mut fields = HashMap::new();
    for (idx, (_, value_start, name)) in starts.iter().enumerate() {
        let value_end = starts.get(idx + 1).map_or(text.len(), |next| next.0);
        let value = unquote(text[*value_start..value_end].trim());
        fields.entry(name.clone()).or_insert_with(|| value.to_string());
    }
    fields
}

fn normalize_field_name(name: &str) -> String {
    let name = name.to_ascii_lowercase().replace('-', "_");
    match name.as_str() {
        "at" | "onceat" => "once_at".to_string(),
        _ => name,
    }
}

fn required(fields: &mut HashMap<String, String>, name: &str) -> Result<String, String> {
    fields
        .remove(name)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| format!("missing required field: {name}"))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| unquote(item.trim()).to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return value[1..value.len() - 1].trim();
        }
    }
    value
}

/// Remove spans (and the spaces or tabs right after each) and tidy blank lines.
fn strip_spans(text: &str, spans: &[Range<usize>]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for span in spans {
        if span.start < cursor {
            continue;
        }
        out.push_str(&text[cursor..span.start]);
        let rest = &text[span.end..];
        let skipped = rest.len() - rest.trim_start_matches([' ', '\t']).len();
        cursor = span.end + skipped;
    }
    out.push_str(&text[cursor..]);
    let out = out
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    EXCESS_NEWLINES.replace_all(&out, "\n\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn one_bad_directive_does_not_block_the_others() {
        let parsed = parse_reply("ok [MEMORY_SAVE: key=a, value=b] [MEMORY_SAVE: key=c]");
        assert_eq!(parsed.visible, "ok");
        assert_eq!(
            parsed.directives,
            vec![Directive::MemorySave {
                key: "a".to_string(),
                value: "b".to_string(),
                tags: Vec::new(),
            }]
        );
        assert_eq!(parsed.errors.len(), 1);
        assert_eq!(parsed.errors[0].tag, "MEMORY_SAVE");
        assert_eq!(parsed.errors[0].reason, "missing required field: value");
    }

    #[test]
    fn fields_are_order_and_case_tolerant() {
        let parsed = parse_reply(
            "[memory_save:   tags = home, family ,VALUE=\"Lives in Busan, Korea\", Key = home_city ]",
        );
        assert_eq!(
            parsed.directives,
            vec![Directive::MemorySave {
                key: "home_city".to_string(),
                value: "Lives in Busan, Korea".to_string(),
                tags: vec!["home".to_string(), "family".to_string()],
            }]
        );
        assert_eq!(parsed.visible, "");
    }

    #[test]
    fn schedule_requires_exactly_one_valid_time() {
        let parsed = parse_reply(
            "[SCHEDULE: name=tea, prompt=Remind me about tea, cron=15:00]\
             [SCHEDULE: name=bad, prompt=x, cron=whenever]\
             [SCHEDULE: name=both, prompt=x, cron=08:00, at=2030-01-01 09:00]\
             [SCHEDULE: name=once, prompt=x, once-at=2030-01-01 09:00]",
        );
        assert_eq!(parsed.directives.len(), 2);
        assert_eq!(
            parsed.directives[0],
            Directive::ScheduleCreate {
                name: "tea".to_string(),
                prompt: "Remind me about tea".to_string(),
                when: ScheduleSpec::Cron("15:00".to_string()),
            }
        );
        assert_eq!(
            parsed.directives[1],
            Directive::ScheduleCreate {
                name: "once".to_string(),
                prompt: "x".to_string(),
                when: ScheduleSpec::At("2030-01-01 09:00".to_string()),
            }
        );
        assert_eq!(parsed.errors.len(), 2);
        assert!(parsed.errors[1].reason.contains("not both"));
    }

    #[test]
    fn skill_block_captures_multiline_body() {
        let text = "Learned something.\n[SKILL_CREATE: name=Weather Check, description=How to check weather]\nStep one.\nStep two.\n[/SKILL_CREATE]\nDone.";
        let parsed = parse_reply(text);
        assert_eq!(
            parsed.directives,
            vec![Directive::SkillCreate {
                name: "Weather Check".to_string(),
                description: "How to check weather".to_string(),
                body: "Step one.\nStep two.".to_string(),
            }]
        );
        assert_eq!(parsed.visible, "Learned something.\n\nDone.");
    }

    #[test]
    fn unclosed_skill_block_is_an_error_and_still_hidden() {
        let parsed = parse_reply("Hi [SKILL_CREATE: name=x, description=y] body without end");
        assert!(parsed.directives.is_empty());
        assert_eq!(parsed.errors[0].reason, "missing closing [/SKILL_CREATE]");
        assert_eq!(parsed.visible, "Hi body without end");
    }

    #[test]
    fn stray_closing_tags_are_hidden() {
        let parsed = parse_reply("text [/SKILL_CREATE] more");
        assert_eq!(parsed.visible, "text more");
        assert!(parsed.errors.is_empty());
    }

    #[test]
    fn daily_log_notify_and_delete() {
        let parsed = parse_reply(
            "Noted.\n[DAILY_LOG: User started a new job, feels great]\n[NOTIFY: title=Heads up, message=Meeting in 5, bring notes]\n[MEMORY_DELETE: key=old_job]",
        );
        assert_eq!(
            parsed.directives,
            vec![
                Directive::DailyLog {
                    text: "User started a new job, feels great".to_string()
                },
                Directive::Notify {
                    title: "Heads up".to_string(),
                    message: "Meeting in 5, bring notes".to_string(),
                },
                Directive::MemoryDelete {
                    key: "old_job".to_string()
                },
            ]
        );
        assert_eq!(parsed.visible, "Noted.");
    }

    #[test]
    fn nested_brackets_stay_inside_the_directive() {
        let parsed = parse_reply("Saved. [MEMORY_SAVE: key=todo, value=buy milk [urgent]]");
        assert_eq!(parsed.visible, "Saved.");
        assert_eq!(
            parsed.directives,
            vec![Directive::MemorySave {
                key: "todo".to_string(),
                value: "buy milk [urgent]".to_string(),
                tags: Vec::new(),
            }]
        );

        let parsed = parse_reply("ok [DAILY_LOG: read RFC [3339] today] done");
        assert_eq!(parsed.visible, "ok done");
        assert_eq!(
            parsed.directives,
            vec![Directive::DailyLog {
                text: "read RFC [3339] today".to_string()
            }]
        );
    }

    #[test]
    fn unbalanced_directive_closes_at_first_bracket() {
        let parsed = parse_reply("[DAILY_LOG: half [open] tail");
        assert_eq!(
            parsed.directives,
            vec![Directive::DailyLog {
                text: "half [open".to_string()
            }]
        );
        assert_eq!(parsed.visible, "tail");
    }

    #[test]
    fn text_without_directives_is_unchanged_apart_from_trim() {
        let parsed = parse_reply("  [not a directive] hello  ");
        assert_eq!(parsed.visible, "[not a directive] hello");
        assert!(parsed.directives.is_empty());
        assert!(parsed.errors.is_empty());
    }
}
