use super::timestamp::{TimestampFormat, TIME_LOCAL_FORMAT};
use super::{MalformedReason, ParseOutcome, ParsedLine};
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template is empty")]
    Empty,

    #[error("unterminated placeholder '${{{0}' in template")]
    UnterminatedPlaceholder(String),

    #[error("template has no timestamp variable ($time_local or $time_iso8601)")]
    MissingTimestamp,

    #[error("template has no client address variable ($remote_addr or $client)")]
    MissingClientAddress,

    #[error("compiled template is not a valid regex: {0}")]
    InvalidRegex(#[from] regex::Error),
}

/// What a template variable feeds into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Timestamp,
    Status,
    Method,
    Scheme,
    Host,
    RequestPath,
    Request,
    ClientAddr,
    BytesSent,
    Gzip,
    Upstream,
    Referrer,
    UserAgent,
    Ignored,
}

impl Field {
    fn from_variable(name: &str) -> Self {
        match name {
            "time_local" | "time_iso8601" => Field::Timestamp,
            "status" => Field::Status,
            "request_method" => Field::Method,
            "scheme" => Field::Scheme,
            "host" | "server_name" => Field::Host,
            "request_uri" | "uri" => Field::RequestPath,
            "request" => Field::Request,
            "remote_addr" | "client" => Field::ClientAddr,
            "body_bytes_sent" | "bytes_sent" => Field::BytesSent,
            "gzip_ratio" => Field::Gzip,
            "server" | "upstream_addr" | "upstream_status" => Field::Upstream,
            "http_referer" => Field::Referrer,
            "http_user_agent" => Field::UserAgent,
            _ => Field::Ignored,
        }
    }
}

#[derive(Debug, PartialEq)]
enum Token {
    Literal(String),
    Variable(String),
}

/// A line template compiled into an anchored regex plus a capture-slot map.
///
/// Templates use nginx `log_format` syntax: `$name` or `${name}` placeholders
/// embedded in literal text. Compile once and reuse for every line.
#[derive(Debug, Clone)]
pub struct LineTemplate {
    regex: Regex,
    slots: Vec<Field>,
    time_format: TimestampFormat,
}

impl LineTemplate {
    /// Compile a template. `time_format` overrides the format implied by the
    /// timestamp variable (`$time_local` → strptime, `$time_iso8601` → iso8601).
    pub fn compile(template: &str, time_format: Option<&str>) -> Result<Self, TemplateError> {
        let tokens = tokenize(template)?;
        if tokens.is_empty() {
            return Err(TemplateError::Empty);
        }

        let mut pattern = String::from("^");
        let mut slots = Vec::new();
        let mut implied_format = None;

        for (i, token) in tokens.iter().enumerate() {
            match token {
                Token::Literal(text) => push_literal(&mut pattern, text),
                Token::Variable(name) => {
                    let field = Field::from_variable(name);
                    if field == Field::Timestamp && implied_format.is_none() {
                        implied_format = Some(if name == "time_iso8601" {
                            TimestampFormat::Iso8601
                        } else {
                            TimestampFormat::Strptime(TIME_LOCAL_FORMAT.to_string())
                        });
                    }
                    pattern.push_str(&capture_for(name, tokens.get(i + 1)));
                    slots.push(field);
                }
            }
        }
        pattern.push('$');

        let Some(implied_format) = implied_format else {
            return Err(TemplateError::MissingTimestamp);
        };
        if !slots.contains(&Field::ClientAddr) {
            return Err(TemplateError::MissingClientAddress);
        }

        let time_format = time_format
            .map(TimestampFormat::from_spec)
            .unwrap_or(implied_format);

        Ok(Self {
            regex: Regex::new(&pattern)?,
            slots,
            time_format,
        })
    }

    /// Parse one raw line. Never fails: a non-matching line is `Malformed`.
    pub fn parse(&self, line: &str) -> ParseOutcome {
        let Some(captures) = self.regex.captures(line.trim()) else {
            return ParseOutcome::Malformed(MalformedReason::NoMatch);
        };

        let mut timestamp_raw = None;
        let mut client_ip = None;
        let mut request = None;
        let mut parsed = ParsedFields::default();

        for (slot, field) in self.slots.iter().enumerate() {
            let Some(value) = captures.get(slot + 1).map(|m| m.as_str()) else {
                continue;
            };

            match field {
                Field::Timestamp => {
                    timestamp_raw.get_or_insert(value);
                }
                Field::ClientAddr => {
                    if client_ip.is_none() {
                        client_ip = present(value);
                    }
                }
                Field::Status => parsed.status_code = present(value).and_then(|v| v.parse().ok()),
                Field::Method => parsed.method = present(value),
                Field::Scheme => parsed.scheme = present(value),
                Field::Host => parsed.domain = present(value),
                Field::RequestPath => parsed.request_path = present(value),
                Field::Request => request = present(value),
                Field::BytesSent => parsed.bytes_sent = present(value).and_then(|v| v.parse().ok()),
                Field::Gzip => parsed.gzip = present(value).is_some(),
                Field::Upstream => {
                    if parsed.upstream.is_none() {
                        parsed.upstream = present(value);
                    }
                }
                Field::Referrer => parsed.referrer = present(value),
                Field::UserAgent => parsed.user_agent = present(value),
                Field::Ignored => {}
            }
        }

        // "$request" is "METHOD target PROTOCOL"; explicit variables take precedence
        if let Some(request) = request {
            let mut parts = request.split_whitespace();
            if parsed.method.is_none() {
                parsed.method = parts.next().map(str::to_string);
            } else {
                parts.next();
            }
            if parsed.request_path.is_none() {
                parsed.request_path = parts.next().map(str::to_string);
            }
        }

        let Some(client_ip) = client_ip else {
            return ParseOutcome::Malformed(MalformedReason::MissingClientAddress);
        };

        let timestamp = match timestamp_raw.map(|raw| self.time_format.parse(raw)) {
            Some(Ok(ts)) => ts,
            _ => return ParseOutcome::Malformed(MalformedReason::BadTimestamp),
        };

        ParseOutcome::Record(ParsedLine {
            timestamp,
            client_ip,
            domain: parsed.domain,
            method: parsed.method,
            scheme: parsed.scheme,
            request_path: parsed.request_path,
            status_code: parsed.status_code,
            bytes_sent: parsed.bytes_sent,
            gzip: parsed.gzip,
            upstream: parsed.upstream,
            referrer: parsed.referrer,
            user_agent: parsed.user_agent,
        })
    }
}

#[derive(Default)]
struct ParsedFields {
    domain: Option<String>,
    method: Option<String>,
    scheme: Option<String>,
    request_path: Option<String>,
    status_code: Option<u16>,
    bytes_sent: Option<u64>,
    gzip: bool,
    upstream: Option<String>,
    referrer: Option<String>,
    user_agent: Option<String>,
}

/// nginx writes "-" for unset variables.
fn present(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value == "-" {
        None
    } else {
        Some(value.to_string())
    }
}

fn tokenize(template: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut chars = template.trim().chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            literal.push(c);
            continue;
        }

        let mut name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                name.push(c);
            }
            if !closed {
                return Err(TemplateError::UnterminatedPlaceholder(name));
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
        }

        if name.is_empty() {
            literal.push('$');
            continue;
        }

        if !literal.is_empty() {
            tokens.push(Token::Literal(std::mem::take(&mut literal)));
        }
        tokens.push(Token::Variable(name));
    }

    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }

    Ok(tokens)
}

fn push_literal(pattern: &mut String, text: &str) {
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_space {
                pattern.push_str(r"\s+");
                in_space = true;
            }
        } else {
            in_space = false;
            pattern.push_str(&regex::escape(&c.to_string()));
        }
    }
}

/// Capture group for a variable, bounded by whatever follows it.
fn capture_for(name: &str, next: Option<&Token>) -> String {
    // `$time_local` always carries one space before the zone offset
    if name == "time_local" {
        return r"(\S+ [+-]\d{4})".to_string();
    }

    match next {
        None => "(.*)".to_string(),
        Some(Token::Variable(_)) => r"(\S*?)".to_string(),
        Some(Token::Literal(text)) => match text.chars().next() {
            Some(c) if !c.is_whitespace() => format!("([^{}]*)", regex::escape(&c.to_string())),
            _ => r"(\S+)".to_string(),
        },
    }
}
