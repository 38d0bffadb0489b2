use std::sync::OnceLock;

use regex::Regex;

use crate::assembler::{AsmEvent, Assembler, Assembly, Diagnostic, Operand, SourceEvent};
use crate::isa::MachineKind;
use crate::program::{MAX_DATA_SIZE, MAX_FRAME_SLOTS};

const MAX_OPERANDS: usize = 3;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedSource {
    pub events: Vec<SourceEvent>,
    pub errors: Vec<Diagnostic>,
}

/// Assembles `source` for `machine`, streaming each line's event into the
/// assembler as soon as it is recognized.
pub fn assemble(source: &str, machine: MachineKind) -> Assembly {
    let mut assembler = Assembler::new(machine);
    let mut front_end = FrontEnd::default();
    for (line_idx, raw_line) in source.lines().enumerate() {
        let line = line_idx + 1;
        match front_end.parse_line(raw_line) {
            Ok(Some(event)) => assembler.apply(&SourceEvent { line, event }),
            Ok(None) => {}
            Err(message) => assembler.report(Diagnostic::syntax(line, message)),
        }
    }
    assembler.finish()
}

/// Tokenizes the whole source without assembling it.
pub fn parse(source: &str) -> ParsedSource {
    let mut parsed = ParsedSource::default();
    let mut front_end = FrontEnd::default();
    for (line_idx, raw_line) in source.lines().enumerate() {
        let line = line_idx + 1;
        match front_end.parse_line(raw_line) {
            Ok(Some(event)) => parsed.events.push(SourceEvent { line, event }),
            Ok(None) => {}
            Err(message) => parsed.errors.push(Diagnostic::syntax(line, message)),
        }
    }
    parsed
}

#[derive(Debug, Default)]
struct FrontEnd {
    saw_globals: bool,
}

impl FrontEnd {
    fn parse_line(&mut self, raw_line: &str) -> Result<Option<AsmEvent>, String> {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            return Ok(None);
        }

        if line.starts_with('.') {
            return self.parse_directive(line).map(Some);
        }

        if let Some(captures) = label_re().captures(line) {
            return Ok(Some(AsmEvent::Label(captures[1].to_string())));
        }

        let captures = instruction_re()
            .captures(line)
            .ok_or_else(|| format!("cannot parse '{line}'"))?;
        let mnemonic = captures[1].to_string();
        let operands = match captures.get(2) {
            Some(rest) => parse_operands(rest.as_str())?,
            None => Vec::new(),
        };
        Ok(Some(AsmEvent::Instruction { mnemonic, operands }))
    }

    fn parse_directive(&mut self, line: &str) -> Result<AsmEvent, String> {
        if let Some(captures) = globals_re().captures(line) {
            if self.saw_globals {
                return Err("duplicate .globals directive".to_string());
            }
            self.saw_globals = true;
            let count = parse_count(&captures[1], "globals count")? as usize;
            if count > MAX_DATA_SIZE {
                return Err(format!(
                    "globals count {count} exceeds the limit of {MAX_DATA_SIZE}"
                ));
            }
            return Ok(AsmEvent::Globals(count));
        }
        if let Some(captures) = def_re().captures(line) {
            let name = captures[1].to_string();
            let args = parse_count(&captures[2], "args count")?;
            let locals = parse_count(&captures[3], "locals count")?;
            let slots = args as usize + locals as usize;
            if slots > MAX_FRAME_SLOTS {
                return Err(format!(
                    "function {name} declares {slots} slots, more than the limit of {MAX_FRAME_SLOTS}"
                ));
            }
            return Ok(AsmEvent::Function { name, args, locals });
        }

        let directive = line.split_whitespace().next().unwrap_or(line);
        match directive {
            ".globals" => Err("expected '.globals <int>'".to_string()),
            ".def" => Err("expected '.def <name>: args=<int>, locals=<int>'".to_string()),
            other => Err(format!("unknown directive '{other}'")),
        }
    }
}

fn parse_operands(text: &str) -> Result<Vec<Operand>, String> {
    let tokens = split_operands(text)?;
    if tokens.len() > MAX_OPERANDS {
        return Err(format!(
            "too many operands: {} (at most {MAX_OPERANDS})",
            tokens.len()
        ));
    }
    tokens.into_iter().map(parse_operand).collect()
}

/// Splits on commas that are not inside a string or character literal.
fn split_operands(text: &str) -> Result<Vec<&str>, String> {
    let mut tokens = Vec::new();
    let mut start = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
        if let Some(open) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == open {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            ',' => {
                tokens.push(text[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() {
        return Err("unterminated literal".to_string());
    }
    tokens.push(text[start..].trim());
    if tokens.iter().any(|token| token.is_empty()) {
        return Err("empty operand".to_string());
    }
    Ok(tokens)
}

fn parse_operand(token: &str) -> Result<Operand, String> {
    if let Some(captures) = register_re().captures(token) {
        let number = captures[1]
            .parse::<u32>()
            .ok()
            .filter(|&number| i32::try_from(number).is_ok())
            .ok_or_else(|| format!("invalid register '{token}'"))?;
        return Ok(Operand::Reg(number));
    }
    if let Some(captures) = function_re().captures(token) {
        return Ok(Operand::Func(captures[1].to_string()));
    }
    if float_re().is_match(token) {
        return token
            .parse::<f32>()
            .map(Operand::Float)
            .map_err(|_| format!("invalid float literal '{token}'"));
    }
    if int_re().is_match(token) {
        return token
            .parse::<i32>()
            .map(Operand::Int)
            .map_err(|_| format!("integer literal out of range '{token}'"));
    }
    if token.starts_with('\'') {
        return parse_char_literal(token).map(Operand::Char);
    }
    if token.starts_with('"') {
        return parse_string_literal(token).map(Operand::Str);
    }
    if ident_re().is_match(token) {
        return Ok(Operand::Label(token.to_string()));
    }
    Err(format!("invalid operand '{token}'"))
}

fn parse_char_literal(token: &str) -> Result<char, String> {
    let inner = token
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
        .ok_or_else(|| format!("malformed character literal {token}"))?;
    let decoded = unescape(inner, '\'')?;
    let mut chars = decoded.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) => Ok(ch),
        _ => Err(format!("character literal must hold one character: {token}")),
    }
}

fn parse_string_literal(token: &str) -> Result<String, String> {
    let inner = token
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .filter(|_| token.len() >= 2)
        .ok_or_else(|| format!("malformed string literal {token}"))?;
    unescape(inner, '"')
}

fn unescape(body: &str, quote: char) -> Result<String, String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(ch) = chars.next() {
        if ch == quote {
            return Err(format!("unexpected {quote} inside literal"));
        }
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let mapped = match chars.next() {
            Some('n') => '\n',
            Some('r') => '\r',
            Some('t') => '\t',
            Some('0') => '\0',
            Some('\\') => '\\',
            Some('"') => '"',
            Some('\'') => '\'',
            Some(other) => return Err(format!("invalid escape '\\{other}'")),
            None => return Err("dangling escape at end of literal".to_string()),
        };
        out.push(mapped);
    }
    Ok(out)
}

fn parse_count(text: &str, what: &str) -> Result<u32, String> {
    text.parse::<u32>()
        .map_err(|_| format!("invalid {what} '{text}'"))
}

fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (idx, ch) in line.char_indices() {
        if let Some(open) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == open {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            ';' | '#' => return &line[..idx],
            _ => {}
        }
    }
    line
}

fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern is valid"))
}

fn globals_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"^\.globals\s+(\d+)$")
}

fn def_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(
        &RE,
        r"^\.def\s+([A-Za-z_][A-Za-z0-9_]*)\s*:\s*args\s*=\s*(\d+)\s*,\s*locals\s*=\s*(\d+)$",
    )
}

fn label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"^([A-Za-z_][A-Za-z0-9_]*)\s*:$")
}

fn instruction_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"^([A-Za-z_][A-Za-z0-9_]*)(?:\s+(.+))?$")
}

fn register_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"^[rR](\d+)$")
}

fn function_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"^([A-Za-z_][A-Za-z0-9_]*)\(\)$")
}

fn float_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"^-?(?:\d+\.\d*|\.\d+)$")
}

fn int_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"^-?\d+$")
}

fn ident_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"^[A-Za-z_][A-Za-z0-9_]*$")
}
