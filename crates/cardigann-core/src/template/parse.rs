//! Tokenizer and recursive-descent parser for template text
//!
//! Turns `text {{ action }} text` into a tree of [`Node`]s. Actions hold
//! expressions built from variables, string literals and the supported
//! functions.

use crate::error::{CardigannError, Result};

/// A parsed template fragment
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Text(String),
    Output(Expr),
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    Range {
        index: Option<String>,
        element: Option<String>,
        list: Expr,
        body: Vec<Node>,
    },
}

/// An expression inside an action
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    /// `.Query.Keywords`
    Var(String),
    /// `.` inside a range body
    Dot,
    /// `$name` bound by a range
    Local(String),
    /// `"text"`
    Literal(String),
    Call { func: Func, args: Vec<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Func {
    And,
    Or,
    Eq,
    Ne,
    ReReplace,
    Join,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "and" => Some(Self::And),
            "or" => Some(Self::Or),
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "re_replace" => Some(Self::ReReplace),
            "join" => Some(Self::Join),
            _ => None,
        }
    }

    /// Fixed arity, `None` for variadic functions
    fn arity(self) -> Option<usize> {
        match self {
            Self::And | Self::Or => None,
            Self::Eq | Self::Ne | Self::Join => Some(2),
            Self::ReReplace => Some(3),
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Or => "or",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::ReReplace => "re_replace",
            Self::Join => "join",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Field(String),
    Dot,
    Local(String),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Declare,
}

/// Raw split of the template into text and action bodies
#[derive(Debug)]
enum Segment {
    Text(String),
    Action(String),
}

/// Parses a template into its node tree
pub(crate) fn parse(template: &str) -> Result<Vec<Node>> {
    let segments = split_segments(template)?;
    let mut parser = Parser {
        segments,
        pos: 0,
        source: template,
    };
    let (nodes, terminator) = parser.parse_list()?;
    match terminator {
        Terminator::Eof => Ok(nodes),
        other => Err(parser.error(&format!("unexpected {{{{{}}}}}", other.keyword()))),
    }
}

fn split_segments(template: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let mut text = rest[..start].to_string();
        let mut inner_start = start + 2;
        if rest[inner_start..].starts_with('-') {
            text = text.trim_end().to_string();
            inner_start += 1;
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }

        let end = find_action_end(&rest[inner_start..]).ok_or_else(|| {
            CardigannError::Template(format!("unclosed action in \"{}\"", template))
        })?;
        let mut inner = &rest[inner_start..inner_start + end];
        let mut after = &rest[inner_start + end + 2..];
        if inner.ends_with('-') && inner.len() > 1 {
            inner = &inner[..inner.len() - 1];
            after = after.trim_start();
        }
        segments.push(Segment::Action(inner.trim().to_string()));
        rest = after;
    }

    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }
    Ok(segments)
}

/// Finds the closing `}}`, skipping over string literals
fn find_action_end(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    let mut in_string = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_string => i += 1,
            b'"' => in_string = !in_string,
            b'}' if !in_string && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

fn tokenize(action: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = action.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Declare);
                i += 2;
            }
            '"' => {
                let mut literal = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(CardigannError::Template(format!(
                                "unterminated string in {{{{{}}}}}",
                                action
                            )));
                        }
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            match chars.get(i + 1) {
                                Some('"') => literal.push('"'),
                                Some('\\') => literal.push('\\'),
                                Some('n') => literal.push('\n'),
                                Some('t') => literal.push('\t'),
                                // keep regex escapes such as \d or \s intact
                                Some(other) => {
                                    literal.push('\\');
                                    literal.push(*other);
                                }
                                None => literal.push('\\'),
                            }
                            i += 2;
                        }
                        Some(other) => {
                            literal.push(*other);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(literal));
            }
            '.' => {
                let start = i;
                i += 1;
                while i < chars.len() && is_name_char(chars[i]) {
                    i += 1;
                }
                if i == start + 1 {
                    tokens.push(Token::Dot);
                } else {
                    tokens.push(Token::Field(chars[start..i].iter().collect()));
                }
            }
            '$' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Local(chars[start..i].iter().collect()));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(CardigannError::Template(format!(
                    "unexpected character '{}' in {{{{{}}}}}",
                    other, action
                )));
            }
        }
    }

    Ok(tokens)
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.' || c == '-'
}

enum Terminator {
    Eof,
    End,
    Else,
    ElseIf(Expr),
}

impl Terminator {
    fn keyword(&self) -> &'static str {
        match self {
            Self::Eof => "EOF",
            Self::End => "end",
            Self::Else => "else",
            Self::ElseIf(_) => "else if",
        }
    }
}

struct Parser<'a> {
    segments: Vec<Segment>,
    pos: usize,
    source: &'a str,
}

impl Parser<'_> {
    fn error(&self, message: &str) -> CardigannError {
        CardigannError::Template(format!("{} in \"{}\"", message, self.source))
    }

    fn parse_list(&mut self) -> Result<(Vec<Node>, Terminator)> {
        let mut nodes = Vec::new();

        while self.pos < self.segments.len() {
            let index = self.pos;
            self.pos += 1;
            let action = match &self.segments[index] {
                Segment::Text(text) => {
                    nodes.push(Node::Text(text.clone()));
                    continue;
                }
                Segment::Action(action) => action.clone(),
            };

            let tokens = tokenize(&action)?;
            match tokens.first() {
                None => return Err(self.error("empty action")),
                Some(Token::Ident(word)) if word == "end" => {
                    return Ok((nodes, Terminator::End));
                }
                Some(Token::Ident(word)) if word == "else" => {
                    if matches!(tokens.get(1), Some(Token::Ident(w)) if w == "if") {
                        let cond = self.parse_expression(&tokens[2..])?;
                        return Ok((nodes, Terminator::ElseIf(cond)));
                    }
                    if tokens.len() > 1 {
                        return Err(self.error("unexpected tokens after else"));
                    }
                    return Ok((nodes, Terminator::Else));
                }
                Some(Token::Ident(word)) if word == "if" => {
                    let cond = self.parse_expression(&tokens[1..])?;
                    nodes.push(self.parse_if(cond)?);
                }
                Some(Token::Ident(word)) if word == "range" => {
                    nodes.push(self.parse_range(&tokens[1..])?);
                }
                Some(_) => nodes.push(Node::Output(self.parse_expression(&tokens)?)),
            }
        }

        Ok((nodes, Terminator::Eof))
    }

    fn parse_if(&mut self, first: Expr) -> Result<Node> {
        let mut branches = Vec::new();
        let mut cond = first;
        loop {
            let (body, terminator) = self.parse_list()?;
            branches.push((cond, body));
            match terminator {
                Terminator::End => {
                    return Ok(Node::If {
                        branches,
                        otherwise: Vec::new(),
                    });
                }
                Terminator::ElseIf(next) => cond = next,
                Terminator::Else => {
                    let (otherwise, terminator) = self.parse_list()?;
                    if !matches!(terminator, Terminator::End) {
                        return Err(self.error("missing {{end}} after {{else}}"));
                    }
                    return Ok(Node::If {
                        branches,
                        otherwise,
                    });
                }
                Terminator::Eof => return Err(self.error("missing {{end}} for {{if}}")),
            }
        }
    }

    fn parse_range(&mut self, tokens: &[Token]) -> Result<Node> {
        let (index, element, list_tokens) = match tokens {
            [Token::Local(i), Token::Comma, Token::Local(e), Token::Declare, rest @ ..] => {
                (Some(i.clone()), Some(e.clone()), rest)
            }
            [Token::Local(e), Token::Declare, rest @ ..] => (None, Some(e.clone()), rest),
            rest => (None, None, rest),
        };
        let list = self.parse_expression(list_tokens)?;
        let (body, terminator) = self.parse_list()?;
        if !matches!(terminator, Terminator::End) {
            return Err(self.error("missing {{end}} for {{range}}"));
        }
        Ok(Node::Range {
            index,
            element,
            list,
            body,
        })
    }

    fn parse_expression(&self, tokens: &[Token]) -> Result<Expr> {
        if tokens.is_empty() {
            return Err(self.error("missing expression"));
        }
        let mut cursor = 0;
        let expr = self.parse_command(tokens, &mut cursor)?;
        if cursor != tokens.len() {
            return Err(self.error("unexpected trailing tokens"));
        }
        Ok(expr)
    }

    /// Parses either a function call or a single operand
    ///
    /// Unparenthesized nested calls with a fixed arity take exactly that many
    /// arguments; `and`/`or` take everything up to the closing parenthesis.
    fn parse_command(&self, tokens: &[Token], cursor: &mut usize) -> Result<Expr> {
        let Some(Token::Ident(name)) = tokens.get(*cursor) else {
            return self.parse_operand(tokens, cursor);
        };
        let func = Func::from_name(name)
            .ok_or_else(|| self.error(&format!("unknown function \"{}\"", name)))?;
        *cursor += 1;

        let max = func.arity();
        let mut args = Vec::new();
        while *cursor < tokens.len() && tokens[*cursor] != Token::RParen {
            if max.is_some_and(|m| args.len() >= m) {
                break;
            }
            let arg = if matches!(tokens[*cursor], Token::Ident(_)) {
                self.parse_command(tokens, cursor)?
            } else {
                self.parse_operand(tokens, cursor)?
            };
            args.push(arg);
        }

        self.check_args(func, &args)?;
        Ok(Expr::Call { func, args })
    }

    fn parse_operand(&self, tokens: &[Token], cursor: &mut usize) -> Result<Expr> {
        let token = tokens
            .get(*cursor)
            .ok_or_else(|| self.error("missing operand"))?;
        *cursor += 1;
        match token {
            Token::Field(name) => Ok(Expr::Var(name.clone())),
            Token::Dot => Ok(Expr::Dot),
            Token::Local(name) => Ok(Expr::Local(name.clone())),
            Token::Str(text) => Ok(Expr::Literal(text.clone())),
            Token::LParen => {
                let inner = self.parse_command(tokens, cursor)?;
                match tokens.get(*cursor) {
                    Some(Token::RParen) => {
                        *cursor += 1;
                        Ok(inner)
                    }
                    _ => Err(self.error("missing closing parenthesis")),
                }
            }
            Token::Ident(name) => Err(self.error(&format!("unexpected identifier \"{}\"", name))),
            Token::RParen | Token::Comma | Token::Declare => {
                Err(self.error("unexpected punctuation"))
            }
        }
    }

    fn check_args(&self, func: Func, args: &[Expr]) -> Result<()> {
        let bad = |message: &str| self.error(&format!("{}: {}", func.name(), message));
        match func {
            Func::And | Func::Or => {
                if args.len() < 2 {
                    return Err(bad("needs at least two operands"));
                }
                if args.iter().any(|a| matches!(a, Expr::Literal(_))) {
                    return Err(bad("string literals are not accepted"));
                }
            }
            Func::Eq | Func::Ne => {
                if args.len() != 2 {
                    return Err(bad("needs exactly two operands"));
                }
            }
            Func::ReReplace => {
                if args.len() != 3
                    || !matches!(args[1], Expr::Literal(_))
                    || !matches!(args[2], Expr::Literal(_))
                {
                    return Err(bad("expects a variable, a pattern and a replacement"));
                }
            }
            Func::Join => {
                if args.len() != 2 || !matches!(args[1], Expr::Literal(_)) {
                    return Err(bad("expects a variable and a delimiter"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Expr {
        Expr::Var(name.to_string())
    }

    fn lit(text: &str) -> Expr {
        Expr::Literal(text.to_string())
    }

    #[test]
    fn test_parse_plain_text() {
        let nodes = parse("hello").unwrap();
        assert_eq!(nodes, vec![Node::Text("hello".to_string())]);
    }

    #[test]
    fn test_parse_variable() {
        let nodes = parse("q={{ .Keywords }}&x").unwrap();
        assert_eq!(
            nodes,
            vec![
                Node::Text("q=".to_string()),
                Node::Output(var(".Keywords")),
                Node::Text("&x".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_trim_markers() {
        let nodes = parse("a  {{- .B -}}  c").unwrap();
        assert_eq!(
            nodes,
            vec![
                Node::Text("a".to_string()),
                Node::Output(var(".B")),
                Node::Text("c".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_unparenthesized_nested_logic() {
        let nodes = parse(r#"{{ and eq (.A) "x" eq (.B) "y" }}"#).unwrap();
        assert_eq!(
            nodes,
            vec![Node::Output(Expr::Call {
                func: Func::And,
                args: vec![
                    Expr::Call {
                        func: Func::Eq,
                        args: vec![var(".A"), lit("x")],
                    },
                    Expr::Call {
                        func: Func::Eq,
                        args: vec![var(".B"), lit("y")],
                    },
                ],
            })]
        );
    }

    #[test]
    fn test_parse_if_else() {
        let nodes = parse("{{ if .A }}yes{{ else }}no{{ end }}").unwrap();
        assert_eq!(
            nodes,
            vec![Node::If {
                branches: vec![(var(".A"), vec![Node::Text("yes".to_string())])],
                otherwise: vec![Node::Text("no".to_string())],
            }]
        );
    }

    #[test]
    fn test_parse_range_with_index() {
        let nodes = parse("{{ range $i, $x := .Items }}[{{.}}]{{end}}").unwrap();
        match &nodes[0] {
            Node::Range {
                index,
                element,
                list,
                body,
            } => {
                assert_eq!(index.as_deref(), Some("$i"));
                assert_eq!(element.as_deref(), Some("$x"));
                assert_eq!(list, &var(".Items"));
                assert_eq!(body.len(), 3);
            }
            other => panic!("Expected range, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_regex_literal_keeps_escapes() {
        let nodes = parse(r#"{{ re_replace .Q "\s+" "+" }}"#).unwrap();
        assert_eq!(
            nodes,
            vec![Node::Output(Expr::Call {
                func: Func::ReReplace,
                args: vec![var(".Q"), lit(r"\s+"), lit("+")],
            })]
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("{{ if .A }}x").is_err());
        assert!(parse("{{ end }}").is_err());
        assert!(parse("{{ .A ").is_err());
        assert!(parse("{{ frobnicate .A }}").is_err());
        assert!(parse(r#"{{ and .A "x" }}"#).is_err());
        assert!(parse("{{ eq .A }}").is_err());
    }
}
