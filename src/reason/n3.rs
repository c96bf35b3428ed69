//! A compact Notation3 reader.
//!
//! Knowledge documents interleave Turtle statements with rules of the form
//! `{ body } => { head } .`. The reader tokenizes the whole document once,
//! compiles every rule into an [`InferenceRule`] and forwards every other
//! statement (prefix and base declarations included, byte for byte) to the
//! oxigraph Turtle parser.

use std::collections::HashMap;

use oxigraph::model::vocab::{rdf, xsd};
use oxigraph::model::{Literal, NamedNode, Term, Triple};

use crate::error::{GraphError, ReasonError};
use crate::graph::FactGraph;

use super::ReasonResult;
use super::builtins::{Builtin, LOG_NOT_INCLUDES};
use super::rules::{Filter, Formula, InferenceRule, RuleTerm, TriplePattern};

/// Facts and rules read from one document.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub facts: Vec<Triple>,
    pub rules: Vec<InferenceRule>,
}

impl Program {
    /// Read a document, resolving relative IRIs against `base_iri`.
    pub fn parse(text: &str, base_iri: Option<&str>) -> ReasonResult<Self> {
        let tokens = tokenize(text)?;
        let mut reader = Reader {
            text,
            tokens: &tokens,
            pos: 0,
            prefixes: HashMap::new(),
            base: base_iri.map(str::to_string),
            turtle: String::new(),
            rules: Vec::new(),
            anonymous: 0,
        };
        reader.read_document()?;
        let facts = FactGraph::parse_str(&reader.turtle, base_iri)?.into_triples();
        Ok(Self {
            facts,
            rules: reader.rules,
        })
    }
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Iri(String),
    Str(String),
    /// Prefixed names, keywords, numbers and `a`.
    Word(String),
    Var(String),
    Blank(String),
    /// `@prefix`, `@base` and language tags.
    At(String),
    Punct(char),
    Implies,
    Carets,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    start: usize,
    end: usize,
}

fn syntax(offset: usize, message: impl Into<String>) -> ReasonError {
    ReasonError::Syntax {
        offset,
        message: message.into(),
    }
}

fn is_delimiter(b: u8) -> bool {
    matches!(
        b,
        b' ' | b'\t'
            | b'\r'
            | b'\n'
            | b'<'
            | b'>'
            | b'"'
            | b'\''
            | b'{'
            | b'}'
            | b'['
            | b']'
            | b'('
            | b')'
            | b';'
            | b','
            | b'^'
            | b'#'
    )
}

fn tokenize(text: &str) -> ReasonResult<Vec<Token>> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        let (tok, end) = match bytes[i] {
            b' ' | b'\t' | b'\r' | b'\n' => {
                i += 1;
                continue;
            }
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'<' => {
                let close = text[i + 1..]
                    .find('>')
                    .map(|n| i + 1 + n)
                    .ok_or_else(|| syntax(i, "unterminated IRI"))?;
                (Tok::Iri(text[i + 1..close].to_string()), close + 1)
            }
            b'"' | b'\'' => {
                let (value, end) = read_string(text, i)?;
                (Tok::Str(value), end)
            }
            c @ (b'{' | b'}' | b'[' | b']' | b'(' | b')' | b';' | b',' | b'.') => {
                (Tok::Punct(c as char), i + 1)
            }
            b'=' if bytes.get(i + 1) == Some(&b'>') => (Tok::Implies, i + 2),
            b'^' if bytes.get(i + 1) == Some(&b'^') => (Tok::Carets, i + 2),
            _ => {
                let mut end = i;
                while end < bytes.len() && !is_delimiter(bytes[end]) {
                    end += 1;
                }
                if end == i {
                    return Err(syntax(i, format!("unexpected character `{}`", bytes[i] as char)));
                }
                // A trailing `.` terminates the statement, it is not part of the word.
                while end > i + 1 && bytes[end - 1] == b'.' {
                    end -= 1;
                }
                let word = &text[i..end];
                let tok = if let Some(var) = word.strip_prefix('?') {
                    Tok::Var(var.to_string())
                } else if let Some(label) = word.strip_prefix("_:") {
                    Tok::Blank(label.to_string())
                } else if let Some(keyword) = word.strip_prefix('@') {
                    Tok::At(keyword.to_string())
                } else {
                    Tok::Word(word.to_string())
                };
                (tok, end)
            }
        };
        tokens.push(Token { tok, start, end });
        i = end;
    }
    Ok(tokens)
}

/// Read a short (`"..."`) or long (`"""..."""`) string starting at `start`.
/// Returns the unescaped value and the offset just past the closing quote.
fn read_string(text: &str, start: usize) -> ReasonResult<(String, usize)> {
    let bytes = text.as_bytes();
    let quote = bytes[start];
    let long = bytes.get(start + 1) == Some(&quote) && bytes.get(start + 2) == Some(&quote);
    let body = if long { start + 3 } else { start + 1 };
    let closing: String = std::iter::repeat_n(quote as char, if long { 3 } else { 1 }).collect();

    let mut value = String::new();
    let mut chars = text[body..].char_indices();
    while let Some((offset, ch)) = chars.next() {
        let pos = body + offset;
        if ch == '\\' {
            let (_, escaped) = chars
                .next()
                .ok_or_else(|| syntax(pos, "dangling escape"))?;
            match escaped {
                'n' => value.push('\n'),
                't' => value.push('\t'),
                'r' => value.push('\r'),
                'b' => value.push('\u{8}'),
                'f' => value.push('\u{c}'),
                'u' | 'U' => {
                    let width = if escaped == 'u' { 4 } else { 8 };
                    let hex: String = chars.by_ref().take(width).map(|(_, c)| c).collect();
                    let decoded = u32::from_str_radix(&hex, 16)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or_else(|| syntax(pos, format!("invalid unicode escape \\{escaped}{hex}")))?;
                    value.push(decoded);
                }
                other => value.push(other),
            }
            continue;
        }
        if text[pos..].starts_with(&closing) {
            return Ok((value, pos + closing.len()));
        }
        if !long && ch == '\n' {
            return Err(syntax(pos, "newline in short string"));
        }
        value.push(ch);
    }
    Err(syntax(start, "unterminated string"))
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

struct Reader<'a> {
    text: &'a str,
    tokens: &'a [Token],
    pos: usize,
    prefixes: HashMap<String, String>,
    base: Option<String>,
    /// Non-rule statements, forwarded to the Turtle parser.
    turtle: String,
    rules: Vec<InferenceRule>,
    anonymous: usize,
}

impl<'a> Reader<'a> {
    fn peek(&self) -> Option<&'a Token> {
        let tokens = self.tokens;
        tokens.get(self.pos)
    }

    fn peek_tok(&self) -> Option<&'a Tok> {
        self.peek().map(|t| &t.tok)
    }

    fn next(&mut self) -> ReasonResult<&'a Token> {
        let token = self
            .peek()
            .ok_or_else(|| syntax(self.text.len(), "unexpected end of document"))?;
        self.pos += 1;
        Ok(token)
    }

    fn offset(&self) -> usize {
        self.peek().map_or(self.text.len(), |t| t.start)
    }

    fn expect_punct(&mut self, expected: char) -> ReasonResult<()> {
        let token = self.next()?;
        if token.tok == Tok::Punct(expected) {
            Ok(())
        } else {
            Err(syntax(token.start, format!("expected `{expected}`")))
        }
    }

    fn expect_iri(&mut self) -> ReasonResult<String> {
        let token = self.next()?;
        match &token.tok {
            Tok::Iri(iri) => Ok(self.resolve(iri)),
            _ => Err(syntax(token.start, "expected an IRI")),
        }
    }

    /// Copy the source text from `start` to the end of the last consumed token.
    fn passthrough(&mut self, start: usize) {
        let end = self.tokens[self.pos - 1].end;
        self.turtle.push_str(&self.text[start..end]);
        self.turtle.push('\n');
    }

    fn read_document(&mut self) -> ReasonResult<()> {
        while let Some(token) = self.peek() {
            let start = token.start;
            match &token.tok {
                Tok::At(keyword) if keyword == "prefix" => {
                    self.pos += 1;
                    self.prefix_declaration()?;
                    self.expect_punct('.')?;
                }
                Tok::At(keyword) if keyword == "base" => {
                    self.pos += 1;
                    self.base = Some(self.expect_iri()?);
                    self.expect_punct('.')?;
                }
                Tok::Word(keyword) if keyword.eq_ignore_ascii_case("prefix") => {
                    self.pos += 1;
                    self.prefix_declaration()?;
                }
                Tok::Word(keyword) if keyword.eq_ignore_ascii_case("base") => {
                    self.pos += 1;
                    self.base = Some(self.expect_iri()?);
                }
                Tok::Punct('{') => {
                    self.rule(start)?;
                    continue;
                }
                _ => self.skip_statement()?,
            }
            self.passthrough(start);
        }
        Ok(())
    }

    fn prefix_declaration(&mut self) -> ReasonResult<()> {
        let token = self.next()?;
        let name = match &token.tok {
            Tok::Word(word) if word.ends_with(':') => word[..word.len() - 1].to_string(),
            _ => return Err(syntax(token.start, "expected a prefix name ending in `:`")),
        };
        let iri = self.expect_iri()?;
        self.prefixes.insert(name, iri);
        Ok(())
    }

    fn skip_statement(&mut self) -> ReasonResult<()> {
        let mut depth = 0usize;
        loop {
            let token = self.next()?;
            match token.tok {
                Tok::Punct('[' | '(' | '{') => depth += 1,
                Tok::Punct(']' | ')' | '}') => depth = depth.saturating_sub(1),
                Tok::Punct('.') if depth == 0 => return Ok(()),
                _ => {}
            }
        }
    }

    fn rule(&mut self, start: usize) -> ReasonResult<()> {
        self.expect_punct('{')?;
        let body = self.formula()?;
        let token = self.next()?;
        if token.tok != Tok::Implies {
            return Err(syntax(token.start, "expected `=>` after rule body"));
        }
        self.expect_punct('{')?;
        let head = self.formula()?;
        if !head.filters.is_empty() {
            return Err(ReasonError::Unsupported {
                construct: "builtins or nested formulas in a rule head".into(),
            });
        }
        self.expect_punct('.')?;
        self.rules.push(InferenceRule {
            name: format!("rule@{start}"),
            body,
            head: head.patterns,
        });
        Ok(())
    }

    /// Read statements up to and including the closing `}`.
    fn formula(&mut self) -> ReasonResult<Formula> {
        let mut formula = Formula::default();
        loop {
            match self.peek_tok() {
                Some(Tok::Punct('}')) => {
                    self.pos += 1;
                    return Ok(formula);
                }
                Some(Tok::Punct('.')) => self.pos += 1,
                None => return Err(syntax(self.text.len(), "unterminated formula")),
                Some(_) => {
                    let subject = self.node(&mut formula)?;
                    self.predicate_object_list(&subject, &mut formula)?;
                }
            }
        }
    }

    fn predicate_object_list(&mut self, subject: &RuleTerm, formula: &mut Formula) -> ReasonResult<()> {
        loop {
            let verb = match self.peek_tok() {
                Some(Tok::Word(word)) if word == "a" => {
                    self.pos += 1;
                    RuleTerm::Constant(rdf::TYPE.into_owned().into())
                }
                _ => self.term()?,
            };
            loop {
                self.object(subject, &verb, formula)?;
                if self.peek_tok() == Some(&Tok::Punct(',')) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            if self.peek_tok() != Some(&Tok::Punct(';')) {
                return Ok(());
            }
            while self.peek_tok() == Some(&Tok::Punct(';')) {
                self.pos += 1;
            }
            if matches!(self.peek_tok(), Some(Tok::Punct('.' | '}' | ']')) | None) {
                return Ok(());
            }
        }
    }

    fn object(&mut self, subject: &RuleTerm, verb: &RuleTerm, formula: &mut Formula) -> ReasonResult<()> {
        let negates = matches!(verb, RuleTerm::Constant(Term::NamedNode(n)) if n.as_str() == LOG_NOT_INCLUDES);

        if self.peek_tok() == Some(&Tok::Punct('{')) {
            if !negates {
                return Err(ReasonError::Unsupported {
                    construct: "formula objects other than log:notIncludes".into(),
                });
            }
            self.pos += 1;
            let nested = self.formula()?;
            formula.filters.push(Filter::NotIncludes(nested));
            return Ok(());
        }
        if negates {
            return Err(syntax(self.offset(), "log:notIncludes expects a `{ ... }` formula"));
        }

        let object = self.node(formula)?;
        if let RuleTerm::Constant(Term::NamedNode(predicate)) = verb {
            if let Some(builtin) = Builtin::from_iri(predicate.as_str()) {
                formula.filters.push(Filter::Compare {
                    builtin,
                    left: subject.clone(),
                    right: object,
                });
                return Ok(());
            }
        }
        formula
            .patterns
            .push(TriplePattern::new(subject.clone(), verb.clone(), object));
        Ok(())
    }

    /// A term, or a `[ ... ]` blank node property list whose statements are
    /// added to `formula`.
    fn node(&mut self, formula: &mut Formula) -> ReasonResult<RuleTerm> {
        match self.peek_tok() {
            Some(Tok::Punct('[')) => {
                self.pos += 1;
                let node = RuleTerm::Blank(format!("[{}]", self.anonymous));
                self.anonymous += 1;
                if self.peek_tok() == Some(&Tok::Punct(']')) {
                    self.pos += 1;
                } else {
                    self.predicate_object_list(&node, formula)?;
                    self.expect_punct(']')?;
                }
                Ok(node)
            }
            Some(Tok::Punct('(')) => Err(ReasonError::Unsupported {
                construct: "RDF collections inside rules".into(),
            }),
            _ => self.term(),
        }
    }

    fn term(&mut self) -> ReasonResult<RuleTerm> {
        let token = self.next()?;
        let term = match &token.tok {
            Tok::Iri(iri) => RuleTerm::Constant(self.named_node(self.resolve(iri))?.into()),
            Tok::Var(name) => RuleTerm::Variable(name.clone()),
            Tok::Blank(label) => RuleTerm::Blank(label.clone()),
            Tok::Str(value) => RuleTerm::Constant(self.literal(value.clone())?.into()),
            Tok::Word(word) => RuleTerm::Constant(self.word(word, token.start)?),
            other => return Err(syntax(token.start, format!("unexpected {other:?}"))),
        };
        Ok(term)
    }

    /// Finish a string literal with an optional language tag or datatype.
    fn literal(&mut self, value: String) -> ReasonResult<Literal> {
        match self.peek_tok() {
            Some(Tok::At(language)) => {
                let offset = self.offset();
                self.pos += 1;
                Literal::new_language_tagged_literal(value, language.as_str())
                    .map_err(|e| syntax(offset, e.to_string()))
            }
            Some(Tok::Carets) => {
                self.pos += 1;
                let datatype = match self.term()? {
                    RuleTerm::Constant(Term::NamedNode(node)) => node,
                    _ => return Err(syntax(self.offset(), "datatype must be an IRI")),
                };
                Ok(Literal::new_typed_literal(value, datatype))
            }
            _ => Ok(Literal::new_simple_literal(value)),
        }
    }

    fn word(&self, word: &str, offset: usize) -> ReasonResult<Term> {
        match word {
            "true" => return Ok(Literal::from(true).into()),
            "false" => return Ok(Literal::from(false).into()),
            _ => {}
        }
        let numeric = word
            .trim_start_matches(['+', '-'])
            .starts_with(|c: char| c.is_ascii_digit() || c == '.');
        if numeric {
            let datatype = if word.contains(['e', 'E']) {
                xsd::DOUBLE
            } else if word.contains('.') {
                xsd::DECIMAL
            } else {
                xsd::INTEGER
            };
            return Ok(Literal::new_typed_literal(word, datatype).into());
        }
        let (prefix, local) = word
            .split_once(':')
            .ok_or_else(|| syntax(offset, format!("unexpected word `{word}`")))?;
        let namespace = self
            .prefixes
            .get(prefix)
            .ok_or_else(|| ReasonError::UnknownPrefix {
                prefix: prefix.to_string(),
            })?;
        Ok(self.named_node(format!("{namespace}{local}"))?.into())
    }

    fn named_node(&self, iri: String) -> ReasonResult<NamedNode> {
        NamedNode::new(iri.as_str()).map_err(|e| {
            GraphError::InvalidIri {
                iri,
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Resolve a possibly relative IRI reference against the current base.
    fn resolve(&self, iri: &str) -> String {
        let has_scheme = iri
            .split_once(':')
            .is_some_and(|(scheme, _)| !scheme.is_empty() && !scheme.contains(['/', '#', '?']));
        let Some(base) = self.base.as_deref() else {
            return iri.to_string();
        };
        if has_scheme {
            return iri.to_string();
        }
        if iri.is_empty() {
            return base.to_string();
        }
        if iri.starts_with('#') {
            let document = base.split('#').next().unwrap_or(base);
            return format!("{document}{iri}");
        }
        if iri.starts_with('/') {
            let authority_end = base
                .find("://")
                .and_then(|scheme_end| {
                    base[scheme_end + 3..]
                        .find('/')
                        .map(|n| scheme_end + 3 + n)
                })
                .unwrap_or(base.len());
            return format!("{}{iri}", &base[..authority_end]);
        }
        let directory = base.rfind('/').map_or(base, |n| &base[..=n]);
        format!("{directory}{iri}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
        @prefix dtou: <http://example.org/ns#> .
        @prefix math: <http://www.w3.org/2000/10/swap/math#> .
        @prefix log: <http://www.w3.org/2000/10/swap/log#> .

        <#app> a dtou:AppPolicy ; dtou:output_spec [ dtou:port <#p1> ] .
        <#p1> dtou:name "out1" . # trailing comment

        { ?x a dtou:AppPolicy ; dtou:output_spec ?os . ?os dtou:port ?p . }
            => { ?p a dtou:Port ; dtou:owner ?x } .

        { ?c dtou:limit ?l . ?c dtou:count ?n . ?n math:lessThan ?l .
          _:s log:notIncludes { ?c dtou:blocked true } }
            => { [] a dtou:Allowed ; dtou:for ?c } .
    "#;

    #[test]
    fn separates_rules_from_facts() {
        let program = Program::parse(DOC, Some("http://localhost:3000/")).unwrap();
        assert_eq!(program.facts.len(), 4);
        assert_eq!(program.rules.len(), 2);
    }

    #[test]
    fn compiles_abbreviations_and_builtins() {
        let program = Program::parse(DOC, Some("http://localhost:3000/")).unwrap();
        let first = &program.rules[0];
        assert_eq!(first.body.patterns.len(), 3);
        assert_eq!(first.head.len(), 2);

        let second = &program.rules[1];
        assert_eq!(second.body.patterns.len(), 2);
        assert_eq!(second.body.filters.len(), 2);
        assert!(matches!(
            second.body.filters[0],
            Filter::Compare { builtin: Builtin::LessThan, .. }
        ));
        assert!(second.is_stratified());
        assert!(matches!(second.head[0].subject, RuleTerm::Blank(_)));
    }

    #[test]
    fn relative_iris_resolve_against_base() {
        let program = Program::parse(DOC, Some("http://localhost:3000/apps/x")).unwrap();
        let subject = crate::graph::subject_term(&program.facts[0]);
        assert_eq!(
            crate::graph::term_value(&subject),
            "http://localhost:3000/apps/x#app"
        );
    }

    #[test]
    fn literals_in_rules() {
        let doc = r#"
            @prefix : <http://x/> .
            @prefix xsd: <http://www.w3.org/2001/XMLSchema#> .
            { ?s :p "a\"b"@en, 1.5, "2024-01-01T00:00:00Z"^^xsd:dateTime, false } => { ?s :q 42 } .
        "#;
        let program = Program::parse(doc, None).unwrap();
        let objects: Vec<&RuleTerm> = program.rules[0]
            .body
            .patterns
            .iter()
            .map(|p| &p.object)
            .collect();
        assert_eq!(objects.len(), 4);
        let RuleTerm::Constant(Term::Literal(quoted)) = objects[0] else {
            panic!("expected a literal");
        };
        assert_eq!(quoted.value(), "a\"b");
        assert_eq!(quoted.language(), Some("en"));
        let RuleTerm::Constant(Term::Literal(decimal)) = objects[1] else {
            panic!("expected a literal");
        };
        assert_eq!(decimal.datatype(), xsd::DECIMAL);
    }

    #[test]
    fn unknown_prefix_is_reported() {
        let err = Program::parse("{ ?s nope:p ?o } => { ?s nope:q ?o } .", None).unwrap_err();
        assert!(matches!(err, ReasonError::UnknownPrefix { prefix } if prefix == "nope"));
    }

    #[test]
    fn unterminated_rule_is_a_syntax_error() {
        let err = Program::parse("@prefix : <http://x/> . { ?s :p ?o } => { ?s :q ?o ", None)
            .unwrap_err();
        assert!(matches!(err, ReasonError::Syntax { .. }));
    }

    #[test]
    fn sparql_style_prefixes_pass_through() {
        let doc = "PREFIX ex: <http://x/>\nex:a ex:b ex:c .\n{ ?s ex:b ?o } => { ?o ex:c ?s } .";
        let program = Program::parse(doc, None).unwrap();
        assert_eq!(program.facts.len(), 1);
        assert_eq!(program.rules.len(), 1);
    }
}
